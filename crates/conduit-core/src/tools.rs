use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::OrchestrationError;

pub type JsonMap = Map<String, Value>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParameter {
    #[serde(rename = "param_name")]
    pub name: String,
    #[serde(rename = "type")]
    pub declared_type: String,
}

/// A tool advertised by one MCP server. Immutable once discovered.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub server_name: String,
    pub tool_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
}

impl ToolDescriptor {
    /// Build a descriptor from a JSON-schema style input schema.
    ///
    /// Only parameters listed under `required` are kept, in that order. A
    /// parameter without a declared `type` is reported as `unknown`.
    pub fn from_input_schema(
        server_name: impl Into<String>,
        tool_name: impl Into<String>,
        description: impl Into<String>,
        schema: &JsonMap,
    ) -> Self {
        let properties = schema.get("properties").and_then(Value::as_object);
        let parameters = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|required| {
                required
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|name| ToolParameter {
                        name: name.to_string(),
                        declared_type: properties
                            .and_then(|p| p.get(name))
                            .and_then(|p| p.get("type"))
                            .and_then(Value::as_str)
                            .unwrap_or("unknown")
                            .to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            server_name: server_name.into(),
            tool_name: tool_name.into(),
            description: description.into(),
            parameters,
        }
    }

    fn render(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|p| format!("{}: {}", p.name, p.declared_type))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "server_name: {}\ntool_name: {}\ndescription: {}\nparameters: {}\n",
            self.server_name, self.tool_name, self.description, params
        )
    }
}

/// Per-session directory of tools keyed by server name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCatalog {
    servers: BTreeMap<String, Vec<ToolDescriptor>>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_server(&mut self, server_name: impl Into<String>, tools: Vec<ToolDescriptor>) {
        self.servers.insert(server_name.into(), tools);
    }

    pub fn servers(&self) -> &BTreeMap<String, Vec<ToolDescriptor>> {
        &self.servers
    }

    pub fn contains_server(&self, server_name: &str) -> bool {
        self.servers.contains_key(server_name)
    }

    pub fn server_names(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    /// `required - keys(self)`.
    pub fn missing<'a, I>(&self, required: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        required
            .into_iter()
            .filter(|name| !self.servers.contains_key(*name))
            .map(str::to_string)
            .collect()
    }

    /// Merge `other` into `self`. Servers present in both take `other`'s tools.
    pub fn merge(&mut self, other: ToolCatalog) {
        self.servers.extend(other.servers);
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn tool_count(&self) -> usize {
        self.servers.values().map(Vec::len).sum()
    }

    /// Prompt text listing every tool, one block per tool.
    pub fn render(&self) -> String {
        self.servers
            .values()
            .flatten()
            .map(ToolDescriptor::render)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl FromIterator<(String, Vec<ToolDescriptor>)> for ToolCatalog {
    fn from_iter<T: IntoIterator<Item = (String, Vec<ToolDescriptor>)>>(iter: T) -> Self {
        Self {
            servers: iter.into_iter().collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    #[serde(default)]
    pub input_data: JsonMap,
    pub rank: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationPlan {
    #[serde(default)]
    pub tools: Vec<ToolInvocation>,
}

impl ToolInvocationPlan {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invocations in execution order: ascending rank, insertion order on ties.
    pub fn into_ordered(self) -> Result<Vec<ToolInvocation>, OrchestrationError> {
        if let Some(bad) = self.tools.iter().find(|t| t.rank == 0) {
            return Err(OrchestrationError::Validation(format!(
                "tool '{}' has rank 0; ranks start at 1",
                bad.tool_name
            )));
        }

        let mut tools = self.tools;
        tools.sort_by_key(|t| t.rank);
        for pair in tools.windows(2) {
            if pair[0].rank == pair[1].rank {
                tracing::warn!(
                    rank = pair[0].rank,
                    first = %pair[0].tool_name,
                    second = %pair[1].tool_name,
                    "duplicate rank in plan, keeping insertion order"
                );
            }
        }
        Ok(tools)
    }
}

/// What a tool returned: structured JSON or raw text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Text(String),
    Structured(Value),
}

impl ToolOutput {
    /// The most answer-like part of the output.
    pub fn answer(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(value) => {
                let picked = value
                    .get("result_answer")
                    .or_else(|| value.get("result"))
                    .unwrap_or(value);
                match picked {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }
            }
        }
    }

    pub fn to_json_string(&self) -> String {
        match self {
            Self::Text(text) => Value::String(text.clone()).to_string(),
            Self::Structured(value) => value.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationResult {
    pub tool_name: String,
    pub input_data: JsonMap,
    pub output: ToolOutput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One line per result, in execution order.
pub fn format_summary(results: &[ToolInvocationResult]) -> String {
    results
        .iter()
        .map(|r| format!("Tool '{}' executed: {}", r.tool_name, r.output.answer()))
        .collect::<Vec<_>>()
        .join("\n")
}
