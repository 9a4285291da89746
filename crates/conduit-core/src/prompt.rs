use serde::{Deserialize, Serialize};

use crate::errors::OrchestrationError;

const CONVERSATIONAL_ROLE: &str = "\
You are a conversational assistant. You do not invoke tools yourself.
Reply in clear, friendly, natural language.
If a tool invocation failed, explain what was attempted and what went wrong, then suggest a next step.
If required information is missing, ask one precise clarifying question.
If the user asks what you can do, describe the available tools below by name, purpose and parameters.
If you do not know the answer, say so plainly.";

const SUMMARIZING_ROLE: &str = "\
You turn tool results into a readable answer without dropping any data.
For a single result, present the information directly.
For several results, describe each tool's contribution in the order it ran: \
\"The <tool> was used to <action>. Results: <data>\".
Keep every number, URL, identifier and source. Convert JSON into prose.
Use markdown: **bold** for tool names and key facts, bullet lists, code blocks for raw data.
Do not repeat the user's question.";

/// Inputs available to a response path.
#[derive(Clone, Debug, Default)]
pub struct ResponseContext {
    pub input: String,
    pub history_text: String,
    pub catalog_text: String,
    /// Fallback diagnostic that replaces the user turn.
    pub diagnostic: Option<String>,
    /// Combined tool results; required for summarizing.
    pub final_result: Option<String>,
}

/// System + user prompt handed to the streaming responder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

/// The closed set of streamed response paths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    Conversational,
    Summarizing,
}

impl ResponseKind {
    pub fn agent_name(&self) -> &'static str {
        match self {
            Self::Conversational => "chat_agent",
            Self::Summarizing => "summary_agent",
        }
    }

    pub fn render(&self, ctx: &ResponseContext) -> Result<RenderedPrompt, OrchestrationError> {
        match self {
            Self::Conversational => Ok(RenderedPrompt {
                system: format!(
                    "{CONVERSATIONAL_ROLE}\n\nAvailable tools:\n{}\n\nConversation so far:\n{}",
                    or_none(&ctx.catalog_text),
                    or_none(&ctx.history_text),
                ),
                user: ctx.diagnostic.clone().unwrap_or_else(|| ctx.input.clone()),
            }),
            Self::Summarizing => {
                let results = ctx.final_result.as_deref().ok_or_else(|| {
                    OrchestrationError::Validation(
                        "summarizing response requires tool results".into(),
                    )
                })?;
                Ok(RenderedPrompt {
                    system: SUMMARIZING_ROLE.to_string(),
                    user: format!("User request: {}\n\nTool results:\n{results}", ctx.input),
                })
            }
        }
    }
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() {
        "(none)"
    } else {
        text
    }
}

/// Prompt for a fallback turn after planning or execution could not proceed.
pub fn fallback_diagnostic(query: &str, error: Option<&str>) -> String {
    match error {
        Some(err) => format!(
            "There was a problem invoking a tool for this user input: {query}.\n\
             Error details: {err}\n\
             Please provide a helpful, conversational response for the user, \
             suggest next steps or ask a clarifying question."
        ),
        None => format!(
            "Failed to invoke a tool for this user input: {query}.\n\
             Please provide a helpful conversational response, summary, or ask a clarifying question."
        ),
    }
}
