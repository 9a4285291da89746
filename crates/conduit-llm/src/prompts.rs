//! System prompts for the JSON-mode decisions.

use conduit_core::decision::DecisionContext;
use conduit_core::tools::{ToolInvocation, ToolInvocationResult};

const ROUTER: &str = "\
Decide whether any part of the user's request can be served by one of the tools listed below.
Judge by tool description and parameter names, not only by tool name.
A request that asks for an action a tool performs, or that supplies a value matching a tool parameter, needs tools.
For compound requests, one eligible part is enough.
Answer false only when no listed tool can help with any part of the request.
Reply with JSON only: {\"use_tools\": true} or {\"use_tools\": false}.";

const PLANNER: &str = "\
Select the tools needed to fulfil the current user request, and for each one give its input and execution rank.
Use tool names exactly as listed, including case, dashes and underscores. Never invent a tool or a parameter.
Use parameter names exactly as listed. String parameters take plain strings, not nested objects.
Break multi-step requests into separate invocations. Ranks are integers starting at 1; lower ranks run first.
Only include tools the current request needs. Earlier conversation matters only when the request refers to it.
If an identifier is missing, look for it in the conversation before planning a lookup tool.
Reply with JSON only: {\"tools\": [{\"tool_name\": \"...\", \"input_data\": {...}, \"rank\": 1}]}.
Reply {\"tools\": []} if nothing applies.";

const REFINER: &str = "\
Improve one planned tool invocation before it runs.
Fill its input with every concrete detail available from the user request, the conversation, and the results of earlier steps: names, identifiers, addresses, numbers.
Never refer to earlier results vaguely; copy the specific facts in.
Only use parameters from the tool's parameter list. Keep the tool name and the rank unchanged.
Reply with JSON only, in the shape {\"tool_name\": \"...\", \"input_data\": {...}, \"rank\": N}.";

fn context_block(ctx: &DecisionContext) -> String {
    format!(
        "Available tools:\n{}\n\nConversation so far:\n{}",
        none_if_blank(&ctx.catalog_text),
        none_if_blank(&ctx.history_text()),
    )
}

fn none_if_blank(text: &str) -> &str {
    if text.trim().is_empty() {
        "(none)"
    } else {
        text
    }
}

pub fn route(ctx: &DecisionContext) -> (String, String) {
    (
        format!("{ROUTER}\n\n{}", context_block(ctx)),
        ctx.input.clone(),
    )
}

pub fn plan(ctx: &DecisionContext) -> (String, String) {
    (
        format!("{PLANNER}\n\n{}", context_block(ctx)),
        ctx.input.clone(),
    )
}

pub fn refine(
    ctx: &DecisionContext,
    invocation: &ToolInvocation,
    previous: &[ToolInvocationResult],
) -> (String, String) {
    let planned = serde_json::to_string(invocation).unwrap_or_default();
    let earlier = if previous.is_empty() {
        "(none)".to_string()
    } else {
        previous
            .iter()
            .map(|r| format!("{}: {}", r.tool_name, r.output.answer()))
            .collect::<Vec<_>>()
            .join("\n")
    };
    (
        format!("{REFINER}\n\n{}", context_block(ctx)),
        format!(
            "User request: {}\n\nPlanned invocation: {planned}\n\nEarlier results:\n{earlier}",
            ctx.input
        ),
    )
}
