//! Inbound WebSocket messages and the control frames sent back.

use serde_json::{json, Value};

use conduit_core::errors::OrchestrationError;
use conduit_core::ids::{ChannelName, EntryId, SessionId};
use conduit_core::mcp_config::McpConfig;

#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Ack {
        stream_id: EntryId,
        result_channel: ChannelName,
    },
    Request {
        user_input: String,
        mcp_config: McpConfig,
    },
}

pub fn parse_inbound(text: &str) -> Result<Inbound, OrchestrationError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| OrchestrationError::Validation(format!("Invalid JSON message: {e}")))?;
    if !value.is_object() {
        return Err(OrchestrationError::Validation(
            "Message must be a JSON object".into(),
        ));
    }

    if value.get("type").and_then(Value::as_str) == Some("ack") {
        return parse_ack(&value);
    }

    let user_input = value
        .get("user_input")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| OrchestrationError::Validation("User input is missing".into()))?;
    let mcp_config = McpConfig::from_value(value.get("mcp_config"))?;

    Ok(Inbound::Request {
        user_input: user_input.to_string(),
        mcp_config,
    })
}

fn parse_ack(value: &Value) -> Result<Inbound, OrchestrationError> {
    let field = |name: &str| {
        value
            .get(name)
            .and_then(Value::as_str)
            .ok_or_else(|| OrchestrationError::Validation(format!("Ack is missing {name}")))
    };
    let stream_id = field("stream_id")?
        .parse::<EntryId>()
        .map_err(|e| OrchestrationError::Validation(e.to_string()))?;
    let result_channel = ChannelName::from_raw(field("result_channel")?);
    Ok(Inbound::Ack {
        stream_id,
        result_channel,
    })
}

pub fn session_established(session_id: &SessionId) -> String {
    json!({ "type": "session_established", "session_id": session_id.as_str() }).to_string()
}

pub fn processing(channel: &ChannelName) -> String {
    json!({ "status": "processing", "result_channel": channel.as_str() }).to_string()
}

/// Rejection frame carrying the bare message.
pub fn error(err: &OrchestrationError) -> String {
    json!({ "error": err.message() }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Value {
        json!({"connections": [{"name": "web", "transport": "streamable_http", "url": "http://localhost:9000/mcp"}]})
    }

    #[test]
    fn request_parses() {
        let text = json!({"user_input": "weather?", "mcp_config": config()}).to_string();
        let Inbound::Request {
            user_input,
            mcp_config,
        } = parse_inbound(&text).unwrap()
        else {
            panic!("expected request");
        };
        assert_eq!(user_input, "weather?");
        assert_eq!(mcp_config.server_names(), vec!["web".to_string()]);
    }

    #[test]
    fn missing_input_rejected() {
        for body in [json!({"mcp_config": config()}), json!({"user_input": "  ", "mcp_config": config()})] {
            let err = parse_inbound(&body.to_string()).unwrap_err();
            assert_eq!(error(&err), r#"{"error":"User input is missing"}"#);
        }
    }

    #[test]
    fn missing_config_rejected() {
        let err = parse_inbound(r#"{"user_input": "hi"}"#).unwrap_err();
        assert_eq!(err.message(), "Invalid MCP configuration");
    }

    #[test]
    fn malformed_config_rejected() {
        let err = parse_inbound(r#"{"user_input": "hi", "mcp_config": {"connections": 5}}"#)
            .unwrap_err();
        assert!(err.message().starts_with("Invalid MCP config format"));
    }

    #[test]
    fn ack_parses() {
        let text = r#"{"type": "ack", "stream_id": "1700000000000-3", "result_channel": "chat_response_s_n"}"#;
        assert_eq!(
            parse_inbound(text).unwrap(),
            Inbound::Ack {
                stream_id: EntryId {
                    millis: 1_700_000_000_000,
                    seq: 3
                },
                result_channel: ChannelName::from_raw("chat_response_s_n"),
            }
        );
        assert!(parse_inbound(r#"{"type": "ack", "stream_id": "x"}"#).is_err());
    }

    #[test]
    fn non_json_rejected() {
        assert!(parse_inbound("hello").is_err());
        assert!(parse_inbound("[1]").is_err());
    }

    #[test]
    fn control_frames() {
        let frame: Value = serde_json::from_str(&processing(&ChannelName::from_raw("c"))).unwrap();
        assert_eq!(frame, json!({"status": "processing", "result_channel": "c"}));
        let frame: Value =
            serde_json::from_str(&session_established(&SessionId::from_raw("s"))).unwrap();
        assert_eq!(frame["type"], "session_established");
        assert_eq!(frame["session_id"], "s");
    }
}
