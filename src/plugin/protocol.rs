// ABOUTME: Line-delimited JSON wire protocol between the plugin host and a worker process.
// ABOUTME: One JSON object per line on stdin/stdout; unknown lines are logged and skipped, never fatal.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use switchyard_core::ToolDefinition;

/// Messages a worker writes to its stdout, one per line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Sent once after startup, announcing the worker's initial tool list.
    Ready { tools: Vec<ToolDefinition> },
    /// A tool added dynamically after the handshake.
    RegisterTool { tool: ToolDefinition },
    /// Answer to an outstanding `execute`.
    Result {
        id: u64,
        output: Value,
        #[serde(default)]
        is_error: bool,
    },
    /// Unrecoverable load failure; the worker exits non-zero after this.
    Error { message: String },
    /// Worker-originated event to republish onto the gateway bus.
    EmitEvent { event: String, payload: Value },
}

/// Messages the host writes to a worker's stdin, one per line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HostMessage {
    Execute { id: u64, tool: String, params: Value },
}

/// Encode a host message as one protocol line (no trailing newline).
pub fn encode_line(message: &HostMessage) -> serde_json::Result<String> {
    serde_json::to_string(message)
}

/// Parse one line from a worker. `None` for blank lines.
pub fn parse_line(line: &str) -> Option<Result<WorkerMessage, serde_json::Error>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(serde_json::from_str(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ready_wire_shape() {
        let line = r#"{"type":"ready","tools":[{"name":"echo","description":"echoes","inputSchema":{"type":"object"}}]}"#;
        let parsed = parse_line(line).unwrap().unwrap();
        match parsed {
            WorkerMessage::Ready { tools } => {
                assert_eq!(tools.len(), 1);
                assert_eq!(tools[0].name, "echo");
            }
            other => panic!("expected ready, got {other:?}"),
        }
    }

    #[test]
    fn test_result_is_error_defaults_false() {
        let line = r#"{"type":"result","id":7,"output":"fine"}"#;
        let parsed = parse_line(line).unwrap().unwrap();
        assert_eq!(
            parsed,
            WorkerMessage::Result {
                id: 7,
                output: json!("fine"),
                is_error: false
            }
        );
    }

    #[test]
    fn test_execute_encoding() {
        let encoded = encode_line(&HostMessage::Execute {
            id: 3,
            tool: "get_weather".to_string(),
            params: json!({"city": "Oslo"}),
        })
        .unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["type"], "execute");
        assert_eq!(value["id"], 3);
        assert_eq!(value["tool"], "get_weather");
        assert_eq!(value["params"]["city"], "Oslo");
    }

    #[test]
    fn test_blank_and_malformed_lines() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
        assert!(parse_line("not json").unwrap().is_err());
        assert!(parse_line(r#"{"type":"unknown_kind"}"#).unwrap().is_err());
    }

    #[test]
    fn test_emit_event_roundtrip() {
        let message = WorkerMessage::EmitEvent {
            event: "channel:connected".to_string(),
            payload: json!({"detail": "audit"}),
        };
        let line = serde_json::to_string(&message).unwrap();
        assert_eq!(parse_line(&line).unwrap().unwrap(), message);
    }
}
