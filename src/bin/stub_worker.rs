// ABOUTME: Protocol-conformant worker used by integration tests via CARGO_BIN_EXE_stub_worker.
// ABOUTME: The entry file name selects startup behavior; tools cover echo, failure, delay, crash, emit.

use std::io::{BufRead, Write};

use serde_json::{json, Value};
use switchyard::plugin::{HostMessage, WorkerMessage};
use switchyard_core::ToolDefinition;

fn send(message: &WorkerMessage) {
    let mut stdout = std::io::stdout().lock();
    let line = serde_json::to_string(message).unwrap();
    writeln!(stdout, "{line}").unwrap();
    stdout.flush().unwrap();
}

fn tool(name: &str, description: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: json!({"type": "object"}),
    }
}

fn main() {
    let entry = std::env::args().nth(1).unwrap_or_default();

    if entry.contains("silent") {
        // Never handshake; the host's ready timeout must fire.
        std::thread::sleep(std::time::Duration::from_secs(3600));
        return;
    }
    if entry.contains("fatal") {
        send(&WorkerMessage::Error {
            message: "stub failed to load".to_string(),
        });
        std::process::exit(1);
    }

    send(&WorkerMessage::Ready {
        tools: vec![
            tool("stub_echo", "Echo the params back"),
            tool("stub_fail", "Always return an error result"),
            tool("stub_sleep", "Sleep for params.millis before answering"),
            tool("stub_exit", "Exit the process without answering"),
            tool("stub_emit", "Emit a bus event, then answer"),
        ],
    });

    if entry.contains("late_tool") {
        send(&WorkerMessage::RegisterTool {
            tool: tool("stub_late", "Registered after the handshake"),
        });
    }

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if line.trim().is_empty() {
            continue;
        }
        let HostMessage::Execute { id, tool, params } = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(_) => continue,
        };
        match tool.as_str() {
            "stub_echo" | "stub_late" => send(&WorkerMessage::Result {
                id,
                output: json!({ "echoed": params }),
                is_error: false,
            }),
            "stub_fail" => send(&WorkerMessage::Result {
                id,
                output: Value::String("stub failure".to_string()),
                is_error: true,
            }),
            "stub_sleep" => {
                // Answer from a thread so the read loop stays responsive and
                // stub_exit can kill the process while this call is pending.
                let millis = params["millis"].as_u64().unwrap_or(100);
                std::thread::spawn(move || {
                    std::thread::sleep(std::time::Duration::from_millis(millis));
                    send(&WorkerMessage::Result {
                        id,
                        output: json!({ "slept_ms": millis }),
                        is_error: false,
                    });
                });
            }
            "stub_exit" => {
                let code = params["code"].as_i64().unwrap_or(3) as i32;
                std::process::exit(code);
            }
            "stub_emit" => {
                let event = params["event"].as_str().unwrap_or("system:error").to_string();
                send(&WorkerMessage::EmitEvent {
                    event,
                    payload: params["payload"].clone(),
                });
                send(&WorkerMessage::Result {
                    id,
                    output: json!({ "emitted": true }),
                    is_error: false,
                });
            }
            other => send(&WorkerMessage::Result {
                id,
                output: Value::String(format!("unknown tool '{other}'")),
                is_error: true,
            }),
        }
    }
}
