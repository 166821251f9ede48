// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolOutput, ToolPermission};

const OUTPUT_LIMIT: usize = 100_000;

pub struct RunTerminalCommandTool {
    pub timeout_secs: u64,
}

impl Default for RunTerminalCommandTool {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

#[async_trait]
impl Tool for RunTerminalCommandTool {
    fn name(&self) -> &str { "run_terminal_command" }

    fn description(&self) -> &str {
        "Executes a given command in a shell session.\n\n\
         IMPORTANT: This tool runs arbitrary shell commands and always requires\n\
         explicit user approval before executing (§4.4).\n\
         DO NOT use it for plain file reads/writes — use the specialized tools instead:\n\
         - read_file instead of cat/head/tail\n\
         - grep instead of grep/find in a subshell\n\
         - write instead of redirecting output to a file\n\n\
         Default timeout is 30 seconds; set timeout_secs higher for long-running commands.\n\
         Output is limited to 100,000 characters and truncated if exceeded.\n\
         Non-zero exit codes are returned as errors; check the exit code in the output.\n\
         Always quote paths that contain spaces."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory (optional, defaults to cwd)"
                },
                "timeout_secs": {
                    "type": "integer",
                    "description": "Execution timeout in seconds (optional)"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn permission(&self) -> ToolPermission { ToolPermission::Admin }
    fn requires_approval(&self) -> bool { true }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let command = match call.args.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'command' argument"),
        };
        let workdir = call.args.get("workdir").and_then(|v| v.as_str()).map(str::to_string);
        let timeout = call.args
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.timeout_secs);

        debug!(cmd = %command, "run_terminal_command tool");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command);
        if let Some(wd) = &workdir {
            cmd.current_dir(wd);
        }

        let result = tokio::time::timeout(
            std::time::Duration::from_secs(timeout),
            cmd.output(),
        ).await;

        match result {
            Ok(Ok(output)) => {
                let mut content = String::new();
                let stdout = String::from_utf8_lossy(&output.stdout);
                let stderr = String::from_utf8_lossy(&output.stderr);

                if !stdout.is_empty() {
                    content.push_str(&truncate(&stdout, OUTPUT_LIMIT));
                }
                if !stderr.is_empty() {
                    if !content.is_empty() { content.push('\n'); }
                    content.push_str("[stderr]\n");
                    content.push_str(&truncate(&stderr, OUTPUT_LIMIT));
                }
                if content.is_empty() {
                    content = format!("[exit {}]", output.status.code().unwrap_or(-1));
                }

                if output.status.success() {
                    ToolOutput::ok(&call.id, content)
                } else {
                    let code = output.status.code().unwrap_or(-1);
                    ToolOutput::err(&call.id, format!("[exit {code}]\n{content}"))
                }
            }
            Ok(Err(e)) => ToolOutput::err(&call.id, format!("spawn error: {e}")),
            Err(_) => ToolOutput::err(&call.id, format!("timeout after {timeout}s")),
        }
    }
}

fn truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        s.to_string()
    } else {
        format!("{}...[truncated {} bytes]", &s[..limit], s.len() - limit)
    }
}
