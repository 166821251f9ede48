// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// A single content item in a rich tool output.
#[derive(Debug, Clone)]
pub enum ToolOutputPart {
    /// Plain UTF-8 text.
    Text(String),
    /// Base64 data URL: `data:<mime>;base64,<b64>`.
    Image(String),
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Plain-text content — concatenation of all Text parts. Always set.
    pub content: String,
    /// Structured parts (text and/or images).
    pub parts: Vec<ToolOutputPart>,
    /// If true, the tool execution failed (returned a sanitized error message).
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let text = content.into();
        let call_id = call_id.into();
        Self { call_id, content: text.clone(), parts: vec![ToolOutputPart::Text(text)], is_error: false }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        let text = msg.into();
        let call_id = call_id.into();
        Self { call_id, content: text.clone(), parts: vec![ToolOutputPart::Text(text)], is_error: true }
    }

    pub fn with_parts(call_id: impl Into<String>, parts: Vec<ToolOutputPart>) -> Self {
        let text = parts
            .iter()
            .filter_map(|p| match p {
                ToolOutputPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        Self { call_id: call_id.into(), content: text, parts, is_error: false }
    }

    pub fn has_images(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ToolOutputPart::Image(_)))
    }
}

/// Describes the shape of a tool's text output for context-aware truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Terminal / process output: keep the first N + last M lines.
    HeadTail,
    /// Ordered match list: keep the leading matches (highest relevance first).
    MatchList,
    /// File content: keep a head and tail window with a separator.
    FileContent,
    /// Generic text: hard-truncate at the character boundary.
    #[default]
    Generic,
}

/// Permission class a tool belongs to (§3). Ordering: `Read < Write < Send == Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolPermission {
    Read,
    Write,
    Send,
    Admin,
}

impl ToolPermission {
    fn rank(self) -> u8 {
        match self {
            ToolPermission::Read => 0,
            ToolPermission::Write => 1,
            ToolPermission::Send | ToolPermission::Admin => 2,
        }
    }
}

impl PartialOrd for ToolPermission {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ToolPermission {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

/// Trait that every built-in and user-defined tool must implement.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters.
    fn parameters_schema(&self) -> Value;
    /// Permission class this tool belongs to (§3 `ToolDescriptor.permission`).
    fn permission(&self) -> ToolPermission;
    /// Whether a call to this tool must pause for an explicit user grant
    /// before it is allowed to execute (§4.4).
    fn requires_approval(&self) -> bool {
        false
    }
    /// Describes the shape of this tool's output for context-aware truncation.
    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }
    /// Execute the tool. Deterministic failures should be wrapped in
    /// [`ToolOutput::err`]; transient I/O failures are retried by the caller
    /// (§4.4) before falling back to an error result.
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}
