// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Types exchanged across the `chat()` boundary (§3 `ChatResult`,
//! `ToolCallLogEntry`) and the pluggable collaborator traits the loop calls
//! out to without depending on their concrete implementations (§4.8, §9).

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

/// One tool invocation as recorded in a turn's log (§3).
#[derive(Debug, Clone)]
pub struct ToolCallLogEntry {
    pub name: String,
    pub arguments: Value,
    /// The (possibly truncated) text that was stored in history.
    pub result_truncated: String,
    pub duration: Duration,
    pub success: bool,
}

/// Aggregated token usage for a single `chat()` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatUsage {
    pub prompt: u32,
    pub completion: u32,
}

/// What `Agent::chat` returns (§3).
#[derive(Debug, Clone)]
pub struct ChatResult {
    pub text: String,
    pub tool_calls: Vec<ToolCallLogEntry>,
    pub model: String,
    pub duration: Duration,
    pub usage: ChatUsage,
}

/// A pre-chat contributor of system-prompt text (§9: collapses the source's
/// duck-typed "Protocol" interfaces into an explicit capability).
///
/// Invoked with the user's message and channel before each LLM call; its
/// output is appended to the dynamic (uncached) section of the system
/// prompt. A failing advisor is logged and skipped — the call proceeds
/// without its contribution (§4.8).
#[async_trait]
pub trait Advisor: Send + Sync {
    fn name(&self) -> &str;
    async fn contribute(&self, message: &str, channel: Option<&str>) -> anyhow::Result<Option<String>>;
}

/// A post-chat side-effect handler (§9). Hooks run sequentially after a
/// `chat()` call completes; a failing hook is logged but never surfaced to
/// the caller.
#[async_trait]
pub trait AfterChatHook: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self, message: &str, response: &ChatResult, channel: Option<&str>) -> anyhow::Result<()>;
}

/// Caller's decision on an `APPROVAL_REQUIRED` pause (§4.4, §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approve,
    Decline,
}

/// Resolves an `APPROVAL_REQUIRED` signal raised by the tool loop (§9:
/// modeled as a tagged result bubbled to the dispatcher, not an exception).
///
/// Implementations route the request to whatever can actually answer it: an
/// interactive caller waiting on a prompt, or — for non-interactive channels
/// such as `heartbeat`/`scheduled` events, where no user exists to ask — a
/// prompter that always declines (see [`NonInteractiveApprovalPrompter`]).
#[async_trait]
pub trait ApprovalPrompter: Send + Sync {
    async fn request(&self, tool_name: &str, args: &Value) -> ApprovalDecision;

    /// Synthetic tool result appended when `request` resolves to `Decline`.
    /// Interactive prompters use the default; a non-interactive channel has
    /// a distinct message since there was no user to decline anything (§4.4).
    fn decline_message(&self) -> &'static str {
        "User declined."
    }
}

/// Always declines. The loop appends a synthetic "User not available to
/// approve." tool result and continues (§9 Open Question: approval during
/// `scheduled`/`heartbeat` events has no user to ask).
pub struct NonInteractiveApprovalPrompter;

#[async_trait]
impl ApprovalPrompter for NonInteractiveApprovalPrompter {
    async fn request(&self, _tool_name: &str, _args: &Value) -> ApprovalDecision {
        ApprovalDecision::Decline
    }

    fn decline_message(&self) -> &'static str {
        "User not available to approve."
    }
}
