// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod agent;
mod compact;
mod events;
mod prompts;
mod sanitize;
mod session;

pub use agent::Agent;
pub use compact::smart_truncate;
pub use events::{
    AfterChatHook, Advisor, ApprovalDecision, ApprovalPrompter, ChatResult, ChatUsage,
    NonInteractiveApprovalPrompter, ToolCallLogEntry,
};
pub use prompts::system_prompt;
pub use sanitize::{circuit_status_line, friendly_message};
pub use session::{Session, TurnRecord};
