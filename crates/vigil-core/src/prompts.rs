// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! System prompt assembly (§4.8).
//!
//! The system message is re-materialized on every call: a stable identity +
//! guidelines block, plus whatever the configured system prompt override
//! contributes, plus a volatile block built fresh each turn from advisor
//! output. Keeping the volatile part separate means the stable prefix stays
//! identical call to call, which matters for providers that cache system
//! prompts by content.

use chrono::Local;

/// Default agent identity and operating guidelines.
///
/// `custom` overrides the default identity/guidelines text entirely when set
/// (an operator-supplied house style); `dynamic` is advisor-contributed text
/// appended after everything else, re-built fresh on every call.
pub fn system_prompt(custom: Option<&str>, dynamic: Option<&str>) -> String {
    let base = match custom {
        Some(c) => c.trim_end().to_string(),
        None => default_identity(),
    };

    match dynamic.filter(|s| !s.trim().is_empty()) {
        Some(d) => format!("{base}\n\n{d}"),
        None => base,
    }
}

fn default_identity() -> String {
    format!(
        "You are Vigil, a personal assistant agent with access to tools.\n\n\
         Current date and time: `{now}`\n\n\
         {guidelines}",
        now = Local::now().format("%Y-%m-%d %H:%M:%S"),
        guidelines = guidelines::all(),
    )
}

mod guidelines {
    pub fn all() -> String {
        format!(
            "## Guidelines\n\n{}\n{}\n{}",
            general(),
            tool_usage(),
            error_handling()
        )
    }

    pub fn general() -> &'static str {
        "- Be concise and precise. Use tools instead of guessing.\n\
         - Only call a tool when it is needed to answer the request."
    }

    pub fn tool_usage() -> &'static str {
        "- Prefer the most specific tool available over a general-purpose one.\n\
         - Batch independent tool calls together rather than one at a time."
    }

    pub fn error_handling() -> &'static str {
        "- When a tool fails, read the error and try a different approach rather than repeating the same call.\n\
         - If a tool is not available or is declined, say so plainly instead of pretending it succeeded."
    }
}
