// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Deterministic, content-aware truncation of tool-call output before it is
//! stored in history or written to the tool-call log.

use vigil_tools::OutputCategory;

/// Marker appended whenever content is cut. `total` is the original content
/// length before truncation; `shown` is the number of characters retained
/// (head + tail combined for the two-sided categories).
fn marker(total: usize, shown: usize) -> String {
    format!("[TRUNCATED: {total} chars, showing first {shown}]")
}

/// Deterministic, content-aware tool-result truncation.
///
/// Returns `content` unchanged when it fits within `cap_tokens`. Otherwise
/// applies a category-specific extraction strategy that preserves the most
/// useful portion of the output. Dispatching on [`OutputCategory`] (not on
/// tool names) keeps this function independent of the tools crate's concrete
/// tool list; each tool declares its own category.
///
/// - [`OutputCategory::HeadTail`]: keep the first 60 + last 40 lines so both
///   the command preamble and the final result are visible.
/// - [`OutputCategory::MatchList`]: keep leading matches (highest relevance
///   first); the tail is not preserved because later matches are less relevant.
/// - [`OutputCategory::FileContent`]: balanced head + tail with a separator,
///   preserving both the imports/declarations and the most recent changes.
/// - [`OutputCategory::Generic`]: hard-truncate at the nearest line boundary.
///
/// Every truncated result ends with a `[TRUNCATED: N chars, showing first M]`
/// marker so the caller (and the model) knows additional content exists.
pub fn smart_truncate(content: &str, category: OutputCategory, cap_tokens: usize) -> String {
    if cap_tokens == 0 {
        return content.to_string();
    }
    let cap_chars = cap_tokens * 4;
    if content.len() <= cap_chars {
        return content.to_string();
    }
    match category {
        OutputCategory::HeadTail => head_tail_lines(content, cap_chars, 60, 40),
        OutputCategory::MatchList => head_lines(content, cap_chars),
        OutputCategory::FileContent => head_tail_lines(content, cap_chars, usize::MAX, usize::MAX),
        OutputCategory::Generic => {
            let cut = content[..cap_chars].rfind('\n').map(|p| p + 1).unwrap_or(cap_chars);
            let kept = &content[..cut];
            format!("{kept}\n{}", marker(content.len(), cut))
        }
    }
}

// ─── Private helpers ──────────────────────────────────────────────────────────

/// Keep only the leading lines that fit within `cap_chars`.
fn head_lines(content: &str, cap_chars: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut kept = String::with_capacity(cap_chars);
    for line in &lines {
        let needed = if kept.is_empty() { line.len() } else { line.len() + 1 };
        if kept.len() + needed > cap_chars {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
    }
    if kept.len() >= content.len() {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let shown = kept.len();
    format!("{kept}\n{}", marker(content.len(), shown))
}

/// Keep `max_head` leading lines and `max_tail` trailing lines. Pass
/// `usize::MAX` to split evenly by character budget.
fn head_tail_lines(content: &str, cap_chars: usize, max_head: usize, max_tail: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let half_cap = cap_chars / 2;

    let mut head = String::with_capacity(half_cap);
    for line in lines.iter().take(max_head) {
        let needed = if head.is_empty() { line.len() } else { line.len() + 1 };
        if head.len() + needed > half_cap {
            break;
        }
        if !head.is_empty() {
            head.push('\n');
        }
        head.push_str(line);
    }

    let mut tail_lines: Vec<&str> = Vec::new();
    let mut tail_chars = 0usize;
    for line in lines.iter().rev().take(max_tail) {
        let needed = if tail_lines.is_empty() { line.len() } else { line.len() + 1 };
        if tail_chars + needed > half_cap {
            break;
        }
        tail_chars += needed;
        tail_lines.push(line);
    }
    tail_lines.reverse();
    let tail = tail_lines.join("\n");

    let shown = head.len() + tail.len();
    if shown >= content.len() {
        return content[..cap_chars.min(content.len())].to_string();
    }
    format!("{head}\n{}\n{tail}", marker(content.len(), shown))
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
