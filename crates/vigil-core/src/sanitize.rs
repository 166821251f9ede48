// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Maps internal error variants to the short, safe strings callers outside
//! the runtime (chat channels, schedule logs) are allowed to see.
//!
//! Internal error detail (stack context, file paths, raw provider messages)
//! stays in the `tracing` logs; only [`friendly_message`]'s output ever
//! reaches an end user.

use vigil_approval::ApprovalError;
use vigil_circuit::CircuitStatus;
use vigil_clock::BudgetError;
use vigil_model::InvokerError;

/// Produce a short, user-safe message for an error surfaced by the agent
/// loop. Unknown error types fall back to a generic message rather than
/// leaking their `Display` text.
pub fn friendly_message(err: &anyhow::Error) -> String {
    if let Some(e) = err.downcast_ref::<InvokerError>() {
        return invoker_message(e);
    }
    if let Some(e) = err.downcast_ref::<BudgetError>() {
        return budget_message(e);
    }
    if let Some(e) = err.downcast_ref::<ApprovalError>() {
        return approval_message(e);
    }
    "Something went wrong while processing your request.".to_string()
}

fn invoker_message(err: &InvokerError) -> String {
    match err {
        InvokerError::BudgetExceeded => {
            "Daily token budget exceeded. Try again tomorrow.".to_string()
        }
        InvokerError::NoAuthProfile => {
            "The assistant is temporarily unavailable (no working credentials).".to_string()
        }
        InvokerError::BadRequest(_) => {
            "The request could not be processed as written.".to_string()
        }
        InvokerError::Exhausted { .. } => {
            "The assistant is temporarily unavailable. Please try again shortly.".to_string()
        }
    }
}

fn budget_message(_err: &BudgetError) -> String {
    "Could not record usage; the request may not count against today's budget.".to_string()
}

fn approval_message(_err: &ApprovalError) -> String {
    "Could not save tool approval. Please try again.".to_string()
}

/// Short status line for a tool or model key, suitable for a `/status`
/// style command. Not an error path, but lives here because it shares the
/// "safe-to-display" framing with `friendly_message`.
pub fn circuit_status_line(key: &str, status: CircuitStatus) -> String {
    if status.circuit_open {
        format!("{key}: unavailable ({} recent failures)", status.failures)
    } else {
        format!("{key}: ok ({}/{} recent calls succeeded)", status.successes, status.total_calls)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_exceeded_maps_to_friendly_message() {
        let err = anyhow::Error::new(InvokerError::BudgetExceeded);
        assert_eq!(friendly_message(&err), "Daily token budget exceeded. Try again tomorrow.");
    }

    #[test]
    fn bad_request_does_not_leak_internal_detail() {
        let err = anyhow::Error::new(InvokerError::BadRequest("schema mismatch at field x.y.z".into()));
        let msg = friendly_message(&err);
        assert!(!msg.contains("schema mismatch"));
    }

    #[test]
    fn unknown_error_type_gets_generic_fallback() {
        let err = anyhow::anyhow!("some unclassified internal failure");
        assert_eq!(friendly_message(&err), "Something went wrong while processing your request.");
    }

    #[test]
    fn circuit_status_line_reports_open_circuit() {
        let status = CircuitStatus { total_calls: 5, successes: 1, failures: 4, circuit_open: true };
        let line = circuit_status_line("model:gpt-4o", status);
        assert!(line.contains("unavailable"));
    }

    #[test]
    fn circuit_status_line_reports_healthy_circuit() {
        let status = CircuitStatus { total_calls: 5, successes: 5, failures: 0, circuit_open: false };
        let line = circuit_status_line("model:gpt-4o", status);
        assert!(line.contains("ok"));
    }
}
