// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Dispatches a [`CompletionRequest`] to a [`ModelProvider`], composing the
//! budget ledger, circuit breaker registry, and auth-profile rotation (§4.6,
//! §4.7 in the runtime spec).
//!
//! [`Invoker::completion`] is the only entry point the agent core calls; it
//! never talks to a provider directly.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use vigil_circuit::CircuitRegistry;
use vigil_clock::BudgetLedger;

use crate::auth::AuthProfileManager;
use crate::provider::{ModelProvider, ResponseStream};
use crate::types::{CompletionRequest, FunctionCall, ResponseEvent, Usage};

#[derive(Debug, Error)]
pub enum InvokerError {
    #[error("daily token budget exceeded")]
    BudgetExceeded,
    #[error("no auth profile available, all are cooling down")]
    NoAuthProfile,
    #[error("request rejected by provider: {0}")]
    BadRequest(String),
    #[error("request failed after {attempts} attempt(s): {source}")]
    Exhausted { attempts: u32, source: String },
}

/// A tool call requested by the assistant, fully accumulated from the stream.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

/// Aggregated result of one completion call.
#[derive(Debug, Clone, Default)]
pub struct CompletionOutcome {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Copy)]
pub struct InvokerConfig {
    /// Attempts beyond the first for Network/Timeout errors and for
    /// RateLimit/Auth errors once rotation has cycled through every profile.
    pub max_retries: u32,
    /// Base backoff before the first retry; doubled on each subsequent one.
    pub retry_backoff_base: Duration,
    /// How long a profile is cooled down after a RateLimit/Auth failure.
    pub auth_cooldown: Duration,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_backoff_base: Duration::from_millis(500),
            auth_cooldown: Duration::from_secs(60),
        }
    }
}

/// How a provider/stream error should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
    RateLimit,
    Auth,
    Network,
    Timeout,
    BadRequest,
}

/// Classify an error by inspecting its message. Drivers in this runtime speak
/// no single vendor wire protocol (that integration is explicitly out of
/// scope), so classification is necessarily heuristic: it looks for the
/// phrasing real provider SDKs and HTTP clients use.
fn classify(err: &anyhow::Error) -> ErrorClass {
    let msg = err.to_string().to_lowercase();
    if msg.contains("429") || msg.contains("rate limit") || msg.contains("too many requests") {
        ErrorClass::RateLimit
    } else if msg.contains("401") || msg.contains("403") || msg.contains("unauthorized") || msg.contains("forbidden") || msg.contains("invalid api key") {
        ErrorClass::Auth
    } else if msg.contains("timed out") || msg.contains("timeout") {
        ErrorClass::Timeout
    } else if msg.contains("400") || msg.contains("bad request") || msg.contains("invalid request") {
        ErrorClass::BadRequest
    } else {
        ErrorClass::Network
    }
}

/// Composes a provider with the budget, circuit, and auth collaborators.
pub struct Invoker {
    ledger: std::sync::Arc<BudgetLedger>,
    circuits: std::sync::Arc<CircuitRegistry>,
    auth: std::sync::Arc<AuthProfileManager>,
    config: InvokerConfig,
}

impl Invoker {
    pub fn new(
        ledger: std::sync::Arc<BudgetLedger>,
        circuits: std::sync::Arc<CircuitRegistry>,
        auth: std::sync::Arc<AuthProfileManager>,
        config: InvokerConfig,
    ) -> Self {
        Self { ledger, circuits, auth, config }
    }

    /// Dispatch `req` to `provider`, enforcing budget before the call and
    /// recording circuit/auth outcomes after it.
    pub async fn completion(
        &self,
        provider: &dyn ModelProvider,
        req: CompletionRequest,
    ) -> Result<CompletionOutcome, InvokerError> {
        let (within_budget, remaining) = self.ledger.check_budget(None);
        if !within_budget {
            warn!(remaining, "invoker: daily budget exceeded, refusing call");
            return Err(InvokerError::BudgetExceeded);
        }

        let model_key = format!("model:{}", provider.model_name());
        let provider_key = format!("provider:{}", provider.name());

        let mut attempt: u32 = 0;
        let mut last_err: Option<anyhow::Error> = None;

        loop {
            attempt += 1;
            let profile = self.auth.get_active().ok_or(InvokerError::NoAuthProfile)?;
            let start = Instant::now();

            let outcome = match provider.complete(req.clone()).await {
                Ok(stream) => drain_stream(stream).await,
                Err(e) => Err(e),
            };

            match outcome {
                Ok(outcome) => {
                    let elapsed = start.elapsed();
                    self.circuits.record(&model_key, true, elapsed);
                    self.circuits.record(&provider_key, true, elapsed);
                    self.auth.mark_success(&profile.name);
                    if let Err(e) = self.ledger.record_usage(
                        outcome.usage.input_tokens as u64,
                        outcome.usage.output_tokens as u64,
                    ) {
                        warn!(error = %e, "invoker: failed to persist token usage");
                    }
                    return Ok(outcome);
                }
                Err(e) => {
                    let elapsed = start.elapsed();
                    self.circuits.record(&model_key, false, elapsed);
                    self.circuits.record(&provider_key, false, elapsed);

                    match classify(&e) {
                        ErrorClass::BadRequest => {
                            return Err(InvokerError::BadRequest(e.to_string()));
                        }
                        ErrorClass::RateLimit | ErrorClass::Auth => {
                            self.auth.mark_failed(&profile.name, self.config.auth_cooldown);
                            debug!(profile = %profile.name, attempt, "invoker: auth profile cooled down, rotating");
                            last_err = Some(e);
                            if attempt > self.config.max_retries || self.auth.rotate().is_none() {
                                break;
                            }
                        }
                        ErrorClass::Network | ErrorClass::Timeout => {
                            last_err = Some(e);
                            if attempt > self.config.max_retries {
                                break;
                            }
                            let backoff = self.config.retry_backoff_base * 2u32.pow(attempt - 1);
                            debug!(attempt, backoff_ms = backoff.as_millis() as u64, "invoker: retrying after transient error");
                            tokio::time::sleep(backoff).await;
                        }
                    }
                }
            }
        }

        Err(InvokerError::Exhausted {
            attempts: attempt,
            source: last_err.map(|e| e.to_string()).unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

/// Drain a provider's response stream into a single aggregated outcome.
async fn drain_stream(mut stream: ResponseStream) -> anyhow::Result<CompletionOutcome> {
    use futures::StreamExt;

    let mut text = String::new();
    let mut calls: Vec<(usize, ToolCallRequest)> = Vec::new();
    let mut usage = Usage::default();

    while let Some(event) = stream.next().await {
        match event? {
            ResponseEvent::TextDelta(delta) => text.push_str(&delta),
            ResponseEvent::ToolCall { index, id, name, arguments } => {
                match calls.iter_mut().find(|(i, _)| *i == index) {
                    Some((_, call)) => {
                        call.id = id;
                        call.name = name;
                        call.arguments = arguments;
                    }
                    None => calls.push((index, ToolCallRequest { id, name, arguments })),
                }
            }
            ResponseEvent::ThinkingDelta(_) => {}
            ResponseEvent::Usage { input_tokens, output_tokens, cache_read_tokens, cache_write_tokens } => {
                usage = Usage { input_tokens, output_tokens, cache_read_tokens, cache_write_tokens };
            }
            ResponseEvent::Done => break,
            ResponseEvent::Error(msg) => {
                warn!(error = %msg, "invoker: non-fatal stream warning");
            }
        }
    }

    calls.sort_by_key(|(index, _)| *index);
    Ok(CompletionOutcome { text, tool_calls: calls.into_iter().map(|(_, c)| c).collect(), usage })
}

/// Convert an accumulated tool call into the [`FunctionCall`] shape used when
/// appending the assistant's turn to message history.
impl ToolCallRequest {
    pub fn as_function_call(&self) -> FunctionCall {
        FunctionCall { name: self.name.clone(), arguments: self.arguments.clone() }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
