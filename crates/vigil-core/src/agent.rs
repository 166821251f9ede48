// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The tool-calling loop (§4.8).
//!
//! `Agent::chat` is the single entry point: it re-materializes the system
//! message, selects a model, calls the invoker, and drives tool calls until
//! the model stops asking for them, the iteration cap is hit, or the context
//! budget runs out. Everything else in the workspace (the gateway, the
//! scheduler, the workflow orchestrator) is a caller of this one method.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use vigil_approval::ApprovalStore;
use vigil_circuit::CircuitRegistry;
use vigil_config::AgentConfig;
use vigil_model::{
    CompletionRequest, Invoker, InvokerError, Message, ModelProvider, ModelSelector, ThinkingLevel,
    ToolCallRequest,
};
use vigil_tools::{LayeredToolPolicy, ToolCall, ToolRegistry};

use crate::compact::smart_truncate;
use crate::events::{
    AfterChatHook, Advisor, ApprovalDecision, ApprovalPrompter, ChatResult, ChatUsage,
    NonInteractiveApprovalPrompter, ToolCallLogEntry,
};
use crate::prompts::system_prompt;
use crate::sanitize::friendly_message;
use crate::session::Session;

/// Assembles the agent's collaborators and runs the tool-calling loop.
///
/// Providers are keyed `"{provider}/{model}"` (e.g. `"anthropic/claude-opus"`)
/// — each `ModelProvider` is bound to a single model, so the map is how a
/// `ModelSelector`-chosen `(provider, model)` pair turns into something that
/// can actually be called.
pub struct Agent {
    tools: Arc<ToolRegistry>,
    policy: LayeredToolPolicy,
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    selector: Arc<ModelSelector>,
    invoker: Arc<Invoker>,
    circuits: Arc<CircuitRegistry>,
    approvals: Arc<ApprovalStore>,
    approval_prompter: Arc<dyn ApprovalPrompter>,
    advisors: Vec<Arc<dyn Advisor>>,
    hooks: Vec<Arc<dyn AfterChatHook>>,
    config: Arc<AgentConfig>,
    session: Session,
}

impl Agent {
    pub fn new(
        tools: Arc<ToolRegistry>,
        policy: LayeredToolPolicy,
        providers: HashMap<String, Arc<dyn ModelProvider>>,
        selector: Arc<ModelSelector>,
        invoker: Arc<Invoker>,
        circuits: Arc<CircuitRegistry>,
        approvals: Arc<ApprovalStore>,
        config: Arc<AgentConfig>,
    ) -> Self {
        let max_tokens = (config.context_limit_tokens as usize)
            .saturating_sub(config.context_reserve_tokens as usize);
        Self {
            tools,
            policy,
            providers,
            selector,
            invoker,
            circuits,
            approvals,
            approval_prompter: Arc::new(NonInteractiveApprovalPrompter),
            advisors: Vec::new(),
            hooks: Vec::new(),
            config,
            session: Session::new(max_tokens),
        }
    }

    pub fn with_approval_prompter(mut self, prompter: Arc<dyn ApprovalPrompter>) -> Self {
        self.approval_prompter = prompter;
        self
    }

    pub fn add_advisor(&mut self, advisor: Arc<dyn Advisor>) {
        self.advisors.push(advisor);
    }

    pub fn add_after_chat_hook(&mut self, hook: Arc<dyn AfterChatHook>) {
        self.hooks.push(hook);
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn effective_limit(&self) -> usize {
        (self.config.context_limit_tokens as usize)
            .saturating_sub(self.config.context_reserve_tokens as usize)
    }

    fn sufficient_context(&self) -> bool {
        self.session.token_count <= self.effective_limit()
    }

    /// Re-materializes the system message (entry 0) from advisor output and
    /// the configured override, replacing whatever was there before.
    async fn refresh_system_message(&mut self, message: &str, channel: Option<&str>) {
        let mut contributions = Vec::new();
        for advisor in &self.advisors {
            match advisor.contribute(message, channel).await {
                Ok(Some(text)) if !text.trim().is_empty() => contributions.push(text),
                Ok(_) => {}
                Err(err) => warn!(advisor = advisor.name(), error = %err, "advisor failed, skipping"),
            }
        }
        let dynamic = if contributions.is_empty() { None } else { Some(contributions.join("\n\n")) };
        let prompt = system_prompt(self.config.system_prompt.as_deref(), dynamic.as_deref());

        let is_system_first = matches!(
            self.session.messages.first().map(|m| &m.role),
            Some(vigil_model::Role::System)
        );
        if is_system_first {
            self.session.messages[0] = Message::system(prompt);
        } else {
            self.session.messages.insert(0, Message::system(prompt));
        }
        self.session.recalculate_tokens();
    }

    fn last_assistant_text(&self) -> String {
        self.session
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, vigil_model::Role::Assistant))
            .and_then(|m| m.as_text())
            .unwrap_or("")
            .to_string()
    }

    /// `message, mode, channel` drive model selection and advisor context;
    /// `max_iterations` overrides the configured default for this call.
    pub async fn chat(
        &mut self,
        message: &str,
        mode: Option<&str>,
        channel: Option<&str>,
        max_iterations: Option<u32>,
    ) -> ChatResult {
        let started = Instant::now();
        let max_iterations = max_iterations.unwrap_or(self.config.max_iterations).max(1);
        let mut usage = ChatUsage::default();
        let mut tool_log: Vec<ToolCallLogEntry> = Vec::new();
        let mut model_used = String::new();

        self.refresh_system_message(message, channel).await;
        self.session.push(Message::user(message));

        for _ in 0..max_iterations {
            if !self.sufficient_context() {
                debug!("context budget exhausted before LLM call");
                return ChatResult {
                    text: self.last_assistant_text(),
                    tool_calls: tool_log,
                    model: model_used,
                    duration: started.elapsed(),
                    usage,
                };
            }

            let selection = self.selector.select(message, mode, false, None::<ThinkingLevel>);
            let provider_key = format!("{}/{}", selection.provider, selection.model);
            let provider = match self.providers.get(&provider_key) {
                Some(p) => p.clone(),
                None => {
                    warn!(provider = %provider_key, "no provider registered for selected model");
                    self.session.push(Message::assistant(
                        "The assistant is temporarily unavailable (no model configured).",
                    ));
                    return ChatResult {
                        text: self.last_assistant_text(),
                        tool_calls: tool_log,
                        model: provider_key,
                        duration: started.elapsed(),
                        usage,
                    };
                }
            };
            model_used = selection.model.clone();

            let tool_schemas = self
                .tools
                .schemas_for_policy(&self.policy)
                .into_iter()
                .map(|s| vigil_model::ToolSchema { name: s.name, description: s.description, parameters: s.parameters })
                .collect();

            let req = CompletionRequest {
                messages: self.session.messages.clone(),
                tools: tool_schemas,
                stream: false,
                system_dynamic_suffix: None,
            };

            let outcome = match self.invoker.completion(provider.as_ref(), req).await {
                Ok(o) => o,
                Err(err) => {
                    let text = sanitized_error(err);
                    self.session.push(Message::assistant(text.clone()));
                    return ChatResult {
                        text,
                        tool_calls: tool_log,
                        model: model_used,
                        duration: started.elapsed(),
                        usage,
                    };
                }
            };

            usage.prompt += outcome.usage.input_tokens;
            usage.completion += outcome.usage.output_tokens;

            if !outcome.text.trim().is_empty() {
                self.session.push(Message::assistant(outcome.text.clone()));
            }

            if outcome.tool_calls.is_empty() {
                return ChatResult {
                    text: outcome.text,
                    tool_calls: tool_log,
                    model: model_used,
                    duration: started.elapsed(),
                    usage,
                };
            }

            for call in &outcome.tool_calls {
                self.session.push(Message::assistant_tool_call(call.id.clone(), call.as_function_call()));
                let entry = self.run_tool_call(call).await;
                self.session.push(Message::tool_result(call.id.clone(), entry.result_truncated.clone()));
                tool_log.push(entry);
            }
        }

        ChatResult {
            text: self.last_assistant_text(),
            tool_calls: tool_log,
            model: model_used,
            duration: started.elapsed(),
            usage,
        }
    }

    /// Resolves, approval-gates, executes and truncates a single tool call,
    /// recording its outcome on the `tool:{name}` circuit key.
    async fn run_tool_call(&self, call: &ToolCallRequest) -> ToolCallLogEntry {
        let started = Instant::now();
        let args = parse_tool_arguments(&call.arguments);

        let tool = match self.tools.get(&call.name) {
            Some(t) => t,
            None => {
                return ToolCallLogEntry {
                    name: call.name.clone(),
                    arguments: args,
                    result_truncated: format!("Error executing {}: not found", call.name),
                    duration: started.elapsed(),
                    success: false,
                };
            }
        };

        if tool.requires_approval() && !self.approvals.is_approved(&call.name) {
            let decision = self.approval_prompter.request(&call.name, &args).await;
            match decision {
                ApprovalDecision::Approve => {
                    if let Err(err) = self.approvals.grant(&call.name) {
                        warn!(tool = %call.name, error = %err, "failed to persist approval grant");
                    }
                }
                ApprovalDecision::Decline => {
                    self.circuits.record(&format!("tool:{}", call.name), false, started.elapsed());
                    return ToolCallLogEntry {
                        name: call.name.clone(),
                        arguments: args,
                        result_truncated: self.approval_prompter.decline_message().to_string(),
                        duration: started.elapsed(),
                        success: false,
                    };
                }
            }
        }

        let tool_call = ToolCall { id: call.id.clone(), name: call.name.clone(), args: args.clone() };
        let output = tool.execute(&tool_call).await;

        self.circuits.record(&format!("tool:{}", call.name), !output.is_error, started.elapsed());

        let cap_tokens = self.config.max_tool_result_chars / 4;
        let truncated = smart_truncate(&output.content, tool.output_category(), cap_tokens);

        ToolCallLogEntry {
            name: call.name.clone(),
            arguments: args,
            result_truncated: truncated,
            duration: started.elapsed(),
            success: !output.is_error,
        }
    }

    /// Runs every after-chat hook sequentially; a failing hook is logged and
    /// never surfaced.
    pub async fn run_after_chat_hooks(&self, message: &str, response: &ChatResult, channel: Option<&str>) {
        for hook in &self.hooks {
            if let Err(err) = hook.run(message, response, channel).await {
                warn!(hook = hook.name(), error = %err, "after-chat hook failed");
            }
        }
    }
}

fn sanitized_error(err: InvokerError) -> String {
    friendly_message(&anyhow::Error::new(err))
}

/// Parses a model-emitted tool-call argument string into JSON, repairing the
/// common malformations some providers emit (unescaped newlines/quotes)
/// before giving up and wrapping the raw string.
fn parse_tool_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v) => v,
        Err(_) => match attempt_json_repair(raw) {
            Some(v) => v,
            None => Value::String(raw.to_string()),
        },
    }
}

/// Tries a cheap, deterministic repair for near-miss JSON before falling
/// back to treating the whole string as opaque.
fn attempt_json_repair(raw: &str) -> Option<Value> {
    let fixed = fix_invalid_json_escapes(raw);
    serde_json::from_str::<Value>(&fixed).ok()
}

/// Escapes bare control characters (raw newlines/tabs/carriage returns)
/// inside a JSON string literal that some models emit unescaped.
fn fix_invalid_json_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    for ch in raw.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => {
                out.push(ch);
                escaped = true;
            }
            '"' => {
                in_string = !in_string;
                out.push(ch);
            }
            '\n' if in_string => out.push_str("\\n"),
            '\r' if in_string => out.push_str("\\r"),
            '\t' if in_string => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
