// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub circuit: CircuitConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Named provider credential profiles, referenced by key from `model.classes.*.provider`
    /// or an explicit `--model <key>/<name>` CLI override.
    ///
    /// ```yaml
    /// providers:
    ///   work_anthropic:
    ///     api_key_env: WORK_ANTHROPIC_KEY
    ///     base_url: https://api.anthropic.com
    /// ```
    #[serde(default)]
    pub providers: HashMap<String, ProviderCredentials>,
}

/// A `(provider, model)` pair, as configured for one of the selector's classes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpecConfig {
    pub provider: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelClassesConfig {
    pub light: ModelSpecConfig,
    pub heavy: ModelSpecConfig,
    pub thinking: ModelSpecConfig,
    /// Provider-agnostic fallback used when every classed candidate's circuit is open.
    pub default: ModelSpecConfig,
}

impl Default for ModelClassesConfig {
    fn default() -> Self {
        Self {
            light: ModelSpecConfig { provider: "openai".into(), name: "gpt-4o-mini".into() },
            heavy: ModelSpecConfig { provider: "openai".into(), name: "gpt-4o".into() },
            thinking: ModelSpecConfig { provider: "openai".into(), name: "gpt-4o".into() },
            default: ModelSpecConfig { provider: "mock".into(), name: "mock-model".into() },
        }
    }
}

fn default_complex_threshold() -> usize {
    400
}

fn default_complex_keywords() -> Vec<String> {
    vec![
        "analyze".into(),
        "explain".into(),
        "compare".into(),
        "design".into(),
        "architecture".into(),
        "tradeoff".into(),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// The four model classes the selector picks from (§4.5).
    #[serde(default)]
    pub classes: ModelClassesConfig,
    /// Channel/caller modes that should always resolve to the heavy class.
    #[serde(default)]
    pub heavy_modes: Vec<String>,
    /// Channel/caller modes that should always resolve to the light class.
    #[serde(default)]
    pub light_modes: Vec<String>,
    /// Query length (characters) above which a query is treated as complex.
    #[serde(default = "default_complex_threshold")]
    pub complex_threshold: usize,
    /// Keywords that, if present in the query (case-insensitive), mark it complex.
    #[serde(default = "default_complex_keywords")]
    pub complex_keywords: Vec<String>,
    /// Where manual per-mode model pins are persisted and reloaded from on
    /// construction (default: `<data_dir>/model_selector_settings.json`).
    #[serde(default)]
    pub settings_path: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            classes: ModelClassesConfig::default(),
            heavy_modes: Vec::new(),
            light_modes: Vec::new(),
            complex_threshold: default_complex_threshold(),
            complex_keywords: default_complex_keywords(),
            settings_path: None,
        }
    }
}

/// Per-provider credential and endpoint override, referenced by name from
/// the `providers` map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderCredentials {
    /// Environment variable that holds the API key (read at runtime).
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer `api_key_env` in config files to avoid secrets
    /// in version-controlled files.
    pub api_key: Option<String>,
    /// Base URL override. Useful for local proxies or self-hosted endpoints.
    pub base_url: Option<String>,
}

fn default_max_iterations() -> u32 {
    5
}
fn default_context_limit_tokens() -> u32 {
    128_000
}
fn default_context_reserve_tokens() -> u32 {
    8_000
}
fn default_max_tool_result_chars() -> usize {
    8_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum number of tool-calling rounds per `chat()` invocation before
    /// the loop exits without a final assistant turn (§4.8).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Usable input token budget; the context check compares calibrated
    /// session tokens against `context_limit_tokens - context_reserve_tokens`.
    #[serde(default = "default_context_limit_tokens")]
    pub context_limit_tokens: u32,
    /// Tokens reserved for tool schemas and measurement error in the token
    /// approximation.
    #[serde(default = "default_context_reserve_tokens")]
    pub context_reserve_tokens: u32,
    /// A single tool result's content is truncated to this many characters
    /// before entering history (§4.8). 0 disables truncation.
    #[serde(default = "default_max_tool_result_chars")]
    pub max_tool_result_chars: usize,
    /// System prompt override; leave `None` to use the built-in prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            context_limit_tokens: default_context_limit_tokens(),
            context_reserve_tokens: default_context_reserve_tokens(),
            max_tool_result_chars: default_max_tool_result_chars(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebSearchConfig {
    /// Brave Search API key (also checked via the `BRAVE_API_KEY` env var).
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default)]
    pub search: WebSearchConfig,
    /// Default maximum characters returned by `web_fetch`.
    pub fetch_max_chars: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self { search: WebSearchConfig::default(), fetch_max_chars: 50_000 }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Shell commands matching these glob patterns bypass the approval gate.
    #[serde(default)]
    pub auto_approve_patterns: Vec<String>,
    /// Shell commands matching these glob patterns are always denied, even
    /// if also matched by `auto_approve_patterns`.
    #[serde(default)]
    pub deny_patterns: Vec<String>,
    /// Timeout in seconds for a single tool call.
    #[serde(default = "default_tool_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub web: WebConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            auto_approve_patterns: vec!["cat *".into(), "ls *".into(), "grep *".into()],
            deny_patterns: vec!["rm -rf /*".into(), "dd if=*".into()],
            timeout_secs: default_tool_timeout_secs(),
            web: WebConfig::default(),
        }
    }
}

fn default_daily_limit() -> u64 {
    1_000_000
}

/// §4.6 budget ledger tuning, forwarded to `vigil_clock::LedgerConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Directory holding `token_usage.json`. Defaults to the data directory
    /// resolved at startup (see `Paths`).
    #[serde(default)]
    pub data_dir: Option<String>,
    /// Daily token budget across input + output tokens.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u64,
    /// When the ledger's file/process lock cannot be acquired, treat the
    /// call as within-budget instead of failing closed.
    #[serde(default)]
    pub fail_open: bool,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { data_dir: None, daily_limit: default_daily_limit(), fail_open: false }
    }
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_open_duration_secs() -> u64 {
    120
}
fn default_history_size() -> usize {
    10
}

/// §4.2 circuit breaker tuning, forwarded to `vigil_circuit::CircuitBreakerConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitConfig {
    /// Consecutive failures before a key's circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long an opened circuit stays closed to new calls before the next
    /// call is let through as a half-open probe.
    #[serde(default = "default_open_duration_secs")]
    pub open_duration_secs: u64,
    /// Size of the rolling outcome window used for reported statistics.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            open_duration_secs: default_open_duration_secs(),
            history_size: default_history_size(),
        }
    }
}

/// §4.3 session store tuning.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Directory holding per-session JSONL transcripts. Defaults to the data
    /// directory resolved at startup.
    #[serde(default)]
    pub data_dir: Option<String>,
}

/// §4.10 scheduled job, loaded from `scheduler.jobs` and handed to
/// `GatewayScheduler::add_jobs_from_config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleJobConfig {
    pub id: String,
    /// Five- or six-field cron expression evaluated in `timezone`.
    pub cron: String,
    /// IANA timezone name (e.g. `"Europe/Stockholm"`); defaults to UTC.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Static prompt text. Ignored when the job is registered with a
    /// `prompt_fn` at the call site, which always takes priority.
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default = "default_call_type")]
    pub call_type: String,
    #[serde(default = "default_scheduled_channel")]
    pub channel: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

fn default_call_type() -> String {
    "scheduled".into()
}
fn default_scheduled_channel() -> String {
    "scheduled".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default)]
    pub jobs: Vec<ScheduleJobConfig>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Defaults ─────────────────────────────────────────────────────────────

    #[test]
    fn config_default_light_model_is_gpt4o_mini() {
        let c = Config::default();
        assert_eq!(c.model.classes.light.name, "gpt-4o-mini");
    }

    #[test]
    fn config_default_heavy_model_is_gpt4o() {
        let c = Config::default();
        assert_eq!(c.model.classes.heavy.name, "gpt-4o");
    }

    #[test]
    fn config_default_fallback_model_is_mock() {
        let c = Config::default();
        assert_eq!(c.model.classes.default.provider, "mock");
    }

    #[test]
    fn config_default_complex_threshold_matches_selector_default() {
        let c = Config::default();
        assert_eq!(c.model.complex_threshold, 400);
    }

    #[test]
    fn config_default_no_settings_path_override() {
        let c = Config::default();
        assert!(c.model.settings_path.is_none());
    }

    #[test]
    fn config_default_providers_is_empty() {
        let c = Config::default();
        assert!(c.providers.is_empty());
    }

    #[test]
    fn config_default_max_iterations_is_five() {
        let c = Config::default();
        assert_eq!(c.agent.max_iterations, 5);
    }

    #[test]
    fn config_default_context_reserve_less_than_limit() {
        let c = Config::default();
        assert!(c.agent.context_reserve_tokens < c.agent.context_limit_tokens);
    }

    #[test]
    fn config_default_no_system_prompt_override() {
        let c = Config::default();
        assert!(c.agent.system_prompt.is_none());
    }

    #[test]
    fn config_default_tools_has_auto_approve_patterns() {
        let c = Config::default();
        assert!(!c.tools.auto_approve_patterns.is_empty());
    }

    #[test]
    fn config_default_budget_daily_limit_positive() {
        let c = Config::default();
        assert!(c.budget.daily_limit > 0);
    }

    #[test]
    fn config_default_budget_fails_closed() {
        let c = Config::default();
        assert!(!c.budget.fail_open);
    }

    #[test]
    fn config_default_circuit_failure_threshold_matches_registry_default() {
        let c = Config::default();
        assert_eq!(c.circuit.failure_threshold, 3);
        assert_eq!(c.circuit.open_duration_secs, 120);
        assert_eq!(c.circuit.history_size, 10);
    }

    #[test]
    fn config_default_scheduler_has_no_jobs() {
        let c = Config::default();
        assert!(c.scheduler.jobs.is_empty());
    }

    // ── YAML round-trip ───────────────────────────────────────────────────────

    #[test]
    fn config_serialises_to_valid_yaml() {
        let c = Config::default();
        let yaml_str = serde_yaml::to_string(&c).unwrap();
        assert!(yaml_str.contains("classes"));
        assert!(yaml_str.contains("gpt-4o"));
    }

    #[test]
    fn config_deserialises_from_yaml() {
        let yaml_str = "model:\n  classes:\n    light: {provider: anthropic, name: claude-haiku-4-6}\n    heavy: {provider: anthropic, name: claude-opus-4-6}\n    thinking: {provider: anthropic, name: claude-opus-4-6}\n    default: {provider: mock, name: mock-model}\n";
        let c: Config = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(c.model.classes.light.provider, "anthropic");
        assert_eq!(c.model.classes.heavy.name, "claude-opus-4-6");
    }

    #[test]
    fn config_partial_yaml_fills_in_defaults() {
        let yaml_str = "agent:\n  max_iterations: 10\n";
        let c: Config = serde_yaml::from_str(yaml_str).unwrap();
        assert_eq!(c.agent.max_iterations, 10);
        assert_eq!(c.tools.timeout_secs, ToolsConfig::default().timeout_secs);
    }

    #[test]
    fn config_providers_deserialised_from_yaml() {
        let yaml = r#"
providers:
  work_anthropic:
    api_key_env: WORK_ANTHROPIC_KEY
    base_url: https://api.anthropic.com
"#;
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(c.providers.len(), 1);
        let p = c.providers.get("work_anthropic").unwrap();
        assert_eq!(p.api_key_env.as_deref(), Some("WORK_ANTHROPIC_KEY"));
    }

    #[test]
    fn scheduler_job_defaults_match_spec() {
        let yaml = "scheduler:\n  jobs:\n    - id: morning_digest\n      cron: \"0 8 * * *\"\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        let job = &c.scheduler.jobs[0];
        assert_eq!(job.call_type, "scheduled");
        assert_eq!(job.channel, "scheduled");
        assert!(job.enabled);
    }

    #[test]
    fn scheduler_job_can_be_disabled() {
        let yaml = "scheduler:\n  jobs:\n    - id: paused_job\n      cron: \"* * * * *\"\n      enabled: false\n";
        let c: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(!c.scheduler.jobs[0].enabled);
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let mut c = Config::default();
        c.model.classes.light.provider = "anthropic".into();
        c.budget.daily_limit = 42;
        let yaml = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.model.classes.light.provider, "anthropic");
        assert_eq!(back.budget.daily_limit, 42);
    }
}
