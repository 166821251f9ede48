// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Chooses which model/provider pair should handle a request, honoring
//! circuit-breaker health and a few light heuristics over the query text.

use std::collections::HashSet;
use std::sync::Arc;

use vigil_circuit::CircuitRegistry;

/// Depth of internal reasoning the model should apply before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThinkingLevel {
    Off,
    Low,
    Medium,
    High,
}

/// A concrete provider/model pair, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
    /// Set when the selection calls for extended thinking; the number of
    /// reasoning tokens the model may use internally.
    pub thinking_budget_tokens: Option<u32>,
}

/// One class of model (light/heavy/thinking/fallback default).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub provider: String,
    pub model: String,
}

impl ModelSpec {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self { provider: provider.into(), model: model.into() }
    }

    fn circuit_key(&self) -> String {
        format!("model:{}/{}", self.provider, self.model)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ModelClass {
    Light,
    Heavy,
    Thinking,
}

#[derive(Debug, Clone)]
pub struct ModelClasses {
    pub light: ModelSpec,
    pub heavy: ModelSpec,
    pub thinking: ModelSpec,
    /// Provider-agnostic fallback used when every classed candidate's
    /// circuit is open.
    pub default: ModelSpec,
}

#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub heavy_modes: HashSet<String>,
    pub light_modes: HashSet<String>,
    /// Query length (characters) above which the query is treated as complex.
    pub complex_threshold: usize,
    /// Keywords that, if present in the query (case-insensitive), mark it complex.
    pub complex_keywords: Vec<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            heavy_modes: HashSet::new(),
            light_modes: HashSet::new(),
            complex_threshold: 150,
            complex_keywords: vec![
                "analyze".into(),
                "explain".into(),
                "compare".into(),
                "design".into(),
                "architecture".into(),
                "tradeoff".into(),
            ],
        }
    }
}

fn thinking_budget(level: ThinkingLevel) -> u32 {
    match level {
        ThinkingLevel::Off => 0,
        ThinkingLevel::Low => 2_000,
        ThinkingLevel::Medium => 8_000,
        ThinkingLevel::High => 24_000,
    }
}

/// Chooses a [`ModelConfig`] per request, honoring circuit-breaker health.
///
/// Constructed explicitly and held in an `Arc` by the caller (§9: no lazy
/// module-level singleton).
pub struct ModelSelector {
    classes: ModelClasses,
    config: SelectorConfig,
    circuits: Arc<CircuitRegistry>,
}

impl ModelSelector {
    pub fn new(classes: ModelClasses, config: SelectorConfig, circuits: Arc<CircuitRegistry>) -> Self {
        Self { classes, config, circuits }
    }

    /// §4.5 decision order, then a circuit-aware fallback within/above the
    /// chosen class, finally falling through to the provider-agnostic default.
    pub fn select(
        &self,
        query: &str,
        mode: Option<&str>,
        think: bool,
        thinking_level: Option<ThinkingLevel>,
    ) -> ModelConfig {
        if let Some(level) = thinking_level {
            if level != ThinkingLevel::Off {
                return self.resolve(ModelClass::Thinking, Some(thinking_budget(level)));
            }
        }
        if think {
            return self.resolve(ModelClass::Thinking, Some(thinking_budget(ThinkingLevel::Medium)));
        }
        if let Some(mode) = mode {
            if self.config.heavy_modes.contains(mode) {
                return self.resolve(ModelClass::Heavy, None);
            }
            if self.config.light_modes.contains(mode) {
                return self.resolve(ModelClass::Light, None);
            }
        }
        if self.is_complex(query) {
            return self.resolve(ModelClass::Heavy, None);
        }
        self.resolve(ModelClass::Light, None)
    }

    fn is_complex(&self, query: &str) -> bool {
        if query.len() > self.config.complex_threshold {
            return true;
        }
        let lower = query.to_lowercase();
        self.config.complex_keywords.iter().any(|kw| lower.contains(kw.as_str()))
    }

    fn spec_for(&self, class: ModelClass) -> &ModelSpec {
        match class {
            ModelClass::Light => &self.classes.light,
            ModelClass::Heavy => &self.classes.heavy,
            ModelClass::Thinking => &self.classes.thinking,
        }
    }

    /// Walk classes at or above `preferred` looking for one whose circuit is
    /// closed; fall through to the provider-agnostic default if none qualify.
    fn resolve(&self, preferred: ModelClass, thinking_budget_tokens: Option<u32>) -> ModelConfig {
        let order = [ModelClass::Light, ModelClass::Heavy, ModelClass::Thinking];
        let start = order.iter().position(|c| *c == preferred).unwrap_or(0);
        for class in &order[start..] {
            let spec = self.spec_for(*class);
            if self.circuits.is_available(&spec.circuit_key()) {
                return ModelConfig {
                    provider: spec.provider.clone(),
                    model: spec.model.clone(),
                    thinking_budget_tokens: if *class == ModelClass::Thinking {
                        thinking_budget_tokens
                    } else {
                        None
                    },
                };
            }
        }
        ModelConfig {
            provider: self.classes.default.provider.clone(),
            model: self.classes.default.model.clone(),
            thinking_budget_tokens: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_clock::SystemClock;
    use vigil_circuit::CircuitBreakerConfig;

    fn selector() -> ModelSelector {
        let circuits = Arc::new(CircuitRegistry::new(CircuitBreakerConfig::default(), Arc::new(SystemClock)));
        ModelSelector::new(
            ModelClasses {
                light: ModelSpec::new("anthropic", "claude-haiku-4-6"),
                heavy: ModelSpec::new("anthropic", "claude-opus-4-6"),
                thinking: ModelSpec::new("anthropic", "claude-opus-4-6"),
                default: ModelSpec::new("mock", "mock-model"),
            },
            SelectorConfig::default(),
            circuits,
        )
    }

    #[test]
    fn short_simple_query_selects_light() {
        let s = selector();
        let cfg = s.select("what time is it", None, false, None);
        assert_eq!(cfg.model, "claude-haiku-4-6");
        assert!(cfg.thinking_budget_tokens.is_none());
    }

    #[test]
    fn complex_keyword_selects_heavy() {
        let s = selector();
        let cfg = s.select("please analyze this tradeoff", None, false, None);
        assert_eq!(cfg.model, "claude-opus-4-6");
    }

    #[test]
    fn long_query_selects_heavy() {
        let s = selector();
        let long = "a".repeat(500);
        let cfg = s.select(&long, None, false, None);
        assert_eq!(cfg.model, "claude-opus-4-6");
    }

    #[test]
    fn think_flag_selects_thinking_with_medium_budget() {
        let s = selector();
        let cfg = s.select("hi", None, true, None);
        assert_eq!(cfg.thinking_budget_tokens, Some(thinking_budget(ThinkingLevel::Medium)));
    }

    #[test]
    fn explicit_thinking_level_takes_priority_over_think_flag() {
        let s = selector();
        let cfg = s.select("hi", None, true, Some(ThinkingLevel::High));
        assert_eq!(cfg.thinking_budget_tokens, Some(thinking_budget(ThinkingLevel::High)));
    }

    #[test]
    fn thinking_level_off_is_treated_as_absent() {
        let s = selector();
        let cfg = s.select("hi", None, false, Some(ThinkingLevel::Off));
        assert_eq!(cfg.model, "claude-haiku-4-6");
        assert!(cfg.thinking_budget_tokens.is_none());
    }

    #[test]
    fn heavy_mode_overrides_short_query() {
        let mut cfg = SelectorConfig::default();
        cfg.heavy_modes.insert("deep_research".into());
        let circuits = Arc::new(CircuitRegistry::new(CircuitBreakerConfig::default(), Arc::new(SystemClock)));
        let s = ModelSelector::new(
            ModelClasses {
                light: ModelSpec::new("anthropic", "claude-haiku-4-6"),
                heavy: ModelSpec::new("anthropic", "claude-opus-4-6"),
                thinking: ModelSpec::new("anthropic", "claude-opus-4-6"),
                default: ModelSpec::new("mock", "mock-model"),
            },
            cfg,
            circuits,
        );
        let result = s.select("hi", Some("deep_research"), false, None);
        assert_eq!(result.model, "claude-opus-4-6");
    }

    #[test]
    fn falls_back_to_heavy_when_light_circuit_open() {
        let circuits = Arc::new(CircuitRegistry::new(
            CircuitBreakerConfig { failure_threshold: 1, ..Default::default() },
            Arc::new(SystemClock),
        ));
        let light = ModelSpec::new("anthropic", "claude-haiku-4-6");
        circuits.record(&light.circuit_key(), false, std::time::Duration::from_millis(1));
        let s = ModelSelector::new(
            ModelClasses {
                light: light.clone(),
                heavy: ModelSpec::new("anthropic", "claude-opus-4-6"),
                thinking: ModelSpec::new("anthropic", "claude-opus-4-6"),
                default: ModelSpec::new("mock", "mock-model"),
            },
            SelectorConfig::default(),
            circuits,
        );
        let cfg = s.select("hi", None, false, None);
        assert_eq!(cfg.model, "claude-opus-4-6");
    }

    #[test]
    fn falls_back_to_default_when_every_class_open() {
        let circuits = Arc::new(CircuitRegistry::new(
            CircuitBreakerConfig { failure_threshold: 1, ..Default::default() },
            Arc::new(SystemClock),
        ));
        let light = ModelSpec::new("anthropic", "claude-haiku-4-6");
        let heavy = ModelSpec::new("anthropic", "claude-opus-4-6");
        circuits.record(&light.circuit_key(), false, std::time::Duration::from_millis(1));
        circuits.record(&heavy.circuit_key(), false, std::time::Duration::from_millis(1));
        let s = ModelSelector::new(
            ModelClasses {
                light,
                heavy: heavy.clone(),
                thinking: heavy,
                default: ModelSpec::new("mock", "mock-model"),
            },
            SelectorConfig::default(),
            circuits,
        );
        let cfg = s.select("hi", None, false, None);
        assert_eq!(cfg.provider, "mock");
        assert_eq!(cfg.model, "mock-model");
    }
}
