// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Model catalog: static metadata for known models, with optional live refresh.

use serde::{Deserialize, Serialize};

/// Input modalities supported by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputModality {
    Text,
    Image,
}

fn default_input_modalities() -> Vec<InputModality> {
    // Conservative default: text only.
    // Vision-capable models must explicitly list `image` in models.yaml.
    vec![InputModality::Text]
}

/// Metadata for a single model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCatalogEntry {
    /// Provider-scoped model identifier (e.g. "gpt-4o", "claude-opus-4-6")
    pub id: String,
    /// Human-readable display name
    pub name: String,
    /// Provider identifier: "openai" | "anthropic" | "mock"
    pub provider: String,
    /// Total context window in tokens (input + output)
    pub context_window: u32,
    /// Maximum output tokens per completion
    pub max_output_tokens: u32,
    /// Short description
    #[serde(default)]
    pub description: String,
    /// Supported input modalities.  Defaults to `[text]`.
    #[serde(default = "default_input_modalities")]
    pub input_modalities: Vec<InputModality>,
}

impl ModelCatalogEntry {
    /// Return `true` if the model can accept image input.
    pub fn supports_images(&self) -> bool {
        self.input_modalities.contains(&InputModality::Image)
    }
}

fn entry(
    id: &str,
    name: &str,
    provider: &str,
    context_window: u32,
    max_output_tokens: u32,
    description: &str,
    images: bool,
) -> ModelCatalogEntry {
    ModelCatalogEntry {
        id: id.into(),
        name: name.into(),
        provider: provider.into(),
        context_window,
        max_output_tokens,
        description: description.into(),
        input_modalities: if images {
            vec![InputModality::Text, InputModality::Image]
        } else {
            vec![InputModality::Text]
        },
    }
}

/// Return all entries from the bundled static catalog.
///
/// Hand-maintained rather than loaded from an external data file — the
/// runtime's model selector only needs context-window/output-token ceilings
/// and an image-capability flag per model, not the full vendor metadata a
/// CLI's `list-models` command would want.
pub fn static_catalog() -> Vec<ModelCatalogEntry> {
    vec![
        entry("gpt-4o", "GPT-4o", "openai", 128_000, 16_384, "OpenAI flagship multimodal model", true),
        entry("gpt-4o-mini", "GPT-4o mini", "openai", 128_000, 16_384, "OpenAI light multimodal model", true),
        entry("o3", "o3", "openai", 200_000, 100_000, "OpenAI reasoning model", false),
        entry(
            "claude-opus-4-6",
            "Claude Opus",
            "anthropic",
            200_000,
            32_000,
            "Anthropic flagship reasoning model",
            true,
        ),
        entry(
            "claude-sonnet-4-6",
            "Claude Sonnet",
            "anthropic",
            200_000,
            16_000,
            "Anthropic balanced model",
            true,
        ),
        entry(
            "claude-haiku-4-6",
            "Claude Haiku",
            "anthropic",
            200_000,
            8_192,
            "Anthropic light/fast model",
            true,
        ),
        entry("gemini-2.5-pro", "Gemini 2.5 Pro", "google", 1_000_000, 65_536, "Google flagship model", true),
        entry("gemini-2.5-flash", "Gemini 2.5 Flash", "google", 1_000_000, 32_768, "Google light model", true),
        entry("mock-model", "Mock", "mock", 32_000, 4_096, "Deterministic in-process test model", false),
    ]
}

/// Look up a single model by provider and id (or name).
/// Returns `None` if not found in the static catalog.
pub fn lookup(provider: &str, model_id: &str) -> Option<ModelCatalogEntry> {
    static_catalog()
        .into_iter()
        .find(|e| e.provider == provider && (e.id == model_id || e.name == model_id))
}

/// Look up a model by bare model name (without provider prefix).
///
/// Checks `id` and `name` fields.  Returns the first matching entry from the
/// static catalog or `None` if not found.
///
/// Used by `resolve_model_from_config` to detect when a bare model name (e.g.
/// `"gpt-4o"`) should be resolved against the catalog provider rather than
/// inheriting the custom `base_url` from the user's config.
pub fn lookup_by_model_name(model_name: &str) -> Option<ModelCatalogEntry> {
    static_catalog()
        .into_iter()
        .find(|e| e.id == model_name || e.name == model_name)
}

/// Return `true` if the model supports image input, defaulting to `false` when
/// the model is not found in the catalog.
pub fn supports_images(provider: &str, model_id: &str) -> bool {
    lookup(provider, model_id)
        .map(|e| e.supports_images())
        .unwrap_or(false)
}

/// Look up the context window for a model.  Falls back to `default` if not in catalog.
pub fn context_window(provider: &str, model_id: &str, default: u32) -> u32 {
    lookup(provider, model_id)
        .map(|e| e.context_window)
        .unwrap_or(default)
}

/// Look up the max output tokens for a model.  Falls back to `default` if not in catalog.
pub fn max_output_tokens(provider: &str, model_id: &str, default: u32) -> u32 {
    lookup(provider, model_id)
        .map(|e| e.max_output_tokens)
        .unwrap_or(default)
}

// ── Unit tests ────────────────────────────────────────────────────────────────
