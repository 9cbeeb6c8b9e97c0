//! Model registry and resolver
//!
//! Maps public `-responses` model identifiers to a provider adapter and the
//! underlying model name. New models are registered by extending the table;
//! adapter instances are built once per process and shared.

use std::{collections::HashMap, sync::Arc};

use thiserror::Error;

use super::{AnthropicAdapter, OpenAiCompatibleAdapter, ProviderAdapter};
use crate::{
    config::GatewayConfig,
    protocols::responses::{ModelList, ModelSummary},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Anthropic,
    OpenAiCompatible,
}

struct ModelEntry {
    public_id: &'static str,
    provider: ProviderKind,
    upstream_model: &'static str,
    created: i64,
    owned_by: &'static str,
}

/// Registration table. Adding a model is a one-line change here.
const MODEL_TABLE: &[ModelEntry] = &[
    ModelEntry {
        public_id: "claude-opus-4-responses",
        provider: ProviderKind::Anthropic,
        upstream_model: "claude-opus-4-20250514",
        created: 1747526400,
        owned_by: "anthropic",
    },
    ModelEntry {
        public_id: "claude-sonnet-4-responses",
        provider: ProviderKind::Anthropic,
        upstream_model: "claude-sonnet-4-20250514",
        created: 1747526400,
        owned_by: "anthropic",
    },
    ModelEntry {
        public_id: "claude-3-5-haiku-responses",
        provider: ProviderKind::Anthropic,
        upstream_model: "claude-3-5-haiku-20241022",
        created: 1729555200,
        owned_by: "anthropic",
    },
    ModelEntry {
        public_id: "gpt-4o-responses",
        provider: ProviderKind::OpenAiCompatible,
        upstream_model: "gpt-4o",
        created: 1715299200,
        owned_by: "openai",
    },
    ModelEntry {
        public_id: "gpt-4o-mini-responses",
        provider: ProviderKind::OpenAiCompatible,
        upstream_model: "gpt-4o-mini",
        created: 1721174400,
        owned_by: "openai",
    },
    ModelEntry {
        public_id: "gpt-4.1-responses",
        provider: ProviderKind::OpenAiCompatible,
        upstream_model: "gpt-4.1",
        created: 1744588800,
        owned_by: "openai",
    },
];

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("The requested model '{model}' does not exist or is not available. Supported models: {}", supported.join(", "))]
    UnknownModel {
        model: String,
        supported: Vec<String>,
    },
}

#[derive(Clone)]
pub struct ResolvedModel {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub upstream_model: String,
}

impl std::fmt::Debug for ResolvedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModel")
            .field("upstream_model", &self.upstream_model)
            .finish()
    }
}

/// Read-mostly registry built once at startup; entries whose provider is not
/// configured are filtered out of resolution and listing.
pub struct ModelRegistry {
    adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>>,
}

impl ModelRegistry {
    pub fn from_config(config: &GatewayConfig, client: &reqwest::Client) -> Self {
        let mut adapters: HashMap<ProviderKind, Arc<dyn ProviderAdapter>> = HashMap::new();

        if let Some(anthropic) = &config.anthropic {
            adapters.insert(
                ProviderKind::Anthropic,
                Arc::new(AnthropicAdapter::new(
                    client.clone(),
                    anthropic.base_url.clone(),
                    anthropic.api_key.clone(),
                )),
            );
        }
        if let Some(openai) = &config.openai {
            adapters.insert(
                ProviderKind::OpenAiCompatible,
                Arc::new(OpenAiCompatibleAdapter::new(
                    client.clone(),
                    openai.base_url.clone(),
                    openai.api_key.clone(),
                )),
            );
        }

        Self { adapters }
    }

    /// Registry with a single adapter serving every table entry; test seam.
    pub fn with_adapter(adapter: Arc<dyn ProviderAdapter>) -> Self {
        let mut adapters = HashMap::new();
        adapters.insert(ProviderKind::Anthropic, adapter.clone());
        adapters.insert(ProviderKind::OpenAiCompatible, adapter);
        Self { adapters }
    }

    pub fn resolve(&self, model_id: &str) -> Result<ResolvedModel, ResolveError> {
        MODEL_TABLE
            .iter()
            .find(|entry| entry.public_id == model_id)
            .and_then(|entry| {
                self.adapters.get(&entry.provider).map(|adapter| ResolvedModel {
                    adapter: adapter.clone(),
                    upstream_model: entry.upstream_model.to_string(),
                })
            })
            .ok_or_else(|| ResolveError::UnknownModel {
                model: model_id.to_string(),
                supported: self.supported_ids(),
            })
    }

    pub fn list(&self) -> ModelList {
        ModelList {
            object: "list".to_string(),
            data: MODEL_TABLE
                .iter()
                .filter(|entry| self.adapters.contains_key(&entry.provider))
                .map(summary)
                .collect(),
        }
    }

    pub fn get(&self, model_id: &str) -> Option<ModelSummary> {
        MODEL_TABLE
            .iter()
            .find(|entry| {
                entry.public_id == model_id && self.adapters.contains_key(&entry.provider)
            })
            .map(summary)
    }

    fn supported_ids(&self) -> Vec<String> {
        MODEL_TABLE
            .iter()
            .filter(|entry| self.adapters.contains_key(&entry.provider))
            .map(|entry| entry.public_id.to_string())
            .collect()
    }
}

fn summary(entry: &ModelEntry) -> ModelSummary {
    ModelSummary {
        id: entry.public_id.to_string(),
        object: "model".to_string(),
        created: entry.created,
        owned_by: entry.owned_by.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AnthropicConfig, GatewayConfig};

    fn config_with_anthropic() -> GatewayConfig {
        GatewayConfig {
            anthropic: Some(AnthropicConfig {
                api_key: "sk-test".to_string(),
                base_url: "https://api.anthropic.com".to_string(),
            }),
            ..GatewayConfig::default()
        }
    }

    #[test]
    fn resolves_registered_model() {
        let client = reqwest::Client::new();
        let registry = ModelRegistry::from_config(&config_with_anthropic(), &client);
        let resolved = registry.resolve("claude-sonnet-4-responses").unwrap();
        assert_eq!(resolved.upstream_model, "claude-sonnet-4-20250514");
        assert_eq!(resolved.adapter.name(), "anthropic");
    }

    #[test]
    fn unknown_model_lists_supported_ids() {
        let client = reqwest::Client::new();
        let registry = ModelRegistry::from_config(&config_with_anthropic(), &client);
        let err = registry.resolve("gpt-oss-responses").unwrap_err();
        let ResolveError::UnknownModel { model, supported } = err;
        assert_eq!(model, "gpt-oss-responses");
        assert!(supported.contains(&"claude-sonnet-4-responses".to_string()));
        // OpenAI provider is not configured, so its models are not offered
        assert!(!supported.contains(&"gpt-4o-responses".to_string()));
    }

    #[test]
    fn unconfigured_provider_model_is_unresolvable() {
        let client = reqwest::Client::new();
        let registry = ModelRegistry::from_config(&config_with_anthropic(), &client);
        assert!(registry.resolve("gpt-4o-responses").is_err());
        assert!(registry.get("gpt-4o-responses").is_none());
        assert!(registry.get("claude-sonnet-4-responses").is_some());
    }
}
