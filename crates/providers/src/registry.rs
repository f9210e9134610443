//! Provider registry.
//!
//! Instantiates the configured adapters at startup and hands them out by
//! tag. Providers that fail to initialize (usually a missing API key) are
//! logged, recorded, and skipped rather than aborting the host.

use std::collections::HashMap;
use std::sync::Arc;

use maestro_domain::config::{ProviderConfig, ProviderKind};
use maestro_domain::error::{Error, Result};

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;

/// Resolve the API key for a provider: direct key first, then env var.
pub(crate) fn resolve_api_key(cfg: &ProviderConfig) -> Result<String> {
    if let Some(key) = &cfg.api_key {
        return Ok(key.clone());
    }
    if let Some(var) = &cfg.api_key_env {
        return std::env::var(var).map_err(|_| {
            Error::Config(format!(
                "provider '{}': environment variable {var} is not set",
                cfg.tag
            ))
        });
    }
    Err(Error::Config(format!(
        "provider '{}' has neither api_key nor api_key_env",
        cfg.tag
    )))
}

/// Records a provider that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub tag: String,
    pub kind: String,
    pub error: String,
}

/// Holds all instantiated LLM adapters, keyed by provider tag.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    init_errors: Vec<ProviderInitError>,
}

impl ProviderRegistry {
    /// Build the registry from config. Failed providers are skipped and
    /// recorded so embedders can surface them.
    pub fn from_config(configs: &[ProviderConfig]) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut init_errors = Vec::new();

        for cfg in configs {
            let result: Result<Arc<dyn LlmProvider>> = match cfg.kind {
                ProviderKind::OpenaiCompat => {
                    OpenAiCompatProvider::from_config(cfg).map(|p| Arc::new(p) as _)
                }
                ProviderKind::Anthropic => {
                    AnthropicProvider::from_config(cfg).map(|p| Arc::new(p) as _)
                }
            };
            match result {
                Ok(provider) => {
                    tracing::info!(tag = %cfg.tag, kind = ?cfg.kind, "registered LLM provider");
                    providers.insert(cfg.tag.clone(), provider);
                }
                Err(e) => {
                    tracing::warn!(
                        tag = %cfg.tag,
                        kind = ?cfg.kind,
                        error = %e,
                        "failed to initialize LLM provider, skipping"
                    );
                    init_errors.push(ProviderInitError {
                        tag: cfg.tag.clone(),
                        kind: format!("{:?}", cfg.kind),
                        error: e.to_string(),
                    });
                }
            }
        }

        Self {
            providers,
            init_errors,
        }
    }

    /// Registry with a pre-built adapter set. Used by embedders that bring
    /// their own provider implementations (and by tests).
    pub fn from_providers(providers: Vec<Arc<dyn LlmProvider>>) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.provider_tag().to_owned(), p))
                .collect(),
            init_errors: Vec::new(),
        }
    }

    /// Look up an adapter by tag.
    pub fn get(&self, tag: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(tag).cloned()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// All registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.providers.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Initialization failures (empty when everything came up).
    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}
