//! Provider registry.
//!
//! Constructs and holds all configured LLM provider instances. At startup the
//! registry reads the [`LlmConfig`], resolves API keys from the environment,
//! and instantiates the appropriate adapter for each configured provider.

use crate::anthropic::AnthropicProvider;
use crate::gemini::GeminiProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;
use crate::util::mask_secrets;
use ag_domain::config::{LlmConfig, ProviderKind};
use ag_domain::error::Result;
use std::collections::HashMap;
use std::sync::Arc;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProviderRegistry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Holds all instantiated LLM providers.
///
/// Providers that fail to initialize are recorded (with masked errors) so
/// they can be surfaced in `/api/health` instead of aborting startup.
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    init_errors: Vec<ProviderInitError>,
}

/// Records a provider that failed to initialize.
#[derive(Debug, Clone)]
pub struct ProviderInitError {
    pub provider_id: String,
    pub kind: String,
    /// Error message with any potential secrets masked.
    pub error: String,
}

impl ProviderRegistry {
    /// Build the registry from the application's [`LlmConfig`].
    ///
    /// API keys are resolved eagerly (env vars are read at this point).
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        let mut init_errors: Vec<ProviderInitError> = Vec::new();

        for pc in &config.providers {
            let result: Result<Arc<dyn LlmProvider>> = match pc.kind {
                ProviderKind::OpenaiCompat => OpenAiCompatProvider::from_config(pc)
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
                ProviderKind::Anthropic => AnthropicProvider::from_config(pc)
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
                ProviderKind::Gemini => GeminiProvider::from_config(pc)
                    .map(|p| Arc::new(p) as Arc<dyn LlmProvider>),
            };

            match result {
                Ok(provider) => {
                    tracing::info!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        "registered LLM provider"
                    );
                    providers.insert(pc.id.clone(), provider);
                }
                Err(e) => {
                    let safe_error = mask_secrets(&e.to_string());
                    tracing::warn!(
                        provider_id = %pc.id,
                        kind = ?pc.kind,
                        error = %safe_error,
                        "failed to initialize LLM provider, skipping"
                    );
                    init_errors.push(ProviderInitError {
                        provider_id: pc.id.clone(),
                        kind: format!("{:?}", pc.kind),
                        error: safe_error,
                    });
                }
            }
        }

        Ok(Self {
            providers,
            init_errors,
        })
    }

    /// Registry with a fixed provider set, for tests and scripted debates.
    pub fn with_providers(providers: HashMap<String, Arc<dyn LlmProvider>>) -> Self {
        Self {
            providers,
            init_errors: Vec::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(id).cloned()
    }

    /// Resolve an agent identifier of the form `provider/model` (model
    /// optional) to a provider instance and model override.
    pub fn resolve_agent(&self, agent: &str) -> Option<(Arc<dyn LlmProvider>, Option<String>)> {
        let (provider_id, model) = match agent.split_once('/') {
            Some((p, m)) => (p, Some(m.to_string())),
            None => (agent, None),
        };
        self.get(provider_id).map(|p| (p, model))
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn init_errors(&self) -> &[ProviderInitError] {
        &self.init_errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use ag_domain::config::ProviderConfig;

    #[test]
    fn unauthenticated_openai_compat_registers() {
        let config = LlmConfig {
            providers: vec![ProviderConfig {
                id: "local".into(),
                kind: ProviderKind::OpenaiCompat,
                base_url: "http://127.0.0.1:11434/v1".into(),
                api_key_env: None,
                default_model: Some("llama3".into()),
                timeout_secs: 5,
            }],
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert!(!registry.is_empty());
        assert!(registry.get("local").is_some());
        assert!(registry.init_errors().is_empty());
    }

    #[test]
    fn missing_key_recorded_not_fatal() {
        let config = LlmConfig {
            providers: vec![ProviderConfig {
                id: "anthropic".into(),
                kind: ProviderKind::Anthropic,
                base_url: "https://api.anthropic.com".into(),
                api_key_env: Some("AG_TEST_NO_SUCH_KEY_ENV".into()),
                default_model: None,
                timeout_secs: 5,
            }],
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.init_errors().len(), 1);
        assert_eq!(registry.init_errors()[0].provider_id, "anthropic");
    }

    #[test]
    fn resolve_agent_splits_model() {
        let config = LlmConfig {
            providers: vec![ProviderConfig {
                id: "local".into(),
                kind: ProviderKind::OpenaiCompat,
                base_url: "http://127.0.0.1:11434/v1".into(),
                api_key_env: None,
                default_model: None,
                timeout_secs: 5,
            }],
        };
        let registry = ProviderRegistry::from_config(&config).unwrap();
        let (provider, model) = registry.resolve_agent("local/mistral").unwrap();
        assert_eq!(provider.provider_id(), "local");
        assert_eq!(model.as_deref(), Some("mistral"));

        let (_, model) = registry.resolve_agent("local").unwrap();
        assert!(model.is_none());
        assert!(registry.resolve_agent("missing/x").is_none());
    }
}
