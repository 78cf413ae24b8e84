//! Embedding backend resolution.
//!
//! Semantic similarity (convergence detection, flip detection) needs one
//! embeddings call per batch of texts. The backend is selected by
//! [`EmbeddingConfig`]: a provider's embeddings endpoint, a local
//! sentence-transformers HTTP service, or nothing (the engine then falls back
//! to its lexical embedder).

use std::sync::Arc;

use ag_domain::config::{EmbeddingConfig, EmbeddingProviderKind};
use ag_domain::error::{Error, Result};

use crate::registry::ProviderRegistry;
use crate::traits::{EmbeddingsRequest, LlmProvider};
use crate::util::{from_reqwest, status_to_error};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sentence-transformers client
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thin client for a local sentence-transformers service exposing
/// `POST /embed {"inputs": [...]} -> {"embeddings": [[...]]}`.
pub struct SentenceTransformersClient {
    base_url: String,
    client: reqwest::Client,
}

impl SentenceTransformersClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embed", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "inputs": texts }))
            .send()
            .await
            .map_err(from_reqwest)?;

        let status = resp.status();
        let text = resp.text().await.map_err(from_reqwest)?;
        if !status.is_success() {
            return Err(status_to_error("sentence-transformers", status, &text));
        }

        let v: serde_json::Value = serde_json::from_str(&text)?;
        let embeddings = v
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::Provider {
                provider: "sentence-transformers".into(),
                message: "missing 'embeddings' array".into(),
            })?
            .iter()
            .map(|row| {
                row.as_array()
                    .map(|vals| {
                        vals.iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect();

        Ok(embeddings)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

enum Backend {
    Provider {
        provider: Arc<dyn LlmProvider>,
        model: Option<String>,
    },
    Local(SentenceTransformersClient),
    Unavailable,
}

/// Resolved embedding backend shared by the engine's similarity paths.
pub struct EmbeddingRouter {
    backend: Backend,
}

impl EmbeddingRouter {
    /// Resolve the configured backend against the provider registry.
    ///
    /// `auto` prefers openai, then gemini, then reports unavailable so the
    /// engine can degrade to its lexical fallback.
    pub fn resolve(cfg: &EmbeddingConfig, registry: &ProviderRegistry) -> Self {
        let backend = match cfg.provider {
            EmbeddingProviderKind::Openai => match registry.get("openai") {
                Some(provider) => Backend::Provider {
                    provider,
                    model: cfg.model.clone(),
                },
                None => Backend::Unavailable,
            },
            EmbeddingProviderKind::Gemini => match registry.get("gemini") {
                Some(provider) => Backend::Provider {
                    provider,
                    model: cfg.model.clone(),
                },
                None => Backend::Unavailable,
            },
            EmbeddingProviderKind::SentenceTransformers => {
                match SentenceTransformersClient::new(&cfg.sentence_transformers_url) {
                    Ok(client) => Backend::Local(client),
                    Err(e) => {
                        tracing::warn!(error = %e, "sentence-transformers client init failed");
                        Backend::Unavailable
                    }
                }
            }
            EmbeddingProviderKind::Auto => {
                if let Some(provider) = registry.get("openai") {
                    Backend::Provider {
                        provider,
                        model: cfg.model.clone(),
                    }
                } else if let Some(provider) = registry.get("gemini") {
                    Backend::Provider {
                        provider,
                        model: cfg.model.clone(),
                    }
                } else {
                    Backend::Unavailable
                }
            }
        };

        if matches!(backend, Backend::Unavailable) {
            tracing::info!("no embedding backend available; lexical fallback will be used");
        }

        Self { backend }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.backend, Backend::Unavailable)
    }

    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            Backend::Provider { provider, model } => {
                let resp = provider
                    .embeddings(EmbeddingsRequest {
                        input: texts.to_vec(),
                        model: model.clone(),
                    })
                    .await?;
                Ok(resp.embeddings)
            }
            Backend::Local(client) => client.embed(texts).await,
            Backend::Unavailable => Err(Error::Transient(
                "no embedding backend configured".into(),
            )),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn empty_registry() -> ProviderRegistry {
        ProviderRegistry::with_providers(HashMap::new())
    }

    #[test]
    fn auto_with_no_providers_is_unavailable() {
        let cfg = EmbeddingConfig::default();
        let router = EmbeddingRouter::resolve(&cfg, &empty_registry());
        assert!(!router.is_available());
    }

    #[test]
    fn explicit_openai_without_provider_is_unavailable() {
        let cfg = EmbeddingConfig {
            provider: EmbeddingProviderKind::Openai,
            ..Default::default()
        };
        let router = EmbeddingRouter::resolve(&cfg, &empty_registry());
        assert!(!router.is_available());
    }

    #[test]
    fn sentence_transformers_is_available_without_providers() {
        let cfg = EmbeddingConfig {
            provider: EmbeddingProviderKind::SentenceTransformers,
            ..Default::default()
        };
        let router = EmbeddingRouter::resolve(&cfg, &empty_registry());
        assert!(router.is_available());
    }

    #[tokio::test]
    async fn unavailable_embed_errors() {
        let cfg = EmbeddingConfig::default();
        let router = EmbeddingRouter::resolve(&cfg, &empty_registry());
        assert!(router.embed(&["x".into()]).await.is_err());
    }
}
