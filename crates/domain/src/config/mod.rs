mod debate;
mod llm;
mod ranking;
mod server;
mod storage;

pub use debate::*;
pub use llm::*;
pub use ranking::*;
pub use server::*;
pub use storage::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub debate: DebateDefaults,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Tracing filter; env `LOG_LEVEL` wins.
    #[serde(default)]
    pub log_level: Option<String>,
}

impl Config {
    /// Overlay the enumerated environment variables onto the file config.
    ///
    /// Provider API keys (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`,
    /// `GEMINI_API_KEY`) enable the matching provider when it is not already
    /// configured in the file.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse::<u16>("PORT") {
            self.server.port = v;
        }
        if let Ok(v) = std::env::var("BIND_ADDR") {
            if !v.is_empty() {
                self.server.bind_addr = v;
            }
        }
        if let Ok(v) = std::env::var("ALLOWED_ORIGINS") {
            let origins: Vec<String> = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !origins.is_empty() {
                self.server.cors.allowed_origins = origins;
            }
        }
        if let Some(v) = env_parse::<u64>("TOKEN_TTL_SECONDS") {
            self.auth.token_ttl_seconds = v;
        }
        if let Some(v) = env_parse::<usize>("WS_MAX_FRAME") {
            self.server.ws.max_frame_bytes = v;
        }
        if let Some(v) = env_parse::<u32>("RATE_LIMIT_PER_MINUTE") {
            self.rate_limit.per_token_per_minute = v;
        }
        if let Some(v) = env_parse::<u32>("IP_RATE_LIMIT_PER_MINUTE") {
            self.rate_limit.per_ip_per_minute = v;
        }
        if let Ok(v) = std::env::var("EMBEDDING_PROVIDER") {
            match v.as_str() {
                "openai" => self.embedding.provider = EmbeddingProviderKind::Openai,
                "gemini" => self.embedding.provider = EmbeddingProviderKind::Gemini,
                "sentence-transformers" => {
                    self.embedding.provider = EmbeddingProviderKind::SentenceTransformers
                }
                "auto" => self.embedding.provider = EmbeddingProviderKind::Auto,
                other => tracing::warn!(value = %other, "unknown EMBEDDING_PROVIDER, keeping configured value"),
            }
        }
        if let Some(v) = env_parse::<u32>("DEBATE_DEFAULT_ROUNDS") {
            self.debate.rounds = v.max(1);
        }
        if let Ok(v) = std::env::var("DEBATE_DEFAULT_CONSENSUS") {
            match v.parse::<ConsensusPolicy>() {
                Ok(p) => self.debate.consensus_policy = p,
                Err(e) => tracing::warn!(error = %e, "ignoring DEBATE_DEFAULT_CONSENSUS"),
            }
        }
        if let Some(v) = env_parse::<f64>("DEBATE_CONSENSUS_THRESHOLD") {
            self.debate.consensus_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("DEBATE_CONVERGENCE_SIMILARITY") {
            self.debate.convergence.similarity_threshold = v;
        }
        if let Some(v) = env_parse::<u32>("DEBATE_MIN_PARTICIPANTS") {
            self.debate.min_participants = v;
        }
        if let Ok(v) = std::env::var("LOG_LEVEL") {
            if !v.is_empty() {
                self.log_level = Some(v);
            }
        }

        self.enable_provider_from_env("openai", ProviderKind::OpenaiCompat, "OPENAI_API_KEY", "https://api.openai.com/v1", "gpt-4o-mini");
        self.enable_provider_from_env("anthropic", ProviderKind::Anthropic, "ANTHROPIC_API_KEY", "https://api.anthropic.com", "claude-sonnet-4-20250514");
        self.enable_provider_from_env("gemini", ProviderKind::Gemini, "GEMINI_API_KEY", "https://generativelanguage.googleapis.com", "gemini-2.0-flash");
    }

    fn enable_provider_from_env(
        &mut self,
        id: &str,
        kind: ProviderKind,
        key_env: &str,
        base_url: &str,
        default_model: &str,
    ) {
        if self.llm.provider(id).is_some() {
            return;
        }
        if std::env::var(key_env).map(|v| !v.is_empty()).unwrap_or(false) {
            self.llm.providers.push(ProviderConfig {
                id: id.to_string(),
                kind,
                base_url: base_url.to_string(),
                api_key_env: Some(key_env.to_string()),
                default_model: Some(default_model.to_string()),
                timeout_secs: 120,
            });
        }
    }

    /// Check the configuration for invalid combinations.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.debate.rounds == 0 {
            issues.push(ConfigIssue::error("debate.rounds must be at least 1"));
        }
        if self.debate.min_participants < 2 {
            issues.push(ConfigIssue::error(
                "debate.min_participants must be at least 2",
            ));
        }
        if !(0.0..=1.0).contains(&self.debate.consensus_threshold) {
            issues.push(ConfigIssue::error(
                "debate.consensus_threshold must be in [0, 1]",
            ));
        }
        if !(0.0..=1.0).contains(&self.debate.convergence.similarity_threshold) {
            issues.push(ConfigIssue::error(
                "debate.convergence.similarity_threshold must be in [0, 1]",
            ));
        }
        let r = &self.ranking;
        if !(r.tau_qual <= r.tau_refine && r.tau_refine <= r.tau_same) {
            issues.push(ConfigIssue::error(
                "ranking thresholds must satisfy tau_qual <= tau_refine <= tau_same",
            ));
        }
        if self.rate_limit.burst_multiplier < 1.0 {
            issues.push(ConfigIssue::warning(
                "rate_limit.burst_multiplier below 1.0 disables bursting",
            ));
        }
        if self.llm.providers.is_empty() {
            issues.push(ConfigIssue::warning(
                "no LLM providers configured; only scripted agents will work",
            ));
        }
        for p in &self.llm.providers {
            if p.base_url.is_empty() {
                issues.push(ConfigIssue::error(format!(
                    "provider '{}' has an empty base_url",
                    p.id
                )));
            }
        }

        issues
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}
