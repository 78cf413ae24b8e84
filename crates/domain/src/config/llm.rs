use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM providers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI and any endpoint following its chat-completions contract
    /// (Ollama, vLLM, Together, …).
    OpenaiCompat,
    Anthropic,
    Gemini,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Stable id used in agent specs (`openai/gpt-4o` → provider id `openai`).
    pub id: String,
    pub kind: ProviderKind,
    pub base_url: String,
    /// Environment variable holding the API key. `None` for unauthenticated
    /// local endpoints.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub default_model: Option<String>,
    /// Whole-request timeout for non-streaming calls.
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl LlmConfig {
    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Embeddings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingProviderKind {
    Openai,
    Gemini,
    /// A local sentence-transformers HTTP service.
    SentenceTransformers,
    /// First configured of the above; lexical fallback when none is.
    Auto,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "d_embed_kind")]
    pub provider: EmbeddingProviderKind,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL for the sentence-transformers service.
    #[serde(default = "d_st_url")]
    pub sentence_transformers_url: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: d_embed_kind(),
            model: None,
            sentence_transformers_url: d_st_url(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_timeout() -> u64 {
    120
}
fn d_embed_kind() -> EmbeddingProviderKind {
    EmbeddingProviderKind::Auto
}
fn d_st_url() -> String {
    "http://127.0.0.1:8081".into()
}
