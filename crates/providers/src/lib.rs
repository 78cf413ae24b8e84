//! LLM provider adapters for Aragora.
//!
//! One streaming call to one provider: a uniform [`traits::LlmProvider`]
//! contract over the OpenAI-compatible, Anthropic and Gemini wire formats,
//! plus embeddings and the provider registry the engine resolves agents
//! against.

pub mod anthropic;
pub mod embeddings;
pub mod gemini;
pub mod openai_compat;
pub mod registry;
pub mod sse;
pub mod traits;
pub mod util;
