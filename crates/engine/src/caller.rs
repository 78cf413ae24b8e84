//! The agent-call capability.
//!
//! The orchestrator and invoker never touch provider adapters directly;
//! they go through [`AgentCaller`], which maps an agent identifier to one
//! streamed LLM call. The production implementation resolves agents against
//! the provider registry; tests use `testing::ScriptedCaller`.

use std::sync::Arc;

use ag_domain::error::{Error, Result};
use ag_domain::stream::{BoxStream, StreamEvent};
use ag_providers::registry::ProviderRegistry;
use ag_providers::traits::ChatRequest;

/// One streamed turn for one agent.
#[async_trait::async_trait]
pub trait AgentCaller: Send + Sync {
    async fn stream_turn(
        &self,
        agent: &str,
        req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}

/// Resolves `provider/model` agent identifiers against the registry.
pub struct ProviderCaller {
    registry: Arc<ProviderRegistry>,
}

impl ProviderCaller {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl AgentCaller for ProviderCaller {
    async fn stream_turn(
        &self,
        agent: &str,
        mut req: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let (provider, model) = self.registry.resolve_agent(agent).ok_or_else(|| {
            Error::Config(format!("agent '{agent}' does not match a configured provider"))
        })?;
        if req.model.is_none() {
            req.model = model;
        }
        provider.chat_stream(req).await
    }
}
