pub mod anthropic;
pub mod gemini;
pub mod mistral;
pub mod ollama;
pub mod openai;
pub mod openrouter;
pub mod registry;
pub mod rest;
pub(crate) mod utils;

pub use anthropic::Anthropic;
pub use gemini::Gemini;
pub use mistral::Mistral;
pub use ollama::Ollama;
pub use openai::OpenAI;
pub use openrouter::OpenRouter;
pub use registry::Registry;
pub use rest::Rest;

#[cfg(test)]
use mockall::{automock, predicate::*};

use crate::config::BackendConfig;
use crate::models::{ArcEventTx, BackendPrompt, ProviderKind};
use async_trait::async_trait;
use eyre::{Context, Result};
use std::sync::Arc;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Backend: std::fmt::Debug {
    fn name(&self) -> &str;
    /// Emits `Event::ChatDelta` fragments on `event_tx`, terminated by a
    /// `done: true` marker, or returns a normalized error.
    async fn get_completion(&self, prompt: BackendPrompt, event_tx: ArcEventTx) -> Result<()>;
}

pub type ArcBackend = Arc<dyn Backend + Send + Sync>;

/// Builds the model routing table once from settings. Connections are
/// registered in fixed provider priority order; within one kind the
/// configuration order decides.
pub fn new_registry(config: &BackendConfig) -> Result<Arc<Registry>> {
    let mut connections = config
        .connections
        .iter()
        .filter(|c| c.enabled())
        .collect::<Vec<_>>();
    if connections.is_empty() {
        eyre::bail!("no backend connections configured");
    }
    connections.sort_by_key(|c| c.kind().priority());

    let mut registry = Registry::default();
    for connection in connections {
        let mut connection = connection.clone();
        if connection.timeout_secs().is_none() {
            if let Some(timeout) = config.timeout_secs {
                connection = connection.with_timeout_secs(timeout);
            }
        }

        let backend: ArcBackend = match connection.kind() {
            ProviderKind::OpenAI => Arc::new(OpenAI::from(&connection)),
            ProviderKind::Anthropic => Arc::new(Anthropic::from(&connection)),
            ProviderKind::Ollama => Arc::new(Ollama::from(&connection)),
            ProviderKind::Rest => Arc::new(Rest::from(&connection)),
            ProviderKind::Mistral => Arc::new(Mistral::from(&connection)),
            ProviderKind::Gemini => Arc::new(Gemini::from(&connection)),
            ProviderKind::OpenRouter => Arc::new(OpenRouter::from(&connection)),
        };

        let name = backend.name().to_string();
        registry
            .add_connection(backend, connection.models())
            .wrap_err(format!("adding connection: {}", name))?;
        log::debug!("Added backend connection: {}", name);
    }

    Ok(Arc::new(registry))
}
