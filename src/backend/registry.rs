#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;

use crate::backend::{ArcBackend, Backend};
use crate::error::ChatError;
use crate::models::{ArcEventTx, BackendPrompt};
use async_trait::async_trait;
use eyre::{Result, bail};
use std::collections::HashMap;
use std::collections::hash_map::Entry;

/// Model routing table, built once from settings. Routing is a pure
/// lookup afterwards; nothing is rescanned per request.
#[derive(Default, Debug)]
pub struct Registry {
    connections: HashMap<String, ArcBackend>, /* Alias - Backend */
    models: HashMap<String, String>,          /* Model ID - Alias */
}

impl Registry {
    /// Registers a connection and claims its model ids. A model id
    /// already claimed by an earlier connection stays with that one;
    /// the shadowed claim is logged, not an error.
    pub fn add_connection(&mut self, connection: ArcBackend, models: &[String]) -> Result<()> {
        let alias = connection.name().to_string();

        if self.connections.contains_key(&alias) {
            bail!(format!("connection {} already exists", alias))
        }

        for model in models {
            match self.models.entry(model.clone()) {
                Entry::Occupied(entry) => {
                    log::warn!(
                        "model {} already routed to {}, ignoring claim by {}",
                        model,
                        entry.get(),
                        alias
                    );
                }
                Entry::Vacant(entry) => {
                    entry.insert(alias.clone());
                }
            }
        }

        self.connections.insert(alias, connection);
        Ok(())
    }

    pub fn get_connection(&self, model: &str) -> Option<&ArcBackend> {
        let alias = self.models.get(model)?;
        self.connections.get(alias)
    }

    pub fn route(&self, model: &str) -> Result<&ArcBackend> {
        self.get_connection(model)
            .ok_or_else(|| ChatError::ModelNotFound(model.to_string()).into())
    }

    /// Flattened `(model id, connection alias)` catalog, sorted by id.
    pub fn models(&self) -> Vec<(String, String)> {
        let mut models = self
            .models
            .iter()
            .map(|(id, alias)| (id.clone(), alias.clone()))
            .collect::<Vec<_>>();
        models.sort();
        models
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[async_trait]
impl Backend for Registry {
    fn name(&self) -> &str {
        "registry"
    }

    async fn get_completion(&self, prompt: BackendPrompt, event_tx: ArcEventTx) -> Result<()> {
        let connection = self.route(prompt.model())?;
        log::debug!(
            "routing model {} to connection {}",
            prompt.model(),
            connection.name()
        );
        connection.get_completion(prompt, event_tx).await
    }
}
