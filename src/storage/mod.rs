pub mod json;

pub use json::{FsNoteStore, JsonStorage};

#[cfg(test)]
use mockall::automock;

use std::sync::Arc;

use async_trait::async_trait;
use eyre::Result;

use crate::config::StorageConfig;
use crate::models::Message;

/// The host's note/file layer. History is persisted through this seam
/// so the core never owns filesystem semantics.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NoteStore {
    async fn read(&self, path: &str) -> Result<String>;
    async fn write(&self, path: &str, text: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn mkdir(&self, path: &str) -> Result<()>;
}

pub type ArcNoteStore = Arc<dyn NoteStore + Send + Sync>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Storage {
    /// Loads the persisted thread for a profile; empty when none exists.
    async fn load(&self, profile: &str) -> Result<Vec<Message>>;
    async fn save(&self, profile: &str, messages: &[Message]) -> Result<()>;
    async fn clear(&self, profile: &str) -> Result<()>;
}

pub type ArcStorage = Arc<dyn Storage + Send + Sync>;

pub fn new_storage(config: &StorageConfig) -> ArcStorage {
    Arc::new(JsonStorage::new(Arc::new(FsNoteStore), &config.path))
}
