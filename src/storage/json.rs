#[cfg(test)]
#[path = "json_test.rs"]
mod tests;

use async_trait::async_trait;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{Message, Role};
use crate::storage::{ArcNoteStore, NoteStore, Storage};

/// History persisted as a pretty-printed JSON array of `{role, content}`
/// records, one file per profile, under a directory of the note store.
pub struct JsonStorage {
    notes: ArcNoteStore,
    dir: String,
}

impl JsonStorage {
    pub fn new(notes: ArcNoteStore, dir: &str) -> Self {
        Self {
            notes,
            dir: dir.trim_end_matches('/').to_string(),
        }
    }

    fn history_path(&self, profile: &str) -> String {
        format!("{}/history-{}.json", self.dir, profile)
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn load(&self, profile: &str) -> Result<Vec<Message>> {
        let path = self.history_path(profile);
        if !self.notes.exists(&path).await? {
            return Ok(vec![]);
        }

        let raw = self
            .notes
            .read(&path)
            .await
            .wrap_err(format!("reading {}", path))?;
        let records: Vec<TurnRecord> =
            serde_json::from_str(&raw).wrap_err(format!("parsing {}", path))?;

        Ok(records.into_iter().map(Message::from).collect())
    }

    async fn save(&self, profile: &str, messages: &[Message]) -> Result<()> {
        if !self.notes.exists(&self.dir).await? {
            self.notes
                .mkdir(&self.dir)
                .await
                .wrap_err(format!("creating {}", self.dir))?;
        }

        let records = messages.iter().map(TurnRecord::from).collect::<Vec<_>>();
        let raw = serde_json::to_string_pretty(&records).wrap_err("serializing history")?;

        let path = self.history_path(profile);
        self.notes
            .write(&path, &raw)
            .await
            .wrap_err(format!("writing {}", path))?;
        log::debug!("persisted {} turns to {}", messages.len(), path);
        Ok(())
    }

    async fn clear(&self, profile: &str) -> Result<()> {
        self.save(profile, &[]).await
    }
}

/// On-disk record. Only role and content survive a round trip; ids and
/// reply links are rebuilt at load time.
#[derive(Debug, Serialize, Deserialize)]
struct TurnRecord {
    role: Role,
    content: String,
}

impl From<&Message> for TurnRecord {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role(),
            content: msg.content().to_string(),
        }
    }
}

impl From<TurnRecord> for Message {
    fn from(record: TurnRecord) -> Self {
        Message::new(record.role, record.content)
    }
}

/// Plain filesystem note store.
pub struct FsNoteStore;

#[async_trait]
impl NoteStore for FsNoteStore {
    async fn read(&self, path: &str) -> Result<String> {
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn write(&self, path: &str, text: &str) -> Result<()> {
        Ok(tokio::fs::write(path, text).await?)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        Ok(tokio::fs::create_dir_all(path).await?)
    }
}
