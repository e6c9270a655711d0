#[cfg(test)]
#[path = "models_test.rs"]
mod tests;

use serde::{Deserialize, Serialize};

use super::defaults::*;

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Configuration {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct GeneralConfig {
    /// Active model id. Routed against the connections' model lists.
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default = "max_tokens")]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: Option<f32>,

    /// System role text sent ahead of every conversation.
    #[serde(default)]
    pub system_role: Option<String>,

    /// Prepend the content of the note the user is looking at.
    #[serde(default)]
    pub reference_current_note: bool,

    /// History namespace. Each profile persists its own thread.
    #[serde(default = "profile")]
    pub profile: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogConfig {
    #[serde(default = "log_level")]
    pub level: Option<String>,

    #[serde(default)]
    pub file: Option<LogFile>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LogFile {
    #[serde(default = "log_file_path")]
    pub path: String,

    #[serde(default)]
    pub append: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct BackendConfig {
    /// Fallback request timeout applied to connections without their own.
    #[serde(default)]
    pub timeout_secs: Option<u16>,

    #[serde(default)]
    pub connections: Vec<crate::models::BackendConnection>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StorageConfig {
    #[serde(default = "history_dir")]
    pub path: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_tokens: max_tokens(),
            temperature: None,
            system_role: None,
            reference_current_note: false,
            profile: profile(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: log_level(),
            file: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: history_dir(),
        }
    }
}
