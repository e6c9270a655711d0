use thiserror::Error;

/// Normalized failure taxonomy for the chat core. Provider adapters map
/// their wire-level error envelopes into these variants before anything
/// reaches the session layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("model {0} is not claimed by any configured connection")]
    ModelNotFound(String),

    #[error("{provider} error ({http_code}): {message}")]
    Provider {
        provider: String,
        http_code: u16,
        message: String,
    },

    /// A single malformed chunk inside a stream. Adapters recover from
    /// this locally (skip and log); it never aborts a stream.
    #[error("malformed stream chunk: {0}")]
    StreamParse(String),

    #[error("request aborted")]
    Aborted,

    #[error("persisting conversation: {0}")]
    Persistence(String),
}

impl ChatError {
    pub fn provider(provider: impl Into<String>, http_code: u16, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            http_code,
            message: message.into(),
        }
    }

    /// True when `err` carries an abort anywhere in its chain.
    pub fn is_abort(err: &eyre::Report) -> bool {
        err.chain()
            .any(|cause| matches!(cause.downcast_ref::<ChatError>(), Some(ChatError::Aborted)))
    }
}
