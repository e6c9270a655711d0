use std::sync::Arc;

use tokio::sync::mpsc;

use crate::models::{BackendResponse, Message};

/// Renderer-facing hooks. The host paints chat bubbles from these; the
/// core never touches a DOM or terminal.
#[derive(Debug)]
pub enum Event {
    /// Incremental text fragment of the in-flight reply.
    ChatDelta(BackendResponse),
    /// The reply committed to history.
    ChatCompleted(Message),
    /// User cancelled; carries the partial turn when one was committed.
    ChatAborted(Option<Message>),
    /// Request failed; partial output, when any arrived, stays committed.
    ChatFailed {
        error: String,
        partial: Option<Message>,
    },
    ConversationUpdated,
    ConversationCleared,
}

#[async_trait::async_trait]
pub trait EventTx {
    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>>;
}

#[async_trait::async_trait]
impl EventTx for mpsc::Sender<Event> {
    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.send(event).await
    }
}

#[async_trait::async_trait]
impl EventTx for mpsc::UnboundedSender<Event> {
    async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.send(event)
    }
}

pub type ArcEventTx = Arc<dyn EventTx + Send + Sync>;
