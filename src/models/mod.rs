pub mod backend;
pub mod conversation;
pub mod event;
pub mod message;

pub use backend::*;
pub use conversation::Conversation;
pub use event::{ArcEventTx, Event, EventTx};
pub use message::{Message, MessageId, Role};
