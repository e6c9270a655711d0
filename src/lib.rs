//! Multi-provider chat core for note-vault assistants.
//!
//! The crate covers the part of a chat plugin that is independent of
//! any UI: provider adapters speaking seven chat APIs behind one
//! [`backend::Backend`] trait, a model [`backend::Registry`] routing
//! model ids to connections, a [`session::ChatSession`] owning the
//! conversation and its mutation operations, and JSON history
//! persistence behind the host's [`storage::NoteStore`]. Rendering is
//! the host's job, driven through [`models::Event`] hooks.

pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod session;
pub mod storage;

pub use backend::{ArcBackend, Backend, Registry, new_registry};
pub use config::{Configuration, load_configuration};
pub use error::ChatError;
pub use models::{Conversation, Event, Message, MessageId, Role};
pub use session::{ChatOutcome, ChatSession, StopHandle};
pub use storage::{ArcNoteStore, ArcStorage, NoteStore, Storage, new_storage};
