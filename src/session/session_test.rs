use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use super::*;
use crate::backend::{Backend, new_registry};
use crate::config::BackendConfig;
use crate::models::{BackendConnection, BackendResponse, ProviderKind, Role};
use crate::storage::{ArcStorage, FsNoteStore, JsonStorage};

#[derive(Debug)]
enum ScriptMode {
    /// Streams the deltas, then a done marker.
    Done,
    /// Streams the deltas, then fails.
    Error(&'static str),
    /// Streams the deltas, then parks until cancelled.
    Hang,
}

#[derive(Debug)]
struct ScriptedBackend {
    deltas: Vec<&'static str>,
    mode: ScriptMode,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn new(deltas: Vec<&'static str>, mode: ScriptMode) -> Arc<Self> {
        Arc::new(Self {
            deltas,
            mode,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn get_completion(&self, prompt: BackendPrompt, event_tx: ArcEventTx) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        for delta in &self.deltas {
            event_tx
                .send(Event::ChatDelta(BackendResponse {
                    generation: prompt.generation(),
                    model: prompt.model().to_string(),
                    text: delta.to_string(),
                    done: false,
                }))
                .await?;
        }

        match &self.mode {
            ScriptMode::Done => {
                event_tx
                    .send(Event::ChatDelta(BackendResponse {
                        generation: prompt.generation(),
                        model: prompt.model().to_string(),
                        text: format!(" (#{})", call),
                        done: false,
                    }))
                    .await?;
                event_tx
                    .send(Event::ChatDelta(BackendResponse {
                        generation: prompt.generation(),
                        model: prompt.model().to_string(),
                        text: String::new(),
                        done: true,
                    }))
                    .await?;
                Ok(())
            }
            ScriptMode::Error(message) => {
                Err(ChatError::provider("scripted", 500, *message).into())
            }
            ScriptMode::Hang => {
                prompt.cancel_token().cancelled().await;
                Err(ChatError::Aborted.into())
            }
        }
    }
}

fn temp_storage() -> ArcStorage {
    let dir = std::env::temp_dir()
        .join(format!("chatnote-session-{}", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string();
    Arc::new(JsonStorage::new(Arc::new(FsNoteStore), &dir))
}

fn test_general() -> GeneralConfig {
    GeneralConfig {
        model: Some("scripted-model".to_string()),
        ..GeneralConfig::default()
    }
}

fn new_session(
    backend: ArcBackend,
) -> (ChatSession, ArcStorage, UnboundedReceiver<Event>) {
    let storage = temp_storage();
    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let session = ChatSession::new(test_general(), backend, Arc::clone(&storage), Arc::new(tx));
    (session, storage, rx)
}

#[tokio::test]
async fn test_send_commits_reply_and_persists() {
    let backend = ScriptedBackend::new(vec!["Hi", " there"], ScriptMode::Done);
    let (mut session, storage, mut rx) = new_session(backend);

    let outcome = session.send("Hello").await.expect("send failed");

    let message = match outcome {
        ChatOutcome::Completed(message) => message,
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert_eq!(message.content(), "Hi there (#1)");

    let messages = session.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role(), Role::User);
    assert_eq!(messages[0].content(), "Hello");
    assert_eq!(messages[1].role(), Role::Assistant);
    assert_eq!(messages[1].reply_to(), Some(messages[0].id()));

    // on-disk mirror matches memory
    let stored = storage.load("default").await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].content(), "Hello");
    assert_eq!(stored[1].content(), "Hi there (#1)");

    // renderer saw deltas, then the commit
    let mut saw_delta = false;
    let mut saw_completed = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            Event::ChatDelta(resp) => {
                assert!(!resp.done);
                saw_delta = true;
                assert!(!saw_completed, "delta after completion");
            }
            Event::ChatCompleted(msg) => {
                assert_eq!(msg.content(), "Hi there (#1)");
                saw_completed = true;
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
    assert!(saw_delta);
    assert!(saw_completed);
}

#[tokio::test]
async fn test_failure_preserves_partial_output() {
    let backend = ScriptedBackend::new(vec!["par", "tial"], ScriptMode::Error("boom"));
    let (mut session, storage, _rx) = new_session(backend);

    let outcome = session.send("Hello").await.expect("send failed");

    match outcome {
        ChatOutcome::Failed { error, partial } => {
            assert!(error.contains("boom"), "error was: {}", error);
            assert_eq!(partial.unwrap().content(), "partial");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    // the partial turn is committed in memory and on disk
    let messages = session.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content(), "partial");

    let stored = storage.load("default").await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].content(), "partial");
}

#[tokio::test]
async fn test_abort_commits_partial_output() {
    let backend = ScriptedBackend::new(vec!["up to", " here"], ScriptMode::Hang);
    let (mut session, storage, _rx) = new_session(backend);

    let handle = session.stop_handle();
    tokio::spawn(async move {
        tokio::time::sleep(time::Duration::from_millis(100)).await;
        handle.stop();
    });

    let outcome = session.send("Hello").await.expect("send failed");

    match outcome {
        ChatOutcome::Aborted(partial) => {
            assert_eq!(partial.unwrap().content(), "up to here");
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let stored = storage.load("default").await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].content(), "up to here");
}

#[tokio::test]
async fn test_regenerate_replaces_reply_in_place() {
    let backend = ScriptedBackend::new(vec!["answer"], ScriptMode::Done);
    let (mut session, storage, _rx) = new_session(backend);

    session.send("Hello").await.expect("send failed");
    let user_id = session.conversation().messages()[0].id();

    let outcome = session.regenerate(user_id).await.expect("regenerate failed");
    match outcome {
        ChatOutcome::Completed(message) => assert_eq!(message.content(), "answer (#2)"),
        other => panic!("unexpected outcome: {:?}", other),
    }

    let messages = session.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content(), "answer (#2)");
    assert_eq!(messages[1].reply_to(), Some(user_id));

    let stored = storage.load("default").await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].content(), "answer (#2)");
}

#[tokio::test]
async fn test_regenerate_rejects_assistant_turn() {
    let backend = ScriptedBackend::new(vec!["answer"], ScriptMode::Done);
    let (mut session, _storage, _rx) = new_session(backend);

    session.send("Hello").await.expect("send failed");
    let reply_id = session.conversation().messages()[1].id();

    assert!(session.regenerate(reply_id).await.is_err());
}

#[tokio::test]
async fn test_edit_user_turn_refetches() {
    let backend = ScriptedBackend::new(vec!["answer"], ScriptMode::Done);
    let (mut session, _storage, _rx) = new_session(backend);

    session.send("Hello").await.expect("send failed");
    let user_id = session.conversation().messages()[0].id();

    let outcome = session
        .edit(user_id, "Edited question")
        .await
        .expect("edit failed");
    assert!(outcome.is_some());

    let messages = session.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content(), "Edited question");
    assert_eq!(messages[1].content(), "answer (#2)");
}

#[tokio::test]
async fn test_edit_assistant_turn_only_persists() {
    let backend = ScriptedBackend::new(vec!["answer"], ScriptMode::Done);
    let (mut session, storage, _rx) = new_session(backend);

    session.send("Hello").await.expect("send failed");
    let reply_id = session.conversation().messages()[1].id();

    let outcome = session
        .edit(reply_id, "hand-patched")
        .await
        .expect("edit failed");
    assert!(outcome.is_none());

    let messages = session.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].content(), "hand-patched");

    let stored = storage.load("default").await.unwrap();
    assert_eq!(stored[1].content(), "hand-patched");
}

#[tokio::test]
async fn test_delete_user_turn_removes_pair() {
    let backend = ScriptedBackend::new(vec!["answer"], ScriptMode::Done);
    let (mut session, storage, _rx) = new_session(backend);

    session.send("first").await.expect("send failed");
    session.send("second").await.expect("send failed");
    assert_eq!(session.conversation().len(), 4);

    let first_user = session.conversation().messages()[0].id();
    session.delete(first_user).await.expect("delete failed");

    let messages = session.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content(), "second");
    assert!(messages[1].is_assistant());

    let stored = storage.load("default").await.unwrap();
    assert_eq!(stored.len(), 2);
}

#[tokio::test]
async fn test_clear_empties_memory_and_disk() {
    let backend = ScriptedBackend::new(vec!["answer"], ScriptMode::Done);
    let (mut session, storage, _rx) = new_session(backend);

    session.send("Hello").await.expect("send failed");
    session.clear().await.expect("clear failed");

    assert!(session.conversation().is_empty());
    let stored = storage.load("default").await.unwrap();
    assert!(stored.is_empty());
}

#[tokio::test]
async fn test_slash_command_never_enters_history() {
    let backend = ScriptedBackend::new(vec!["answer"], ScriptMode::Done);
    let calls = Arc::clone(&backend);
    let (mut session, storage, _rx) = new_session(backend);

    let outcome = session.send("/clear").await.expect("send failed");

    assert!(matches!(outcome, ChatOutcome::Skipped));
    assert!(session.conversation().is_empty());
    assert_eq!(calls.calls.load(Ordering::SeqCst), 0);
    assert!(storage.load("default").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unrouted_model_fails_without_corrupting_history() {
    let config = BackendConfig {
        timeout_secs: None,
        connections: vec![
            BackendConnection::new(ProviderKind::OpenAI)
                .with_enabled(true)
                .add_model("gpt-4"),
        ],
    };
    let registry = new_registry(&config).unwrap();

    let storage = temp_storage();
    let (tx, _rx) = mpsc::unbounded_channel::<Event>();
    let general = GeneralConfig {
        model: Some("unknown-model".to_string()),
        ..GeneralConfig::default()
    };
    let mut session = ChatSession::new(general, registry, Arc::clone(&storage), Arc::new(tx));

    let outcome = session.send("Hello").await.expect("send failed");

    match outcome {
        ChatOutcome::Failed { error, partial } => {
            assert!(error.contains("unknown-model"), "error was: {}", error);
            assert!(partial.is_none());
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    // the user turn survives untouched
    let messages = session.conversation().messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content(), "Hello");
}

#[tokio::test]
async fn test_load_relinks_persisted_thread() {
    let backend = ScriptedBackend::new(vec!["answer"], ScriptMode::Done);
    let shared: ArcBackend = Arc::clone(&backend) as ArcBackend;
    let (mut session, storage, _rx) = new_session(shared);

    session.send("Hello").await.expect("send failed");

    let (tx, _rx2) = mpsc::unbounded_channel::<Event>();
    let mut reloaded = ChatSession::new(test_general(), backend, storage, Arc::new(tx));
    reloaded.load().await.expect("load failed");

    let messages = reloaded.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(
        reloaded.conversation().reply_of(messages[0].id()).unwrap().id(),
        messages[1].id()
    );
}

#[test]
fn test_stop_handle_last_request_wins() {
    let handle = StopHandle::default();

    let first = handle.replace();
    let second = handle.replace();
    assert!(first.is_cancelled());
    assert!(!second.is_cancelled());

    handle.stop();
    assert!(second.is_cancelled());
}
