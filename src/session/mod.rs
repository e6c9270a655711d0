pub mod aggregator;

pub use aggregator::{StreamAggregator, StreamPhase};

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;

use std::sync::{Arc, Mutex};

use eyre::{Result, bail};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{ArcBackend, utils};
use crate::config::GeneralConfig;
use crate::error::ChatError;
use crate::models::{
    ArcEventTx, BackendPrompt, Conversation, Event, Message, MessageId,
};
use crate::storage::ArcStorage;

/// The cancellation slot shared between the session and the host's
/// "stop" control. Installing a new request's token cancels whatever
/// was in the slot before: last request wins.
#[derive(Clone, Default)]
pub struct StopHandle {
    current: Arc<Mutex<CancellationToken>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.current.lock().unwrap().cancel();
    }

    fn replace(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let old = {
            let mut slot = self.current.lock().unwrap();
            std::mem::replace(&mut *slot, token.clone())
        };
        old.cancel();
        token
    }
}

/// How one request ended. Partial turns carried by `Aborted`/`Failed`
/// are already committed to history.
#[derive(Debug)]
pub enum ChatOutcome {
    Completed(Message),
    Aborted(Option<Message>),
    Failed {
        error: String,
        partial: Option<Message>,
    },
    /// Slash-command input; nothing was appended or sent.
    Skipped,
}

enum Finish {
    Completed,
    Aborted,
    Failed(String),
}

/// One chat thread: conversation state, dispatch, and persistence.
/// Methods take `&mut self`, so per conversation every operation is
/// serialized; memory and the persisted mirror stay consistent after
/// each call.
pub struct ChatSession {
    general: GeneralConfig,
    conversation: Conversation,
    backend: ArcBackend,
    storage: ArcStorage,
    event_tx: ArcEventTx,
    stop: StopHandle,
    generation: u64,
    reference_note: Option<String>,
    prompt_file: Option<String>,
}

impl ChatSession {
    pub fn new(
        general: GeneralConfig,
        backend: ArcBackend,
        storage: ArcStorage,
        event_tx: ArcEventTx,
    ) -> Self {
        Self {
            general,
            conversation: Conversation::new(),
            backend,
            storage,
            event_tx,
            stop: StopHandle::default(),
            generation: 0,
            reference_note: None,
            prompt_file: None,
        }
    }

    /// Loads the persisted thread of the active profile.
    pub async fn load(&mut self) -> Result<()> {
        let messages = self.storage.load(&self.general.profile).await?;
        self.conversation = Conversation::new().with_messages(messages);
        Ok(())
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Clone freely; the handle stays wired to this session's slot.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn set_active_model(&mut self, model: impl Into<String>) {
        self.general.model = Some(model.into());
    }

    /// Content of the note the user is viewing. Only consulted when
    /// `reference_current_note` is enabled.
    pub fn set_reference_note(&mut self, content: Option<String>) {
        self.reference_note = content;
    }

    /// Content of the external prompt file, when one is configured.
    pub fn set_prompt_file(&mut self, content: Option<String>) {
        self.prompt_file = content;
    }

    /// Appends the user turn, persists, then fetches the reply. Slash
    /// commands are the host's business and never enter history.
    pub async fn send(&mut self, text: &str) -> Result<ChatOutcome> {
        if utils::is_slash_command(text) {
            log::debug!("slash command input skipped: {}", text);
            return Ok(ChatOutcome::Skipped);
        }

        let user_id = self.conversation.append(Message::user(text));
        // the append is on disk before the request goes out
        self.persist().await;

        self.fetch_reply(user_id).await
    }

    /// Refetches the reply to a user turn with unchanged content.
    pub async fn regenerate(&mut self, user_id: MessageId) -> Result<ChatOutcome> {
        let Some(turn) = self.conversation.get(user_id) else {
            bail!("message {} not found", user_id);
        };
        if !turn.is_user() {
            bail!("only user turns can be regenerated");
        }
        self.drop_reply_and_refetch(user_id).await
    }

    /// Edits a turn in place. A user-turn edit cascades like
    /// regenerate; an assistant-turn edit only mutates and persists.
    pub async fn edit(
        &mut self,
        id: MessageId,
        content: impl Into<String>,
    ) -> Result<Option<ChatOutcome>> {
        let Some(turn) = self.conversation.get_mut(id) else {
            bail!("message {} not found", id);
        };
        let is_user = turn.is_user();
        turn.set_content(content);

        if is_user {
            return Ok(Some(self.drop_reply_and_refetch(id).await?));
        }

        self.persist().await;
        self.emit(Event::ConversationUpdated).await;
        Ok(None)
    }

    /// Removes a turn (and the paired assistant reply when a user turn
    /// is removed). An in-flight request is cancelled so no late commit
    /// can reference the removed turn.
    pub async fn delete(&mut self, id: MessageId) -> Result<()> {
        self.stop.stop();

        let removed = self.conversation.remove(id);
        if removed.is_empty() {
            bail!("message {} not found", id);
        }

        self.persist().await;
        self.emit(Event::ConversationUpdated).await;
        Ok(())
    }

    /// Empties the thread in memory and on disk.
    pub async fn clear(&mut self) -> Result<()> {
        self.stop.stop();
        self.conversation.clear();

        if let Err(err) = self.storage.clear(&self.general.profile).await {
            log::error!("{}", ChatError::Persistence(format!("{:#}", err)));
        }

        self.emit(Event::ConversationCleared).await;
        Ok(())
    }

    async fn drop_reply_and_refetch(&mut self, user_id: MessageId) -> Result<ChatOutcome> {
        if let Some(reply_id) = self.conversation.reply_of(user_id).map(|m| m.id()) {
            self.conversation.remove(reply_id);
        }
        self.persist().await;
        self.emit(Event::ConversationUpdated).await;

        self.fetch_reply(user_id).await
    }

    /// Dispatches the request for the turn ending at `user_id` and
    /// drives the stream to a terminal phase, committing accumulated
    /// text on every exit path that produced any.
    async fn fetch_reply(&mut self, user_id: MessageId) -> Result<ChatOutcome> {
        let Some(model) = self.general.model.clone().filter(|m| !m.is_empty()) else {
            let error = "no active model is set".to_string();
            self.emit(Event::ChatFailed {
                error: error.clone(),
                partial: None,
            })
            .await;
            return Ok(ChatOutcome::Failed {
                error,
                partial: None,
            });
        };

        let token = self.stop.replace();
        self.generation += 1;
        let generation = self.generation;

        let turns = utils::prepare_turns(self.conversation.turns_through(user_id));
        let system_prompt = utils::build_system_prompt(
            if self.general.reference_current_note {
                self.reference_note.as_deref()
            } else {
                None
            },
            self.general.system_role.as_deref(),
            self.prompt_file.as_deref(),
        );

        let mut prompt = BackendPrompt::new(&model)
            .with_system_prompt(system_prompt)
            .with_turns(turns)
            .with_generation(generation)
            .with_cancel_token(token.clone());
        if let Some(max_tokens) = self.general.max_tokens {
            prompt = prompt.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = self.general.temperature {
            prompt = prompt.with_temperature(temperature);
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let sender: ArcEventTx = Arc::new(tx);
        let backend = Arc::clone(&self.backend);
        let mut worker: Option<JoinHandle<Result<()>>> = Some(tokio::spawn(async move {
            backend.get_completion(prompt, sender).await
        }));

        let mut aggregator = StreamAggregator::new(generation);

        let finish = loop {
            tokio::select! {
                _ = token.cancelled() => {
                    if let Some(worker) = &worker {
                        worker.abort();
                    }
                    break Finish::Aborted;
                }

                event = rx.recv() => match event {
                    Some(Event::ChatDelta(resp)) => {
                        if !aggregator.accepts(resp.generation) {
                            log::debug!("discarding delta from stale generation {}", resp.generation);
                            continue;
                        }
                        if resp.done {
                            break Finish::Completed;
                        }
                        aggregator.push(&resp.text);
                        self.emit(Event::ChatDelta(resp)).await;
                    }
                    Some(_) => {}
                    None => {
                        // the adapter is gone without a done marker
                        break match worker.take().unwrap().await {
                            Ok(Ok(())) => Finish::Completed,
                            Ok(Err(err)) if ChatError::is_abort(&err) => Finish::Aborted,
                            Ok(Err(err)) => Finish::Failed(format!("{:#}", err)),
                            Err(err) if err.is_cancelled() => Finish::Aborted,
                            Err(err) => Finish::Failed(err.to_string()),
                        };
                    }
                }
            }
        };

        let outcome = match finish {
            Finish::Completed => {
                let content = aggregator.complete();
                match self.commit_reply(user_id, content).await {
                    Some(message) => {
                        self.emit(Event::ChatCompleted(message.clone())).await;
                        ChatOutcome::Completed(message)
                    }
                    None => ChatOutcome::Aborted(None),
                }
            }
            Finish::Aborted => {
                let content = aggregator.abort();
                let partial = if content.is_empty() {
                    None
                } else {
                    self.commit_reply(user_id, content).await
                };
                self.emit(Event::ChatAborted(partial.clone())).await;
                ChatOutcome::Aborted(partial)
            }
            Finish::Failed(error) => {
                let content = aggregator.fail();
                let partial = if content.is_empty() {
                    None
                } else {
                    self.commit_reply(user_id, content).await
                };
                self.emit(Event::ChatFailed {
                    error: error.clone(),
                    partial: partial.clone(),
                })
                .await;
                ChatOutcome::Failed { error, partial }
            }
        };

        Ok(outcome)
    }

    /// Inserts the assistant turn right after the user turn it answers
    /// and persists. Skips the commit when the anchor was deleted while
    /// the request was in flight.
    async fn commit_reply(&mut self, user_id: MessageId, content: String) -> Option<Message> {
        let message = Message::assistant(content).with_reply_to(user_id);
        match self.conversation.insert_after(user_id, message.clone()) {
            Some(_) => {
                self.persist().await;
                Some(message)
            }
            None => {
                log::warn!(
                    "user turn {} left the conversation mid-request, dropping its reply",
                    user_id
                );
                None
            }
        }
    }

    /// Persistence failures never roll back memory; the in-memory
    /// thread stays authoritative and the next write reconciles.
    async fn persist(&self) {
        if let Err(err) = self
            .storage
            .save(&self.general.profile, self.conversation.messages())
            .await
        {
            log::error!("{}", ChatError::Persistence(format!("{:#}", err)));
        }
    }

    async fn emit(&self, event: Event) {
        self.event_tx.send(event).await.unwrap_or_else(|err| {
            log::error!("Failed to send event: {}", err);
        });
    }
}
