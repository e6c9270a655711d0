#[cfg(test)]
#[path = "conversation_test.rs"]
mod tests;

use crate::models::{Message, MessageId, Role};

/// Ordered message log of one chat thread. All addressing is by
/// `MessageId`; positions shift freely under mutation.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a conversation from loaded turns, relinking each
    /// assistant turn to the user turn directly before it.
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self.relink_replies();
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id() == id)
    }

    pub fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id() == id)
    }

    pub fn position(&self, id: MessageId) -> Option<usize> {
        self.messages.iter().position(|m| m.id() == id)
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn append(&mut self, message: Message) -> MessageId {
        let id = message.id();
        self.messages.push(message);
        id
    }

    /// Inserts directly after `anchor`. Returns `None` when the anchor
    /// is no longer part of the conversation.
    pub fn insert_after(&mut self, anchor: MessageId, message: Message) -> Option<MessageId> {
        let pos = self.position(anchor)?;
        let id = message.id();
        self.messages.insert(pos + 1, message);
        Some(id)
    }

    /// The assistant turn answering `user_id`, if present.
    pub fn reply_of(&self, user_id: MessageId) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.is_assistant() && m.reply_to() == Some(user_id))
    }

    /// Removes the turn. Removing a user turn also removes its paired
    /// assistant reply so the thread never holds an orphaned answer.
    /// Returns the removed turns in order.
    pub fn remove(&mut self, id: MessageId) -> Vec<Message> {
        let Some(pos) = self.position(id) else {
            return vec![];
        };

        let mut removed = vec![self.messages.remove(pos)];
        if removed[0].role() == Role::User {
            if let Some(reply_id) = self.reply_of(id).map(|m| m.id()) {
                let reply_pos = self.position(reply_id).unwrap();
                removed.push(self.messages.remove(reply_pos));
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// All turns up to and including `id`, cloned for request building.
    pub fn turns_through(&self, id: MessageId) -> Vec<Message> {
        match self.position(id) {
            Some(pos) => self.messages[..=pos].to_vec(),
            None => vec![],
        }
    }

    fn relink_replies(&mut self) {
        let mut prev_user: Option<MessageId> = None;
        for message in self.messages.iter_mut() {
            match message.role() {
                Role::User => prev_user = Some(message.id()),
                Role::Assistant => {
                    message.set_reply_to(prev_user.take());
                }
                Role::System => {}
            }
        }
    }
}
