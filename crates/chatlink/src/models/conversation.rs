use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Message;

/// An ordered message history
///
/// History is append-only; a prediction adds exactly one agent message on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    id: Uuid,
    history: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            history: Vec::new(),
        }
    }

    /// Start a conversation with a single message from the human side
    pub fn from_prompt<S: Into<String>>(prompt: S) -> Self {
        Self::new().with_message(Message::human(prompt))
    }

    pub fn with_message(mut self, message: Message) -> Self {
        self.add_message(message);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn add_message(&mut self, message: Message) {
        self.history.push(message);
    }

    /// The most recent message, usually the last prediction
    pub fn last(&self) -> Option<&Message> {
        self.history.last()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
