pub mod batch;
pub mod predict;

use chatlink::models::{conversation::Conversation, message::Message};

/// A fresh conversation holding an optional system prompt followed by the user prompt
pub fn conversation_for(prompt: &str, system: Option<&str>) -> Conversation {
    let conversation = match system {
        Some(system) => Conversation::new().with_message(Message::system(system)),
        None => Conversation::new(),
    };
    conversation.with_message(Message::human(prompt))
}
