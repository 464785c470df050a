//! These models represent the objects passed between a caller and the vendor adapters
//!
//! A caller builds a [`conversation::Conversation`] out of [`message::Message`]s and hands it
//! to a predictor together with an optional toolkit. The providers project these models onto
//! the anthropic and openai chat formats and map the responses back, so the internal models
//! are deliberately smaller than either vendor format.
pub mod conversation;
pub mod message;
pub mod role;
pub mod tool;
