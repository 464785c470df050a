use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::PredictResult;
use crate::models::message::Message;
use crate::models::tool::{Tool, ToolChoice};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// Everything a provider needs to issue one chat completion
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    /// Empty when no toolkit was supplied
    pub tools: Vec<Tool>,
    /// Only set together with `tools`
    pub tool_choice: Option<ToolChoice>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Sequences that end generation early
    pub stop: Option<Vec<String>>,
    /// Ask for a JSON object response; only OpenAI honors it
    pub json_mode: bool,
}

/// A tagged unit of a vendor response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Map<String, Value>,
    },
}

impl ContentBlock {
    pub fn text<S: Into<String>>(text: S) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn tool_use<I: Into<String>, N: Into<String>>(
        id: I,
        name: N,
        input: Map<String, Value>,
    ) -> Self {
        ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// The result of a non-streaming completion
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: Vec<ContentBlock>,
    pub usage: Usage,
}

/// Incremental payload of a content block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    Text { text: String },
    InputJson { partial_json: String },
}

/// An incremental unit of a streaming response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    MessageStart,
    ContentBlockStart { index: usize, block: ContentBlock },
    ContentBlockDelta { index: usize, delta: Delta },
    ContentBlockStop { index: usize },
    MessageDelta { usage: Option<Usage> },
    MessageStop,
    Ping,
}

pub type EventStream = BoxStream<'static, PredictResult<StreamEvent>>;

/// Base trait for vendor chat clients (Anthropic, OpenAI)
#[async_trait]
pub trait Provider: Send + Sync {
    /// Issue one request and wait for the complete response
    async fn complete(&self, request: &CompletionRequest) -> PredictResult<Completion>;

    /// Open a streaming response; events arrive in vendor order and the stream ends with the response
    async fn stream(&self, request: &CompletionRequest) -> PredictResult<EventStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_creation() {
        let usage = Usage::new(Some(10), Some(20), Some(30));
        assert_eq!(usage.input_tokens, Some(10));
        assert_eq!(usage.output_tokens, Some(20));
        assert_eq!(usage.total_tokens, Some(30));
        assert_eq!(Usage::default().total_tokens, None);
    }

    #[test]
    fn test_content_block_shape() -> anyhow::Result<()> {
        let block: ContentBlock = serde_json::from_value(json!({
            "type": "tool_use",
            "id": "toolu_01",
            "name": "CalculatorTool",
            "input": {"operation": "add", "x": 1, "y": 2}
        }))?;

        match &block {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "toolu_01");
                assert_eq!(name, "CalculatorTool");
                assert_eq!(input["x"], json!(1));
            }
            other => panic!("Expected tool use, got {:?}", other),
        }
        assert_eq!(block.as_text(), None);
        assert_eq!(ContentBlock::text("hi").as_text(), Some("hi"));
        Ok(())
    }
}
