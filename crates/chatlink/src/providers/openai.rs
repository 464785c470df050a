use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::base::{
    Completion, CompletionRequest, ContentBlock, Delta, EventStream, Provider, StreamEvent, Usage,
};
use super::configs::OpenAiProviderConfig;
use super::utils::{
    check_status, messages_to_openai_spec, sse_data, tool_choice_to_openai_spec,
    tools_to_openai_spec,
};
use crate::errors::{PredictError, PredictResult, ToolError};

pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const OPENAI_MODEL: &str = "gpt-3.5-turbo-16k";
pub const OPENAI_MODELS: &[&str] = &[
    "gpt-4o",
    "gpt-4o-2024-05-13",
    "gpt-4-turbo",
    "gpt-4-turbo-2024-04-09",
    "gpt-4-turbo-preview",
    "gpt-4-0125-preview",
    "gpt-4-1106-preview",
    "gpt-4",
    "gpt-4-0613",
    "gpt-4-32k",
    "gpt-4-32k-0613",
    "gpt-3.5-turbo-0125",
    "gpt-3.5-turbo-1106",
    "gpt-3.5-turbo-0613",
    "gpt-3.5-turbo-16k-0613",
    "gpt-3.5-turbo-16k",
    "gpt-3.5-turbo",
];

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiProviderConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiProviderConfig) -> PredictResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(usage: &Value) -> Usage {
        let input_tokens = usage
            .get("prompt_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let output_tokens = usage
            .get("completion_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32);

        let total_tokens = usage
            .get("total_tokens")
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .or_else(|| match (input_tokens, output_tokens) {
                (Some(input), Some(output)) => Some(input + output),
                _ => None,
            });

        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    fn build_payload(&self, request: &CompletionRequest, stream: bool) -> PredictResult<Value> {
        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.config.model));
        payload.insert(
            "messages".to_string(),
            json!(messages_to_openai_spec(&request.messages)?),
        );
        payload.insert("temperature".to_string(), json!(request.temperature));
        payload.insert("max_tokens".to_string(), json!(request.max_tokens));

        if !request.tools.is_empty() {
            payload.insert(
                "tools".to_string(),
                json!(tools_to_openai_spec(&request.tools)?),
            );
            if let Some(choice) = &request.tool_choice {
                payload.insert("tool_choice".to_string(), tool_choice_to_openai_spec(choice));
            }
        }
        if let Some(stop) = &request.stop {
            payload.insert("stop".to_string(), json!(stop));
        }
        if request.json_mode {
            payload.insert(
                "response_format".to_string(),
                json!({"type": "json_object"}),
            );
        }
        if stream {
            payload.insert("stream".to_string(), json!(true));
        }

        Ok(Value::Object(payload))
    }

    async fn post(&self, payload: &Value) -> PredictResult<reqwest::Response> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(payload)
            .send()
            .await?;

        check_status(response).await
    }
}

/// Convert the first choice of an OpenAI response into content blocks
///
/// Text comes first, followed by one tool_use block per requested function call.
fn response_to_blocks(response: &Value) -> PredictResult<Vec<ContentBlock>> {
    if let Some(error) = response.get("error") {
        return Err(PredictError::Response(format!("OpenAI API error: {}", error)));
    }

    let message = response
        .pointer("/choices/0/message")
        .ok_or_else(|| PredictError::Response("missing choices[0].message".to_string()))?;

    let mut blocks = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str) {
        blocks.push(ContentBlock::text(text));
    }

    if let Some(tool_calls) = message.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default();
            let name = tool_call["function"]["name"].as_str().unwrap_or_default();
            let arguments = tool_call["function"]["arguments"]
                .as_str()
                .unwrap_or_default();

            let input = match serde_json::from_str::<Value>(arguments) {
                Ok(Value::Object(input)) => input,
                _ => {
                    return Err(ToolError::InvalidParameters(format!(
                        "Could not interpret tool use parameters for id {}: {}",
                        id, arguments
                    ))
                    .into())
                }
            };
            blocks.push(ContentBlock::tool_use(id, name, input));
        }
    }

    Ok(blocks)
}

/// Parse one streamed chat completion chunk
///
/// Text deltas use block index 0 and tool call `n` uses block index `n + 1`, mirroring the
/// block layout of [`response_to_blocks`].
fn parse_stream_chunk(data: &str) -> PredictResult<Vec<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return Ok(vec![StreamEvent::MessageStop]);
    }

    let chunk: Value = serde_json::from_str(data)?;
    if let Some(error) = chunk.get("error") {
        return Err(PredictError::Response(format!("OpenAI API error: {}", error)));
    }

    let mut events = Vec::new();
    let delta = &chunk["choices"][0]["delta"];

    if delta.get("role").is_some() {
        events.push(StreamEvent::MessageStart);
    }
    if let Some(text) = delta.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            events.push(StreamEvent::ContentBlockDelta {
                index: 0,
                delta: Delta::Text {
                    text: text.to_string(),
                },
            });
        }
    }
    if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            let index = tool_call["index"].as_u64().unwrap_or_default() as usize + 1;
            if let Some(id) = tool_call["id"].as_str() {
                let name = tool_call["function"]["name"].as_str().unwrap_or_default();
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    block: ContentBlock::tool_use(id, name, Map::new()),
                });
            }
            if let Some(partial_json) = tool_call["function"]["arguments"].as_str() {
                events.push(StreamEvent::ContentBlockDelta {
                    index,
                    delta: Delta::InputJson {
                        partial_json: partial_json.to_string(),
                    },
                });
            }
        }
    }
    if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
        events.push(StreamEvent::MessageDelta {
            usage: Some(OpenAiProvider::get_usage(usage)),
        });
    }

    Ok(events)
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn complete(&self, request: &CompletionRequest) -> PredictResult<Completion> {
        let payload = self.build_payload(request, false)?;
        tracing::debug!(model = %self.config.model, "Sending OpenAI request");

        let response: Value = self.post(&payload).await?.json().await?;
        tracing::debug!(response = %response, "OpenAI response");

        let content = response_to_blocks(&response)?;
        let usage = Self::get_usage(&response["usage"]);
        Ok(Completion { content, usage })
    }

    async fn stream(&self, request: &CompletionRequest) -> PredictResult<EventStream> {
        let payload = self.build_payload(request, true)?;
        tracing::debug!(model = %self.config.model, "Opening OpenAI stream");

        let response = self.post(&payload).await?;
        let events = sse_data(response.bytes_stream()).flat_map(|data| {
            let events: Vec<PredictResult<StreamEvent>> =
                match data.and_then(|data| parse_stream_chunk(&data)) {
                    Ok(events) => events.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
            stream::iter(events)
        });
        Ok(Box::pin(events))
    }
}
