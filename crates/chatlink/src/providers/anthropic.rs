use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::base::{
    Completion, CompletionRequest, ContentBlock, Delta, EventStream, Provider, StreamEvent, Usage,
};
use super::configs::AnthropicProviderConfig;
use super::utils::{
    check_status, messages_to_anthropic_spec, sse_data, tool_choice_to_anthropic_spec,
    tools_to_anthropic_spec,
};
use crate::errors::{PredictError, PredictResult};

pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_MODEL: &str = "claude-3-haiku-20240307";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_MODELS: &[&str] = &[
    "claude-3-haiku-20240307",
    "claude-3-opus-20240229",
    "claude-3-5-sonnet-20240620",
    "claude-3-sonnet-20240229",
];

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> PredictResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Usage {
        let input_tokens = data["input_tokens"].as_i64().map(|v| v as i32);
        let output_tokens = data["output_tokens"].as_i64().map(|v| v as i32);
        let total_tokens = match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        };
        Usage::new(input_tokens, output_tokens, total_tokens)
    }

    fn build_payload(&self, request: &CompletionRequest, stream: bool) -> PredictResult<Value> {
        let (system, messages) = messages_to_anthropic_spec(&request.messages)?;

        let mut payload = Map::new();
        payload.insert("model".to_string(), json!(self.config.model));
        payload.insert("messages".to_string(), json!(messages));
        payload.insert("max_tokens".to_string(), json!(request.max_tokens));
        payload.insert("temperature".to_string(), json!(request.temperature));

        if let Some(system) = system {
            payload.insert("system".to_string(), json!(system));
        }
        if !request.tools.is_empty() {
            payload.insert(
                "tools".to_string(),
                json!(tools_to_anthropic_spec(&request.tools)?),
            );
            if let Some(choice) = &request.tool_choice {
                payload.insert(
                    "tool_choice".to_string(),
                    tool_choice_to_anthropic_spec(choice),
                );
            }
        }
        if let Some(stop) = &request.stop {
            payload.insert("stop_sequences".to_string(), json!(stop));
        }
        if request.json_mode {
            tracing::warn!("Anthropic has no JSON response mode, sending the request without it");
        }
        if stream {
            payload.insert("stream".to_string(), json!(true));
        }

        Ok(Value::Object(payload))
    }

    async fn post(&self, payload: &Value) -> PredictResult<reqwest::Response> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(payload)
            .send()
            .await?;

        check_status(response).await
    }
}

/// Convert the `content` array of an Anthropic response into content blocks
///
/// Block types other than text and tool_use are skipped.
fn response_to_blocks(response: &Value) -> PredictResult<Vec<ContentBlock>> {
    let content = response
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| PredictError::Response("missing content array".to_string()))?;

    let mut blocks = Vec::with_capacity(content.len());
    for block in content {
        match block["type"].as_str() {
            Some("text") => blocks.push(ContentBlock::text(
                block["text"].as_str().unwrap_or_default(),
            )),
            Some("tool_use") => {
                let input = block["input"].as_object().cloned().unwrap_or_default();
                blocks.push(ContentBlock::tool_use(
                    block["id"].as_str().unwrap_or_default(),
                    block["name"].as_str().unwrap_or_default(),
                    input,
                ));
            }
            other => tracing::debug!(block_type = ?other, "Skipping unsupported content block"),
        }
    }
    Ok(blocks)
}

/// Parse the payload of one Anthropic stream event
fn parse_stream_event(data: &str) -> PredictResult<Vec<StreamEvent>> {
    let event: Value = serde_json::from_str(data)?;
    let index = event["index"].as_u64().unwrap_or_default() as usize;

    let parsed = match event["type"].as_str() {
        Some("message_start") => StreamEvent::MessageStart,
        Some("content_block_start") => {
            let wrapped = json!({ "content": [event["content_block"].clone()] });
            match response_to_blocks(&wrapped)?.into_iter().next() {
                Some(block) => StreamEvent::ContentBlockStart { index, block },
                None => return Ok(vec![]),
            }
        }
        Some("content_block_delta") => {
            let delta = &event["delta"];
            let delta = match delta["type"].as_str() {
                Some("text_delta") => Delta::Text {
                    text: delta["text"].as_str().unwrap_or_default().to_string(),
                },
                Some("input_json_delta") => Delta::InputJson {
                    partial_json: delta["partial_json"]
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                },
                _ => return Ok(vec![]),
            };
            StreamEvent::ContentBlockDelta { index, delta }
        }
        Some("content_block_stop") => StreamEvent::ContentBlockStop { index },
        Some("message_delta") => StreamEvent::MessageDelta {
            usage: event
                .get("usage")
                .map(AnthropicProvider::get_usage),
        },
        Some("message_stop") => StreamEvent::MessageStop,
        Some("ping") => StreamEvent::Ping,
        Some("error") => {
            return Err(PredictError::Response(
                event["error"]["message"]
                    .as_str()
                    .unwrap_or("stream error")
                    .to_string(),
            ))
        }
        _ => return Ok(vec![]),
    };
    Ok(vec![parsed])
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn complete(&self, request: &CompletionRequest) -> PredictResult<Completion> {
        let payload = self.build_payload(request, false)?;
        tracing::debug!(model = %self.config.model, "Sending Anthropic request");

        let response: Value = self.post(&payload).await?.json().await?;
        tracing::debug!(response = %response, "Anthropic response");

        let content = response_to_blocks(&response)?;
        let usage = Self::get_usage(&response["usage"]);
        Ok(Completion { content, usage })
    }

    async fn stream(&self, request: &CompletionRequest) -> PredictResult<EventStream> {
        let payload = self.build_payload(request, true)?;
        tracing::debug!(model = %self.config.model, "Opening Anthropic stream");

        let response = self.post(&payload).await?;
        let events = sse_data(response.bytes_stream()).flat_map(|data| {
            let events: Vec<PredictResult<StreamEvent>> =
                match data.and_then(|data| parse_stream_event(&data)) {
                    Ok(events) => events.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
            stream::iter(events)
        });
        Ok(Box::pin(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::message::Message;
    use crate::models::tool::{Tool, ToolChoice};
    use futures::TryStreamExt;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(host: String) -> AnthropicProviderConfig {
        AnthropicProviderConfig {
            host,
            api_key: "test_api_key".to_string(),
            model: ANTHROPIC_MODEL.to_string(),
        }
    }

    fn request(tools: Vec<Tool>, tool_choice: Option<ToolChoice>) -> CompletionRequest {
        CompletionRequest {
            messages: vec![
                Message::system("You are a helpful assistant."),
                Message::human("Add 512+671"),
            ],
            tools,
            tool_choice,
            temperature: 0.7,
            max_tokens: 1024,
            stop: None,
            json_mode: false,
        }
    }

    async fn setup_mock_server(response: ResponseTemplate) -> (MockServer, AnthropicProvider) {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test_api_key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .respond_with(response)
            .mount(&mock_server)
            .await;

        let provider = AnthropicProvider::new(config(mock_server.uri())).unwrap();
        (mock_server, provider)
    }

    #[tokio::test]
    async fn test_complete_basic() -> anyhow::Result<()> {
        let response_body = json!({
            "id": "msg_123",
            "type": "message",
            "role": "assistant",
            "content": [{
                "type": "text",
                "text": "Hello! How can I assist you today?"
            }],
            "model": "claude-3-haiku-20240307",
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {
                "input_tokens": 12,
                "output_tokens": 15
            }
        });

        let (_, provider) =
            setup_mock_server(ResponseTemplate::new(200).set_body_json(response_body)).await;
        let completion = provider.complete(&request(vec![], None)).await?;

        assert_eq!(
            completion.content,
            vec![ContentBlock::text("Hello! How can I assist you today?")]
        );
        assert_eq!(completion.usage, Usage::new(Some(12), Some(15), Some(27)));
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_tool_use_sends_tools_and_choice() -> anyhow::Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(json!({
                "system": "You are a helpful assistant.",
                "messages": [{"role": "user", "content": "Add 512+671"}],
                "tool_choice": {"type": "auto"},
                "tools": [{"name": "add"}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "text", "text": "Let me add those."},
                    {"type": "tool_use", "id": "toolu_01", "name": "add", "input": {"x": 512, "y": 671}}
                ],
                "usage": {"input_tokens": 30, "output_tokens": 20}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = AnthropicProvider::new(config(mock_server.uri()))?;
        let tool = Tool::new("add", "Adds two numbers", json!({"type": "object"}));
        let completion = provider
            .complete(&request(vec![tool], Some(ToolChoice::Auto)))
            .await?;

        assert_eq!(completion.content.len(), 2);
        match &completion.content[1] {
            ContentBlock::ToolUse { id, name, input } => {
                assert_eq!(id, "toolu_01");
                assert_eq!(name, "add");
                assert_eq!(input["y"], json!(671));
            }
            other => panic!("Expected tool use, got {:?}", other),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_sends_stop_sequences() -> anyhow::Result<()> {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(body_partial_json(json!({"stop_sequences": ["\n\nHuman:", "END"]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "1183"}],
                "usage": {"input_tokens": 10, "output_tokens": 2}
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = AnthropicProvider::new(config(mock_server.uri()))?;
        let request = CompletionRequest {
            stop: Some(vec!["\n\nHuman:".to_string(), "END".to_string()]),
            json_mode: true,
            ..request(vec![], None)
        };
        let payload = provider.build_payload(&request, false)?;
        assert!(payload.get("response_format").is_none());

        let completion = provider.complete(&request).await?;
        assert_eq!(completion.content, vec![ContentBlock::text("1183")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_complete_error_status() -> anyhow::Result<()> {
        let (_, provider) = setup_mock_server(ResponseTemplate::new(429).set_body_json(json!({
            "type": "error",
            "error": {"type": "rate_limit_error", "message": "Slow down"}
        })))
        .await;

        let err = provider.complete(&request(vec![], None)).await.unwrap_err();
        assert!(matches!(
            err,
            PredictError::Transport { status: 429, ref message } if message == "Slow down"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_events() -> anyhow::Result<()> {
        let body = [
            r#"{"type":"message_start","message":{"id":"msg_1"}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"ping"}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"lo"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#,
            r#"{"type":"message_stop"}"#,
        ]
        .iter()
        .map(|data| format!("event: x\ndata: {}\n\n", data))
        .collect::<String>();

        let (_, provider) = setup_mock_server(
            ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"),
        )
        .await;

        let events: Vec<StreamEvent> = provider
            .stream(&request(vec![], None))
            .await?
            .try_collect()
            .await?;

        assert_eq!(events.len(), 8);
        assert_eq!(events[0], StreamEvent::MessageStart);
        assert_eq!(events[2], StreamEvent::Ping);
        assert_eq!(
            events[3],
            StreamEvent::ContentBlockDelta {
                index: 0,
                delta: Delta::Text {
                    text: "Hel".to_string()
                }
            }
        );
        assert_eq!(
            events[6],
            StreamEvent::MessageDelta {
                usage: Some(Usage::new(None, Some(2), None))
            }
        );
        assert_eq!(events[7], StreamEvent::MessageStop);
        Ok(())
    }

    #[test]
    fn test_parse_stream_error_event() {
        let result = parse_stream_event(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        );
        assert!(matches!(result, Err(PredictError::Response(ref m)) if m == "Overloaded"));
    }

    #[test]
    fn test_parse_tool_input_delta() -> anyhow::Result<()> {
        let events = parse_stream_event(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"x\":"}}"#,
        )?;
        assert_eq!(
            events,
            vec![StreamEvent::ContentBlockDelta {
                index: 1,
                delta: Delta::InputJson {
                    partial_json: "{\"x\":".to_string()
                }
            }]
        );
        Ok(())
    }
}
