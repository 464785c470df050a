use futures::stream::{BoxStream, Stream, StreamExt};
use regex::Regex;
use reqwest::{Response, StatusCode};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::OnceLock;

use crate::errors::{PredictError, PredictResult};
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::{Tool, ToolCall, ToolChoice};

/// Project a message onto the fields every vendor accepts: role, content and tool linkage
///
/// Absent fields are dropped rather than sent as null.
pub fn format_message(index: usize, message: &Message) -> PredictResult<Map<String, Value>> {
    let mut formatted = Map::new();
    formatted.insert("role".to_string(), json!(message.role));
    formatted.insert("content".to_string(), json!(message.content));

    match (&message.role, &message.tool_call_id) {
        (Role::Tool, None) => {
            return Err(PredictError::Formatting {
                index,
                reason: "tool message without tool_call_id".to_string(),
            })
        }
        (Role::Tool, Some(id)) => {
            formatted.insert("tool_call_id".to_string(), json!(id));
        }
        (_, Some(_)) => {
            return Err(PredictError::Formatting {
                index,
                reason: format!("tool_call_id set on a {} message", message.role),
            })
        }
        (_, None) => {}
    }

    if let Some(tool_calls) = &message.tool_calls {
        if message.role != Role::Assistant {
            return Err(PredictError::Formatting {
                index,
                reason: format!("tool_calls set on a {} message", message.role),
            });
        }
        formatted.insert("tool_calls".to_string(), serde_json::to_value(tool_calls)?);
    }

    Ok(formatted)
}

/// Convert a conversation history to OpenAI's chat message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> PredictResult<Vec<Value>> {
    let mut spec = Vec::with_capacity(messages.len());

    for (index, message) in messages.iter().enumerate() {
        let mut formatted = format_message(index, message)?;

        if let Some(tool_calls) = &message.tool_calls {
            let calls: Vec<Value> = tool_calls.iter().map(tool_call_to_openai_spec).collect();
            formatted.insert("tool_calls".to_string(), json!(calls));
        }

        spec.push(Value::Object(formatted));
    }

    Ok(spec)
}

fn tool_call_to_openai_spec(call: &ToolCall) -> Value {
    json!({
        "id": call.id,
        "type": "function",
        "function": {
            "name": call.name,
            "arguments": Value::Object(call.arguments.clone()).to_string(),
        }
    })
}

/// Convert a conversation history to Anthropic's messages specification
///
/// Anthropic takes system instructions as a top-level field, so system messages are joined
/// and returned separately. Tool linkage is expressed with `tool_use` / `tool_result` blocks.
pub fn messages_to_anthropic_spec(
    messages: &[Message],
) -> PredictResult<(Option<String>, Vec<Value>)> {
    let mut system = Vec::new();
    let mut spec = Vec::with_capacity(messages.len());

    for (index, message) in messages.iter().enumerate() {
        let formatted = format_message(index, message)?;

        match message.role {
            Role::System => system.push(message.content.clone()),
            Role::User => spec.push(Value::Object(formatted)),
            Role::Assistant => match &message.tool_calls {
                Some(tool_calls) => {
                    let mut blocks = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(json!({"type": "text", "text": message.content}));
                    }
                    blocks.extend(tool_calls.iter().map(|call| {
                        json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        })
                    }));
                    spec.push(json!({"role": "assistant", "content": blocks}));
                }
                None => spec.push(Value::Object(formatted)),
            },
            Role::Tool => spec.push(json!({
                "role": "user",
                "content": [{
                    "type": "tool_result",
                    "tool_use_id": formatted["tool_call_id"],
                    "content": message.content,
                }]
            })),
        }
    }

    let system = if system.is_empty() {
        None
    } else {
        Some(system.join("\n\n"))
    };
    Ok((system, spec))
}

fn check_tool_names(tools: &[Tool]) -> PredictResult<()> {
    let mut tool_names = HashSet::new();
    for tool in tools {
        if !is_valid_function_name(&tool.name) {
            return Err(PredictError::InvalidParameter(format!(
                "The tool name '{}' has invalid characters, it must match [a-zA-Z0-9_-]+",
                tool.name
            )));
        }
        if !tool_names.insert(&tool.name) {
            return Err(PredictError::InvalidParameter(format!(
                "Duplicate tool name: {}",
                tool.name
            )));
        }
    }
    Ok(())
}

/// Convert tool declarations to OpenAI's function tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> PredictResult<Vec<Value>> {
    check_tool_names(tools)?;
    Ok(tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema,
                }
            })
        })
        .collect())
}

/// Convert tool declarations to Anthropic's tool specification
pub fn tools_to_anthropic_spec(tools: &[Tool]) -> PredictResult<Vec<Value>> {
    check_tool_names(tools)?;
    Ok(tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema,
            })
        })
        .collect())
}

pub fn tool_choice_to_openai_spec(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Any => json!("required"),
        ToolChoice::None => json!("none"),
        ToolChoice::Tool(name) => json!({"type": "function", "function": {"name": name}}),
    }
}

pub fn tool_choice_to_anthropic_spec(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!({"type": "auto"}),
        ToolChoice::Any => json!({"type": "any"}),
        ToolChoice::None => json!({"type": "none"}),
        ToolChoice::Tool(name) => json!({"type": "tool", "name": name}),
    }
}

fn is_valid_function_name(name: &str) -> bool {
    static VALID_NAME: OnceLock<Regex> = OnceLock::new();
    VALID_NAME
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("static regex"))
        .is_match(name)
}

/// Turn a non-success response into a transport error carrying the vendor's message
pub async fn check_status(response: Response) -> PredictResult<Response> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or(body);

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        tracing::warn!(status = status.as_u16(), "Provider unavailable: {}", message);
    }

    Err(PredictError::Transport {
        status: status.as_u16(),
        message,
    })
}

/// Split a server-sent-events body into the data of its events
///
/// The `data:` lines of one event are joined with `\n`; a blank line ends the event.
/// Chunks may end anywhere, including inside a UTF-8 sequence.
pub fn sse_data<S, B>(chunks: S) -> BoxStream<'static, PredictResult<String>>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut chunks = Box::pin(chunks);
        let mut pending: Vec<u8> = Vec::new();
        let mut buffer = String::new();
        let mut event: Vec<String> = Vec::new();

        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => pending.extend_from_slice(bytes.as_ref()),
                Err(e) => {
                    yield Err(PredictError::from(e));
                    return;
                }
            }
            match take_utf8_prefix(&mut pending) {
                Ok(text) => buffer.push_str(&text),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }

            while let Some(pos) = buffer.find('\n') {
                let line: String = buffer.drain(..=pos).collect();
                let line = line.trim_end_matches(['\n', '\r']);
                if line.is_empty() {
                    if !event.is_empty() {
                        yield Ok(event.join("\n"));
                        event.clear();
                    }
                } else if let Some(data) = data_payload(line) {
                    event.push(data);
                }
            }
        }

        if !pending.is_empty() {
            yield Err(PredictError::Response(
                "stream ended inside a UTF-8 sequence".to_string(),
            ));
            return;
        }
        if let Some(data) = data_payload(buffer.trim_end_matches('\r')) {
            event.push(data);
        }
        if !event.is_empty() {
            yield Ok(event.join("\n"));
        }
    })
}

fn take_utf8_prefix(pending: &mut Vec<u8>) -> PredictResult<String> {
    let valid_up_to = match std::str::from_utf8(pending) {
        Ok(text) => text.len(),
        Err(e) if e.error_len().is_some() => {
            return Err(PredictError::Response(
                "stream contained invalid UTF-8".to_string(),
            ))
        }
        Err(e) => e.valid_up_to(),
    };
    let text = String::from_utf8_lossy(&pending[..valid_up_to]).into_owned();
    pending.drain(..valid_up_to);
    Ok(text)
}

fn data_payload(line: &str) -> Option<String> {
    line.strip_prefix("data:")
        .map(|data| data.strip_prefix(' ').unwrap_or(data).to_string())
}
