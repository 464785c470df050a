//! Prediction over a conversation
//!
//! A [`Predictor`] formats a conversation for its provider, issues the request, resolves at
//! most one round of tool calls and appends a single agent message with the outcome.
//! Three modes share that flow:
//!
//! - [`Predictor::predict`] issues one blocking request.
//! - [`Predictor::stream`] yields text fragments as they arrive and appends the assembled text
//!   once the vendor stream ends. Tool calls are not executed while streaming.
//! - [`Predictor::batch`] predicts many conversations concurrently on the calling task,
//!   admitting at most `max_concurrent` requests at a time and returning results in input order.
use futures::future::join_all;
use futures::stream::{BoxStream, StreamExt};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;

use crate::errors::{PredictError, PredictResult, ToolError};
use crate::models::conversation::Conversation;
use crate::models::message::Message;
use crate::models::tool::ToolChoice;
use crate::providers::base::{CompletionRequest, ContentBlock, Delta, Provider, StreamEvent};
use crate::toolkit::{render_tool_result, Toolkit};

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Per-call settings of a prediction
#[derive(Debug, Clone)]
pub struct PredictOptions {
    pub toolkit: Option<Toolkit>,
    pub tool_choice: Option<ToolChoice>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stop: Option<Vec<String>>,
    pub json_mode: bool,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            toolkit: None,
            tool_choice: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            stop: None,
            json_mode: false,
        }
    }
}

impl PredictOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_toolkit(mut self, toolkit: Toolkit) -> Self {
        self.toolkit = Some(toolkit);
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_stop<I, S>(mut self, stop: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop = Some(stop.into_iter().map(Into::into).collect());
        self
    }

    /// Request a JSON object response where the vendor supports it
    pub fn with_json_mode(mut self, json_mode: bool) -> Self {
        self.json_mode = json_mode;
        self
    }

    pub fn validate(&self) -> PredictResult<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(PredictError::InvalidParameter(format!(
                "temperature must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(PredictError::InvalidParameter(
                "max_tokens must be greater than 0".to_string(),
            ));
        }
        if let Some(stop) = &self.stop {
            if stop.iter().any(String::is_empty) {
                return Err(PredictError::InvalidParameter(
                    "stop sequences must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// The tool choice actually sent: `Auto` when a toolkit is given without an explicit choice,
    /// nothing when there is no toolkit
    ///
    /// Choices that can never be satisfied fail here, before any request is made.
    fn effective_tool_choice(&self) -> PredictResult<Option<ToolChoice>> {
        match (&self.toolkit, &self.tool_choice) {
            (None, Some(choice)) if choice.requires_tool() => Err(PredictError::NoToolInvoked),
            (None, _) => Ok(None),
            (Some(toolkit), Some(ToolChoice::Tool(name))) if !toolkit.contains(name) => {
                Err(ToolError::ToolNotFound(name.clone()).into())
            }
            (Some(toolkit), Some(choice)) if choice.requires_tool() && toolkit.is_empty() => {
                Err(PredictError::NoToolInvoked)
            }
            (Some(_), Some(choice)) => Ok(Some(choice.clone())),
            (Some(_), None) => Ok(Some(ToolChoice::Auto)),
        }
    }
}

/// Runs predictions for conversations against a single provider
#[derive(Clone)]
pub struct Predictor {
    provider: Arc<dyn Provider>,
}

impl Predictor {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    fn build_request(
        &self,
        conversation: &Conversation,
        options: &PredictOptions,
    ) -> PredictResult<CompletionRequest> {
        options.validate()?;
        let tool_choice = options.effective_tool_choice()?;
        let tools = options
            .toolkit
            .as_ref()
            .map(Toolkit::tools)
            .unwrap_or_default();

        Ok(CompletionRequest {
            messages: conversation.history().to_vec(),
            tools,
            tool_choice,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stop: options.stop.clone().filter(|stop| !stop.is_empty()),
            json_mode: options.json_mode,
        })
    }

    /// Predict the next agent message and append it to `conversation`
    ///
    /// The conversation is only modified when the whole prediction succeeds.
    pub async fn predict(
        &self,
        conversation: &mut Conversation,
        options: &PredictOptions,
    ) -> PredictResult<()> {
        let request = self.build_request(conversation, options)?;
        tracing::debug!(
            conversation = %conversation.id(),
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending prediction request"
        );

        let completion = self.provider.complete(&request).await?;
        tracing::debug!(blocks = completion.content.len(), usage = ?completion.usage, "Received completion");

        let text = compose_response(
            &completion.content,
            options.toolkit.as_ref(),
            request.tool_choice.as_ref(),
        )
        .await?;

        tracing::info!(conversation = %conversation.id(), "Appending agent message");
        conversation.add_message(Message::agent(text));
        Ok(())
    }

    /// Stream the next agent message as text fragments
    ///
    /// The returned stream is single pass. Once it is exhausted the concatenated fragments are
    /// appended to `conversation` as one agent message; if it fails or is dropped early nothing
    /// is appended. Tool-use deltas are ignored.
    pub async fn stream<'a>(
        &self,
        conversation: &'a mut Conversation,
        options: &PredictOptions,
    ) -> PredictResult<BoxStream<'a, PredictResult<String>>> {
        let request = self.build_request(conversation, options)?;
        tracing::debug!(
            conversation = %conversation.id(),
            messages = request.messages.len(),
            "Opening prediction stream"
        );
        let mut events = self.provider.stream(&request).await?;

        Ok(Box::pin(async_stream::stream! {
            let mut collected = String::new();

            while let Some(event) = events.next().await {
                match event {
                    Ok(StreamEvent::ContentBlockDelta { delta: Delta::Text { text }, .. }) => {
                        collected.push_str(&text);
                        yield Ok(text);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(conversation = %conversation.id(), error = %e, "Prediction stream failed");
                        yield Err(e);
                        return;
                    }
                }
            }

            tracing::info!(conversation = %conversation.id(), "Appending streamed agent message");
            conversation.add_message(Message::agent(collected));
        }))
    }

    /// Predict every conversation with at most `max_concurrent` requests in flight
    ///
    /// Requests are admitted in input order and results are returned in input order. On the
    /// first failure, predictions already admitted finish, those still waiting are skipped, and
    /// the failure is returned in place of any result.
    pub async fn batch(
        &self,
        conversations: Vec<Conversation>,
        options: &PredictOptions,
        max_concurrent: usize,
    ) -> PredictResult<Vec<Conversation>> {
        if max_concurrent == 0 {
            return Err(PredictError::InvalidParameter(
                "max_concurrent must be greater than 0".to_string(),
            ));
        }
        options.validate()?;

        let total = conversations.len();
        let gate = Semaphore::new(max_concurrent);
        let first_error: Mutex<Option<PredictError>> = Mutex::new(None);
        tracing::info!(total, max_concurrent, "Starting batch prediction");

        let tasks = conversations
            .into_iter()
            .enumerate()
            .map(|(index, mut conversation)| {
                let gate = &gate;
                let first_error = &first_error;
                async move {
                    let Ok(_permit) = gate.acquire().await else {
                        tracing::debug!(index, "Skipping prediction after an earlier failure");
                        return None;
                    };

                    match self.predict(&mut conversation, options).await {
                        Ok(()) => Some(conversation),
                        Err(e) => {
                            tracing::warn!(index, error = %e, "Batch prediction failed");
                            gate.close();
                            first_error
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .get_or_insert(e);
                            None
                        }
                    }
                }
            });

        let results = join_all(tasks).await;

        if let Some(e) = first_error
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
        {
            return Err(e);
        }
        tracing::info!(total, "Batch prediction finished");
        Ok(results.into_iter().flatten().collect())
    }

    /// Predict every conversation one after another, stopping at the first failure
    pub async fn batch_sequential(
        &self,
        conversations: Vec<Conversation>,
        options: &PredictOptions,
    ) -> PredictResult<Vec<Conversation>> {
        let mut results = Vec::with_capacity(conversations.len());
        for mut conversation in conversations {
            self.predict(&mut conversation, options).await?;
            results.push(conversation);
        }
        Ok(results)
    }
}

/// Turn a response into the text of the appended agent message
///
/// A leading text block is the preamble. Every tool_use block is invoked in order, but only
/// the last result is kept: the message reads `"<preamble> <result>"`, or just the result.
async fn compose_response(
    content: &[ContentBlock],
    toolkit: Option<&Toolkit>,
    tool_choice: Option<&ToolChoice>,
) -> PredictResult<String> {
    let preamble = content
        .first()
        .and_then(ContentBlock::as_text)
        .filter(|text| !text.is_empty());

    let mut tool_result = None;
    for block in content {
        if let ContentBlock::ToolUse { id, name, input } = block {
            let toolkit = toolkit.ok_or_else(|| ToolError::ToolNotFound(name.clone()))?;
            let tool = toolkit.get_tool_by_name(name)?;

            tracing::info!(tool = %name, id = %id, "Invoking tool");
            let value = tool.call(input.clone()).await?;
            tool_result = Some(render_tool_result(&value));
        }
    }

    match (preamble, tool_result) {
        (Some(preamble), Some(result)) => Ok(format!("{} {}", preamble, result)),
        (None, Some(result)) => Ok(result),
        (_, None) if tool_choice.is_some_and(ToolChoice::requires_tool) => {
            Err(PredictError::NoToolInvoked)
        }
        (Some(preamble), None) => Ok(preamble.to_string()),
        (None, None) => Err(PredictError::EmptyResponse),
    }
}
