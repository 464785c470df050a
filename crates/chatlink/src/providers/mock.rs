use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::{PredictError, PredictResult};
use crate::providers::base::{
    Completion, CompletionRequest, ContentBlock, EventStream, Provider, StreamEvent, Usage,
};

type Responder = Box<dyn Fn(&CompletionRequest) -> PredictResult<Vec<ContentBlock>> + Send + Sync>;
type Delay = Box<dyn Fn(&CompletionRequest) -> Duration + Send + Sync>;

/// A mock provider that returns pre-configured responses for testing
///
/// It also records every request and the highest number of requests it saw in flight.
pub struct MockProvider {
    responder: Responder,
    delay: Delay,
    stream_events: Mutex<Vec<PredictResult<StreamEvent>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Vec<ContentBlock>>) -> Self {
        let responses = Mutex::new(responses);
        Self::with_responder(move |_| {
            let mut responses = responses.lock().unwrap();
            if responses.is_empty() {
                Ok(vec![ContentBlock::text("")])
            } else {
                Ok(responses.remove(0))
            }
        })
    }

    /// Create a mock provider computing each response from its request
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&CompletionRequest) -> PredictResult<Vec<ContentBlock>> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Box::new(|_| Duration::ZERO),
            stream_events: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Hold each request open for a duration computed from the request
    pub fn with_delay<F>(mut self, delay: F) -> Self
    where
        F: Fn(&CompletionRequest) -> Duration + Send + Sync + 'static,
    {
        self.delay = Box::new(delay);
        self
    }

    /// Events returned by the next `stream` call
    pub fn with_stream(self, events: Vec<PredictResult<StreamEvent>>) -> Self {
        *self.stream_events.lock().unwrap() = events;
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, request: &CompletionRequest) {
        self.requests.lock().unwrap().push(request.clone());
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(&self, request: &CompletionRequest) -> PredictResult<Completion> {
        self.record(request);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        tokio::time::sleep((self.delay)(request)).await;
        let result = (self.responder)(request);

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(Completion {
            content: result?,
            usage: Usage::default(),
        })
    }

    async fn stream(&self, request: &CompletionRequest) -> PredictResult<EventStream> {
        self.record(request);
        let events = std::mem::take(&mut *self.stream_events.lock().unwrap());
        if events.is_empty() {
            return Err(PredictError::Transport {
                status: 500,
                message: "no stream configured".to_string(),
            });
        }
        Ok(Box::pin(futures::stream::iter(events)))
    }
}
