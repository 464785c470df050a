use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failures raised while resolving or running a tool
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionError(String),
}

pub type ToolResult<T> = Result<T, ToolError>;

/// Failures of a single prediction, a stream or a batch
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Cannot format message {index}: {reason}")]
    Formatting { index: usize, reason: String },

    #[error("Request failed with status {status}: {message}")]
    Transport { status: u16, message: String },

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected response from provider: {0}")]
    Response(String),

    #[error("Tool resolution failed: {0}")]
    ToolResolution(#[from] ToolError),

    #[error("A tool call was required but the response contained none")]
    NoToolInvoked,

    #[error("The response contained neither text nor a tool call")]
    EmptyResponse,

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type PredictResult<T> = Result<T, PredictError>;
