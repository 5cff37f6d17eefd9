use drift_types::{Target, ValueError};
use thiserror::Error;

use crate::identifier::Identifier;

/// Error types for wrapper operations
#[derive(Error, Debug)]
pub enum WrapperError {
    /// The wrapper has no template for the tool
    #[error("Wrapper {wrapper} does not support target {target}")]
    UnsupportedTarget { wrapper: Identifier, target: Target },

    /// A state handed to the wrapper lacks a field of its definition
    #[error("State for {wrapper} is missing field '{field}'")]
    MissingField { wrapper: Identifier, field: String },

    #[error(transparent)]
    Value(#[from] ValueError),
}

/// Error types for the agent wire format
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Failed to decode base64 payload: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("Failed to (de)serialize agent message: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The agent printed nothing that parses as a response
    #[error("Agent produced no response envelope; stderr: {0}")]
    MissingEnvelope(String),
}
