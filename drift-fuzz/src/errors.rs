use std::fmt;
use std::path::PathBuf;

use drift_types::{FieldDiff, State, Target};
use drift_wrappers::{AgentError, Identifier, WrapperError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error types for container runtime operations
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Error reported by the Docker daemon
    #[error("Docker request failed: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// Error while assembling a build context
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image build finished with an error message
    #[error("Failed to build image {image}: {message}")]
    Build { image: String, message: String },

    /// The container came up without a published SSH port
    #[error("Container {0} has no published SSH port")]
    MissingPort(String),
}

/// Two observations of the same resource that disagree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMismatch {
    pub wrapper: Identifier,
    pub target: State,
    pub actual: State,
    pub diff: Vec<FieldDiff>,
}

impl StateMismatch {
    /// `Ok` when `actual` matches `target` field by field.
    pub fn check(wrapper: &Identifier, target: &State, actual: &State) -> Result<(), FuzzError> {
        let diff = target.diff(actual);
        if diff.is_empty() {
            return Ok(());
        }
        Err(FuzzError::StateMismatch(Box::new(Self {
            wrapper: wrapper.clone(),
            target: target.clone(),
            actual: actual.clone(),
            diff,
        })))
    }
}

impl fmt::Display for StateMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self.diff.iter().map(|d| d.to_string()).collect();
        write!(f, "{} reached a different state ({})", self.wrapper, fields.join("; "))
    }
}

/// Error types for a fuzzing or replay session
#[derive(Error, Debug)]
pub enum FuzzError {
    /// The container runtime failed
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// The in-container agent could not be reached or understood
    #[error("Agent call failed: {0}")]
    Agent(#[from] AgentError),

    /// The agent answered with a failure
    #[error("Agent reported a {kind} failure: {message}")]
    AgentFailure { kind: String, message: String },

    /// The IaC tool itself reported an error
    #[error("{target} failed: {detail}")]
    ToolExecution { target: Target, detail: String },

    /// The tool ran but the observed state differs
    #[error("State mismatch: {0}")]
    StateMismatch(Box<StateMismatch>),

    /// Every re-roll failed to produce a state
    #[error("Could not generate a state for {wrapper} after {attempts} attempts: {message}")]
    Generation {
        wrapper: Identifier,
        attempts: usize,
        message: String,
    },

    /// No registered wrapper is ready for the active targets
    #[error("No wrapper left that can execute for {0}")]
    WrappersExhausted(String),

    /// A replay file names a wrapper this build does not know
    #[error("Replay references unknown wrapper {0}")]
    UnknownWrapper(Identifier),

    /// No executor is configured for a target in use
    #[error("No executor available for {0}")]
    MissingExecutor(Target),

    #[error(transparent)]
    Wrapper(#[from] WrapperError),

    /// A history or incident file could not be read or written
    #[error("Failed to access {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A history file exists but does not decode
    #[error("Malformed history file {path}: {detail}")]
    MalformedHistory { path: PathBuf, detail: String },

    /// Cancellation was observed
    #[error("Execution should stop")]
    ShouldStop,
}

impl FuzzError {
    pub fn should_stop(&self) -> bool {
        matches!(self, FuzzError::ShouldStop)
    }
}
