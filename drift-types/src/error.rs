use std::fmt;

use thiserror::Error;

use crate::path::PathConstraints;
use crate::target::Target;

/// Errors raised while reading facts from the machine under test
#[derive(Error, Debug)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A helper command exited unsuccessfully
    #[error("`{command}` failed with status {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },

    /// A fact source returned text we could not make sense of
    #[error("Failed to parse {source_name}: {detail}")]
    Parse { source_name: String, detail: String },

    #[error("Database unavailable: {0}")]
    Database(String),
}

/// Why the path walker gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoPathCause {
    /// Nothing suitable in the root directory when the walk stopped there
    EmptyAtStop,
    /// The root directory has no subdirectory to descend into
    NoDirectoryToDescend,
    /// Every attempt of the retry budget failed
    RetriesExhausted,
}

impl NoPathCause {
    pub fn code(&self) -> u8 {
        match self {
            NoPathCause::EmptyAtStop => 1,
            NoPathCause::NoDirectoryToDescend => 2,
            NoPathCause::RetriesExhausted => 3,
        }
    }
}

impl fmt::Display for NoPathCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Error types for value generation and rendering
#[derive(Error, Debug)]
pub enum ValueError {
    /// The value has no rendering for the requested tool
    #[error("Value {value} cannot be rendered for target {target}")]
    UnsupportedTarget { value: String, target: Target },

    /// No value satisfies the generator's constraints
    #[error("No candidate satisfies constraints: {constraints}")]
    NoCandidate { constraints: String },

    /// The path walker could not find a matching path
    #[error("No path matching {constraints} (cause={cause})")]
    NoPath {
        constraints: PathConstraints,
        cause: NoPathCause,
    },

    #[error("Host query failed: {0}")]
    Host(#[from] HostError),
}

impl ValueError {
    /// Generation failures may be retried by picking another wrapper.
    pub fn is_generation_failure(&self) -> bool {
        matches!(self, ValueError::NoCandidate { .. } | ValueError::NoPath { .. })
    }
}
