pub mod agent;
pub mod errors;
pub mod identifier;
pub mod registry;
pub mod wrappers;

// Re-export key types
pub use agent::{AgentRequest, AgentResponse, AgentResult, FailureKind, Method, PROTOCOL_VERSION};
pub use errors::{AgentError, WrapperError};
pub use identifier::Identifier;
pub use registry::{Registry, WrapperFactory};
pub use wrappers::{ensure_supported, VerifyOptions, Wrapper};
