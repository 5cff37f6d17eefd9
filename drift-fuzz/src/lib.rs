pub mod agent_client;
pub mod config;
pub mod display;
pub mod docker;
pub mod errors;
pub mod execution;
pub mod executor;
pub mod history;
pub mod operator;
pub mod orchestrator;
pub mod persist;
pub mod selection;

// Re-export key types
pub use config::{Cli, ConfigError, Settings};
pub use docker::{BaseImage, ContainerHandle, ContainerRuntime, DockerRuntime};
pub use errors::{FuzzError, RuntimeError, StateMismatch};
pub use execution::{Execution, Status, TestMode};
pub use executor::{Ansible, Pyinfra, TargetExecutor};
pub use history::WrapperHistory;
pub use operator::{Operator, StdinOperator};
pub use orchestrator::{Orchestrator, Summary};
