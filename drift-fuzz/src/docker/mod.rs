//! Container lifecycle behind a trait so the orchestrator can be driven
//! against Docker or an in-memory fake.

pub mod client;
pub mod images;

use async_trait::async_trait;

use crate::errors::RuntimeError;

pub use client::DockerRuntime;
pub use images::{BaseImage, IMAGE_REPOSITORY};

/// A running container the orchestrator owns for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    /// Host port forwarded to the container's SSH daemon
    pub ssh_port: u16,
}

/// Result of a command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether an image with this reference exists locally.
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;

    /// Builds `image` and returns its tag.
    async fn build_base_image(&self, image: BaseImage) -> Result<String, RuntimeError>;

    /// Starts a container from `image`. The container is running and its
    /// SSH port reachable once this returns.
    async fn run(&self, image: &str) -> Result<ContainerHandle, RuntimeError>;

    async fn exec(&self, container: &ContainerHandle, cmd: Vec<String>) -> Result<ExecOutput, RuntimeError>;

    /// Commits the container's filesystem to a new image reference.
    async fn commit(&self, container: &ContainerHandle) -> Result<String, RuntimeError>;

    async fn remove(&self, container: &ContainerHandle) -> Result<(), RuntimeError>;

    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError>;
}

/// Finishes `run` for a created container: attaches the ssh port, or
/// removes the container when it failed to come up so no caller is left
/// owning a container it never got a handle for.
pub(crate) async fn settle_start(
    runtime: &dyn ContainerRuntime,
    handle: ContainerHandle,
    started: Result<u16, RuntimeError>,
) -> Result<ContainerHandle, RuntimeError> {
    match started {
        Ok(ssh_port) => Ok(ContainerHandle { ssh_port, ..handle }),
        Err(e) => {
            if let Err(cleanup) = runtime.remove(&handle).await {
                log::warn!("Failed to remove container {} after a failed start: {cleanup}", handle.id);
            }
            Err(e)
        }
    }
}
