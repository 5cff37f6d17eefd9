//! IaC tools drift drives against containers.

pub mod ansible;
pub mod pyinfra;

use std::path::Path;
use std::process::Output;

use async_trait::async_trait;
use drift_types::{State, Target};
use drift_wrappers::{VerifyOptions, Wrapper};

use crate::agent_client::AgentClient;
use crate::docker::ContainerHandle;
use crate::errors::FuzzError;

pub use ansible::Ansible;
pub use pyinfra::Pyinfra;

/// Runs one tool process. Failure of the tool itself must surface as
/// [`FuzzError::ToolExecution`].
#[async_trait]
pub trait TargetExecutor: Send + Sync {
    fn target(&self) -> Target;

    async fn execute(&self, task_name: &str, script: &str, container: &ContainerHandle) -> Result<(), FuzzError>;
}

/// Snapshot, render, execute and verify `state` for one target. Returns the
/// state the agent observed afterwards.
pub async fn run_target(
    executor: &dyn TargetExecutor,
    wrapper: &dyn Wrapper,
    state: &State,
    agent: &AgentClient<'_>,
    container: &ContainerHandle,
    options: VerifyOptions,
) -> Result<State, FuzzError> {
    let id = wrapper.identifier();
    let target = executor.target();

    let snapshot = agent.snapshot(&id, state).await?;
    let script = wrapper.transform(target, &snapshot)?;
    log::debug!("Rendered {id} for {target}:\n{script}");

    executor.execute(id.as_str(), &script, container).await?;
    let observed = agent.verify(&id, &snapshot, options).await?;
    log::info!("{target} reached {observed}");
    Ok(observed)
}

pub(crate) fn work_dir(target: Target) -> Result<tempfile::TempDir, FuzzError> {
    tempfile::Builder::new()
        .prefix(&format!("drift-{target}-"))
        .tempdir()
        .map_err(|e| FuzzError::ToolExecution {
            target,
            detail: format!("failed to create work directory: {e}"),
        })
}

pub(crate) fn write_file(target: Target, path: &Path, contents: &str) -> Result<(), FuzzError> {
    std::fs::write(path, contents).map_err(|e| FuzzError::ToolExecution {
        target,
        detail: format!("failed to write {}: {e}", path.display()),
    })
}

pub(crate) fn log_output(target: Target, output: &Output) {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.trim().is_empty() {
        log::debug!("{target} stdout:\n{stdout}");
    }
    if !stderr.trim().is_empty() {
        log::debug!("{target} stderr:\n{stderr}");
    }
}
