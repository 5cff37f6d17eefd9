use std::path::{Path, PathBuf};

use async_trait::async_trait;
use drift_types::Target;
use tokio::process::Command;

use super::{log_output, work_dir, write_file, TargetExecutor};
use crate::docker::ContainerHandle;
use crate::errors::FuzzError;

const DEPLOY_HEADER: &str = "from pyinfra.operations import files, server, systemd\n\n";

/// Runs operations with the `pyinfra` CLI over SSH.
#[derive(Debug, Clone)]
pub struct Pyinfra {
    ssh_key: PathBuf,
    program: String,
}

impl Pyinfra {
    pub fn new(ssh_key: impl Into<PathBuf>) -> Self {
        Self {
            ssh_key: ssh_key.into(),
            program: "pyinfra".to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

pub fn inventory(ssh_port: u16, ssh_key: &Path) -> String {
    format!(
        "targets = [
    (\"localhost\", {{
        \"ssh_hostname\": \"localhost\",
        \"ssh_port\": {ssh_port},
        \"ssh_key\": \"{}\",
        \"ssh_user\": \"root\",
        \"ssh_allow_agent\": False,
        \"ssh_known_hosts_file\": \"/dev/null\",
        \"ssh_strict_host_key_checking\": \"no\",
    }})
]
",
        ssh_key.display()
    )
}

pub fn deploy(script: &str) -> String {
    format!("{DEPLOY_HEADER}{script}")
}

#[async_trait]
impl TargetExecutor for Pyinfra {
    fn target(&self) -> Target {
        Target::Pyinfra
    }

    async fn execute(&self, _task_name: &str, script: &str, container: &ContainerHandle) -> Result<(), FuzzError> {
        let target = self.target();
        let dir = work_dir(target)?;
        let inventory_path = dir.path().join("inventory.py");
        let deploy_path = dir.path().join("deploy.py");
        write_file(target, &inventory_path, &inventory(container.ssh_port, &self.ssh_key))?;
        write_file(target, &deploy_path, &deploy(script))?;

        let output = Command::new(&self.program)
            .arg("-y")
            .arg(&inventory_path)
            .arg(&deploy_path)
            .current_dir(dir.path())
            .output()
            .await
            .map_err(|e| FuzzError::ToolExecution {
                target,
                detail: format!("failed to spawn {}: {e}", self.program),
            })?;
        log_output(target, &output);

        if !output.status.success() {
            return Err(FuzzError::ToolExecution {
                target,
                detail: format!("pyinfra exited with {}", output.status),
            });
        }
        Ok(())
    }
}
