use std::path::{Path, PathBuf};

use async_trait::async_trait;
use drift_types::Target;
use tokio::process::Command;

use super::{log_output, work_dir, write_file, TargetExecutor};
use crate::docker::ContainerHandle;
use crate::errors::FuzzError;

/// Output fragments that mean the play did not apply even if the process
/// exited cleanly.
const FAILURE_MARKERS: [&str; 3] = ["fatal:", "UNREACHABLE!", "ERROR! We were unable to read"];

/// Runs tasks with `ansible-playbook` over SSH.
#[derive(Debug, Clone)]
pub struct Ansible {
    ssh_key: PathBuf,
    program: String,
}

impl Ansible {
    pub fn new(ssh_key: impl Into<PathBuf>) -> Self {
        Self {
            ssh_key: ssh_key.into(),
            program: "ansible-playbook".to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

pub fn inventory(ssh_port: u16, ssh_key: &Path) -> String {
    format!(
        "all:
  hosts:
    target:
      ansible_host: localhost
      ansible_port: {ssh_port}
      ansible_user: root
      ansible_ssh_private_key_file: {}
      ansible_ssh_common_args: \"-o UserKnownHostsFile=/dev/null -o StrictHostKeyChecking=no -o IdentitiesOnly=yes\"
",
        ssh_key.display()
    )
}

/// A single-task play. Continuation lines of `task` are indented to sit
/// under the list item.
pub fn playbook(name: &str, task: &str) -> String {
    let mut lines = task.trim_end().lines();
    let mut body = lines.next().unwrap_or_default().to_string();
    for line in lines {
        body.push('\n');
        if !line.is_empty() {
            body.push_str("      ");
            body.push_str(line);
        }
    }
    format!("- name: {name}\n  hosts: target\n  tasks:\n    - {body}\n")
}

#[async_trait]
impl TargetExecutor for Ansible {
    fn target(&self) -> Target {
        Target::Ansible
    }

    async fn execute(&self, task_name: &str, script: &str, container: &ContainerHandle) -> Result<(), FuzzError> {
        let target = self.target();
        let dir = work_dir(target)?;
        let inventory_path = dir.path().join("inventory.yaml");
        let playbook_path = dir.path().join("playbook.yaml");
        write_file(target, &inventory_path, &inventory(container.ssh_port, &self.ssh_key))?;
        write_file(target, &playbook_path, &playbook(task_name, script))?;

        let output = Command::new(&self.program)
            .arg("-i")
            .arg(&inventory_path)
            .arg(&playbook_path)
            .env("ANSIBLE_HOST_KEY_CHECKING", "False")
            .output()
            .await
            .map_err(|e| FuzzError::ToolExecution {
                target,
                detail: format!("failed to spawn {}: {e}", self.program),
            })?;
        log_output(target, &output);

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if let Some(marker) = FAILURE_MARKERS
            .iter()
            .find(|marker| stdout.contains(*marker) || stderr.contains(*marker))
        {
            return Err(FuzzError::ToolExecution {
                target,
                detail: format!("play reported '{marker}'"),
            });
        }
        if !output.status.success() {
            return Err(FuzzError::ToolExecution {
                target,
                detail: format!("ansible-playbook exited with {}", output.status),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playbook_indents_task_body() {
        let task = "ansible.builtin.systemd_service:\n  name: 'cron.service'\n  enabled: true\n";
        assert_eq!(
            playbook("systemd", task),
            "- name: systemd\n  hosts: target\n  tasks:\n    - ansible.builtin.systemd_service:\n        name: 'cron.service'\n        enabled: true\n"
        );
    }

    #[test]
    fn test_inventory_points_at_forwarded_port() {
        let rendered = inventory(49153, Path::new("/keys/id_rsa"));
        assert!(rendered.contains("ansible_port: 49153"));
        assert!(rendered.contains("ansible_ssh_private_key_file: /keys/id_rsa"));
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_error() {
        let ansible = Ansible::new("/keys/id_rsa").with_program("/nonexistent/ansible-playbook");
        let container = ContainerHandle {
            id: "c1".to_string(),
            ssh_port: 2222,
        };
        let err = ansible.execute("file", "ansible.builtin.file: {}", &container).await.unwrap_err();
        assert!(matches!(err, FuzzError::ToolExecution { target: Target::Ansible, .. }));
    }
}
