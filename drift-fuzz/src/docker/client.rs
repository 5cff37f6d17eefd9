use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bollard::container::{Config, CreateContainerOptions, LogOutput, RemoveContainerOptions};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::{BuildImageOptions, CommitContainerOptions, RemoveImageOptions};
use bollard::models::{HostConfig, HostConfigCgroupnsModeEnum};
use bollard::Docker;
use drift_types::path::AGENT_DIR;
use futures::StreamExt;
use tar::Builder;

use super::{settle_start, BaseImage, ContainerHandle, ContainerRuntime, ExecOutput, IMAGE_REPOSITORY};
use crate::errors::RuntimeError;

const SSH_PORT: &str = "22/tcp";

/// Where the tools' public key lands in the build context.
const AUTHORIZED_KEY: &str = "ssh-keys/id_rsa.pub";

/// Docker through the local daemon socket.
pub struct DockerRuntime {
    docker: Docker,
    images_dir: PathBuf,
    ssh_public_key: PathBuf,
    agent_binary: PathBuf,
}

impl DockerRuntime {
    /// Connects and pings the daemon so an unavailable runtime is reported
    /// before any round starts.
    pub async fn connect(
        images_dir: impl Into<PathBuf>,
        ssh_key: &Path,
        agent_binary: impl Into<PathBuf>,
    ) -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        docker.ping().await?;
        Ok(Self {
            docker,
            images_dir: images_dir.into(),
            ssh_public_key: ssh_key.with_extension("pub"),
            agent_binary: agent_binary.into(),
        })
    }

    /// Starts a created container and returns its published ssh port.
    async fn start(&self, handle: &ContainerHandle) -> Result<u16, RuntimeError> {
        self.docker.start_container::<String>(&handle.id, None).await?;
        self.docker
            .inspect_container(&handle.id, None)
            .await?
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|ports| ports.get(SSH_PORT).cloned().flatten())
            .and_then(|bindings| bindings.into_iter().find_map(|binding| binding.host_port))
            .and_then(|port| port.parse::<u16>().ok())
            .ok_or_else(|| RuntimeError::MissingPort(handle.id.clone()))
    }

    /// Dockerfiles under `images/` plus the public key the images authorize.
    fn build_context(&self) -> Result<Vec<u8>, RuntimeError> {
        let mut archive = Builder::new(Vec::new());
        archive.append_dir_all("images", &self.images_dir)?;
        archive.append_path_with_name(&self.ssh_public_key, AUTHORIZED_KEY)?;
        Ok(archive.into_inner()?)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn build_base_image(&self, image: BaseImage) -> Result<String, RuntimeError> {
        let tag = image.tag();
        log::info!("Building base image {tag}");
        let options = BuildImageOptions {
            dockerfile: image.dockerfile(),
            t: tag.clone(),
            pull: true,
            rm: true,
            ..Default::default()
        };

        let context = self.build_context()?;
        let mut stream = self.docker.build_image(options, None, Some(context.into()));
        while let Some(info) = stream.next().await {
            let info = info?;
            if let Some(message) = info.error {
                return Err(RuntimeError::Build { image: tag, message });
            }
            if let Some(line) = info.stream {
                let line = line.trim();
                if !line.is_empty() {
                    log::debug!("{line}");
                }
            }
        }
        log::info!("Base image {tag} finished building");
        Ok(tag)
    }

    async fn run(&self, image: &str) -> Result<ContainerHandle, RuntimeError> {
        let name = format!("drift-{}", uuid::Uuid::new_v4());
        log::debug!("Starting container {name} from {image}");

        let host_config = HostConfig {
            privileged: Some(true),
            cgroupns_mode: Some(HostConfigCgroupnsModeEnum::HOST),
            publish_all_ports: Some(true),
            binds: Some(vec![
                // systemd needs the host cgroup tree
                "/sys/fs/cgroup:/sys/fs/cgroup:rw".to_string(),
                format!("{}:{AGENT_DIR}/drift-agent:ro", self.agent_binary.display()),
            ]),
            ..Default::default()
        };
        let exposed_ports: HashMap<String, HashMap<(), ()>> =
            [(SSH_PORT.to_string(), HashMap::new())].into_iter().collect();
        let config = Config {
            image: Some(image.to_string()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });
        let container = self.docker.create_container(options, config).await?;
        let handle = ContainerHandle {
            id: container.id,
            ssh_port: 0,
        };

        let started = self.start(&handle).await;
        let handle = settle_start(self, handle, started).await?;
        log::debug!("Container {name} reachable over ssh on port {}", handle.ssh_port);
        Ok(handle)
    }

    async fn exec(&self, container: &ContainerHandle, cmd: Vec<String>) -> Result<ExecOutput, RuntimeError> {
        let exec_opts = CreateExecOptions {
            cmd: Some(cmd),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = self.docker.create_exec(&container.id, exec_opts).await?;

        let mut result = ExecOutput::default();
        if let StartExecResults::Attached { mut output, .. } = self.docker.start_exec(&exec.id, None).await? {
            while let Some(chunk) = output.next().await {
                match chunk? {
                    LogOutput::StdOut { message } => result.stdout.push_str(&String::from_utf8_lossy(&message)),
                    LogOutput::StdErr { message } => result.stderr.push_str(&String::from_utf8_lossy(&message)),
                    _ => {}
                }
            }
        }
        result.exit_code = self.docker.inspect_exec(&exec.id).await?.exit_code.unwrap_or(-1);
        Ok(result)
    }

    async fn commit(&self, container: &ContainerHandle) -> Result<String, RuntimeError> {
        let tag = format!("intermediate-{}", uuid::Uuid::new_v4().simple());
        let options = CommitContainerOptions {
            container: container.id.clone(),
            repo: IMAGE_REPOSITORY.to_string(),
            tag: tag.clone(),
            author: "drift".to_string(),
            pause: true,
            ..Default::default()
        };
        self.docker.commit_container(options, Config::<String>::default()).await?;
        Ok(format!("{IMAGE_REPOSITORY}:{tag}"))
    }

    async fn remove(&self, container: &ContainerHandle) -> Result<(), RuntimeError> {
        log::debug!("Removing container {}", container.id);
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.docker.remove_container(&container.id, Some(options)).await?;
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
        log::debug!("Removing image {image}");
        let options = RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        self.docker.remove_image(image, Some(options), None).await?;
        Ok(())
    }
}
