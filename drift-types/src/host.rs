//! Access to the facts of the machine values are generated for.

use std::collections::BTreeMap;
use std::sync::Mutex;

use rand::RngCore;

use crate::account::{Group, User};
use crate::error::HostError;
use crate::postgres::PostgresUri;
use crate::service::{ServiceStatus, UnitFile};

/// Captured result of a helper command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Fact source for generation and verification. Inside a container this
/// is backed by the OS; tests use [`StaticHost`].
pub trait Host: Send + Sync {
    fn users(&self) -> Result<Vec<User>, HostError>;

    fn groups(&self) -> Result<Vec<Group>, HostError>;

    fn user_by_uid(&self, uid: u32) -> Option<User> {
        self.users().ok()?.into_iter().find(|user| user.uid == uid)
    }

    fn group_by_gid(&self, gid: u32) -> Option<Group> {
        self.groups().ok()?.into_iter().find(|group| group.gid == gid)
    }

    fn unit_files(&self) -> Result<Vec<UnitFile>, HostError>;

    fn service_status(&self, name: &str) -> Result<ServiceStatus, HostError>;

    /// Runs `systemctl enable` for `name`.
    fn enable_unit(&self, name: &str) -> Result<CommandOutput, HostError>;

    /// Names of all databases in the catalog.
    fn databases(&self, uri: &PostgresUri) -> Result<Vec<String>, HostError>;
}

/// Everything a generator needs: randomness and facts.
pub struct GenContext<'a> {
    pub rng: &'a mut dyn RngCore,
    pub host: &'a dyn Host,
}

impl<'a> GenContext<'a> {
    pub fn new(rng: &'a mut dyn RngCore, host: &'a dyn Host) -> Self {
        Self { rng, host }
    }
}

/// In-memory host. `databases: None` behaves like an unreachable server.
#[derive(Debug, Default)]
pub struct StaticHost {
    pub users: Vec<User>,
    pub groups: Vec<Group>,
    pub units: Vec<UnitFile>,
    pub statuses: Mutex<BTreeMap<String, ServiceStatus>>,
    pub databases: Option<Vec<String>>,
    pub enable_stderr: String,
}

impl StaticHost {
    /// A small Debian-like machine.
    pub fn debian() -> Self {
        let statuses = [
            ("cron.service", "enabled", "active"),
            ("nginx.service", "disabled", "inactive"),
            ("ssh.service", "enabled", "active"),
        ]
        .into_iter()
        .map(|(name, file_state, active)| {
            (
                name.to_string(),
                ServiceStatus {
                    unit_file_state: file_state.to_string(),
                    unit_file_preset: "enabled".to_string(),
                    active_state: active.to_string(),
                    condition_result: true,
                    ..Default::default()
                },
            )
        })
        .collect();

        Self {
            users: vec![
                User::new("root", 0),
                User::new("daemon", 1),
                User::new("www-data", 33),
                User::new("nobody", 65534),
            ],
            groups: vec![
                Group::new("root", 0),
                Group::new("daemon", 1),
                Group::new("www-data", 33),
                Group::new("nogroup", 65534),
            ],
            units: vec![
                UnitFile::new("cron.service", "enabled"),
                UnitFile::new("nginx.service", "disabled"),
                UnitFile::new("ssh.service", "enabled"),
                UnitFile::new("getty@.service", "enabled"),
                UnitFile::new("systemd-journald.service", "static"),
            ],
            statuses: Mutex::new(statuses),
            databases: None,
            enable_stderr: String::new(),
        }
    }
}

impl Host for StaticHost {
    fn users(&self) -> Result<Vec<User>, HostError> {
        Ok(self.users.clone())
    }

    fn groups(&self) -> Result<Vec<Group>, HostError> {
        Ok(self.groups.clone())
    }

    fn unit_files(&self) -> Result<Vec<UnitFile>, HostError> {
        Ok(self.units.clone())
    }

    fn service_status(&self, name: &str) -> Result<ServiceStatus, HostError> {
        let statuses = self
            .statuses
            .lock()
            .map_err(|_| HostError::Io(std::io::Error::other("status table poisoned")))?;
        statuses.get(name).cloned().ok_or_else(|| HostError::Command {
            command: format!("systemctl show {name}"),
            status: 1,
            stderr: format!("Unit {name} could not be found."),
        })
    }

    fn enable_unit(&self, _name: &str) -> Result<CommandOutput, HostError> {
        Ok(CommandOutput {
            status: 0,
            stdout: String::new(),
            stderr: self.enable_stderr.clone(),
        })
    }

    fn databases(&self, _uri: &PostgresUri) -> Result<Vec<String>, HostError> {
        self.databases
            .clone()
            .ok_or_else(|| HostError::Database("connection refused".to_string()))
    }
}
