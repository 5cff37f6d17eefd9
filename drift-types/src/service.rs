//! systemd units and their point-in-time status.

use std::fmt;
use std::hash::{Hash, Hasher};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{HostError, ValueError};
use crate::host::GenContext;
use crate::target::Target;
use crate::value::{Value, ValueType};

/// Units whose failure would take the session down with it.
pub const SERVICE_DENYLIST: [&str; 3] = ["systemd-volatile-root.service", "ssh.service", "sshd.service"];

/// Properties requested from `systemctl show`.
pub const STATUS_PROPERTIES: [&str; 9] = [
    "UnitFileState",
    "UnitFilePreset",
    "ActiveState",
    "ConditionResult",
    "ActiveEnterTimestampMonotonic",
    "ActiveExitTimestampMonotonic",
    "InactiveEnterTimestampMonotonic",
    "InactiveExitTimestampMonotonic",
    "ConditionTimestampMonotonic",
];

/// A unit file as listed by the service manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFile {
    pub name: String,
    pub state: String,
}

impl UnitFile {
    pub fn new(name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
        }
    }

    /// Plain service, not templated, not denylisted and with a clear
    /// enablement status.
    pub fn is_candidate(&self) -> bool {
        self.name.ends_with(".service")
            && !self.name.contains('@')
            && !SERVICE_DENYLIST.contains(&self.name.as_str())
            && matches!(self.state.as_str(), "enabled" | "disabled")
    }
}

/// Parses `systemctl list-unit-files --no-legend` output.
pub fn parse_unit_files(output: &str) -> Vec<UnitFile> {
    output
        .lines()
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let name = columns.next()?;
            let state = columns.next()?;
            Some(UnitFile::new(name, state))
        })
        .collect()
}

/// Snapshot of a unit's status. Timestamps are monotonic microseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// enabled, disabled, static, masked, linked, ...
    pub unit_file_state: String,
    pub unit_file_preset: String,
    /// active, reloading, inactive, failed, activating or deactivating
    pub active_state: String,
    pub condition_result: bool,
    pub active_enter_ts: u64,
    pub active_exit_ts: u64,
    pub inactive_enter_ts: u64,
    pub inactive_exit_ts: u64,
    pub condition_ts: u64,
}

impl ServiceStatus {
    /// Parses `systemctl show --property=...` key=value output.
    pub fn from_properties(output: &str) -> Result<Self, HostError> {
        let mut status = ServiceStatus::default();
        let mut seen = 0;
        for line in output.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim();
            seen += 1;
            match key.trim() {
                "UnitFileState" => status.unit_file_state = value.to_string(),
                "UnitFilePreset" => status.unit_file_preset = value.to_string(),
                "ActiveState" => status.active_state = value.to_string(),
                "ConditionResult" => status.condition_result = value == "yes",
                "ActiveEnterTimestampMonotonic" => status.active_enter_ts = timestamp(key, value)?,
                "ActiveExitTimestampMonotonic" => status.active_exit_ts = timestamp(key, value)?,
                "InactiveEnterTimestampMonotonic" => status.inactive_enter_ts = timestamp(key, value)?,
                "InactiveExitTimestampMonotonic" => status.inactive_exit_ts = timestamp(key, value)?,
                "ConditionTimestampMonotonic" => status.condition_ts = timestamp(key, value)?,
                _ => seen -= 1,
            }
        }
        if seen == 0 {
            return Err(HostError::Parse {
                source_name: "systemctl show".to_string(),
                detail: "no known properties".to_string(),
            });
        }
        Ok(status)
    }

    pub fn is_enabled(&self) -> bool {
        matches!(
            self.unit_file_state.as_str(),
            "enabled" | "enabled-runtime" | "linked" | "linked-runtime"
        )
    }

    pub fn is_running(&self) -> bool {
        matches!(self.active_state.as_str(), "active" | "reloading" | "activating")
    }
}

fn timestamp(key: &str, value: &str) -> Result<u64, HostError> {
    if value.is_empty() {
        return Ok(0);
    }
    value.parse().map_err(|_| HostError::Parse {
        source_name: "systemctl show".to_string(),
        detail: format!("{key}={value} is not a timestamp"),
    })
}

/// A unit name with the status it had when it was last observed.
/// Equality and hashing only consider the name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceUnit {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ServiceStatus>,
}

impl ServiceUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.status = Some(status);
        self
    }
}

impl PartialEq for ServiceUnit {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ServiceUnit {}

impl Hash for ServiceUnit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for ServiceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Started,
    Stopped,
    Restarted,
}

impl ServiceState {
    pub const ALL: [ServiceState; 3] = [
        ServiceState::Started,
        ServiceState::Stopped,
        ServiceState::Restarted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Started => "started",
            ServiceState::Stopped => "stopped",
            ServiceState::Restarted => "restarted",
        }
    }

    /// pyinfra has no state argument, only keyword flags.
    pub fn transform(&self, target: Target) -> String {
        match target {
            Target::Ansible => target.quote(self.as_str()),
            Target::Pyinfra => match self {
                ServiceState::Started => "running=True".to_string(),
                ServiceState::Stopped => "running=False".to_string(),
                ServiceState::Restarted => "restarted=True".to_string(),
            },
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks a candidate unit and records its current status.
#[derive(Debug, Default)]
pub struct ServiceNameType;

impl ValueType for ServiceNameType {
    fn generate(&self, ctx: &mut GenContext<'_>) -> Result<Value, ValueError> {
        let units: Vec<UnitFile> = ctx
            .host
            .unit_files()?
            .into_iter()
            .filter(UnitFile::is_candidate)
            .collect();
        let unit = units.choose(ctx.rng).ok_or_else(|| ValueError::NoCandidate {
            constraints: self.describe(),
        })?;
        let status = ctx.host.service_status(&unit.name)?;
        Ok(Value::ServiceName(ServiceUnit::new(&unit.name).with_status(status)))
    }

    fn describe(&self) -> String {
        "enabled or disabled .service unit outside the denylist".to_string()
    }
}

#[derive(Debug, Default)]
pub struct ServiceStateType;

impl ValueType for ServiceStateType {
    fn generate(&self, ctx: &mut GenContext<'_>) -> Result<Value, ValueError> {
        let state = *ServiceState::ALL.choose(ctx.rng).unwrap_or(&ServiceState::Started);
        Ok(Value::ServiceState(state))
    }

    fn describe(&self) -> String {
        "service state".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_filter() {
        assert!(UnitFile::new("cron.service", "enabled").is_candidate());
        assert!(!UnitFile::new("ssh.service", "enabled").is_candidate());
        assert!(!UnitFile::new("getty@.service", "enabled").is_candidate());
        assert!(!UnitFile::new("systemd-journald.service", "static").is_candidate());
        assert!(!UnitFile::new("apt-daily.timer", "enabled").is_candidate());
    }

    #[test]
    fn test_parse_unit_files() {
        let units = parse_unit_files("cron.service enabled enabled\nnginx.service disabled enabled\n\n");
        assert_eq!(units.len(), 2);
        assert_eq!(units[1], UnitFile::new("nginx.service", "disabled"));
    }

    #[test]
    fn test_status_from_properties() {
        let output = "\
UnitFileState=enabled
UnitFilePreset=enabled
ActiveState=inactive
ConditionResult=no
ActiveEnterTimestampMonotonic=0
ActiveExitTimestampMonotonic=
InactiveEnterTimestampMonotonic=1200
InactiveExitTimestampMonotonic=0
ConditionTimestampMonotonic=1100
";
        let status = ServiceStatus::from_properties(output).unwrap();
        assert!(status.is_enabled());
        assert!(!status.is_running());
        assert!(!status.condition_result);
        assert_eq!(status.inactive_enter_ts, 1200);
        assert_eq!(status.condition_ts, 1100);
        assert!(ServiceStatus::from_properties("garbage").is_err());
    }

    #[test]
    fn test_unit_equality_ignores_status() {
        let before = ServiceUnit::new("cron.service").with_status(ServiceStatus {
            active_state: "active".to_string(),
            ..Default::default()
        });
        assert_eq!(before, ServiceUnit::new("cron.service"));
        assert_ne!(before, ServiceUnit::new("atd.service"));
    }

    #[test]
    fn test_state_transform() {
        assert_eq!(ServiceState::Started.transform(Target::Ansible), "'started'");
        assert_eq!(ServiceState::Stopped.transform(Target::Pyinfra), "running=False");
        assert_eq!(ServiceState::Restarted.transform(Target::Pyinfra), "restarted=True");
    }
}
