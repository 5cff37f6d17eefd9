use std::fs;
use std::path::PathBuf;
use std::process::Command;

use drift_types::account::{parse_group, parse_passwd};
use drift_types::service::{parse_unit_files, STATUS_PROPERTIES};
use drift_types::{CommandOutput, Group, Host, HostError, PostgresUri, ServiceStatus, UnitFile, User};
use nix::unistd::{Gid, Uid};

/// The machine the agent runs on.
#[derive(Debug, Clone)]
pub struct LocalHost {
    passwd: PathBuf,
    group: PathBuf,
}

impl Default for LocalHost {
    fn default() -> Self {
        Self {
            passwd: PathBuf::from("/etc/passwd"),
            group: PathBuf::from("/etc/group"),
        }
    }
}

impl LocalHost {
    pub fn with_tables(passwd: impl Into<PathBuf>, group: impl Into<PathBuf>) -> Self {
        Self {
            passwd: passwd.into(),
            group: group.into(),
        }
    }
}

fn systemctl(args: &[&str]) -> Result<CommandOutput, HostError> {
    let output = Command::new("systemctl").args(args).output()?;
    Ok(CommandOutput {
        status: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn checked(args: &[&str]) -> Result<CommandOutput, HostError> {
    let output = systemctl(args)?;
    if output.status != 0 {
        return Err(HostError::Command {
            command: format!("systemctl {}", args.join(" ")),
            status: output.status,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

impl Host for LocalHost {
    fn users(&self) -> Result<Vec<User>, HostError> {
        parse_passwd(&fs::read_to_string(&self.passwd)?)
    }

    fn groups(&self) -> Result<Vec<Group>, HostError> {
        parse_group(&fs::read_to_string(&self.group)?)
    }

    fn user_by_uid(&self, uid: u32) -> Option<User> {
        match nix::unistd::User::from_uid(Uid::from_raw(uid)) {
            Ok(Some(user)) => Some(User::new(user.name, uid)),
            _ => None,
        }
    }

    fn group_by_gid(&self, gid: u32) -> Option<Group> {
        match nix::unistd::Group::from_gid(Gid::from_raw(gid)) {
            Ok(Some(group)) => Some(Group::new(group.name, gid)),
            _ => None,
        }
    }

    fn unit_files(&self) -> Result<Vec<UnitFile>, HostError> {
        let output = checked(&["list-unit-files", "--type=service", "--no-legend", "--no-pager"])?;
        Ok(parse_unit_files(&output.stdout))
    }

    fn service_status(&self, name: &str) -> Result<ServiceStatus, HostError> {
        let properties = format!("--property={}", STATUS_PROPERTIES.join(","));
        let output = checked(&["show", name, &properties])?;
        ServiceStatus::from_properties(&output.stdout)
    }

    fn enable_unit(&self, name: &str) -> Result<CommandOutput, HostError> {
        systemctl(&["enable", name])
    }

    fn databases(&self, uri: &PostgresUri) -> Result<Vec<String>, HostError> {
        let mut client = postgres::Client::connect(&uri.url("postgres"), postgres::NoTls)
            .map_err(|e| HostError::Database(e.to_string()))?;
        let rows = client
            .query("SELECT datname FROM pg_database", &[])
            .map_err(|e| HostError::Database(e.to_string()))?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_account_tables() {
        let dir = tempfile::tempdir().unwrap();
        let passwd = dir.path().join("passwd");
        let group = dir.path().join("group");
        fs::write(&passwd, "root:x:0:0:root:/root:/bin/bash\napp:x:1000:1000::/home/app:/bin/sh\n").unwrap();
        fs::write(&group, "root:x:0:\napp:x:1000:\n").unwrap();

        let host = LocalHost::with_tables(&passwd, &group);
        assert_eq!(host.users().unwrap()[1], User::new("app", 1000));
        assert_eq!(host.groups().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_table_is_io_error() {
        let host = LocalHost::with_tables("/nonexistent/passwd", "/nonexistent/group");
        assert!(matches!(host.users(), Err(HostError::Io(_))));
    }
}
