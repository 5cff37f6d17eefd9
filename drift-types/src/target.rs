use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An IaC tool drift knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Ansible,
    Pyinfra,
}

impl Target {
    pub const ALL: [Target; 2] = [Target::Ansible, Target::Pyinfra];

    pub fn as_str(&self) -> &'static str {
        match self {
            Target::Ansible => "ansible",
            Target::Pyinfra => "pyinfra",
        }
    }

    /// Renders a string literal in the tool's syntax. Ansible takes single
    /// quotes so templated variables are never evaluated.
    pub fn quote(&self, raw: &str) -> String {
        match self {
            Target::Ansible => format!("'{raw}'"),
            Target::Pyinfra => format!("\"{raw}\""),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ansible" => Ok(Target::Ansible),
            "pyinfra" => Ok(Target::Pyinfra),
            other => Err(format!("unknown target '{other}', expected one of: ansible, pyinfra")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("ANSIBLE".parse::<Target>().unwrap(), Target::Ansible);
        assert_eq!("pyinfra".parse::<Target>().unwrap(), Target::Pyinfra);
        assert!("chef".parse::<Target>().is_err());
    }

    #[test]
    fn test_quote_per_tool() {
        assert_eq!(Target::Ansible.quote("/etc/motd"), "'/etc/motd'");
        assert_eq!(Target::Pyinfra.quote("/etc/motd"), "\"/etc/motd\"");
    }
}
