//! Users and groups of the machine under test.

use std::fmt;
use std::hash::{Hash, Hasher};

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::error::{HostError, ValueError};
use crate::host::GenContext;
use crate::value::{Value, ValueType};

/// Equality and hashing only consider the uid, so renamed accounts and
/// aliases sharing an id compare equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub uid: u32,
}

impl User {
    pub fn new(name: impl Into<String>, uid: u32) -> Self {
        Self { name: name.into(), uid }
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for User {}

impl Hash for User {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.uid)
    }
}

/// Compared by gid only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub gid: u32,
}

impl Group {
    pub fn new(name: impl Into<String>, gid: u32) -> Self {
        Self { name: name.into(), gid }
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        self.gid == other.gid
    }
}

impl Eq for Group {}

impl Hash for Group {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.gid.hash(state);
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.gid)
    }
}

/// Parses `/etc/passwd` content. Comments and malformed lines are skipped.
pub fn parse_passwd(content: &str) -> Result<Vec<User>, HostError> {
    let users: Vec<User> = parse_table(content, 2)
        .map(|(name, id)| User::new(name, id))
        .collect();
    if users.is_empty() {
        return Err(HostError::Parse {
            source_name: "passwd".to_string(),
            detail: "no account entries".to_string(),
        });
    }
    Ok(users)
}

/// Parses `/etc/group` content.
pub fn parse_group(content: &str) -> Result<Vec<Group>, HostError> {
    let groups: Vec<Group> = parse_table(content, 2)
        .map(|(name, id)| Group::new(name, id))
        .collect();
    if groups.is_empty() {
        return Err(HostError::Parse {
            source_name: "group".to_string(),
            detail: "no group entries".to_string(),
        });
    }
    Ok(groups)
}

fn parse_table(content: &str, id_column: usize) -> impl Iterator<Item = (String, u32)> + '_ {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(move |line| {
            let columns: Vec<&str> = line.split(':').collect();
            let name = columns.first()?;
            let id = columns.get(id_column)?.parse::<u32>().ok()?;
            Some((name.to_string(), id))
        })
}

#[derive(Debug, Default)]
pub struct UserType;

impl ValueType for UserType {
    fn generate(&self, ctx: &mut GenContext<'_>) -> Result<Value, ValueError> {
        let users = ctx.host.users()?;
        users
            .choose(ctx.rng)
            .cloned()
            .map(Value::User)
            .ok_or_else(|| ValueError::NoCandidate {
                constraints: self.describe(),
            })
    }

    fn describe(&self) -> String {
        "user from the account table".to_string()
    }
}

#[derive(Debug, Default)]
pub struct GroupType;

impl ValueType for GroupType {
    fn generate(&self, ctx: &mut GenContext<'_>) -> Result<Value, ValueError> {
        let groups = ctx.host.groups()?;
        groups
            .choose(ctx.rng)
            .cloned()
            .map(Value::Group)
            .ok_or_else(|| ValueError::NoCandidate {
                constraints: self.describe(),
            })
    }

    fn describe(&self) -> String {
        "group from the group table".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "\
root:x:0:0:root:/root:/bin/bash
# a comment
daemon:x:1:1:daemon:/usr/sbin:/usr/sbin/nologin
broken-line
www-data:x:33:33:www-data:/var/www:/usr/sbin/nologin
";

    #[test]
    fn test_parse_passwd_skips_noise() {
        let users = parse_passwd(PASSWD).unwrap();
        assert_eq!(
            users,
            vec![User::new("root", 0), User::new("daemon", 1), User::new("www-data", 33)]
        );
        let names: Vec<&str> = users.iter().map(|user| user.name.as_str()).collect();
        assert_eq!(names, ["root", "daemon", "www-data"]);
    }

    #[test]
    fn test_accounts_compare_by_id() {
        assert_eq!(User::new("root", 0), User::new("toor", 0));
        assert_ne!(User::new("root", 0), User::new("root", 1));
        assert_eq!(Group::new("wheel", 10), Group::new("renamed", 10));
        assert_ne!(Group::new("adm", 4), Group::new("adm", 5));
    }

    #[test]
    fn test_parse_group() {
        let groups = parse_group("root:x:0:\nadm:x:4:syslog\n").unwrap();
        assert_eq!(groups[1], Group::new("adm", 4));
        assert_eq!(groups[1].name, "adm");
    }

    #[test]
    fn test_empty_table_is_an_error() {
        assert!(matches!(parse_passwd("# nothing\n"), Err(HostError::Parse { .. })));
    }
}
