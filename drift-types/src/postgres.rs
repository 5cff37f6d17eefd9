use std::fmt;

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::error::ValueError;
use crate::host::GenContext;
use crate::target::Target;
use crate::value::{Value, ValueType};

/// Databases that must never be dropped.
pub const PROTECTED_DATABASES: [&str; 3] = ["postgres", "template0", "template1"];

/// Names used when a database that does not exist yet is needed.
pub const SYNTHETIC_DATABASES: [&str; 6] = [
    "drift_accounts",
    "drift_inventory",
    "drift_ledger",
    "drift_metrics",
    "drift_orders",
    "drift_sessions",
];

/// Connection parameters for a PostgreSQL server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostgresUri {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl Default for PostgresUri {
    /// The superuser baked into the postgres base image.
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "root".to_string(),
            password: "root".to_string(),
        }
    }
}

impl PostgresUri {
    pub fn url(&self, database: &str) -> String {
        format!(
            "postgresql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, database
        )
    }

    pub fn transform(&self, target: Target) -> Result<String, ValueError> {
        match target {
            Target::Ansible => Ok(format!(
                "login_host: {}\n  login_user: {}\n  login_password: {}\n  port: {}",
                target.quote(&self.host),
                target.quote(&self.user),
                target.quote(&self.password),
                self.port
            )),
            Target::Pyinfra => Err(ValueError::UnsupportedTarget {
                value: self.to_string(),
                target,
            }),
        }
    }
}

impl fmt::Display for PostgresUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "postgresql://{}@{}:{}", self.user, self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbState {
    Present,
    Absent,
}

impl DbState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbState::Present => "present",
            DbState::Absent => "absent",
        }
    }
}

impl fmt::Display for DbState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostgresDb {
    pub name: String,
    pub state: DbState,
}

impl PostgresDb {
    pub fn transform(&self, target: Target) -> Result<String, ValueError> {
        match target {
            Target::Ansible => Ok(format!(
                "name: {}\n  state: {}",
                target.quote(&self.name),
                target.quote(self.state.as_str())
            )),
            Target::Pyinfra => Err(ValueError::UnsupportedTarget {
                value: self.to_string(),
                target,
            }),
        }
    }
}

impl fmt::Display for PostgresDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.state, self.name)
    }
}

pub fn is_protected_database(name: &str) -> bool {
    PROTECTED_DATABASES.contains(&name)
}

#[derive(Debug, Default)]
pub struct PostgresUriType;

impl ValueType for PostgresUriType {
    fn generate(&self, _ctx: &mut GenContext<'_>) -> Result<Value, ValueError> {
        Ok(Value::PostgresUri(PostgresUri::default()))
    }

    fn describe(&self) -> String {
        "postgres connection".to_string()
    }
}

/// Name of a database, existing or not.
#[derive(Debug, Clone, Default)]
pub struct DbNameType {
    pub uri: PostgresUri,
    pub existing: bool,
}

impl DbNameType {
    fn pick(&self, ctx: &mut GenContext<'_>) -> Result<String, ValueError> {
        let live = ctx.host.databases(&self.uri)?;
        let pool: Vec<String> = if self.existing {
            live.into_iter().filter(|db| !is_protected_database(db)).collect()
        } else {
            SYNTHETIC_DATABASES
                .iter()
                .filter(|name| !live.iter().any(|db| db == *name))
                .map(|name| name.to_string())
                .collect()
        };
        pool.choose(ctx.rng).cloned().ok_or_else(|| ValueError::NoCandidate {
            constraints: self.describe(),
        })
    }
}

impl ValueType for DbNameType {
    fn generate(&self, ctx: &mut GenContext<'_>) -> Result<Value, ValueError> {
        Ok(Value::DbName(self.pick(ctx)?))
    }

    fn describe(&self) -> String {
        if self.existing {
            "existing non-system database".to_string()
        } else {
            "database name not present in the catalog".to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DbStateType {
    pub can_delete: bool,
}

impl DbStateType {
    fn roll(&self, rng: &mut dyn RngCore) -> DbState {
        if self.can_delete && rng.gen_bool(0.5) {
            DbState::Absent
        } else {
            DbState::Present
        }
    }
}

impl ValueType for DbStateType {
    fn generate(&self, ctx: &mut GenContext<'_>) -> Result<Value, ValueError> {
        Ok(Value::DbState(self.roll(ctx.rng)))
    }

    fn describe(&self) -> String {
        "database state".to_string()
    }
}

/// A database and the state it should be in. Absent targets always name a
/// live database; present targets name either a live or a new one.
#[derive(Debug, Clone, Default)]
pub struct PostgresDbType {
    pub uri: PostgresUri,
}

impl ValueType for PostgresDbType {
    fn generate(&self, ctx: &mut GenContext<'_>) -> Result<Value, ValueError> {
        let deletable = ctx
            .host
            .databases(&self.uri)?
            .iter()
            .any(|db| !is_protected_database(db));
        let state = DbStateType { can_delete: deletable }.roll(ctx.rng);
        let existing = match state {
            DbState::Absent => true,
            DbState::Present => deletable && ctx.rng.gen_bool(0.5),
        };
        let name = DbNameType {
            uri: self.uri.clone(),
            existing,
        }
        .pick(ctx)?;
        Ok(Value::PostgresDb(PostgresDb { name, state }))
    }

    fn describe(&self) -> String {
        "postgres database".to_string()
    }
}
