use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::account::{Group, User};
use crate::error::ValueError;
use crate::host::GenContext;
use crate::mode::Mode;
use crate::path_state::PathState;
use crate::postgres::{DbState, PostgresDb, PostgresUri};
use crate::service::{ServiceState, ServiceUnit};
use crate::target::Target;

/// A generator of values. Implementations must terminate and either return
/// a value satisfying their constraints or fail with a generation error.
pub trait ValueType: Send + Sync {
    fn generate(&self, ctx: &mut GenContext<'_>) -> Result<Value, ValueError>;

    /// Human readable constraint summary, used in error reports.
    fn describe(&self) -> String;
}

/// A concrete value that can be rendered for any supported tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    Bool(bool),
    Mode(Mode),
    User(User),
    Group(Group),
    Path(String),
    PathState(PathState),
    ServiceName(ServiceUnit),
    ServiceState(ServiceState),
    DbName(String),
    DbState(DbState),
    PostgresDb(PostgresDb),
    PostgresUri(PostgresUri),
}

impl Value {
    /// Renders the value in the syntax of `target`.
    pub fn transform(&self, target: Target) -> Result<String, ValueError> {
        let rendered = match self {
            Value::Bool(b) => match target {
                Target::Ansible => b.to_string(),
                Target::Pyinfra => (if *b { "True" } else { "False" }).to_string(),
            },
            Value::Mode(mode) => mode.transform(target),
            Value::User(user) => target.quote(&user.name),
            Value::Group(group) => target.quote(&group.name),
            Value::Path(path) => target.quote(path),
            Value::PathState(state) => state.transform(target),
            Value::ServiceName(unit) => target.quote(&unit.name),
            Value::ServiceState(state) => state.transform(target),
            Value::DbName(name) => target.quote(name),
            Value::DbState(state) => target.quote(state.as_str()),
            Value::PostgresDb(db) => db.transform(target)?,
            Value::PostgresUri(uri) => uri.transform(target)?,
        };
        Ok(rendered)
    }

    /// Human readable form for logs and diffs.
    pub fn repr(&self) -> String {
        self.to_string()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Mode(_) => "mode",
            Value::User(_) => "user",
            Value::Group(_) => "group",
            Value::Path(_) => "path",
            Value::PathState(_) => "path_state",
            Value::ServiceName(_) => "service_name",
            Value::ServiceState(_) => "service_state",
            Value::DbName(_) => "db_name",
            Value::DbState(_) => "db_state",
            Value::PostgresDb(_) => "postgres_db",
            Value::PostgresUri(_) => "postgres_uri",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_path_state(&self) -> Option<&PathState> {
        match self {
            Value::PathState(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&ServiceUnit> {
        match self {
            Value::ServiceName(unit) => Some(unit),
            _ => None,
        }
    }

    pub fn as_service_state(&self) -> Option<ServiceState> {
        match self {
            Value::ServiceState(state) => Some(*state),
            _ => None,
        }
    }

    pub fn as_postgres_db(&self) -> Option<&PostgresDb> {
        match self {
            Value::PostgresDb(db) => Some(db),
            _ => None,
        }
    }

    pub fn as_postgres_uri(&self) -> Option<&PostgresUri> {
        match self {
            Value::PostgresUri(uri) => Some(uri),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Mode(mode) => write!(f, "{mode}"),
            Value::User(user) => write!(f, "{user}"),
            Value::Group(group) => write!(f, "{group}"),
            Value::Path(path) => write!(f, "{path}"),
            Value::PathState(state) => write!(f, "{state}"),
            Value::ServiceName(unit) => write!(f, "{unit}"),
            Value::ServiceState(state) => write!(f, "{state}"),
            Value::DbName(name) => write!(f, "{name}"),
            Value::DbState(state) => write!(f, "{state}"),
            Value::PostgresDb(db) => write!(f, "{db}"),
            Value::PostgresUri(uri) => write!(f, "{uri}"),
        }
    }
}

#[derive(Debug, Default)]
pub struct BoolType;

impl ValueType for BoolType {
    fn generate(&self, ctx: &mut GenContext<'_>) -> Result<Value, ValueError> {
        Ok(Value::Bool(ctx.rng.gen_bool(0.5)))
    }

    fn describe(&self) -> String {
        "bool".to_string()
    }
}
