use std::thread;
use std::time::Duration;

use drift_types::{
    DbState, Definition, Host, PostgresDb as Database, PostgresDbType, PostgresUri,
    PostgresUriType, State, Target, Value,
};

use super::{ensure_supported, field, VerifyOptions, Wrapper};
use crate::errors::WrapperError;
use crate::identifier::Identifier;

/// How long to wait for the database server to come up.
#[derive(Clone, Debug)]
pub struct PollConfig {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_backoff: Duration::from_millis(200),
            backoff_multiplier: 2,
        }
    }
}

/// PostgreSQL databases. Only Ansible ships a module for them.
#[derive(Debug, Clone, Default)]
pub struct PostgresDb {
    poll: PollConfig,
}

impl PostgresDb {
    pub const NAME: &'static str = "postgres_db";

    pub fn with_poll(poll: PollConfig) -> Self {
        Self { poll }
    }
}

impl Wrapper for PostgresDb {
    fn identifier(&self) -> Identifier {
        Identifier::new(Self::NAME)
    }

    fn definition(&self) -> Definition {
        Definition::new()
            .field("uri", PostgresUriType)
            .field("db", PostgresDbType::default())
    }

    fn supported_targets(&self) -> &'static [Target] {
        &[Target::Ansible]
    }

    fn transform(&self, target: Target, state: &State) -> Result<String, WrapperError> {
        ensure_supported(self, target)?;
        let uri = field(self, state, "uri")?.transform(target)?;
        let db = field(self, state, "db")?.transform(target)?;
        Ok(format!("community.postgresql.postgresql_db:\n  {uri}\n  {db}\n"))
    }

    /// Polls the catalog with growing backoff until it answers.
    fn can_execute(&self, host: &dyn Host) -> bool {
        let uri = PostgresUri::default();
        let mut backoff = self.poll.initial_backoff;
        for attempt in 1..=self.poll.attempts {
            match host.databases(&uri) {
                Ok(_) => return true,
                Err(e) => {
                    log::debug!("Database not ready (attempt {attempt}/{}): {e}", self.poll.attempts);
                    if attempt < self.poll.attempts {
                        thread::sleep(backoff);
                        backoff *= self.poll.backoff_multiplier;
                    }
                }
            }
        }
        false
    }

    fn verify(&self, expected: &State, host: &dyn Host, _options: &VerifyOptions) -> State {
        let Some(db) = expected.get("db").and_then(Value::as_postgres_db) else {
            log::warn!("PostgresDb verify called without a db field: {expected}");
            return expected.clone();
        };
        let uri = expected
            .get("uri")
            .and_then(Value::as_postgres_uri)
            .cloned()
            .unwrap_or_default();

        let observed = match host.databases(&uri) {
            Ok(names) => Database {
                name: db.name.clone(),
                state: if names.iter().any(|name| *name == db.name) {
                    DbState::Present
                } else {
                    DbState::Absent
                },
            },
            Err(e) => {
                log::warn!("Could not list databases: {e}");
                Database {
                    name: format!("{} (unobservable)", db.name),
                    state: db.state,
                }
            }
        };
        expected.clone().with("db", Value::PostgresDb(observed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_types::StaticHost;

    fn no_wait() -> PostgresDb {
        PostgresDb::with_poll(PollConfig {
            attempts: 3,
            initial_backoff: Duration::ZERO,
            backoff_multiplier: 2,
        })
    }

    fn target(name: &str, state: DbState) -> State {
        State::new()
            .with("uri", Value::PostgresUri(PostgresUri::default()))
            .with(
                "db",
                Value::PostgresDb(Database {
                    name: name.to_string(),
                    state,
                }),
            )
    }

    #[test]
    fn test_can_execute_polls_until_reachable() {
        let offline = StaticHost::default();
        assert!(!no_wait().can_execute(&offline));

        let online = StaticHost {
            databases: Some(vec!["postgres".to_string()]),
            ..Default::default()
        };
        assert!(no_wait().can_execute(&online));
    }

    #[test]
    fn test_verify_reads_catalog() {
        let host = StaticHost {
            databases: Some(vec!["postgres".to_string(), "shop".to_string()]),
            ..Default::default()
        };
        let present = target("shop", DbState::Present);
        assert!(present.diff(&no_wait().verify(&present, &host, &VerifyOptions::default())).is_empty());

        let dropped = target("shop", DbState::Absent);
        let observed = no_wait().verify(&dropped, &host, &VerifyOptions::default());
        assert_eq!(
            observed.get("db").and_then(Value::as_postgres_db).map(|db| db.state),
            Some(DbState::Present)
        );
    }

    #[test]
    fn test_pyinfra_is_unsupported() {
        let state = target("shop", DbState::Present);
        assert!(matches!(
            no_wait().transform(Target::Pyinfra, &state),
            Err(WrapperError::UnsupportedTarget { .. })
        ));
        assert_eq!(
            no_wait().transform(Target::Ansible, &state).unwrap(),
            "community.postgresql.postgresql_db:\n  login_host: 'localhost'\n  login_user: 'root'\n  login_password: 'root'\n  port: 5432\n  name: 'shop'\n  state: 'present'\n"
        );
    }
}
