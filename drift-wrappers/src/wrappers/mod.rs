//! Resource kinds drift can fuzz.

pub mod file;
pub mod postgres_db;
pub mod systemd;

use drift_types::{Definition, GenContext, Host, State, Target, Value, ValueError};
use serde::{Deserialize, Serialize};

use crate::errors::WrapperError;
use crate::identifier::Identifier;

pub use file::File;
pub use postgres_db::PostgresDb;
pub use systemd::Systemd;

/// Switches for in-container verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyOptions {
    /// Re-run `systemctl enable` when an enable had no visible effect, to
    /// detect units without install config. Mutates the container.
    #[serde(default = "default_true")]
    pub probe_enable_quirk: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            probe_enable_quirk: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A resource kind: how to generate a target state for it, how to render
/// that state for each tool and how to observe it afterwards.
pub trait Wrapper: Send + Sync {
    fn identifier(&self) -> Identifier;

    fn definition(&self) -> Definition;

    fn supported_targets(&self) -> &'static [Target];

    /// Renders `state` as a task for `target`.
    fn transform(&self, target: Target, state: &State) -> Result<String, WrapperError>;

    /// Observes the resource named by `expected`. Never fails: anything
    /// that cannot be observed is reported as absent.
    fn verify(&self, expected: &State, host: &dyn Host, options: &VerifyOptions) -> State;

    /// Whether the environment is ready for this wrapper.
    fn can_execute(&self, _host: &dyn Host) -> bool {
        true
    }

    fn enabled(&self) -> bool {
        true
    }

    /// Refreshes point-in-time facts carried by `state` right before a tool
    /// runs against the same machine.
    fn snapshot(&self, state: &State, _host: &dyn Host) -> State {
        state.clone()
    }

    fn generate(&self, ctx: &mut GenContext<'_>) -> Result<State, ValueError> {
        self.definition().generate(ctx)
    }

    fn supports(&self, target: Target) -> bool {
        self.supported_targets().contains(&target)
    }
}

/// Fails with `UnsupportedTarget` unless `wrapper` supports `target`.
pub fn ensure_supported(wrapper: &dyn Wrapper, target: Target) -> Result<(), WrapperError> {
    if wrapper.supports(target) {
        Ok(())
    } else {
        Err(WrapperError::UnsupportedTarget {
            wrapper: wrapper.identifier(),
            target,
        })
    }
}

/// Looks up a field the definition guarantees.
pub(crate) fn field<'a>(
    wrapper: &dyn Wrapper,
    state: &'a State,
    name: &str,
) -> Result<&'a Value, WrapperError> {
    state.get(name).ok_or_else(|| WrapperError::MissingField {
        wrapper: wrapper.identifier(),
        field: name.to_string(),
    })
}

