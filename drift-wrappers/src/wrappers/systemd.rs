use drift_types::{
    BoolType, Definition, Host, ServiceNameType, ServiceState, ServiceStateType, ServiceStatus,
    ServiceUnit, State, Target, Value,
};

use super::{ensure_supported, field, VerifyOptions, Wrapper};
use crate::errors::WrapperError;
use crate::identifier::Identifier;

/// What `systemctl enable` prints for units that cannot be enabled.
const NO_INSTALL_CONFIG: &str = "no installation config";

/// systemd services: enablement and run state.
#[derive(Debug, Clone, Copy, Default)]
pub struct Systemd;

impl Systemd {
    pub const NAME: &'static str = "systemd";
}

/// Decides which state a tool left a service in, given the status right
/// before and right after it ran.
///
/// `ActiveState` alone is not enough: a oneshot unit, or one whose start
/// condition failed, is inactive right after a successful start. A fresh
/// activation or a fresh failed condition check counts as a start. A unit
/// that was running before only counts as restarted if it also went
/// through a fresh deactivation.
pub fn reconcile(expected: ServiceState, before: &ServiceStatus, after: &ServiceStatus) -> ServiceState {
    let activated = after.active_enter_ts > before.active_enter_ts;
    let condition_skipped = after.condition_ts > before.condition_ts && !after.condition_result;
    let started = activated || condition_skipped;
    let deactivated = after.inactive_enter_ts > before.inactive_enter_ts;
    let restarted = started && (!before.is_running() || deactivated);

    match expected {
        ServiceState::Restarted if restarted => ServiceState::Restarted,
        _ if after.is_running() || started => ServiceState::Started,
        _ => ServiceState::Stopped,
    }
}

/// Checks whether an enable that left the unit disabled is explained by the
/// unit having no install section.
fn enable_has_no_effect(host: &dyn Host, name: &str) -> bool {
    match host.enable_unit(name) {
        Ok(output) => output.stderr.contains(NO_INSTALL_CONFIG),
        Err(e) => {
            log::debug!("Enable probe for {name} failed: {e}");
            false
        }
    }
}

impl Wrapper for Systemd {
    fn identifier(&self) -> Identifier {
        Identifier::new(Self::NAME)
    }

    fn definition(&self) -> Definition {
        Definition::new()
            .field("name", ServiceNameType)
            .field("enabled", BoolType)
            .field("state", ServiceStateType)
    }

    fn supported_targets(&self) -> &'static [Target] {
        &[Target::Ansible, Target::Pyinfra]
    }

    fn transform(&self, target: Target, state: &State) -> Result<String, WrapperError> {
        ensure_supported(self, target)?;
        let name = field(self, state, "name")?.transform(target)?;
        let enabled = field(self, state, "enabled")?.transform(target)?;
        let service_state = field(self, state, "state")?.transform(target)?;
        Ok(match target {
            Target::Ansible => format!(
                "ansible.builtin.systemd_service:\n  name: {name}\n  enabled: {enabled}\n  state: {service_state}\n"
            ),
            Target::Pyinfra => format!(
                "systemd.service(\n    {name},\n    enabled={enabled},\n    {service_state},\n)\n"
            ),
        })
    }

    fn snapshot(&self, state: &State, host: &dyn Host) -> State {
        let Some(unit) = state.get("name").and_then(Value::as_service) else {
            return state.clone();
        };
        match host.service_status(&unit.name) {
            Ok(status) => state
                .clone()
                .with("name", Value::ServiceName(ServiceUnit::new(&unit.name).with_status(status))),
            Err(e) => {
                log::warn!("Could not snapshot {}: {e}", unit.name);
                state.clone()
            }
        }
    }

    fn verify(&self, expected: &State, host: &dyn Host, options: &VerifyOptions) -> State {
        let Some(unit) = expected.get("name").and_then(Value::as_service) else {
            log::warn!("Systemd verify called without a name field: {expected}");
            return expected.clone();
        };
        let want_state = expected
            .get("state")
            .and_then(Value::as_service_state)
            .unwrap_or(ServiceState::Started);
        let want_enabled = expected.get("enabled").and_then(Value::as_bool).unwrap_or(false);

        let after = match host.service_status(&unit.name) {
            Ok(status) => status,
            Err(e) => {
                log::warn!("Could not observe {}: {e}", unit.name);
                // a renamed unit never compares equal to the target
                return expected
                    .clone()
                    .with("name", Value::ServiceName(ServiceUnit::new(format!("{} (unobservable)", unit.name))));
            }
        };
        let before = unit.status.clone().unwrap_or_default();

        let state = reconcile(want_state, &before, &after);
        let mut enabled = after.is_enabled();
        if want_enabled && !enabled && options.probe_enable_quirk && enable_has_no_effect(host, &unit.name) {
            log::info!("{} has no install config, enable is a no-op", unit.name);
            enabled = true;
        }

        State::new()
            .with("name", Value::ServiceName(ServiceUnit::new(&unit.name).with_status(after)))
            .with("enabled", Value::Bool(enabled))
            .with("state", Value::ServiceState(state))
    }
}
