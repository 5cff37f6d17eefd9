//! Request/response protocol between the fuzzer and the in-container agent.
//!
//! Requests travel as base64 encoded JSON on the agent's command line, the
//! response is a single JSON line on its stdout. Only data crosses the
//! boundary: the agent resolves the wrapper from its own registry.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use drift_types::{GenContext, Host, State};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::errors::AgentError;
use crate::identifier::Identifier;
use crate::registry::Registry;
use crate::wrappers::VerifyOptions;

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Generate,
    Snapshot,
    Verify,
    CanExecute,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub version: u32,
    pub wrapper: Identifier,
    pub method: Method,
    #[serde(default)]
    pub state: State,
    #[serde(default)]
    pub options: VerifyOptions,
}

impl AgentRequest {
    pub fn new(wrapper: Identifier, method: Method) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            wrapper,
            method,
            state: State::default(),
            options: VerifyOptions::default(),
        }
    }

    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    pub fn with_options(mut self, options: VerifyOptions) -> Self {
        self.options = options;
        self
    }

    pub fn encode(&self) -> Result<String, AgentError> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(encoded: &str) -> Result<Self, AgentError> {
        let bytes = STANDARD.decode(encoded.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No value satisfied a generator's constraints; worth a re-roll
    Generation,
    /// Unknown wrapper or protocol version mismatch
    Protocol,
    /// The machine could not be queried
    Host,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentResult {
    State { state: State },
    Ready { ready: bool },
    Failure { kind: FailureKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub version: u32,
    pub result: AgentResult,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
}

impl AgentResponse {
    pub fn new(result: AgentResult) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            result,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// Picks the envelope out of the agent's stdout. The envelope is the
    /// last line that parses; anything printed before it is ignored.
    pub fn parse(stdout: &str, stderr: &str) -> Result<Self, AgentError> {
        stdout
            .lines()
            .rev()
            .map(str::trim)
            .filter(|line| line.starts_with('{'))
            .find_map(|line| serde_json::from_str(line).ok())
            .ok_or_else(|| AgentError::MissingEnvelope(stderr.trim().to_string()))
    }
}

/// Executes one request against `host`.
pub fn handle(
    request: &AgentRequest,
    registry: &Registry,
    host: &dyn Host,
    rng: &mut dyn RngCore,
) -> AgentResult {
    if request.version != PROTOCOL_VERSION {
        return AgentResult::Failure {
            kind: FailureKind::Protocol,
            message: format!(
                "protocol version {} is not supported, expected {PROTOCOL_VERSION}",
                request.version
            ),
        };
    }
    let Some(wrapper) = registry.resolve(&request.wrapper) else {
        return AgentResult::Failure {
            kind: FailureKind::Protocol,
            message: format!("unknown wrapper '{}'", request.wrapper),
        };
    };

    log::debug!("Handling {:?} for {}", request.method, request.wrapper);
    match request.method {
        Method::Generate => {
            let mut ctx = GenContext::new(rng, host);
            match wrapper.generate(&mut ctx) {
                Ok(state) => AgentResult::State { state },
                Err(e) => AgentResult::Failure {
                    kind: if e.is_generation_failure() {
                        FailureKind::Generation
                    } else {
                        FailureKind::Host
                    },
                    message: e.to_string(),
                },
            }
        }
        Method::Snapshot => AgentResult::State {
            state: wrapper.snapshot(&request.state, host),
        },
        Method::Verify => AgentResult::State {
            state: wrapper.verify(&request.state, host, &request.options),
        },
        Method::CanExecute => AgentResult::Ready {
            ready: wrapper.can_execute(host),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_types::{ServiceUnit, StaticHost, Value};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_request_survives_the_wire() {
        let request = AgentRequest::new(Identifier::new("systemd"), Method::Verify)
            .with_state(State::new().with("enabled", Value::Bool(true)))
            .with_options(VerifyOptions { probe_enable_quirk: false });
        let decoded = AgentRequest::decode(&request.encode().unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_generate_systemd_on_static_host() {
        let host = StaticHost::debian();
        let mut rng = StdRng::seed_from_u64(4);
        let request = AgentRequest::new(Identifier::new("systemd"), Method::Generate);
        match handle(&request, &Registry::builtin(), &host, &mut rng) {
            AgentResult::State { state } => {
                let unit = state.get("name").and_then(Value::as_service).unwrap();
                assert!(["cron.service", "nginx.service"].contains(&unit.name.as_str()));
                assert!(unit.status.is_some());
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_generation_failure_is_classified() {
        let host = StaticHost::default();
        let mut rng = StdRng::seed_from_u64(4);
        let request = AgentRequest::new(Identifier::new("systemd"), Method::Generate);
        match handle(&request, &Registry::builtin(), &host, &mut rng) {
            AgentResult::Failure { kind, .. } => assert_eq!(kind, FailureKind::Generation),
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_unknown_wrapper_and_version() {
        let host = StaticHost::default();
        let mut rng = StdRng::seed_from_u64(0);
        let registry = Registry::builtin();

        let unknown = AgentRequest::new(Identifier::new("apt"), Method::CanExecute);
        assert!(matches!(
            handle(&unknown, &registry, &host, &mut rng),
            AgentResult::Failure { kind: FailureKind::Protocol, .. }
        ));

        let mut future = AgentRequest::new(Identifier::new("file"), Method::CanExecute);
        future.version = PROTOCOL_VERSION + 1;
        assert!(matches!(
            handle(&future, &registry, &host, &mut rng),
            AgentResult::Failure { kind: FailureKind::Protocol, .. }
        ));
    }

    #[test]
    fn test_parse_picks_last_envelope() {
        let response = AgentResponse::new(AgentResult::State {
            state: State::new().with("name", Value::ServiceName(ServiceUnit::new("cron.service"))),
        });
        let stdout = format!("warming up\n{}\n", serde_json::to_string(&response).unwrap());
        assert_eq!(AgentResponse::parse(&stdout, "").unwrap(), response);
        assert!(matches!(
            AgentResponse::parse("nothing here", "boom"),
            Err(AgentError::MissingEnvelope(stderr)) if stderr == "boom"
        ));
    }
}
