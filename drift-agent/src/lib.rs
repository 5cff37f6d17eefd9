pub mod capture;
pub mod host;

pub use host::LocalHost;

use drift_types::Host;
use drift_wrappers::agent::{handle, AgentRequest, AgentResponse, AgentResult, FailureKind};
use drift_wrappers::Registry;
use rand::RngCore;

/// Decodes a request from its command line form and answers it.
pub fn respond(
    encoded: Option<&str>,
    registry: &Registry,
    host: &dyn Host,
    rng: &mut dyn RngCore,
) -> AgentResponse {
    let result = match encoded.map(AgentRequest::decode) {
        Some(Ok(request)) => handle(&request, registry, host, rng),
        Some(Err(e)) => AgentResult::Failure {
            kind: FailureKind::Protocol,
            message: format!("malformed request: {e}"),
        },
        None => AgentResult::Failure {
            kind: FailureKind::Protocol,
            message: "usage: drift-agent <base64 request>".to_string(),
        },
    };
    AgentResponse::new(result)
}
