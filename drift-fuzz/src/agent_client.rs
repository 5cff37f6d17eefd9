//! Calls into the agent binary mounted in every container.

use drift_types::path::AGENT_DIR;
use drift_types::State;
use drift_wrappers::{AgentRequest, AgentResponse, AgentResult, FailureKind, Identifier, Method, VerifyOptions};

use crate::docker::{ContainerHandle, ContainerRuntime};
use crate::errors::FuzzError;

/// Where the agent binary is mounted inside containers.
pub fn default_agent_path() -> String {
    format!("{AGENT_DIR}/drift-agent")
}

/// Agent calls against one container.
pub struct AgentClient<'a> {
    runtime: &'a dyn ContainerRuntime,
    container: &'a ContainerHandle,
    agent_path: &'a str,
}

/// Outcome of a generate call that distinguishes re-rollable failures.
#[derive(Debug)]
pub enum Generated {
    State(State),
    NoCandidate(String),
}

impl<'a> AgentClient<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, container: &'a ContainerHandle, agent_path: &'a str) -> Self {
        Self {
            runtime,
            container,
            agent_path,
        }
    }

    pub async fn call(&self, request: &AgentRequest) -> Result<AgentResult, FuzzError> {
        let cmd = vec![self.agent_path.to_string(), request.encode()?];
        let output = self.runtime.exec(self.container, cmd).await?;
        let response = AgentResponse::parse(&output.stdout, &output.stderr)?;
        for line in response.stderr.lines() {
            log::debug!("agent: {line}");
        }
        if output.exit_code != 0 {
            log::warn!(
                "Agent exited with {} for {:?} on {}",
                output.exit_code,
                request.method,
                request.wrapper
            );
        }
        Ok(response.result)
    }

    pub async fn generate(&self, wrapper: &Identifier) -> Result<Generated, FuzzError> {
        let request = AgentRequest::new(wrapper.clone(), Method::Generate);
        match self.call(&request).await? {
            AgentResult::State { state } => Ok(Generated::State(state)),
            AgentResult::Failure {
                kind: FailureKind::Generation,
                message,
            } => Ok(Generated::NoCandidate(message)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn snapshot(&self, wrapper: &Identifier, state: &State) -> Result<State, FuzzError> {
        let request = AgentRequest::new(wrapper.clone(), Method::Snapshot).with_state(state.clone());
        self.expect_state(&request).await
    }

    pub async fn verify(&self, wrapper: &Identifier, state: &State, options: VerifyOptions) -> Result<State, FuzzError> {
        let request = AgentRequest::new(wrapper.clone(), Method::Verify)
            .with_state(state.clone())
            .with_options(options);
        self.expect_state(&request).await
    }

    pub async fn can_execute(&self, wrapper: &Identifier) -> Result<bool, FuzzError> {
        let request = AgentRequest::new(wrapper.clone(), Method::CanExecute);
        match self.call(&request).await? {
            AgentResult::Ready { ready } => Ok(ready),
            other => Err(unexpected(other)),
        }
    }

    async fn expect_state(&self, request: &AgentRequest) -> Result<State, FuzzError> {
        match self.call(request).await? {
            AgentResult::State { state } => Ok(state),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(result: AgentResult) -> FuzzError {
    match result {
        AgentResult::Failure { kind, message } => FuzzError::AgentFailure {
            kind: format!("{kind:?}").to_lowercase(),
            message,
        },
        other => FuzzError::AgentFailure {
            kind: "protocol".to_string(),
            message: format!("unexpected result {other:?}"),
        },
    }
}
