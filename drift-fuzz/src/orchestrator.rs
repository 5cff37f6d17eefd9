//! The round loop: picks base images and wrappers, drives the executors
//! and turns disagreements into incidents.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use drift_types::{State, Target};
use drift_wrappers::{Identifier, Registry, VerifyOptions, Wrapper};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::agent_client::{default_agent_path, AgentClient, Generated};
use crate::config::Settings;
use crate::docker::{BaseImage, ContainerHandle, ContainerRuntime};
use crate::errors::{FuzzError, StateMismatch};
use crate::execution::{Execution, Status, TestMode};
use crate::executor::{self, TargetExecutor};
use crate::history::HistoryEntry;
use crate::operator::{Operator, StdinOperator};
use crate::persist::{persist, Incident};
use crate::selection::Selector;

/// Wrapper re-rolls per step when generation finds no candidate.
pub const GENERATION_ATTEMPTS: usize = 5;

/// Outcome of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub rounds: usize,
    pub errors: usize,
    pub incidents: Vec<Incident>,
    pub cancelled: bool,
}

pub struct Orchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    registry: Registry,
    executors: BTreeMap<Target, Arc<dyn TargetExecutor>>,
    operator: Arc<dyn Operator>,
    cancel: CancellationToken,
    execution: Execution,
    status: watch::Sender<Status>,
    rng: StdRng,
    base_images: BTreeMap<BaseImage, String>,
    incidents: Vec<Incident>,
    errors_dir: PathBuf,
    agent_path: String,
    verify: VerifyOptions,
    step: bool,
    keep_base_images: bool,
    image_cache: bool,
}

impl Orchestrator {
    pub fn new(
        settings: &Settings,
        execution: Execution,
        runtime: Arc<dyn ContainerRuntime>,
        cancel: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(execution.status());
        Self {
            runtime,
            registry: Registry::builtin(),
            executors: BTreeMap::new(),
            operator: Arc::new(StdinOperator),
            cancel,
            execution,
            status,
            rng: StdRng::from_entropy(),
            base_images: BTreeMap::new(),
            incidents: Vec::new(),
            errors_dir: settings.errors_dir.clone(),
            agent_path: default_agent_path(),
            verify: settings.verify,
            step: settings.step,
            keep_base_images: settings.keep_base_images,
            image_cache: settings.image_cache,
        }
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn TargetExecutor>) -> Self {
        self.executors.insert(executor.target(), executor);
        self
    }

    pub fn with_operator(mut self, operator: Arc<dyn Operator>) -> Self {
        self.operator = operator;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Status snapshots, refreshed whenever a counter changes.
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    pub fn execution(&self) -> &Execution {
        &self.execution
    }

    /// Runs every round, then removes the images the session created.
    /// Only cancellation ends the loop early; round failures are recorded
    /// and the next round starts.
    pub async fn run(&mut self) -> Summary {
        self.publish();
        while self.execution.rounds_left() {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.run_round().await {
                Ok(()) => {}
                Err(e) if e.should_stop() => {
                    log::info!("Stopping on request");
                    break;
                }
                Err(e) => self.handle_error(e).await,
            }
            self.publish();
        }

        self.cleanup_images().await;
        self.publish();
        log::info!("Execution finished");

        Summary {
            rounds: self.execution.rounds_started(),
            errors: self.execution.errors(),
            incidents: self.incidents.clone(),
            cancelled: self.cancel.is_cancelled(),
        }
    }

    async fn run_round(&mut self) -> Result<(), FuzzError> {
        let (number, base_image) = {
            let round = self.execution.start_round(&mut self.rng);
            (round.number, round.base_image)
        };
        self.publish();
        log::info!("Starting round {number} on image {base_image}");

        let result = self.run_wrappers(base_image).await;
        if !self.image_cache {
            self.base_images.remove(&base_image);
        }
        result
    }

    async fn run_wrappers(&mut self, base_image: BaseImage) -> Result<(), FuzzError> {
        let mut image = self.base_image(base_image).await?;
        let mut previous: Option<Identifier> = None;
        while self.execution.wrappers_left() {
            self.check_cancelled()?;
            let index = self.execution.begin_wrapper();
            self.publish();

            let planned = match self.execution.replay() {
                Some(history) => match history.entries().get(index) {
                    Some(entry) => Some(entry.clone()),
                    None => break,
                },
                None => None,
            };

            let (next_image, wrapper) = self.run_step(&image, previous.as_ref(), planned).await?;
            image = next_image;
            if self.execution.is_replay() || self.step {
                self.pause(&format!("Wrapper {wrapper} finished.")).await?;
            }
            previous = Some(wrapper);
        }
        Ok(())
    }

    /// Built (or kept) tag for `image`, built at most once per session
    /// while caching is on.
    async fn base_image(&mut self, image: BaseImage) -> Result<String, FuzzError> {
        if let Some(tag) = self.base_images.get(&image) {
            return Ok(tag.clone());
        }
        let tag = image.tag();
        let tag = if self.keep_base_images && self.runtime.image_exists(&tag).await? {
            log::info!("Reusing kept base image {tag}");
            tag
        } else {
            self.runtime.build_base_image(image).await?
        };
        self.execution.add_used_image(tag.clone());
        self.base_images.insert(image, tag.clone());
        Ok(tag)
    }

    /// One wrapper step. Every container opened by the step is removed
    /// exactly once, whatever the outcome.
    async fn run_step(
        &mut self,
        image: &str,
        previous: Option<&Identifier>,
        planned: Option<HistoryEntry>,
    ) -> Result<(String, Identifier), FuzzError> {
        let mut opened = Vec::new();
        let result = self.step(image, previous, planned, &mut opened).await;

        for container in &opened {
            if let Err(e) = self.runtime.remove(container).await {
                log::warn!("Failed to remove container {}: {e}", container.id);
            }
        }
        result
    }

    async fn step(
        &mut self,
        image: &str,
        previous: Option<&Identifier>,
        planned: Option<HistoryEntry>,
        opened: &mut Vec<ContainerHandle>,
    ) -> Result<(String, Identifier), FuzzError> {
        let runtime = Arc::clone(&self.runtime);
        let agent_path = self.agent_path.clone();

        let primary = runtime.run(image).await?;
        opened.push(primary.clone());
        self.check_cancelled()?;
        let agent = AgentClient::new(runtime.as_ref(), &primary, &agent_path);

        let (wrapper, state) = match planned {
            Some(entry) => {
                let recorded = self
                    .registry
                    .resolve(&entry.wrapper)
                    .ok_or_else(|| FuzzError::UnknownWrapper(entry.wrapper.clone()))?;
                let wrapper = self.select(&agent, Selector::from_pool(vec![recorded]), None).await?;
                (wrapper, entry.state)
            }
            None => self.generate(&agent, previous).await?,
        };
        let id = wrapper.identifier();
        log::info!("Target state for {id}: {state}");
        self.execution.record_wrapper(id.clone(), state.clone());
        self.publish();
        self.check_cancelled()?;

        match self.execution.mode() {
            TestMode::Unit { target } => {
                let observed = self.run_target(target, wrapper.as_ref(), &state, &agent, &primary).await?;
                StateMismatch::check(&id, &state, &observed)?;
            }
            TestMode::Differential { first, second } => {
                let reference = self.run_target(first, wrapper.as_ref(), &state, &agent, &primary).await?;
                StateMismatch::check(&id, &state, &reference)?;
                self.check_cancelled()?;

                let secondary = runtime.run(image).await?;
                opened.push(secondary.clone());
                let agent = AgentClient::new(runtime.as_ref(), &secondary, &agent_path);
                let observed = self.run_target(second, wrapper.as_ref(), &state, &agent, &secondary).await?;
                // the first tool's observation is the reference
                StateMismatch::check(&id, &reference, &observed)?;
            }
        }

        self.check_cancelled()?;
        let committed = runtime.commit(&primary).await?;
        self.execution.add_used_image(committed.clone());
        Ok((committed, id))
    }

    /// Picks a ready wrapper and generates its target state, re-rolling the
    /// choice when generation finds no candidate.
    async fn generate(
        &mut self,
        agent: &AgentClient<'_>,
        previous: Option<&Identifier>,
    ) -> Result<(Arc<dyn Wrapper>, State), FuzzError> {
        let targets = self.execution.mode().targets();
        let mut last_failure = None;
        for attempt in 1..=GENERATION_ATTEMPTS {
            let selector = Selector::for_targets(&self.registry, &targets);
            let wrapper = self.select(agent, selector, previous).await?;
            let id = wrapper.identifier();
            match agent.generate(&id).await? {
                Generated::State(state) => return Ok((wrapper, state)),
                Generated::NoCandidate(message) => {
                    log::warn!("No state for {id} (attempt {attempt}/{GENERATION_ATTEMPTS}): {message}");
                    last_failure = Some((id, message));
                }
            }
        }
        match last_failure {
            Some((wrapper, message)) => Err(FuzzError::Generation {
                wrapper,
                attempts: GENERATION_ATTEMPTS,
                message,
            }),
            None => Err(FuzzError::WrappersExhausted(self.execution.mode().to_string())),
        }
    }

    /// Draws from `selector` until a wrapper reports it can execute.
    async fn select(
        &mut self,
        agent: &AgentClient<'_>,
        mut selector: Selector,
        previous: Option<&Identifier>,
    ) -> Result<Arc<dyn Wrapper>, FuzzError> {
        loop {
            self.check_cancelled()?;
            let Some(wrapper) = selector.pick(previous, &mut self.rng) else {
                return Err(FuzzError::WrappersExhausted(self.execution.mode().to_string()));
            };
            let id = wrapper.identifier();
            if agent.can_execute(&id).await? {
                log::debug!("Selected wrapper {id}");
                return Ok(wrapper);
            }
            log::info!("Wrapper {id} cannot execute here, discarding it");
            selector.discard(&id);
        }
    }

    async fn run_target(
        &self,
        target: Target,
        wrapper: &dyn Wrapper,
        state: &State,
        agent: &AgentClient<'_>,
        container: &ContainerHandle,
    ) -> Result<State, FuzzError> {
        let executor = self.executors.get(&target).ok_or(FuzzError::MissingExecutor(target))?;
        executor::run_target(executor.as_ref(), wrapper, state, agent, container, self.verify).await
    }

    /// Records and persists a failed round, then waits for the operator
    /// unless errors are to be skipped.
    async fn handle_error(&mut self, error: FuzzError) {
        match error {
            FuzzError::StateMismatch(mismatch) => {
                log::error!("{mismatch}");
                if let Some(round) = self.execution.round() {
                    match persist(&self.errors_dir, &round.history, &mismatch) {
                        Ok(incident) => self.incidents.push(incident),
                        Err(e) => log::error!("Failed to persist incident: {e}"),
                    }
                }
                self.execution.record_error(Some(*mismatch));
            }
            other => {
                log::error!("Round failed: {other}");
                self.execution.record_error(None);
            }
        }
        self.publish();

        if !self.execution.continue_on_error() {
            // cancellation while waiting is picked up by the round loop
            let _ = self.pause("Round ended with an error.").await;
        }
    }

    async fn pause(&self, prompt: &str) -> Result<(), FuzzError> {
        tokio::select! {
            _ = self.operator.acknowledge(prompt) => Ok(()),
            _ = self.cancel.cancelled() => Err(FuzzError::ShouldStop),
        }
    }

    async fn cleanup_images(&mut self) {
        log::info!("Cleaning up resources");
        let images: Vec<String> = self.execution.used_images().iter().rev().cloned().collect();
        for image in images {
            if self.keep_base_images && BaseImage::is_base_tag(&image) {
                log::debug!("Keeping base image {image}");
                continue;
            }
            if let Err(e) = self.runtime.remove_image(&image).await {
                log::warn!("Failed to remove image {image}: {e}");
            }
        }
        self.base_images.clear();
    }

    fn check_cancelled(&self) -> Result<(), FuzzError> {
        if self.cancel.is_cancelled() {
            Err(FuzzError::ShouldStop)
        } else {
            Ok(())
        }
    }

    fn publish(&self) {
        self.status.send_replace(self.execution.status());
    }
}
