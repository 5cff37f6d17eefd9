use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use drift_fuzz::config::FileConfig;
use drift_fuzz::docker::{ContainerHandle, ContainerRuntime, ExecOutput};
use drift_fuzz::{
    BaseImage, Cli, Execution, FuzzError, Operator, Orchestrator, RuntimeError, Settings, TargetExecutor, TestMode,
    WrapperHistory,
};
use drift_types::{ServiceState, ServiceUnit, State, StaticHost, Target, Value};
use drift_wrappers::agent::handle;
use drift_wrappers::wrappers::Systemd;
use drift_wrappers::{AgentRequest, AgentResponse, AgentResult, Identifier, Method, Registry, Wrapper};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;

type Mutation = Arc<dyn Fn(&mut State) + Send + Sync>;

fn systemd() -> Arc<dyn Wrapper> {
    Arc::new(Systemd)
}

fn registry() -> Registry {
    Registry::new().register(systemd)
}

#[derive(Debug, Default)]
struct Journal {
    runs: Vec<String>,
    removed: Vec<String>,
    commits: Vec<String>,
    builds: Vec<BaseImage>,
    removed_images: Vec<String>,
    requests: Vec<Method>,
    scripts: Vec<(Target, String)>,
}

/// Containers that exist only as ids. Agent calls are answered in process
/// against a static host; verify echoes the requested state through any
/// mutation an executor left on the container.
struct FakeRuntime {
    registry: Registry,
    host: StaticHost,
    journal: Mutex<Journal>,
    mutations: Mutex<HashMap<String, Mutation>>,
    not_ready: HashSet<String>,
    existing_images: HashSet<String>,
    next_id: AtomicUsize,
    rng: Mutex<StdRng>,
}

impl FakeRuntime {
    fn new(host: StaticHost) -> Self {
        Self {
            registry: registry(),
            host,
            journal: Mutex::new(Journal::default()),
            mutations: Mutex::new(HashMap::new()),
            not_ready: HashSet::new(),
            existing_images: HashSet::new(),
            next_id: AtomicUsize::new(0),
            rng: Mutex::new(StdRng::seed_from_u64(7)),
        }
    }

    fn with_not_ready(mut self, wrapper: &str) -> Self {
        self.not_ready.insert(wrapper.to_string());
        self
    }

    fn with_existing_image(mut self, image: &str) -> Self {
        self.existing_images.insert(image.to_string());
        self
    }

    fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.journal.lock().unwrap()
    }

    fn answer(&self, container: &ContainerHandle, request: &AgentRequest) -> AgentResult {
        match request.method {
            Method::Verify => {
                let mut state = request.state.clone();
                if let Some(mutation) = self.mutations.lock().unwrap().get(&container.id) {
                    mutation(&mut state);
                }
                AgentResult::State { state }
            }
            Method::CanExecute if self.not_ready.contains(request.wrapper.as_str()) => {
                AgentResult::Ready { ready: false }
            }
            _ => {
                let mut rng = self.rng.lock().unwrap();
                handle(request, &self.registry, &self.host, &mut *rng)
            }
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(self.existing_images.contains(image))
    }

    async fn build_base_image(&self, image: BaseImage) -> Result<String, RuntimeError> {
        self.journal().builds.push(image);
        Ok(image.tag())
    }

    async fn run(&self, _image: &str) -> Result<ContainerHandle, RuntimeError> {
        let id = format!("c{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.journal().runs.push(id.clone());
        Ok(ContainerHandle { id, ssh_port: 2222 })
    }

    async fn exec(&self, container: &ContainerHandle, cmd: Vec<String>) -> Result<ExecOutput, RuntimeError> {
        let request = AgentRequest::decode(&cmd[1]).unwrap();
        self.journal().requests.push(request.method);
        let response = AgentResponse::new(self.answer(container, &request));
        Ok(ExecOutput {
            exit_code: 0,
            stdout: format!("{}\n", serde_json::to_string(&response).unwrap()),
            stderr: String::new(),
        })
    }

    async fn commit(&self, container: &ContainerHandle) -> Result<String, RuntimeError> {
        let image = format!("drift:intermediate-{}", container.id);
        self.journal().commits.push(image.clone());
        Ok(image)
    }

    async fn remove(&self, container: &ContainerHandle) -> Result<(), RuntimeError> {
        self.journal().removed.push(container.id.clone());
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.journal().removed_images.push(image.to_string());
        Ok(())
    }
}

enum Behavior {
    Converge,
    Fail,
    Mutate(Mutation),
    Cancel(CancellationToken),
}

struct FakeExecutor {
    target: Target,
    runtime: Arc<FakeRuntime>,
    behavior: Behavior,
}

#[async_trait]
impl TargetExecutor for FakeExecutor {
    fn target(&self) -> Target {
        self.target
    }

    async fn execute(&self, _task_name: &str, script: &str, container: &ContainerHandle) -> Result<(), FuzzError> {
        self.runtime.journal().scripts.push((self.target, script.to_string()));
        match &self.behavior {
            Behavior::Converge => Ok(()),
            Behavior::Fail => Err(FuzzError::ToolExecution {
                target: self.target,
                detail: "exit status 2".to_string(),
            }),
            Behavior::Mutate(mutation) => {
                self.runtime
                    .mutations
                    .lock()
                    .unwrap()
                    .insert(container.id.clone(), Arc::clone(mutation));
                Ok(())
            }
            Behavior::Cancel(token) => {
                token.cancel();
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct CountingOperator {
    acknowledged: AtomicUsize,
}

#[async_trait]
impl Operator for CountingOperator {
    async fn acknowledge(&self, _prompt: &str) {
        self.acknowledged.fetch_add(1, Ordering::SeqCst);
    }
}

fn flip_service_state() -> Mutation {
    Arc::new(|state: &mut State| {
        let flipped = match state.get("state").and_then(Value::as_service_state) {
            Some(ServiceState::Stopped) => ServiceState::Started,
            _ => ServiceState::Stopped,
        };
        state.insert("state", Value::ServiceState(flipped));
    })
}

fn flip_enabled() -> Mutation {
    Arc::new(|state: &mut State| {
        let enabled = state.get("enabled").and_then(Value::as_bool).unwrap_or(false);
        state.insert("enabled", Value::Bool(!enabled));
    })
}

fn settings(mode: TestMode, errors_dir: &Path, continue_on_error: bool) -> Settings {
    let (unit, differential) = match mode {
        TestMode::Unit { target } => (Some(target), None),
        TestMode::Differential { first, second } => (None, Some(vec![first, second])),
    };
    let cli = Cli {
        unit,
        differential,
        continue_on_error,
        errors_dir: Some(errors_dir.to_path_buf()),
        ..Default::default()
    };
    Settings::merge(cli, FileConfig::default()).unwrap()
}

const UNIT: TestMode = TestMode::Unit {
    target: Target::Ansible,
};

const DIFFERENTIAL: TestMode = TestMode::Differential {
    first: Target::Ansible,
    second: Target::Pyinfra,
};

struct Harness {
    runtime: Arc<FakeRuntime>,
    operator: Arc<CountingOperator>,
    orchestrator: Orchestrator,
}

fn harness(
    settings: &Settings,
    execution: Execution,
    runtime: FakeRuntime,
    executors: Vec<(Target, Behavior)>,
    cancel: CancellationToken,
) -> Harness {
    let runtime = Arc::new(runtime);
    let operator = Arc::new(CountingOperator::default());
    let mut orchestrator = Orchestrator::new(settings, execution, runtime.clone(), cancel)
        .with_registry(registry())
        .with_operator(operator.clone())
        .with_rng(StdRng::seed_from_u64(11));
    for (target, behavior) in executors {
        orchestrator = orchestrator.with_executor(Arc::new(FakeExecutor {
            target,
            runtime: runtime.clone(),
            behavior,
        }));
    }
    Harness {
        runtime,
        operator,
        orchestrator,
    }
}

fn assert_each_container_removed_once(journal: &Journal) {
    let mut runs = journal.runs.clone();
    let mut removed = journal.removed.clone();
    runs.sort();
    removed.sort();
    assert_eq!(runs, removed);
    let unique: HashSet<&String> = journal.removed.iter().collect();
    assert_eq!(unique.len(), journal.removed.len());
}

#[tokio::test]
async fn test_unit_rounds_commit_and_clean_up() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(UNIT, dir.path(), true);
    let execution = Execution::new(UNIT, Some(BaseImage::Debian12), 2, 3, true);
    let mut h = harness(
        &settings,
        execution,
        FakeRuntime::new(StaticHost::debian()),
        vec![(Target::Ansible, Behavior::Converge)],
        CancellationToken::new(),
    );

    let summary = h.orchestrator.run().await;
    assert_eq!(summary.rounds, 2);
    assert_eq!(summary.errors, 0);
    assert!(!summary.cancelled);

    let journal = h.runtime.journal();
    assert_eq!(journal.runs.len(), 6);
    assert_each_container_removed_once(&journal);
    assert_eq!(journal.commits.len(), 6);
    // one build per base image per session
    assert_eq!(journal.builds, vec![BaseImage::Debian12]);
    assert_eq!(journal.removed_images.len(), 7);
    assert!(journal.removed_images.contains(&"drift:debian-12".to_string()));
    assert!(journal.scripts.iter().all(|(_, script)| script.starts_with("ansible.builtin.systemd_service")));
}

#[tokio::test]
async fn test_image_cache_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(UNIT, dir.path(), true);
    settings.image_cache = false;
    let execution = Execution::new(UNIT, Some(BaseImage::Ubuntu2204), 3, 1, true);
    let mut h = harness(
        &settings,
        execution,
        FakeRuntime::new(StaticHost::debian()),
        vec![(Target::Ansible, Behavior::Converge)],
        CancellationToken::new(),
    );

    h.orchestrator.run().await;
    assert_eq!(h.runtime.journal().builds.len(), 3);
}

#[tokio::test]
async fn test_disabled_cache_rebuilds_after_failed_rounds() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(UNIT, dir.path(), true);
    settings.image_cache = false;
    let execution = Execution::new(UNIT, Some(BaseImage::Debian12), 3, 2, true);
    let mut h = harness(
        &settings,
        execution,
        FakeRuntime::new(StaticHost::debian()),
        vec![(Target::Ansible, Behavior::Fail)],
        CancellationToken::new(),
    );

    let summary = h.orchestrator.run().await;
    assert_eq!(summary.errors, 3);
    assert_eq!(h.runtime.journal().builds.len(), 3);
}

#[tokio::test]
async fn test_kept_base_images_are_reused_and_kept() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = settings(UNIT, dir.path(), true);
    settings.keep_base_images = true;
    let execution = Execution::new(UNIT, Some(BaseImage::Debian12), 1, 2, true);
    let runtime = FakeRuntime::new(StaticHost::debian()).with_existing_image("drift:debian-12");
    let mut h = harness(
        &settings,
        execution,
        runtime,
        vec![(Target::Ansible, Behavior::Converge)],
        CancellationToken::new(),
    );

    h.orchestrator.run().await;
    let journal = h.runtime.journal();
    assert!(journal.builds.is_empty());
    assert!(!journal.removed_images.contains(&"drift:debian-12".to_string()));
    assert_eq!(journal.removed_images.len(), 2);
}

#[tokio::test]
async fn test_unit_mismatch_is_persisted_and_acknowledged() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(UNIT, dir.path(), false);
    let execution = Execution::new(UNIT, Some(BaseImage::Debian12), 2, 3, false);
    let mut h = harness(
        &settings,
        execution,
        FakeRuntime::new(StaticHost::debian()),
        vec![(Target::Ansible, Behavior::Mutate(flip_enabled()))],
        CancellationToken::new(),
    );

    let summary = h.orchestrator.run().await;
    assert_eq!(summary.errors, 2);
    assert_eq!(summary.incidents.len(), 2);
    assert_eq!(h.operator.acknowledged.load(Ordering::SeqCst), 2);

    let journal = h.runtime.journal();
    // the first wrapper of each round fails, so nothing is committed
    assert!(journal.commits.is_empty());
    assert_each_container_removed_once(&journal);

    for incident in &summary.incidents {
        let history = WrapperHistory::load(&incident.history).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.entries()[0].wrapper, Identifier::new("systemd"));

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&incident.report).unwrap()).unwrap();
        assert_eq!(report["diff"][0]["field"], "enabled");
    }
}

#[tokio::test]
async fn test_differential_reports_first_tool_as_target() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(DIFFERENTIAL, dir.path(), true);
    let execution = Execution::new(DIFFERENTIAL, Some(BaseImage::Debian12), 1, 2, true);
    let mut h = harness(
        &settings,
        execution,
        FakeRuntime::new(StaticHost::debian()),
        vec![
            (Target::Ansible, Behavior::Converge),
            (Target::Pyinfra, Behavior::Mutate(flip_service_state())),
        ],
        CancellationToken::new(),
    );

    let summary = h.orchestrator.run().await;
    assert_eq!(summary.errors, 1);
    let incident = &summary.incidents[0];
    let history = WrapperHistory::load(&incident.history).unwrap();
    assert_eq!(history.mode, DIFFERENTIAL);

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&incident.report).unwrap()).unwrap();
    let diff = report["diff"].as_array().unwrap();
    assert_eq!(diff.len(), 1);
    assert_eq!(diff[0]["field"], "state");

    // the first tool converged, so the reference equals the generated state
    let target: State = serde_json::from_value(report["target"].clone()).unwrap();
    let actual: State = serde_json::from_value(report["actual"].clone()).unwrap();
    assert_eq!(target, history.entries()[0].state);
    assert_ne!(target.get("state"), actual.get("state"));
    assert_eq!(target.get("enabled"), actual.get("enabled"));

    let journal = h.runtime.journal();
    assert_eq!(journal.runs.len(), 2, "one container per tool");
    assert_each_container_removed_once(&journal);
    let targets: Vec<Target> = journal.scripts.iter().map(|(target, _)| *target).collect();
    assert_eq!(targets, vec![Target::Ansible, Target::Pyinfra]);
}

#[tokio::test]
async fn test_differential_agreement_commits_first_container() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(DIFFERENTIAL, dir.path(), true);
    let execution = Execution::new(DIFFERENTIAL, Some(BaseImage::Debian12), 1, 2, true);
    let mut h = harness(
        &settings,
        execution,
        FakeRuntime::new(StaticHost::debian()),
        vec![
            (Target::Ansible, Behavior::Converge),
            (Target::Pyinfra, Behavior::Converge),
        ],
        CancellationToken::new(),
    );

    let summary = h.orchestrator.run().await;
    assert_eq!(summary.errors, 0);
    let journal = h.runtime.journal();
    assert_eq!(journal.runs.len(), 4);
    assert_eq!(journal.commits, vec!["drift:intermediate-c0", "drift:intermediate-c2"]);
    assert_each_container_removed_once(&journal);
}

#[tokio::test]
async fn test_tool_failure_ends_round_without_incident() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(UNIT, dir.path(), true);
    let execution = Execution::new(UNIT, Some(BaseImage::Debian12), 2, 2, true);
    let mut h = harness(
        &settings,
        execution,
        FakeRuntime::new(StaticHost::debian()),
        vec![(Target::Ansible, Behavior::Fail)],
        CancellationToken::new(),
    );

    let summary = h.orchestrator.run().await;
    assert_eq!(summary.errors, 2);
    assert!(summary.incidents.is_empty());
    assert_eq!(h.operator.acknowledged.load(Ordering::SeqCst), 0);
    assert_each_container_removed_once(&h.runtime.journal());
}

#[tokio::test]
async fn test_cancellation_mid_round_still_removes_containers() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(DIFFERENTIAL, dir.path(), true);
    let execution = Execution::new(DIFFERENTIAL, Some(BaseImage::Debian12), 3, 5, true);
    let cancel = CancellationToken::new();
    let mut h = harness(
        &settings,
        execution,
        FakeRuntime::new(StaticHost::debian()),
        vec![
            (Target::Ansible, Behavior::Converge),
            (Target::Pyinfra, Behavior::Cancel(cancel.clone())),
        ],
        cancel,
    );

    let summary = h.orchestrator.run().await;
    assert!(summary.cancelled);
    assert_eq!(summary.rounds, 1);
    assert_eq!(summary.errors, 0);
    assert!(summary.incidents.is_empty());

    let journal = h.runtime.journal();
    assert_eq!(journal.runs.len(), 2);
    assert!(journal.commits.is_empty());
    assert_each_container_removed_once(&journal);
}

#[tokio::test]
async fn test_not_ready_wrappers_exhaust_selection() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(UNIT, dir.path(), true);
    let execution = Execution::new(UNIT, Some(BaseImage::Debian12), 1, 3, true);
    let mut h = harness(
        &settings,
        execution,
        FakeRuntime::new(StaticHost::debian()).with_not_ready("systemd"),
        vec![(Target::Ansible, Behavior::Converge)],
        CancellationToken::new(),
    );

    let summary = h.orchestrator.run().await;
    assert_eq!(summary.errors, 1);
    let journal = h.runtime.journal();
    assert_eq!(journal.requests, vec![Method::CanExecute]);
    assert!(journal.scripts.is_empty());
    assert_each_container_removed_once(&journal);
}

#[tokio::test]
async fn test_generation_failure_is_rerolled_then_reported() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(UNIT, dir.path(), true);
    let execution = Execution::new(UNIT, Some(BaseImage::Debian12), 1, 1, true);
    let mut h = harness(
        &settings,
        execution,
        FakeRuntime::new(StaticHost::default()),
        vec![(Target::Ansible, Behavior::Converge)],
        CancellationToken::new(),
    );

    let summary = h.orchestrator.run().await;
    assert_eq!(summary.errors, 1);
    let journal = h.runtime.journal();
    let generations = journal.requests.iter().filter(|m| **m == Method::Generate).count();
    assert_eq!(generations, drift_fuzz::orchestrator::GENERATION_ATTEMPTS);
    assert!(journal.scripts.is_empty());
}

#[tokio::test]
async fn test_replay_renders_recorded_states_identically() {
    let dir = tempfile::tempdir().unwrap();
    let mut history = WrapperHistory::new(BaseImage::Debian12, UNIT);
    let states = [
        State::new()
            .with("name", Value::ServiceName(ServiceUnit::new("cron.service")))
            .with("enabled", Value::Bool(true))
            .with("state", Value::ServiceState(ServiceState::Started)),
        State::new()
            .with("name", Value::ServiceName(ServiceUnit::new("nginx.service")))
            .with("enabled", Value::Bool(false))
            .with("state", Value::ServiceState(ServiceState::Stopped)),
    ];
    for state in &states {
        history.push(Identifier::new("systemd"), state.clone());
    }
    let path = dir.path().join("replay.drift");
    history.save(&path).unwrap();
    let history = WrapperHistory::load(&path).unwrap();

    let cli = Cli {
        replay: Some(path.clone()),
        errors_dir: Some(dir.path().join("errors")),
        ..Default::default()
    };
    let settings = Settings::merge(cli, FileConfig::default()).unwrap();
    let mut h = harness(
        &settings,
        Execution::from_replay(history),
        FakeRuntime::new(StaticHost::debian()),
        vec![(Target::Ansible, Behavior::Converge)],
        CancellationToken::new(),
    );

    let summary = h.orchestrator.run().await;
    assert_eq!(summary.errors, 0);
    // a pause after every replayed wrapper
    assert_eq!(h.operator.acknowledged.load(Ordering::SeqCst), 2);

    let journal = h.runtime.journal();
    assert!(!journal.requests.contains(&Method::Generate));
    let expected: Vec<(Target, String)> = states
        .iter()
        .map(|state| (Target::Ansible, Systemd.transform(Target::Ansible, state).unwrap()))
        .collect();
    assert_eq!(journal.scripts, expected);
    assert_eq!(journal.builds, vec![BaseImage::Debian12]);
}

#[tokio::test]
async fn test_replay_of_unknown_wrapper_fails_round() {
    let dir = tempfile::tempdir().unwrap();
    let mut history = WrapperHistory::new(BaseImage::Debian12, UNIT);
    history.push(Identifier::new("apt"), State::new());

    let cli = Cli {
        replay: Some(dir.path().join("x.drift")),
        errors_dir: Some(dir.path().to_path_buf()),
        ..Default::default()
    };
    let settings = Settings::merge(cli, FileConfig::default()).unwrap();
    let mut h = harness(
        &settings,
        Execution::from_replay(history),
        FakeRuntime::new(StaticHost::debian()),
        vec![(Target::Ansible, Behavior::Converge)],
        CancellationToken::new(),
    );

    let summary = h.orchestrator.run().await;
    assert_eq!(summary.errors, 1);
    assert_each_container_removed_once(&h.runtime.journal());
}

#[tokio::test]
async fn test_status_snapshots_follow_progress() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(UNIT, dir.path(), true);
    let execution = Execution::new(UNIT, Some(BaseImage::Debian12), 2, 2, true);
    let mut h = harness(
        &settings,
        execution,
        FakeRuntime::new(StaticHost::debian()),
        vec![(Target::Ansible, Behavior::Converge)],
        CancellationToken::new(),
    );
    let status = h.orchestrator.subscribe();

    h.orchestrator.run().await;
    let last = status.borrow().clone();
    assert_eq!((last.round, last.total_rounds), (2, 2));
    assert_eq!(last.wrapper, 2);
    assert_eq!(last.base_image, Some(BaseImage::Debian12));
    let by_target: BTreeMap<Target, usize> = h
        .runtime
        .journal()
        .scripts
        .iter()
        .fold(BTreeMap::new(), |mut acc, (target, _)| {
            *acc.entry(*target).or_default() += 1;
            acc
        });
    assert_eq!(by_target.get(&Target::Ansible), Some(&4));
}
