//! Session state mutated by the orchestrator and observed by the display.

use std::fmt;
use std::time::{Duration, Instant};

use drift_types::{State, Target};
use drift_wrappers::Identifier;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::docker::BaseImage;
use crate::errors::StateMismatch;
use crate::history::WrapperHistory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TestMode {
    /// One tool against the generated target state
    Unit { target: Target },
    /// Two tools against each other; `first` provides the reference state
    Differential { first: Target, second: Target },
}

impl TestMode {
    pub fn targets(&self) -> Vec<Target> {
        match *self {
            TestMode::Unit { target } => vec![target],
            TestMode::Differential { first, second } => vec![first, second],
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestMode::Unit { target } => write!(f, "unit ({target})"),
            TestMode::Differential { first, second } => write!(f, "differential ({first} vs {second})"),
        }
    }
}

/// One base image lifecycle.
#[derive(Debug, Clone)]
pub struct Round {
    pub number: usize,
    pub base_image: BaseImage,
    pub history: WrapperHistory,
    pub error: Option<StateMismatch>,
}

/// Read-only copy of the counters, published to the display.
#[derive(Debug, Clone)]
pub struct Status {
    pub started: Instant,
    pub round: usize,
    pub total_rounds: usize,
    pub wrapper: usize,
    pub wrappers_per_round: usize,
    pub errors: usize,
    pub base_image: Option<BaseImage>,
    pub mode: TestMode,
    pub replay: bool,
}

impl Status {
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug)]
pub struct Execution {
    started: Instant,
    total_rounds: usize,
    wrappers_per_round: usize,
    mode: TestMode,
    base_image: Option<BaseImage>,
    continue_on_error: bool,
    replay: Option<WrapperHistory>,
    rounds_started: usize,
    wrappers_in_round: usize,
    errors: usize,
    round: Option<Round>,
    used_images: Vec<String>,
}

impl Execution {
    pub fn new(
        mode: TestMode,
        base_image: Option<BaseImage>,
        total_rounds: usize,
        wrappers_per_round: usize,
        continue_on_error: bool,
    ) -> Self {
        Self {
            started: Instant::now(),
            total_rounds,
            wrappers_per_round,
            mode,
            base_image,
            continue_on_error,
            replay: None,
            rounds_started: 0,
            wrappers_in_round: 0,
            errors: 0,
            round: None,
            used_images: Vec::new(),
        }
    }

    /// A single round re-driving `history` on its recorded base image.
    pub fn from_replay(history: WrapperHistory) -> Self {
        let mut execution = Self::new(history.mode, Some(history.base_image), 1, history.len(), false);
        execution.replay = Some(history);
        execution
    }

    pub fn mode(&self) -> TestMode {
        self.mode
    }

    pub fn continue_on_error(&self) -> bool {
        self.continue_on_error
    }

    pub fn replay(&self) -> Option<&WrapperHistory> {
        self.replay.as_ref()
    }

    pub fn is_replay(&self) -> bool {
        self.replay.is_some()
    }

    pub fn rounds_left(&self) -> bool {
        self.rounds_started < self.total_rounds
    }

    pub fn wrappers_left(&self) -> bool {
        self.round.is_some() && self.wrappers_in_round < self.wrappers_per_round
    }

    /// Starts the next round on the configured base image, or a random one.
    pub fn start_round<R: Rng + ?Sized>(&mut self, rng: &mut R) -> &Round {
        self.rounds_started += 1;
        self.wrappers_in_round = 0;
        let base_image = self.base_image.unwrap_or_else(|| BaseImage::random(rng));
        self.round.insert(Round {
            number: self.rounds_started,
            base_image,
            history: WrapperHistory::new(base_image, self.mode),
            error: None,
        })
    }

    pub fn round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    /// Counts a wrapper step against the round budget and returns its
    /// zero based index.
    pub fn begin_wrapper(&mut self) -> usize {
        self.wrappers_in_round += 1;
        self.wrappers_in_round - 1
    }

    pub fn record_wrapper(&mut self, wrapper: Identifier, state: State) {
        if let Some(round) = self.round.as_mut() {
            round.history.push(wrapper, state);
        }
    }

    /// Counts an error; mismatches are also kept on the round.
    pub fn record_error(&mut self, mismatch: Option<StateMismatch>) {
        self.errors += 1;
        if let (Some(round), Some(mismatch)) = (self.round.as_mut(), mismatch) {
            round.error = Some(mismatch);
        }
    }

    pub fn errors(&self) -> usize {
        self.errors
    }

    pub fn rounds_started(&self) -> usize {
        self.rounds_started
    }

    pub fn add_used_image(&mut self, image: impl Into<String>) {
        let image = image.into();
        if !self.used_images.contains(&image) {
            self.used_images.push(image);
        }
    }

    pub fn used_images(&self) -> &[String] {
        &self.used_images
    }

    pub fn status(&self) -> Status {
        Status {
            started: self.started,
            round: self.rounds_started,
            total_rounds: self.total_rounds,
            wrapper: self.wrappers_in_round,
            wrappers_per_round: self.wrappers_per_round,
            errors: self.errors,
            base_image: self.round.as_ref().map(|round| round.base_image).or(self.base_image),
            mode: self.mode,
            replay: self.is_replay(),
        }
    }
}
