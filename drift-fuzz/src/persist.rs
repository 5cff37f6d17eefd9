//! Incident files: a replayable `.drift` history plus a `.json` report
//! for triage, sharing one timestamp stem.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;
use drift_types::{FieldDiff, State};
use drift_wrappers::Identifier;
use serde::Serialize;

use crate::errors::{FuzzError, StateMismatch};
use crate::execution::TestMode;
use crate::history::WrapperHistory;

pub const STAMP_FORMAT: &str = "%Y-%m-%d-%H-%M-%S-%3f";

#[derive(Debug, Serialize)]
struct Report<'a> {
    wrapper: &'a Identifier,
    base_image: String,
    mode: TestMode,
    target: &'a State,
    actual: &'a State,
    diff: &'a [FieldDiff],
}

/// Paths of one persisted incident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incident {
    pub history: PathBuf,
    pub report: PathBuf,
}

pub fn stamp() -> String {
    Local::now().format(STAMP_FORMAT).to_string()
}

/// Writes the incident pair for `mismatch` into `dir`.
pub fn persist(dir: &Path, history: &WrapperHistory, mismatch: &StateMismatch) -> Result<Incident, FuzzError> {
    fs::create_dir_all(dir).map_err(|source| FuzzError::Persist {
        path: dir.to_path_buf(),
        source,
    })?;

    let stem = unique_stem(dir);
    let incident = Incident {
        history: dir.join(format!("{stem}.drift")),
        report: dir.join(format!("{stem}.json")),
    };

    history.save(&incident.history)?;

    let report = Report {
        wrapper: &mismatch.wrapper,
        base_image: history.base_image.to_string(),
        mode: history.mode,
        target: &mismatch.target,
        actual: &mismatch.actual,
        diff: &mismatch.diff,
    };
    let json = serde_json::to_string_pretty(&report).map_err(|e| FuzzError::MalformedHistory {
        path: incident.report.clone(),
        detail: e.to_string(),
    })?;
    fs::write(&incident.report, json).map_err(|source| FuzzError::Persist {
        path: incident.report.clone(),
        source,
    })?;

    log::info!("Saved incident to {}", incident.history.display());
    Ok(incident)
}

fn unique_stem(dir: &Path) -> String {
    let base = stamp();
    let mut stem = base.clone();
    let mut n = 1;
    while dir.join(format!("{stem}.drift")).exists() {
        stem = format!("{base}-{n}");
        n += 1;
    }
    stem
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::BaseImage;
    use drift_types::{Target, Value};

    #[test]
    fn test_persist_writes_pair() {
        let dir = tempfile::tempdir().unwrap();
        let errors = dir.path().join("errors");

        let target = State::new().with("enabled", Value::Bool(true));
        let actual = State::new().with("enabled", Value::Bool(false));
        let mut history = WrapperHistory::new(
            BaseImage::Debian12,
            TestMode::Unit {
                target: Target::Pyinfra,
            },
        );
        history.push(Identifier::new("systemd"), target.clone());
        let mismatch = StateMismatch {
            wrapper: Identifier::new("systemd"),
            diff: target.diff(&actual),
            target,
            actual,
        };

        let first = persist(&errors, &history, &mismatch).unwrap();
        let second = persist(&errors, &history, &mismatch).unwrap();
        assert_ne!(first.history, second.history);

        assert_eq!(WrapperHistory::load(&first.history).unwrap(), history);
        let report: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&first.report).unwrap()).unwrap();
        assert_eq!(report["wrapper"], "systemd");
        assert_eq!(report["base_image"], "debian-12");
        assert_eq!(report["diff"][0]["field"], "enabled");
    }

    #[test]
    fn test_stamp_shape() {
        let stamp = stamp();
        assert_eq!(stamp.split('-').count(), 7);
        assert_eq!(stamp.rsplit('-').next().unwrap().len(), 3);
    }
}
