//! Append-only record of what a round executed, used for replay and for
//! incident files.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use drift_types::State;
use drift_wrappers::Identifier;
use serde::{Deserialize, Serialize};

use crate::docker::BaseImage;
use crate::errors::FuzzError;
use crate::execution::TestMode;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub wrapper: Identifier,
    pub state: State,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrapperHistory {
    pub base_image: BaseImage,
    pub mode: TestMode,
    entries: Vec<HistoryEntry>,
}

impl WrapperHistory {
    pub fn new(base_image: BaseImage, mode: TestMode) -> Self {
        Self {
            base_image,
            mode,
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, wrapper: Identifier, state: State) {
        self.entries.push(HistoryEntry { wrapper, state });
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Opaque form written to `.drift` files.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    pub fn decode(encoded: &str) -> Result<Self, String> {
        let bytes = STANDARD.decode(encoded.trim()).map_err(|e| e.to_string())?;
        serde_json::from_slice(&bytes).map_err(|e| e.to_string())
    }

    pub fn save(&self, path: &Path) -> Result<(), FuzzError> {
        let encoded = self.encode().map_err(|e| FuzzError::MalformedHistory {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        fs::write(path, encoded).map_err(|source| FuzzError::Persist {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, FuzzError> {
        let raw = fs::read_to_string(path).map_err(|source| FuzzError::Persist {
            path: path.to_path_buf(),
            source,
        })?;
        Self::decode(&raw).map_err(|detail| FuzzError::MalformedHistory {
            path: path.to_path_buf(),
            detail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drift_types::{ServiceState, ServiceUnit, Target, Value};

    fn history() -> WrapperHistory {
        let mut history = WrapperHistory::new(
            BaseImage::Debian12,
            TestMode::Differential {
                first: Target::Ansible,
                second: Target::Pyinfra,
            },
        );
        history.push(
            Identifier::new("systemd"),
            State::new()
                .with("name", Value::ServiceName(ServiceUnit::new("cron.service")))
                .with("enabled", Value::Bool(true))
                .with("state", Value::ServiceState(ServiceState::Started)),
        );
        history
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("incident.drift");
        let history = history();
        history.save(&path).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("cron.service"), "history files are opaque");
        assert_eq!(WrapperHistory::load(&path).unwrap(), history);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.drift");
        fs::write(&path, "not a history").unwrap();
        assert!(matches!(
            WrapperHistory::load(&path),
            Err(FuzzError::MalformedHistory { .. })
        ));
        assert!(matches!(
            WrapperHistory::load(&dir.path().join("missing.drift")),
            Err(FuzzError::Persist { .. })
        ));
    }
}
