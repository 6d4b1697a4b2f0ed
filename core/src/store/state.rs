// Relay state file — node list and queues as one JSON document
//
// Layout: {"nodes": "<newline list>", "users": {"<pk>": {"queue": [...]}}}
// Writes go to a sibling temp file which is then renamed over the target.

use super::StoreError;
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub queue: Vec<Message>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub nodes: String,
    #[serde(default)]
    pub users: BTreeMap<String, UserRecord>,
}

/// Where the relay document lives. `None` keeps everything in memory.
#[derive(Debug, Clone, Default)]
pub struct StateFile {
    path: Option<PathBuf>,
}

impl StateFile {
    pub fn memory() -> Self {
        Self { path: None }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read the document. A missing file is an empty state.
    pub fn load(&self) -> Result<PersistedState, StoreError> {
        let Some(path) = &self.path else {
            return Ok(PersistedState::default());
        };
        if !path.exists() {
            tracing::info!("No relay state at {}, starting fresh", path.display());
            return Ok(PersistedState::default());
        }

        let contents = fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            return Ok(PersistedState::default());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn write(&self, state: &PersistedState) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(state)?;
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
