//! Persistent state management.
//!
//! Maintains a local JSON index of all containers and their current
//! states, enabling daemon-less lifecycle management.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;

use appbox_common::error::{AppboxError, Result};
use appbox_common::types::{ContainerId, ContainerState};
use appbox_core::fsutil;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persistent record of a container's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    /// Container identifier.
    pub id: ContainerId,
    /// Human-readable name.
    pub name: String,
    /// Labels the container was created with.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Current lifecycle state.
    pub state: ContainerState,
    /// Loopback address assigned at creation.
    #[serde(default)]
    pub ip: Option<Ipv4Addr>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last start, if running.
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

/// The full container index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateIndex {
    /// Tracked containers in creation order.
    pub containers: Vec<StateEntry>,
}

impl StateIndex {
    /// Looks up a container.
    #[must_use]
    pub fn get(&self, id: &ContainerId) -> Option<&StateEntry> {
        self.containers.iter().find(|e| e.id == *id)
    }

    /// Looks up a container for modification.
    ///
    /// # Errors
    ///
    /// Returns [`AppboxError::NotFound`] if the container is not tracked.
    pub fn get_mut(&mut self, id: &ContainerId) -> Result<&mut StateEntry> {
        self.containers
            .iter_mut()
            .find(|e| e.id == *id)
            .ok_or_else(|| AppboxError::NotFound {
                kind: "container",
                id: id.to_string(),
            })
    }
}

/// Loads the state index from disk; a missing file is an empty index.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_state(path: &Path) -> Result<StateIndex> {
    tracing::debug!(path = %path.display(), "loading state index");
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateIndex::default()),
        Err(e) => Err(AppboxError::io(path, e)),
    }
}

/// Persists the state index to disk atomically.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn save_state(path: &Path, index: &StateIndex) -> Result<()> {
    tracing::debug!(path = %path.display(), containers = index.containers.len(), "saving state index");
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| AppboxError::io(dir, e))?;
    }
    let json = serde_json::to_vec_pretty(index)?;
    fsutil::write_atomic(path, &json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> StateEntry {
        StateEntry {
            id: ContainerId::new(id),
            name: format!("{id}-name"),
            labels: BTreeMap::from([("k".to_string(), "v".to_string())]),
            state: ContainerState::Created,
            ip: Some(Ipv4Addr::new(127, 0, 3, 233)),
            created_at: Utc::now(),
            started_at: None,
        }
    }

    #[test]
    fn missing_file_is_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let index = load_state(&dir.path().join("containers.json")).unwrap();
        assert!(index.containers.is_empty());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/containers.json");
        let index = StateIndex {
            containers: vec![entry("c1"), entry("c2")],
        };
        save_state(&path, &index).unwrap();
        assert_eq!(load_state(&path).unwrap(), index);
        assert!(!fsutil::swap_path(&path).exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("containers.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_state(&path), Err(AppboxError::Serialization { .. })));
    }

    #[test]
    fn get_mut_reports_unknown_ids() {
        let mut index = StateIndex {
            containers: vec![entry("c1")],
        };
        index.get_mut(&ContainerId::new("c1")).unwrap().state = ContainerState::Running;
        assert_eq!(index.get(&ContainerId::new("c1")).unwrap().state, ContainerState::Running);
        assert!(index.get_mut(&ContainerId::new("nope")).unwrap_err().is_not_found());
    }
}
