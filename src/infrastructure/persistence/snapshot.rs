//! The persisted-state document itself: shape, (de)serialization, and the
//! file I/O wrapper `Core`'s shutdown path and `swarm-core-node`'s startup
//! path call into.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::error::PersistenceError;
use crate::domain::models::{Agent, CoordinationNode, Intervention};
use crate::services::metrics::MetricsSnapshot;

/// A tree of named sections keyed by id, per §6: "Layout is a tree of named
/// sections keyed by id; unknown fields are ignored on load to preserve
/// forward compatibility." Every field uses `#[serde(default)]` so an older
/// or newer snapshot document still loads — a missing section just restores
/// empty, never a hard failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreSnapshot {
    /// Schema version, bumped only if a future field's meaning changes
    /// incompatibly; unrecognized values are still loaded best-effort.
    pub version: u32,
    pub swarm_id: String,
    pub agents: HashMap<String, Agent>,
    pub coordination_nodes: Vec<CoordinationNode>,
    pub interventions: Vec<Intervention>,
    pub relaunch_counters: HashMap<String, u32>,
    pub last_metrics: Option<MetricsSnapshot>,
}

const CURRENT_VERSION: u32 = 1;

impl CoreSnapshot {
    #[must_use]
    pub fn new(swarm_id: impl Into<String>) -> Self {
        Self {
            version: CURRENT_VERSION,
            swarm_id: swarm_id.into(),
            ..Self::default()
        }
    }

    /// Write this snapshot to `path` as pretty JSON, creating parent
    /// directories as needed. Best-effort: callers log and continue past an
    /// `Err` rather than failing shutdown over it.
    pub fn save(&self, path: &Path) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| PersistenceError::Write {
                    path: path.display().to_string(),
                    source,
                })?;
            }
        }
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json).map_err(|source| PersistenceError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load a snapshot previously written by [`Self::save`]. Unknown fields
    /// in the document are ignored by `serde`'s default struct behavior;
    /// missing ones fall back to their `Default`.
    pub fn load(path: &Path) -> Result<Self, PersistenceError> {
        let bytes = std::fs::read(path).map_err(|source| PersistenceError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Agent, NodeId};

    #[test]
    fn round_trips_through_json() {
        let mut snapshot = CoreSnapshot::new("swarm-1");
        snapshot.agents.insert("a1".to_string(), Agent::new("a1", "worker", 0));
        snapshot.coordination_nodes.push(CoordinationNode::root(NodeId(0), 20));
        snapshot.relaunch_counters.insert("swarm-1".to_string(), 3);

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: CoreSnapshot = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.swarm_id, "swarm-1");
        assert_eq!(restored.agents.len(), 1);
        assert_eq!(restored.relaunch_counters.get("swarm-1"), Some(&3));
    }

    #[test]
    fn unknown_fields_are_ignored_on_load() {
        let json = r#"{"version":1,"swarm_id":"swarm-1","future_field":{"whatever":true}}"#;
        let restored: CoreSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(restored.swarm_id, "swarm-1");
    }

    #[test]
    fn missing_sections_default_to_empty() {
        let json = r#"{"version":1}"#;
        let restored: CoreSnapshot = serde_json::from_str(json).unwrap();
        assert!(restored.agents.is_empty());
        assert!(restored.coordination_nodes.is_empty());
    }

    #[test]
    fn save_and_load_round_trip_through_a_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snapshot.json");

        let mut snapshot = CoreSnapshot::new("swarm-1");
        snapshot.relaunch_counters.insert("swarm-1".to_string(), 2);
        snapshot.save(&path).unwrap();

        let restored = CoreSnapshot::load(&path).unwrap();
        assert_eq!(restored.swarm_id, "swarm-1");
        assert_eq!(restored.relaunch_counters.get("swarm-1"), Some(&2));
    }

    #[test]
    fn load_of_missing_file_is_an_error_callers_can_treat_as_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.json");
        assert!(CoreSnapshot::load(&path).is_err());
    }
}
