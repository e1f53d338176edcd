//! Intervention Channel: the authoritative path for human-issued directives
//! targeting a swarm or agent, per §4.8.
//!
//! The relaunch-counter and modification-plan behavior has no direct
//! counterpart in the teacher crate; it is grounded in the shape of its
//! `domain::models::convergence::intervention` progressive-disclosure
//! builders and `services::audit_log`'s `VecDeque`-backed retention/cleanup
//! pattern (a capped in-memory buffer, swept on a timer rather than on
//! every write).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::error::InterventionError;
use crate::domain::models::{Intervention, InterventionAction, InterventionStatus, ModificationPlan};
use crate::services::event_bus::EventBus;

/// Outcome of [`InterventionChannel::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted(String),
    Rejected(String),
}

struct SwarmRecord {
    relaunch_count: u32,
    /// Learnings extracted from the response detail of prior interventions,
    /// carried into the next relaunch's modification plan.
    learnings: Vec<String>,
}

impl Default for SwarmRecord {
    fn default() -> Self {
        Self {
            relaunch_count: 0,
            learnings: Vec::new(),
        }
    }
}

/// In-memory store of pending and historical interventions, keyed by id.
pub struct InterventionChannel {
    event_bus: Arc<EventBus>,
    relaunch_ceiling: u32,
    max_age: Duration,
    interventions: RwLock<HashMap<String, Intervention>>,
    swarms: RwLock<HashMap<String, SwarmRecord>>,
}

impl InterventionChannel {
    pub fn new(event_bus: Arc<EventBus>, relaunch_ceiling: u32, max_age_days: i64) -> Self {
        Self {
            event_bus,
            relaunch_ceiling,
            max_age: Duration::days(max_age_days),
            interventions: RwLock::new(HashMap::new()),
            swarms: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild a channel from a previously taken history + relaunch-counter
    /// pair, as the persisted-state loader does at startup. Learnings are
    /// not part of the snapshot document (§6 names only the relaunch
    /// counters), so a restored swarm's next relaunch carries an empty
    /// `learnings` list until a fresh `apply()` populates one.
    pub fn restore(
        event_bus: Arc<EventBus>,
        relaunch_ceiling: u32,
        max_age_days: i64,
        interventions: Vec<Intervention>,
        relaunch_counts: HashMap<String, u32>,
    ) -> Self {
        let swarms = relaunch_counts
            .into_iter()
            .map(|(swarm_id, relaunch_count)| {
                (
                    swarm_id,
                    SwarmRecord {
                        relaunch_count,
                        learnings: Vec::new(),
                    },
                )
            })
            .collect();
        Self {
            event_bus,
            relaunch_ceiling,
            max_age: Duration::days(max_age_days),
            interventions: RwLock::new(interventions.into_iter().map(|i| (i.id.clone(), i)).collect()),
            swarms: RwLock::new(swarms),
        }
    }

    /// Submit a new intervention, per the two-branch algorithm in §4.8.
    pub async fn send(&self, mut intervention: Intervention) -> Result<SendOutcome, InterventionError> {
        intervention.validate().map_err(InterventionError::InvalidIntervention)?;
        let id = Uuid::new_v4().to_string();
        intervention.id = id.clone();

        if intervention.action == InterventionAction::RelaunchSwarm {
            let mut swarms = self.swarms.write().await;
            let record = swarms.entry(intervention.swarm_id.clone()).or_default();

            if record.relaunch_count >= self.relaunch_ceiling {
                intervention.status = InterventionStatus::Rejected;
                intervention.response_detail = Some(format!(
                    "Cannot relaunch swarm: maximum {} attempts reached",
                    self.relaunch_ceiling
                ));
                self.interventions.write().await.insert(id.clone(), intervention);
                return Ok(SendOutcome::Rejected(format!(
                    "Cannot relaunch swarm: maximum {} attempts reached",
                    self.relaunch_ceiling
                )));
            }

            record.relaunch_count += 1;
            intervention.relaunch_count = Some(record.relaunch_count);
            intervention.modification_plan = Some(ModificationPlan {
                agent_types: intervention
                    .modification_plan
                    .as_ref()
                    .map(|p| p.agent_types.clone())
                    .unwrap_or_default(),
                learnings: record.learnings.clone(),
            });
            drop(swarms);

            self.interventions.write().await.insert(id.clone(), intervention.clone());
            self.event_bus
                .emit_swarm_event(
                    &intervention.swarm_id,
                    serde_json::json!({
                        "type": "SwarmRelaunchRequested",
                        "interventionId": id,
                        "swarmId": intervention.swarm_id,
                    }),
                )
                .await;
            tracing::info!(intervention_id = %id, swarm_id = %intervention.swarm_id, "swarm relaunch requested");
            return Ok(SendOutcome::Accepted(id));
        }

        self.interventions.write().await.insert(id.clone(), intervention.clone());
        self.event_bus
            .emit_human_intervention(&intervention.swarm_id, &id, intervention.action.as_str(), intervention.status.as_str())
            .await;
        tracing::info!(intervention_id = %id, swarm_id = %intervention.swarm_id, action = %intervention.action, "intervention queued");
        Ok(SendOutcome::Accepted(id))
    }

    /// Move `pending -> acknowledged`. Idempotent beyond the first call.
    pub async fn acknowledge(&self, intervention_id: &str, agent_id: &str) -> Result<(), InterventionError> {
        let mut interventions = self.interventions.write().await;
        let intervention = interventions
            .get_mut(intervention_id)
            .ok_or_else(|| InterventionError::NotFound(intervention_id.to_string()))?;

        intervention
            .transition(InterventionStatus::Acknowledged)
            .map_err(|_| InterventionError::AlreadyApplied(intervention_id.to_string()))?;
        tracing::info!(intervention_id, agent_id, "intervention acknowledged");
        Ok(())
    }

    /// Move `acknowledged -> applied`, recording the agent's response detail
    /// and, for a `relaunch-swarm` intervention, feeding it back as a
    /// learning for the next relaunch's modification plan.
    pub async fn apply(&self, intervention_id: &str, agent_id: &str, detail: impl Into<String>) -> Result<(), InterventionError> {
        let detail = detail.into();
        let mut interventions = self.interventions.write().await;
        let intervention = interventions
            .get_mut(intervention_id)
            .ok_or_else(|| InterventionError::NotFound(intervention_id.to_string()))?;

        if intervention.status == InterventionStatus::Applied {
            return Ok(());
        }
        intervention
            .transition(InterventionStatus::Applied)
            .map_err(|_| InterventionError::AlreadyApplied(intervention_id.to_string()))?;
        intervention.response_detail = Some(detail.clone());

        if intervention.action == InterventionAction::RelaunchSwarm {
            let swarm_id = intervention.swarm_id.clone();
            drop(interventions);
            let mut swarms = self.swarms.write().await;
            swarms.entry(swarm_id).or_default().learnings.push(detail);
        }

        tracing::info!(intervention_id, agent_id, "intervention applied");
        Ok(())
    }

    pub async fn get(&self, intervention_id: &str) -> Option<Intervention> {
        self.interventions.read().await.get(intervention_id).cloned()
    }

    pub async fn relaunch_count(&self, swarm_id: &str) -> u32 {
        self.swarms.read().await.get(swarm_id).map(|r| r.relaunch_count).unwrap_or(0)
    }

    pub async fn pending_count(&self) -> usize {
        self.interventions
            .read()
            .await
            .values()
            .filter(|i| i.status == InterventionStatus::Pending)
            .count()
    }

    /// Copy-on-read view of every retained intervention, for the optional
    /// persisted-state snapshot document (§6).
    pub async fn snapshot_all(&self) -> Vec<Intervention> {
        self.interventions.read().await.values().cloned().collect()
    }

    /// Copy-on-read view of each swarm's relaunch counter, for the same
    /// persisted-state document.
    pub async fn relaunch_counts(&self) -> HashMap<String, u32> {
        self.swarms.read().await.iter().map(|(id, r)| (id.clone(), r.relaunch_count)).collect()
    }

    /// Remove interventions older than the configured `maxAge`, returning
    /// the count removed.
    pub async fn cleanup(&self) -> usize {
        let now = Utc::now();
        let max_age = self.max_age;
        let mut interventions = self.interventions.write().await;
        let before = interventions.len();
        interventions.retain(|_, i| !i.is_eligible_for_cleanup(now, max_age));
        before - interventions.len()
    }
}
