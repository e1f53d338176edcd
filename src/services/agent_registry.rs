//! Agent Registry: catalog of logical agents, their capabilities, health
//! state, and load statistics.
//!
//! Mirrors the teacher's `adapters::cache::cached_agent_repository` lock
//! discipline: a single `RwLock` guards the map, `snapshot()` clones under
//! the lock and releases it before returning so callers never hold the
//! registry lock across an await point.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::domain::error::RegistryError;
use crate::domain::models::{Agent, AgentHealth, Task};

/// An in-flight task together with the agent it is currently bound to. The
/// full `Task` is kept (not just its id) so a failed or unregistered
/// agent's work can actually be rebuilt and re-queued rather than merely
/// named.
struct Assignment {
    agent_id: String,
    task: Task,
}

/// Catalog of registered agents plus the reverse task-to-agent binding used
/// by completion reporting and orphan re-queueing.
pub struct AgentRegistry {
    agents: RwLock<HashMap<String, Agent>>,
    task_assignments: RwLock<HashMap<String, Assignment>>,
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            task_assignments: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuild a registry from a previously taken [`Self::snapshot`], as the
    /// persisted-state loader does at startup. Task-to-agent bindings are
    /// not restored: in-flight tasks are memory-resident by design (§1's
    /// "not a durable queue"), so a restored agent starts with whatever
    /// `in_flight` count its snapshot carried but no queue owns those tasks
    /// anymore.
    pub fn restore(agents: HashMap<String, Agent>) -> Self {
        Self {
            agents: RwLock::new(agents),
            task_assignments: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new agent, failing if one with the same id is already
    /// registered.
    pub async fn register(&self, agent: Agent) -> Result<(), RegistryError> {
        agent.validate().map_err(RegistryError::InvalidAgent)?;

        let mut agents = self.agents.write().await;
        if agents.contains_key(&agent.id) {
            return Err(RegistryError::AlreadyExists(agent.id));
        }
        tracing::info!(agent_id = %agent.id, agent_type = %agent.agent_type, "agent registered");
        agents.insert(agent.id.clone(), agent);
        Ok(())
    }

    /// Idempotent removal. Returns the agent's in-flight task ids so the
    /// caller (coordination tree / dispatcher) can re-queue them.
    pub async fn unregister(&self, id: &str) -> Vec<String> {
        let mut agents = self.agents.write().await;
        if agents.remove(id).is_none() {
            return Vec::new();
        }
        drop(agents);
        tracing::info!(agent_id = %id, "agent unregistered");

        let mut assignments = self.task_assignments.write().await;
        let orphaned_ids: Vec<String> = assignments
            .iter()
            .filter(|(_, assignment)| assignment.agent_id == id)
            .map(|(task_id, _)| task_id.clone())
            .collect();
        for task_id in &orphaned_ids {
            assignments.remove(task_id);
        }
        orphaned_ids
    }

    /// Update last-seen and, if currently degraded, restore to healthy.
    /// Unknown ids are silently dropped — the agent may have been
    /// unregistered concurrently.
    pub async fn heartbeat(&self, id: &str) {
        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.get_mut(id) {
            agent.heartbeat();
            if agent.health == AgentHealth::Degraded {
                agent.health = AgentHealth::Healthy;
                tracing::info!(agent_id = %id, "agent recovered to healthy via heartbeat");
            }
        }
    }

    /// Decrement in-flight counter (floor 0), update EMA latency, and clear
    /// the task-to-agent mapping.
    pub async fn report_completion(&self, id: &str, task_id: &str, execution_time_ms: f64) {
        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.get_mut(id) {
            agent.decrement_in_flight();
            agent.record_latency_sample(execution_time_ms);
        }
        drop(agents);
        self.task_assignments.write().await.remove(task_id);
    }

    /// Record a fresh assignment, incrementing the agent's in-flight
    /// counter and binding the task-to-agent mapping. The whole `Task` is
    /// kept, not just its id, so a later failure can rebuild and re-queue it.
    pub async fn assign_task(&self, agent_id: &str, task: Task) -> Result<(), RegistryError> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| RegistryError::NotFound(agent_id.to_string()))?;
        agent.increment_in_flight();
        drop(agents);
        self.task_assignments.write().await.insert(
            task.id.clone(),
            Assignment {
                agent_id: agent_id.to_string(),
                task,
            },
        );
        Ok(())
    }

    pub async fn agent_for_task(&self, task_id: &str) -> Option<String> {
        self.task_assignments.read().await.get(task_id).map(|a| a.agent_id.clone())
    }

    /// Copy-on-read view of all registered agents, keyed by id.
    pub async fn snapshot(&self) -> HashMap<String, Agent> {
        self.agents.read().await.clone()
    }

    pub async fn get(&self, id: &str) -> Option<Agent> {
        self.agents.read().await.get(id).cloned()
    }

    pub async fn healthy_agents(&self) -> Vec<Agent> {
        self.agents
            .read()
            .await
            .values()
            .filter(|a| a.health == AgentHealth::Healthy)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn count_by_health(&self, health: AgentHealth) -> usize {
        self.agents
            .read()
            .await
            .values()
            .filter(|a| a.health == health)
            .count()
    }

    /// Apply a health transition, returning the previous health so callers
    /// can decide whether to emit a transition event.
    pub async fn set_health(&self, id: &str, health: AgentHealth) -> Option<AgentHealth> {
        let mut agents = self.agents.write().await;
        let agent = agents.get_mut(id)?;
        let previous = agent.health;
        agent.health = health;
        Some(previous)
    }

    /// Transition an agent to `failed`, used by the health monitor once
    /// `sinceHeartbeat > 3*healthCheckInterval`. Returns the agent's
    /// in-flight tasks, each with `retry_count` incremented, so the caller
    /// can return them to a queue per §4.1/§9's "task returns to a queue
    /// with retry count incremented" invariant (Scenario 3).
    pub async fn mark_failed(&self, id: &str) -> Result<Vec<Task>, RegistryError> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        agent.health = AgentHealth::Failed;
        drop(agents);
        tracing::warn!(agent_id = %id, "agent transitioned to failed");

        let mut assignments = self.task_assignments.write().await;
        let orphaned_ids: Vec<String> = assignments
            .iter()
            .filter(|(_, assignment)| assignment.agent_id == id)
            .map(|(task_id, _)| task_id.clone())
            .collect();
        let mut orphaned_tasks = Vec::with_capacity(orphaned_ids.len());
        for task_id in orphaned_ids {
            if let Some(assignment) = assignments.remove(&task_id) {
                let mut task = assignment.task;
                task.record_retry();
                orphaned_tasks.push(task);
            }
        }
        Ok(orphaned_tasks)
    }

    /// Transition an agent to `degraded`, used by the health monitor once
    /// `sinceHeartbeat > 1.5*healthCheckInterval`.
    pub async fn mark_degraded(&self, id: &str) -> Result<(), RegistryError> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        agent.health = AgentHealth::Degraded;
        tracing::warn!(agent_id = %id, "agent transitioned to degraded");
        Ok(())
    }

    /// Restore a recovered agent to `healthy` and refresh its heartbeat, as
    /// the recovery loop does on a successful external recovery attempt.
    pub async fn restore_healthy(&self, id: &str) -> Result<(), RegistryError> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        agent.health = AgentHealth::Healthy;
        agent.heartbeat();
        tracing::info!(agent_id = %id, "agent recovered to healthy");
        Ok(())
    }
}
