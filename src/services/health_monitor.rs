//! Health & Recovery Monitor: heartbeat tracking, degraded/failed
//! transitions, and the recovery queue described in §4.4.
//!
//! Runs as a single cooperative background loop at `healthCheckInterval`
//! (teacher precedent: the backoff-driven retry style of
//! `services::circuit_breaker`'s recovery path, adapted here to use
//! `backoff::ExponentialBackoff` directly per `SPEC_FULL.md`). The loop
//! never crashes the process on a single error — failures are logged and
//! counted, matching §7's "background loops never crash the process"
//! propagation policy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::models::{AgentHealth, Task};
use crate::services::agent_registry::AgentRegistry;
use crate::services::coordination_tree::CoordinationTree;
use crate::services::event_bus::EventBus;

/// Result of one health-check tick: which agents were newly transitioned to
/// `failed`, plus the tasks that were in flight on them at the time,
/// retry-incremented and ready to be returned to a queue.
#[derive(Debug, Default)]
pub struct HealthTickReport {
    pub failed_agent_ids: Vec<String>,
    pub orphaned_tasks: Vec<Task>,
}

/// External lifecycle manager that actually attempts to bring a failed
/// agent back up. Kept outside the core, per §4.4 ("Recovery is delegated
/// to an external lifecycle manager"); the crate ships a stub that always
/// succeeds so the recovery loop is exercisable without a live agent
/// transport wired in.
#[async_trait]
pub trait RecoveryExecutor: Send + Sync {
    async fn attempt_recovery(&self, agent_id: &str) -> bool;
}

/// Deterministic stub recovery executor; always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRecoverExecutor;

#[async_trait]
impl RecoveryExecutor for AlwaysRecoverExecutor {
    async fn attempt_recovery(&self, _agent_id: &str) -> bool {
        true
    }
}

struct RecoveryEntry {
    agent_id: String,
    failed_at: DateTime<Utc>,
    backoff: backoff::ExponentialBackoff,
}

/// Heartbeat staleness tracking and recovery queue draining.
pub struct HealthMonitor {
    registry: Arc<AgentRegistry>,
    tree: Arc<CoordinationTree>,
    event_bus: Arc<EventBus>,
    recovery_executor: Arc<dyn RecoveryExecutor>,
    health_check_interval_ms: u64,
    recovery_timeout_ms: u64,
    recovery_queue: RwLock<VecDeque<RecoveryEntry>>,
    agent_failures: AtomicU64,
    agent_recoveries: AtomicU64,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<AgentRegistry>,
        tree: Arc<CoordinationTree>,
        event_bus: Arc<EventBus>,
        recovery_executor: Arc<dyn RecoveryExecutor>,
        health_check_interval_ms: u64,
        recovery_timeout_ms: u64,
    ) -> Self {
        Self {
            registry,
            tree,
            event_bus,
            recovery_executor,
            health_check_interval_ms,
            recovery_timeout_ms,
            recovery_queue: RwLock::new(VecDeque::new()),
            agent_failures: AtomicU64::new(0),
            agent_recoveries: AtomicU64::new(0),
        }
    }

    /// One health-check tick per §4.4: for every registered agent, compute
    /// `sinceHeartbeat` and apply the degraded/failed thresholds. Returns a
    /// report naming which agents were newly failed and which tasks were
    /// orphaned by that transition (retry-incremented), so the caller (the
    /// core's health loop) can return those tasks to a queue per Scenario 3.
    pub async fn tick(&self, swarm_id: &str) -> HealthTickReport {
        let now = Utc::now();
        let interval_secs = self.health_check_interval_ms as f64 / 1000.0;
        let failed_threshold = (interval_secs * 3.0) as i64;
        let degraded_threshold = (interval_secs * 1.5) as i64;

        let snapshot = self.registry.snapshot().await;
        let mut report = HealthTickReport::default();

        for agent in snapshot.values() {
            let since = agent.heartbeat_age_secs(now);
            if since > failed_threshold && agent.health != AgentHealth::Failed {
                let in_flight = agent.in_flight;
                if let Ok(orphaned_tasks) = self.registry.mark_failed(&agent.id).await {
                    if self.tree.node_of(&agent.id).await.is_some() {
                        let _ = self.tree.remove_agent(&agent.id, in_flight).await;
                    }
                    self.agent_failures.fetch_add(1, Ordering::Relaxed);
                    self.event_bus.emit_agent_failed(swarm_id, &agent.id).await;
                    self.enqueue_recovery(&agent.id, now).await;
                    report.failed_agent_ids.push(agent.id.clone());
                    report.orphaned_tasks.extend(orphaned_tasks);
                }
            } else if since > degraded_threshold && agent.health == AgentHealth::Healthy {
                if self.registry.mark_degraded(&agent.id).await.is_ok() {
                    self.event_bus.emit_agent_degraded(swarm_id, &agent.id).await;
                }
            }
        }

        report
    }

    async fn enqueue_recovery(&self, agent_id: &str, failed_at: DateTime<Utc>) {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(std::time::Duration::from_millis(self.recovery_timeout_ms))
            .with_max_interval(std::time::Duration::from_secs(300))
            .with_max_elapsed_time(None)
            .build();
        self.recovery_queue.write().await.push_back(RecoveryEntry {
            agent_id: agent_id.to_string(),
            failed_at,
            backoff,
        });
    }

    /// Drain the recovery queue: entries older than `recoveryTimeout` are
    /// attempted. A success restores the agent to healthy with a refreshed
    /// heartbeat; a failure re-enqueues with exponential backoff.
    pub async fn drain_recovery_queue(&self, swarm_id: &str) {
        let now = Utc::now();
        let ready: Vec<RecoveryEntry> = {
            let mut queue = self.recovery_queue.write().await;
            let mut ready = Vec::new();
            let mut remaining = VecDeque::new();
            while let Some(entry) = queue.pop_front() {
                let age_ms = (now - entry.failed_at).num_milliseconds().max(0) as u64;
                if age_ms >= self.recovery_timeout_ms {
                    ready.push(entry);
                } else {
                    remaining.push_back(entry);
                }
            }
            *queue = remaining;
            ready
        };

        for mut entry in ready {
            if self.recovery_executor.attempt_recovery(&entry.agent_id).await {
                if self.registry.restore_healthy(&entry.agent_id).await.is_ok() {
                    self.agent_recoveries.fetch_add(1, Ordering::Relaxed);
                    self.event_bus.emit_agent_recovered(swarm_id, &entry.agent_id).await;
                }
            } else {
                let delay = entry.backoff.next_backoff();
                entry.failed_at = now - chrono::Duration::milliseconds(self.recovery_timeout_ms as i64)
                    + chrono::Duration::milliseconds(delay.map_or(0, |d| d.as_millis() as i64));
                self.recovery_queue.write().await.push_back(entry);
            }
        }
    }

    pub fn agent_failures(&self) -> u64 {
        self.agent_failures.load(Ordering::Relaxed)
    }

    pub fn agent_recoveries(&self) -> u64 {
        self.agent_recoveries.load(Ordering::Relaxed)
    }

    pub async fn pending_recoveries(&self) -> usize {
        self.recovery_queue.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Agent;

    async fn setup() -> (HealthMonitor, Arc<AgentRegistry>) {
        let registry = Arc::new(AgentRegistry::new());
        let tree = Arc::new(CoordinationTree::new(20, 4));
        let bus = Arc::new(EventBus::default());
        let monitor = HealthMonitor::new(
            registry.clone(),
            tree,
            bus,
            Arc::new(AlwaysRecoverExecutor),
            1000,
            5000,
        );
        (monitor, registry)
    }

    #[tokio::test]
    async fn stale_agent_transitions_to_failed_after_three_intervals() {
        let (monitor, registry) = setup().await;
        let mut agent = Agent::new("a1", "worker", 0);
        agent.last_heartbeat = Utc::now() - chrono::Duration::seconds(4);
        registry.register(agent).await.unwrap();

        let report = monitor.tick("s1").await;
        assert_eq!(report.failed_agent_ids, vec!["a1".to_string()]);
        assert!(report.orphaned_tasks.is_empty());
        assert_eq!(monitor.agent_failures(), 1);
        assert_eq!(monitor.pending_recoveries().await, 1);
    }

    #[tokio::test]
    async fn stale_agent_failure_orphans_its_in_flight_task_with_retry_incremented() {
        let (monitor, registry) = setup().await;
        let mut agent = Agent::new("a1", "worker", 0);
        agent.last_heartbeat = Utc::now() - chrono::Duration::seconds(4);
        registry.register(agent).await.unwrap();
        registry
            .assign_task("a1", crate::domain::models::Task::new("t3", "build", crate::domain::models::TaskPriority::Medium))
            .await
            .unwrap();

        let report = monitor.tick("s1").await;
        assert_eq!(report.failed_agent_ids, vec!["a1".to_string()]);
        assert_eq!(report.orphaned_tasks.len(), 1);
        assert_eq!(report.orphaned_tasks[0].id, "t3");
        assert_eq!(report.orphaned_tasks[0].retry_count, 1);
    }

    #[tokio::test]
    async fn mildly_stale_agent_degrades_not_fails() {
        let (monitor, registry) = setup().await;
        let mut agent = Agent::new("a1", "worker", 0);
        agent.last_heartbeat = Utc::now() - chrono::Duration::milliseconds(1800);
        registry.register(agent).await.unwrap();

        let report = monitor.tick("s1").await;
        assert!(report.failed_agent_ids.is_empty());
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot["a1"].health, AgentHealth::Degraded);
    }

    #[tokio::test]
    async fn fresh_heartbeat_stays_healthy() {
        let (monitor, registry) = setup().await;
        registry.register(Agent::new("a1", "worker", 0)).await.unwrap();
        let report = monitor.tick("s1").await;
        assert!(report.failed_agent_ids.is_empty());
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot["a1"].health, AgentHealth::Healthy);
    }

    #[tokio::test]
    async fn recovery_drains_after_timeout_and_restores_health() {
        let (monitor, registry) = setup().await;
        let mut agent = Agent::new("a1", "worker", 0);
        agent.last_heartbeat = Utc::now() - chrono::Duration::seconds(10);
        registry.register(agent).await.unwrap();
        monitor.tick("s1").await;

        // Force the entry to look old enough to be drained immediately.
        {
            let mut queue = monitor.recovery_queue.write().await;
            for entry in queue.iter_mut() {
                entry.failed_at = Utc::now() - chrono::Duration::seconds(10);
            }
        }
        monitor.drain_recovery_queue("s1").await;

        assert_eq!(monitor.pending_recoveries().await, 0);
        assert_eq!(monitor.agent_recoveries(), 1);
        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot["a1"].health, AgentHealth::Healthy);
    }

    #[tokio::test]
    async fn status_transitions_occur_at_most_once_per_tick() {
        let (monitor, registry) = setup().await;
        let mut agent = Agent::new("a1", "worker", 0);
        agent.last_heartbeat = Utc::now() - chrono::Duration::seconds(10);
        registry.register(agent).await.unwrap();

        let first_tick = monitor.tick("s1").await;
        assert_eq!(first_tick.failed_agent_ids.len(), 1);
        // Second tick in the same instant must not re-fail an already-failed agent.
        let second_tick = monitor.tick("s1").await;
        assert!(second_tick.failed_agent_ids.is_empty());
    }
}
