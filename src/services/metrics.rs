//! Metrics Surface: a point-in-time snapshot of the coordination core's
//! operational counters, per §4.9.
//!
//! Unlike the other services, `MetricsSurface` owns no state of its own; it
//! composes the counters already tracked by the Agent Registry, Coordination
//! Tree, Health Monitor, Load Balancer, Task Dispatcher, and Consensus
//! Engine into a single flat struct, mirroring the teacher's
//! `services::cost_tracker::CostSummary` snapshot-struct shape (a plain
//! `Serialize` aggregate assembled on demand rather than a thing with its
//! own lock) and the rolling-window counter naming of
//! `services::circuit_breaker::CircuitStats`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::models::AgentHealth;
use crate::services::agent_registry::AgentRegistry;
use crate::services::consensus::{AnyProtocol, ConsensusEngine, ConsensusMetricsSnapshot};
use crate::services::coordination_tree::CoordinationTree;
use crate::services::event_bus::EventBus;
use crate::services::health_monitor::HealthMonitor;
use crate::services::load_balancer::LoadBalancer;
use crate::services::task_dispatcher::TaskDispatcher;

/// A single point-in-time view across every component, served as JSON by
/// the metrics HTTP endpoint and optionally persisted in the shutdown
/// snapshot document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_agents_managed: usize,
    pub healthy_agents: usize,
    pub degraded_agents: usize,
    pub failed_agents: usize,
    pub active_coordination_nodes: usize,
    pub coordination_tree_depth: u32,
    pub global_queue_size: usize,
    pub tasks_coordinated: u64,
    pub tasks_queued: u64,
    pub tasks_rejected: u64,
    pub median_dispatch_latency_ms: u64,
    pub work_stealing_operations: u64,
    pub rebalancing_operations: u64,
    pub pending_recoveries: usize,
    pub agent_failures: u64,
    pub agent_recoveries: u64,
    pub events_dropped_no_subscribers: u64,
    pub consensus: ConsensusMetricsSnapshot,
}

/// Composes the live components into [`MetricsSnapshot`]s on request.
pub struct MetricsSurface {
    registry: Arc<AgentRegistry>,
    tree: Arc<CoordinationTree>,
    load_balancer: Arc<LoadBalancer>,
    health_monitor: Arc<HealthMonitor>,
    dispatcher: Arc<TaskDispatcher>,
    consensus: Arc<ConsensusEngine<AnyProtocol>>,
    event_bus: Arc<EventBus>,
}

impl MetricsSurface {
    pub fn new(
        registry: Arc<AgentRegistry>,
        tree: Arc<CoordinationTree>,
        load_balancer: Arc<LoadBalancer>,
        health_monitor: Arc<HealthMonitor>,
        dispatcher: Arc<TaskDispatcher>,
        consensus: Arc<ConsensusEngine<AnyProtocol>>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            registry,
            tree,
            load_balancer,
            health_monitor,
            dispatcher,
            consensus,
            event_bus,
        }
    }

    /// Assemble a fresh snapshot. Each component is read under its own
    /// short-held lock; the result is not a transactionally consistent
    /// cross-component view, matching the copy-on-read discipline the rest
    /// of the crate uses for its own per-component snapshots.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_agents_managed: self.registry.count().await,
            healthy_agents: self.registry.count_by_health(AgentHealth::Healthy).await,
            degraded_agents: self.registry.count_by_health(AgentHealth::Degraded).await,
            failed_agents: self.registry.count_by_health(AgentHealth::Failed).await,
            active_coordination_nodes: self.tree.node_count().await,
            coordination_tree_depth: self.tree.depth().await,
            global_queue_size: self.load_balancer.global_queue_size().await,
            tasks_coordinated: self.dispatcher.total_dispatched(),
            tasks_queued: self.dispatcher.total_queued(),
            tasks_rejected: self.dispatcher.total_rejected(),
            median_dispatch_latency_ms: self.dispatcher.median_latency_ms().await,
            work_stealing_operations: self.load_balancer.work_stealing_operations(),
            rebalancing_operations: self.load_balancer.rebalancing_operations(),
            pending_recoveries: self.health_monitor.pending_recoveries().await,
            agent_failures: self.health_monitor.agent_failures(),
            agent_recoveries: self.health_monitor.agent_recoveries(),
            events_dropped_no_subscribers: self.event_bus.dropped_no_subscribers(),
            consensus: self.consensus.metrics_snapshot().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Agent, Config};
    use crate::services::health_monitor::AlwaysRecoverExecutor;
    use std::collections::HashSet;

    async fn surface() -> MetricsSurface {
        let config = Config::default();
        let registry = Arc::new(AgentRegistry::new());
        let tree = Arc::new(CoordinationTree::new(
            config.coordination.max_agents_per_node,
            config.coordination.hierarchy_depth,
        ));
        let bus = Arc::new(EventBus::default());
        let load_balancer = Arc::new(LoadBalancer::new(registry.clone(), tree.clone(), bus.clone(), &config.coordination));
        let health_monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            tree.clone(),
            bus.clone(),
            Arc::new(AlwaysRecoverExecutor),
            config.coordination.health_check_interval_ms,
            config.coordination.recovery_timeout_ms,
        ));
        let dispatcher = Arc::new(TaskDispatcher::new(
            registry.clone(),
            tree.clone(),
            load_balancer.clone(),
            bus.clone(),
            None,
            HashSet::new(),
        ));
        let consensus = Arc::new(ConsensusEngine::new(
            AnyProtocol::from_config(&config.consensus, "node-1"),
            Arc::new(crate::domain::ports::SimulatedVoter),
        ));
        MetricsSurface::new(registry, tree, load_balancer, health_monitor, dispatcher, consensus, bus)
    }

    #[tokio::test]
    async fn snapshot_reflects_empty_core() {
        let surface = surface().await;
        let snapshot = surface.snapshot().await;
        assert_eq!(snapshot.total_agents_managed, 0);
        assert_eq!(snapshot.active_coordination_nodes, 1);
        assert_eq!(snapshot.consensus.total_proposals, 0);
    }

    #[tokio::test]
    async fn snapshot_reflects_registered_agent() {
        let surface = surface().await;
        surface.registry.register(Agent::new("a1", "worker", 0)).await.unwrap();
        surface.tree.place_agent("a1").await.unwrap();
        let snapshot = surface.snapshot().await;
        assert_eq!(snapshot.total_agents_managed, 1);
        assert_eq!(snapshot.healthy_agents, 1);
    }
}
