//! `Core`: the explicit, non-singleton value that owns every component and
//! wires their background loops together, per §9's "explicit `Core` value
//! instead of singletons" redesign note.
//!
//! One `Core` is constructed per swarm at startup (`swarm-core-node`'s
//! `main.rs` builds exactly one) and handed to the transport layer; nothing
//! in the crate reaches for global/static state.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use crate::domain::error::PersistenceError;
use crate::domain::models::Config;
use crate::domain::ports::agent_voter::{AgentVoter, SimulatedVoter};
use crate::infrastructure::persistence::CoreSnapshot;
use crate::services::agent_registry::AgentRegistry;
use crate::services::consensus::{AnyProtocol, ConsensusEngine};
use crate::services::coordination_tree::CoordinationTree;
use crate::services::event_bus::EventBus;
use crate::services::health_monitor::{AlwaysRecoverExecutor, HealthMonitor, RecoveryExecutor};
use crate::services::intervention_channel::InterventionChannel;
use crate::services::load_balancer::LoadBalancer;
use crate::services::metrics::MetricsSurface;
use crate::services::task_dispatcher::TaskDispatcher;

/// Cadence for the work-steal cycle. Not config-driven: §4.3 names a
/// `rebalance_interval_ms` knob for the rebalance cycle but no separate
/// knob for the steal cycle itself, so it runs on a fixed interval shorter
/// than the typical rebalance cadence.
const WORK_STEAL_INTERVAL_MS: u64 = 2_000;

/// Cadence for the consensus engine's maintenance tick (Raft heartbeat and
/// election-timeout checks; a no-op for the other three protocols).
const CONSENSUS_TICK_INTERVAL_MS: u64 = 500;

/// Cadence for the intervention history cleanup sweep.
const INTERVENTION_CLEANUP_INTERVAL_MS: u64 = 3_600_000;

/// Owns every component for one swarm and spawns their background loops.
pub struct Core {
    pub swarm_id: String,
    pub config: Config,
    pub registry: Arc<AgentRegistry>,
    pub tree: Arc<CoordinationTree>,
    pub load_balancer: Arc<LoadBalancer>,
    pub health_monitor: Arc<HealthMonitor>,
    pub consensus: Arc<ConsensusEngine<AnyProtocol>>,
    pub event_bus: Arc<EventBus>,
    pub dispatcher: Arc<TaskDispatcher>,
    pub intervention_channel: Arc<InterventionChannel>,
    pub metrics: Arc<MetricsSurface>,
}

impl Core {
    /// Build every component from `config`. `node_id` identifies this
    /// process within the consensus cluster (only consulted by Raft).
    pub fn new(swarm_id: impl Into<String>, node_id: impl Into<String>, config: Config) -> Arc<Self> {
        Self::with_voter_and_recovery(
            swarm_id,
            node_id,
            config,
            Arc::new(SimulatedVoter),
            Arc::new(AlwaysRecoverExecutor),
        )
    }

    /// Like [`Core::new`], but lets the embedding application supply a real
    /// `AgentVoter` (live agent transport) and `RecoveryExecutor` (external
    /// lifecycle manager) instead of the in-crate stubs.
    pub fn with_voter_and_recovery(
        swarm_id: impl Into<String>,
        node_id: impl Into<String>,
        config: Config,
        voter: Arc<dyn AgentVoter>,
        recovery_executor: Arc<dyn RecoveryExecutor>,
    ) -> Arc<Self> {
        Self::build(swarm_id, node_id, config, voter, recovery_executor, None)
    }

    /// Like [`Core::with_voter_and_recovery`], but seeds the registry,
    /// coordination tree, and intervention channel from a previously loaded
    /// [`CoreSnapshot`] (§6's persisted-state document) instead of starting
    /// empty. The snapshot's `last_metrics` section is informational only —
    /// it is not replayed into the live `MetricsSurface`, which always
    /// reflects current state.
    pub fn from_snapshot(
        node_id: impl Into<String>,
        config: Config,
        voter: Arc<dyn AgentVoter>,
        recovery_executor: Arc<dyn RecoveryExecutor>,
        snapshot: CoreSnapshot,
    ) -> Arc<Self> {
        let swarm_id = snapshot.swarm_id.clone();
        Self::build(swarm_id, node_id, config, voter, recovery_executor, Some(snapshot))
    }

    fn build(
        swarm_id: impl Into<String>,
        node_id: impl Into<String>,
        config: Config,
        voter: Arc<dyn AgentVoter>,
        recovery_executor: Arc<dyn RecoveryExecutor>,
        snapshot: Option<CoreSnapshot>,
    ) -> Arc<Self> {
        let swarm_id = swarm_id.into();
        let event_bus = Arc::new(EventBus::new(crate::services::event_bus::EventBusConfig::default()));
        let registry = Arc::new(match &snapshot {
            Some(s) => AgentRegistry::restore(s.agents.clone()),
            None => AgentRegistry::new(),
        });
        let tree = Arc::new(match &snapshot {
            Some(s) => CoordinationTree::restore(
                s.coordination_nodes.clone(),
                config.coordination.max_agents_per_node,
                config.coordination.hierarchy_depth,
            ),
            None => CoordinationTree::new(config.coordination.max_agents_per_node, config.coordination.hierarchy_depth),
        });
        let load_balancer = Arc::new(LoadBalancer::new(
            registry.clone(),
            tree.clone(),
            event_bus.clone(),
            &config.coordination,
        ));
        let health_monitor = Arc::new(HealthMonitor::new(
            registry.clone(),
            tree.clone(),
            event_bus.clone(),
            recovery_executor,
            config.coordination.health_check_interval_ms,
            config.coordination.recovery_timeout_ms,
        ));
        let consensus = Arc::new(ConsensusEngine::new(
            AnyProtocol::from_config(&config.consensus, node_id.into()),
            voter,
        ));
        let dispatcher = Arc::new(TaskDispatcher::new(
            registry.clone(),
            tree.clone(),
            load_balancer.clone(),
            event_bus.clone(),
            Some(consensus.clone()),
            HashSet::new(),
        ));
        let intervention_channel = Arc::new(match snapshot {
            Some(s) => InterventionChannel::restore(
                event_bus.clone(),
                config.relaunch_ceiling,
                config.intervention_max_age_days,
                s.interventions,
                s.relaunch_counters,
            ),
            None => InterventionChannel::new(event_bus.clone(), config.relaunch_ceiling, config.intervention_max_age_days),
        });
        let metrics = Arc::new(MetricsSurface::new(
            registry.clone(),
            tree.clone(),
            load_balancer.clone(),
            health_monitor.clone(),
            dispatcher.clone(),
            consensus.clone(),
            event_bus.clone(),
        ));

        Arc::new(Self {
            swarm_id,
            config,
            registry,
            tree,
            load_balancer,
            health_monitor,
            consensus,
            event_bus,
            dispatcher,
            intervention_channel,
            metrics,
        })
    }

    /// Spawn every background loop named in §4: health-check tick, recovery
    /// queue drain, work-steal cycle, rebalance cycle, consensus
    /// maintenance tick, and the intervention cleanup sweep. Each loop logs
    /// and continues past a single iteration's error rather than aborting,
    /// per §7's "background loops never crash the process" rule — none of
    /// the component methods polled here actually return an `Err` today,
    /// but the loop shape leaves room for one that does.
    pub fn start(self: &Arc<Self>) {
        self.spawn_health_loop();
        self.spawn_recovery_loop();
        self.spawn_work_steal_loop();
        self.spawn_rebalance_loop();
        self.spawn_consensus_tick_loop();
        self.spawn_intervention_cleanup_loop();
    }

    fn spawn_health_loop(self: &Arc<Self>) {
        let core = self.clone();
        let interval_ms = core.config.coordination.health_check_interval_ms;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                core.run_health_tick().await;
            }
        });
    }

    /// Run one health-check tick and return any tasks orphaned by an agent
    /// transitioning to `failed` to the global queue, per §4.1/§9's "task
    /// returns to a queue with retry count incremented" invariant
    /// (Scenario 3). Exposed so callers other than the background loop
    /// (tests, an embedder driving ticks manually) exercise the identical
    /// requeue path.
    pub async fn run_health_tick(self: &Arc<Self>) {
        let report = self.health_monitor.tick(&self.swarm_id).await;
        for agent_id in &report.failed_agent_ids {
            tracing::info!(agent_id = %agent_id, swarm_id = %self.swarm_id, "agent marked failed by health loop");
        }
        for task in report.orphaned_tasks {
            let task_id = task.id.clone();
            self.load_balancer.enqueue_global(task).await;
            self.event_bus.emit_task_queued(&self.swarm_id, &task_id).await;
        }
    }

    fn spawn_recovery_loop(self: &Arc<Self>) {
        let core = self.clone();
        let interval_ms = core.config.coordination.recovery_timeout_ms;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                core.health_monitor.drain_recovery_queue(&core.swarm_id).await;
            }
        });
    }

    fn spawn_work_steal_loop(self: &Arc<Self>) {
        let core = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(WORK_STEAL_INTERVAL_MS));
            loop {
                ticker.tick().await;
                core.load_balancer.steal_and_emit(&core.swarm_id).await;
            }
        });
    }

    fn spawn_rebalance_loop(self: &Arc<Self>) {
        let core = self.clone();
        let interval_ms = core.config.coordination.load_balancing.rebalance_interval_ms;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                core.run_rebalance_tick().await;
            }
        });
    }

    /// Run one rebalance cycle and then re-attempt dispatch of everything on
    /// the global queue, per §4.3's promise that a queued task is assigned
    /// "within one rebalance cycle of a healthy agent becoming available"
    /// (Scenario 2).
    pub async fn run_rebalance_tick(self: &Arc<Self>) {
        self.load_balancer.run_rebalance_cycle(&self.swarm_id).await;
        self.dispatcher.drain_global_queue(&self.swarm_id).await;
    }

    fn spawn_consensus_tick_loop(self: &Arc<Self>) {
        let core = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(CONSENSUS_TICK_INTERVAL_MS));
            loop {
                ticker.tick().await;
                let agents: Vec<String> = core.registry.healthy_agents().await.into_iter().map(|a| a.id).collect();
                core.consensus.tick(&agents).await;
            }
        });
    }

    fn spawn_intervention_cleanup_loop(self: &Arc<Self>) {
        let core = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_millis(INTERVENTION_CLEANUP_INTERVAL_MS));
            loop {
                ticker.tick().await;
                let removed = core.intervention_channel.cleanup().await;
                if removed > 0 {
                    tracing::info!(removed, swarm_id = %core.swarm_id, "intervention cleanup swept stale entries");
                }
            }
        });
    }

    /// Assemble the persisted-state document (§6) from every component's
    /// current copy-on-read snapshot.
    pub async fn snapshot(&self) -> CoreSnapshot {
        CoreSnapshot {
            version: 1,
            swarm_id: self.swarm_id.clone(),
            agents: self.registry.snapshot().await,
            coordination_nodes: self.tree.snapshot().await,
            interventions: self.intervention_channel.snapshot_all().await,
            relaunch_counters: self.intervention_channel.relaunch_counts().await,
            last_metrics: Some(self.metrics.snapshot().await),
        }
    }

    /// Write the current state to `path`, per §6's best-effort shutdown
    /// snapshot. Errors are returned rather than panicking — the caller
    /// (`swarm-core-node`'s shutdown path) logs and continues regardless of
    /// the outcome.
    pub async fn save_snapshot(&self, path: &Path) -> Result<(), PersistenceError> {
        self.snapshot().await.save(path)
    }
}
