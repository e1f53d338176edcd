//! Task Dispatcher: the public ingress for task submission, per §4.7.
//!
//! Composes the Load Balancer, Coordination Tree, Agent Registry, and
//! (optionally, per task type) the Consensus Engine. Maintains a rolling
//! 1000-sample latency window as a fixed-size ring buffer, grounded in the
//! teacher's `services::cost_tracker` rolling-window accounting style.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::domain::error::{ConsensusError, RegistryError};
use crate::domain::models::{ConsensusDecision, Proposal, ProposalKind, Task};
use crate::services::agent_registry::AgentRegistry;
use crate::services::consensus::{AnyProtocol, ConsensusEngine};
use crate::services::coordination_tree::CoordinationTree;
use crate::services::event_bus::EventBus;
use crate::services::load_balancer::{Assignment, LoadBalancer};

const LATENCY_WINDOW: usize = 1000;

/// Outcome of `TaskDispatcher::dispatch`, per §4.7's `{assignedAgentId |
/// "queued"}` result plus the `Rejected` outcome added for consensus gating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Assigned(String),
    Queued,
    Rejected(String),
}

struct LatencyWindow {
    samples: VecDeque<u64>,
}

impl LatencyWindow {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(LATENCY_WINDOW),
        }
    }

    fn record(&mut self, sample_ms: u64) {
        if self.samples.len() == LATENCY_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(sample_ms);
    }

    fn median(&self) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();
        sorted[sorted.len() / 2]
    }
}

/// Public ingress: validates, optionally gates on consensus, dispatches
/// through the Load Balancer, and records the `taskId -> agentId` binding.
pub struct TaskDispatcher {
    registry: Arc<AgentRegistry>,
    tree: Arc<CoordinationTree>,
    load_balancer: Arc<LoadBalancer>,
    event_bus: Arc<EventBus>,
    consensus: Option<Arc<ConsensusEngine<AnyProtocol>>>,
    /// Task types that must clear a consensus proposal before dispatch.
    consensus_gated_types: HashSet<String>,
    latencies: tokio::sync::RwLock<LatencyWindow>,
    total_dispatched: AtomicU64,
    total_queued: AtomicU64,
    total_rejected: AtomicU64,
}

impl TaskDispatcher {
    pub fn new(
        registry: Arc<AgentRegistry>,
        tree: Arc<CoordinationTree>,
        load_balancer: Arc<LoadBalancer>,
        event_bus: Arc<EventBus>,
        consensus: Option<Arc<ConsensusEngine<AnyProtocol>>>,
        consensus_gated_types: HashSet<String>,
    ) -> Self {
        Self {
            registry,
            tree,
            load_balancer,
            event_bus,
            consensus,
            consensus_gated_types,
            latencies: tokio::sync::RwLock::new(LatencyWindow::new()),
            total_dispatched: AtomicU64::new(0),
            total_queued: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
        }
    }

    /// Run the five-step dispatch algorithm from §4.7.
    pub async fn dispatch(&self, swarm_id: &str, task: Task) -> Result<DispatchOutcome, RegistryError> {
        let started = std::time::Instant::now();

        task.validate().map_err(RegistryError::InvalidAgent)?;

        if self.consensus_gated_types.contains(&task.task_type) {
            if let Some(engine) = &self.consensus {
                let agent_ids: Vec<String> = self.registry.healthy_agents().await.into_iter().map(|a| a.id).collect();
                let proposal = Proposal::new(
                    format!("dispatch-{}", task.id),
                    ProposalKind::TaskAssignment,
                    "dispatcher",
                    serde_json::json!({ "taskId": task.id, "taskType": task.task_type }),
                    chrono::Duration::seconds(5),
                );
                match engine.propose(&proposal, &agent_ids).await {
                    Ok(result) if result.decision == ConsensusDecision::Approved => {}
                    Ok(_) => {
                        self.total_rejected.fetch_add(1, Ordering::Relaxed);
                        return Ok(DispatchOutcome::Rejected("consensus did not approve dispatch".to_string()));
                    }
                    Err(ConsensusError::InsufficientCapacity { .. }) => {
                        self.total_rejected.fetch_add(1, Ordering::Relaxed);
                        return Ok(DispatchOutcome::Rejected("insufficient capacity for consensus".to_string()));
                    }
                    Err(err) => {
                        self.total_rejected.fetch_add(1, Ordering::Relaxed);
                        return Ok(DispatchOutcome::Rejected(err.to_string()));
                    }
                }
            }
        }

        match self.load_balancer.select_agent().await {
            Assignment::Agent(agent_id) => {
                self.registry.assign_task(&agent_id, task.clone()).await?;
                if let Some(node_id) = self.tree.node_of(&agent_id).await {
                    let _ = self.tree.adjust_load(node_id, 1).await;
                }
                self.total_dispatched.fetch_add(1, Ordering::Relaxed);

                let latency_ms = started.elapsed().as_millis() as u64;
                self.latencies.write().await.record(latency_ms);
                self.event_bus
                    .emit_task_coordinated(swarm_id, &task.id, &agent_id, latency_ms)
                    .await;

                Ok(DispatchOutcome::Assigned(agent_id))
            }
            Assignment::NoHealthyAgent => {
                self.load_balancer.enqueue_global(task.clone()).await;
                self.total_queued.fetch_add(1, Ordering::Relaxed);
                self.event_bus.emit_task_queued(swarm_id, &task.id).await;
                Ok(DispatchOutcome::Queued)
            }
        }
    }

    /// Re-attempt dispatch of every globally queued task once; used by the
    /// rebalance cycle after new agents register or recover.
    pub async fn drain_global_queue(&self, swarm_id: &str) -> usize {
        let mut redispatched = 0;
        while let Some(task) = self.load_balancer.dequeue_global().await {
            match self.dispatch(swarm_id, task.clone()).await {
                Ok(DispatchOutcome::Assigned(_)) => redispatched += 1,
                Ok(DispatchOutcome::Queued) => {
                    // No agent became available; put it back and stop, the
                    // rest of the queue is no more likely to succeed.
                    self.load_balancer.enqueue_global(task).await;
                    break;
                }
                _ => {}
            }
        }
        redispatched
    }

    pub fn total_dispatched(&self) -> u64 {
        self.total_dispatched.load(Ordering::Relaxed)
    }

    pub fn total_queued(&self) -> u64 {
        self.total_queued.load(Ordering::Relaxed)
    }

    pub fn total_rejected(&self) -> u64 {
        self.total_rejected.load(Ordering::Relaxed)
    }

    pub async fn median_latency_ms(&self) -> u64 {
        self.latencies.read().await.median()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Agent, CoordinationConfig, TaskPriority};

    async fn setup() -> (TaskDispatcher, Arc<AgentRegistry>, Arc<CoordinationTree>) {
        let registry = Arc::new(AgentRegistry::new());
        let tree = Arc::new(CoordinationTree::new(20, 4));
        let bus = Arc::new(EventBus::default());
        let lb = Arc::new(LoadBalancer::new(registry.clone(), tree.clone(), bus.clone(), &CoordinationConfig::default()));
        let dispatcher = TaskDispatcher::new(registry.clone(), tree.clone(), lb, bus, None, HashSet::new());
        (dispatcher, registry, tree)
    }

    #[tokio::test]
    async fn dispatch_with_three_agents_least_loaded_scenario_1() {
        let (dispatcher, registry, tree) = setup().await;
        let a1 = Agent::new("a1", "worker", 0);
        let mut a2 = Agent::new("a2", "worker", 0);
        let mut a3 = Agent::new("a3", "worker", 0);
        a2.in_flight = 2;
        a3.in_flight = 1;
        for (agent, id) in [(a1, "a1"), (a2, "a2"), (a3, "a3")] {
            registry.register(agent).await.unwrap();
            tree.place_agent(id).await.unwrap();
        }

        let task = Task::new("t1", "build", TaskPriority::Medium);
        let outcome = dispatcher.dispatch("s1", task).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Assigned("a1".to_string()));
        assert_eq!(registry.get("a1").await.unwrap().in_flight, 1);
    }

    #[tokio::test]
    async fn dispatch_with_no_healthy_agents_queues_scenario_2() {
        let (dispatcher, _registry, _tree) = setup().await;
        let task = Task::new("t2", "build", TaskPriority::Medium);
        let outcome = dispatcher.dispatch("s1", task).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Queued);
        assert_eq!(dispatcher.total_queued(), 1);
    }

    #[tokio::test]
    async fn dispatch_rejects_empty_task_id() {
        let (dispatcher, _registry, _tree) = setup().await;
        let task = Task::new("", "build", TaskPriority::Medium);
        assert!(dispatcher.dispatch("s1", task).await.is_err());
    }

    #[tokio::test]
    async fn drain_global_queue_assigns_previously_queued_task() {
        let (dispatcher, registry, tree) = setup().await;
        let task = Task::new("t2", "build", TaskPriority::Medium);
        dispatcher.dispatch("s1", task).await.unwrap();
        assert_eq!(dispatcher.total_queued(), 1);

        let agent = Agent::new("a1", "worker", 0);
        registry.register(agent).await.unwrap();
        tree.place_agent("a1").await.unwrap();

        let redispatched = dispatcher.drain_global_queue("s1").await;
        assert_eq!(redispatched, 1);
        assert_eq!(registry.get("a1").await.unwrap().in_flight, 1);
    }

    #[tokio::test]
    async fn median_latency_reports_zero_with_no_samples() {
        let (dispatcher, _registry, _tree) = setup().await;
        assert_eq!(dispatcher.median_latency_ms().await, 0);
    }
}
