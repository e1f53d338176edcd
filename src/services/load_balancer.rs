//! Load Balancer & Work Stealer: task-to-agent selection strategies and the
//! periodic work-stealing / rebalance cycles described in §4.3.
//!
//! Selection strategy is a tagged variant dispatched on
//! [`LoadBalancingStrategy`] rather than a trait-object hierarchy, per the
//! re-architected pattern in §9. The work-steal and rebalance cycles are
//! plain async methods `Core::start()` spawns onto a background `tokio`
//! interval; they hold the global queue and per-node queue locks only for
//! the short critical section needed to compute and apply a steal.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::seq::IndexedRandom;
use tokio::sync::RwLock;

use crate::domain::models::{Agent, AgentHealth, CoordinationConfig, LoadBalancingStrategy, NodeId, Task, TaskQueue};
use crate::services::agent_registry::AgentRegistry;
use crate::services::coordination_tree::CoordinationTree;
use crate::services::event_bus::EventBus;

/// Outcome of one selection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Agent(String),
    NoHealthyAgent,
}

struct NodeQueues {
    queues: RwLock<HashMap<NodeId, VecDeque<Task>>>,
}

impl NodeQueues {
    fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
        }
    }
}

/// Selects agents for tasks and periodically rebalances load across the
/// coordination tree.
pub struct LoadBalancer {
    registry: Arc<AgentRegistry>,
    tree: Arc<CoordinationTree>,
    event_bus: Arc<EventBus>,
    strategy: LoadBalancingStrategy,
    work_stealing: crate::domain::models::WorkStealingConfig,
    /// Priority-ordered by `Task::priority`; FIFO among equal priorities.
    global_queue: RwLock<TaskQueue<Task>>,
    node_queues: NodeQueues,
    total_coordinated_tasks: AtomicU64,
    rebalance_passes: AtomicU64,
    steal_operations: AtomicU64,
}

impl LoadBalancer {
    pub fn new(
        registry: Arc<AgentRegistry>,
        tree: Arc<CoordinationTree>,
        event_bus: Arc<EventBus>,
        config: &CoordinationConfig,
    ) -> Self {
        Self {
            registry,
            tree,
            event_bus,
            strategy: config.load_balancing.strategy,
            work_stealing: config.work_stealing.clone(),
            global_queue: RwLock::new(TaskQueue::new()),
            node_queues: NodeQueues::new(),
            total_coordinated_tasks: AtomicU64::new(0),
            rebalance_passes: AtomicU64::new(0),
            steal_operations: AtomicU64::new(0),
        }
    }

    /// Select a target agent for a task per the configured strategy (§4.3).
    /// Only healthy agents are eligible. Returns [`Assignment::NoHealthyAgent`]
    /// when none qualify, at which point the caller is expected to queue the
    /// task globally.
    pub async fn select_agent(&self) -> Assignment {
        let snapshot = self.registry.snapshot().await;
        let healthy: Vec<&Agent> = snapshot.values().filter(|a| a.health == AgentHealth::Healthy).collect();
        if healthy.is_empty() {
            return Assignment::NoHealthyAgent;
        }

        let chosen = match self.strategy {
            LoadBalancingStrategy::LeastLoaded => healthy
                .iter()
                .min_by(|a, b| {
                    a.in_flight
                        .cmp(&b.in_flight)
                        .then_with(|| b.last_heartbeat.cmp(&a.last_heartbeat))
                })
                .copied(),
            LoadBalancingStrategy::RoundRobin => {
                let mut ordered = healthy.clone();
                ordered.sort_by(|a, b| a.id.cmp(&b.id));
                let idx = (self.total_coordinated_tasks.load(Ordering::Relaxed) as usize) % ordered.len();
                ordered.get(idx).copied()
            }
            LoadBalancingStrategy::Random => {
                let mut rng = rand::rng();
                healthy.choose(&mut rng).copied()
            }
            LoadBalancingStrategy::Weighted => healthy
                .iter()
                .max_by(|a, b| weighted_score(a).total_cmp(&weighted_score(b)))
                .copied(),
        };

        match chosen {
            Some(agent) => {
                self.total_coordinated_tasks.fetch_add(1, Ordering::Relaxed);
                Assignment::Agent(agent.id.clone())
            }
            None => Assignment::NoHealthyAgent,
        }
    }

    /// Push a task onto the global queue, ordered by `task.priority`; a
    /// queued task is assigned within one rebalance cycle of a healthy agent
    /// becoming available (the dispatcher's re-check loop, driven by
    /// `Core::start()`, is what fulfills that promise).
    pub async fn enqueue_global(&self, task: Task) {
        let weight = task.priority.as_weight();
        self.global_queue.write().await.enqueue(task, weight);
    }

    pub async fn dequeue_global(&self) -> Option<Task> {
        self.global_queue.write().await.dequeue()
    }

    pub async fn global_queue_size(&self) -> usize {
        self.global_queue.read().await.len()
    }

    /// Push a task onto a node's local work queue and bump the node's load
    /// counter to match (used by the dispatcher when it assigns directly to
    /// a node rather than the global queue).
    pub async fn enqueue_node(&self, node_id: NodeId, task: Task) {
        self.node_queues.queues.write().await.entry(node_id).or_default().push_back(task);
        let _ = self.tree.adjust_load(node_id, 1).await;
    }

    pub async fn node_queue_len(&self, node_id: NodeId) -> usize {
        self.node_queues
            .queues
            .read()
            .await
            .get(&node_id)
            .map_or(0, VecDeque::len)
    }

    /// One work-steal pass per §4.3: find the most- and least-loaded nodes,
    /// and if the imbalance exceeds `threshold_ratio`, move a bounded batch
    /// of tasks from the heavy node's queue to the light one's.
    ///
    /// Returns `Some((from, to, count))` when a steal happened.
    pub async fn run_work_steal_cycle(&self) -> Option<(NodeId, NodeId, u32)> {
        if !self.work_stealing.enabled {
            return None;
        }
        let nodes = self.tree.snapshot().await;
        if nodes.len() < 2 {
            return None;
        }
        let heaviest = nodes.iter().max_by_key(|n| n.load)?;
        let lightest = nodes.iter().min_by_key(|n| n.load)?;
        if heaviest.id == lightest.id {
            return None;
        }

        let h_load = f64::from(heaviest.load);
        let l_load = f64::from(lightest.load);
        if h_load - l_load <= l_load * self.work_stealing.threshold_ratio {
            return None;
        }

        let mut queues = self.node_queues.queues.write().await;
        let available = queues.get(&heaviest.id).map_or(0, VecDeque::len);
        if available == 0 {
            return None;
        }

        let by_half = ((heaviest.load - lightest.load) / 2) as usize;
        let count = by_half
            .min(self.work_stealing.max_tasks_to_steal as usize)
            .min(available)
            .max(self.work_stealing.min_tasks_to_steal as usize)
            .min(available);
        if count == 0 {
            return None;
        }

        let moved: Vec<Task> = {
            let from_queue = queues.entry(heaviest.id).or_default();
            from_queue.drain(..count).collect()
        };
        queues.entry(lightest.id).or_default().extend(moved);
        drop(queues);

        self.tree.adjust_load(heaviest.id, -(count as i64)).await.ok()?;
        self.tree.adjust_load(lightest.id, count as i64).await.ok()?;
        self.steal_operations.fetch_add(1, Ordering::Relaxed);

        Some((heaviest.id, lightest.id, count as u32))
    }

    pub fn work_stealing_operations(&self) -> u64 {
        self.steal_operations.load(Ordering::Relaxed)
    }

    /// Run `run_work_steal_cycle` and, if it stole anything, emit
    /// `WorkStolen` for the given swarm.
    pub async fn steal_and_emit(&self, swarm_id: &str) {
        if let Some((from, to, count)) = self.run_work_steal_cycle().await {
            self.event_bus.emit_work_stolen(swarm_id, from.0, to.0, count).await;
        }
    }

    /// Rebalance cycle per §4.3: if any node deviates from the mean load by
    /// more than 30%, schedule additional steal passes (bounded) until the
    /// deviation falls below threshold.
    pub async fn run_rebalance_cycle(&self, swarm_id: &str) {
        const DEVIATION_THRESHOLD: f64 = 0.30;
        const MAX_PASSES: u32 = 8;

        for _ in 0..MAX_PASSES {
            let nodes = self.tree.snapshot().await;
            if nodes.is_empty() {
                return;
            }
            let mean = nodes.iter().map(|n| f64::from(n.load)).sum::<f64>() / nodes.len() as f64;
            if mean <= f64::EPSILON {
                return;
            }
            let imbalanced = nodes
                .iter()
                .any(|n| ((f64::from(n.load) - mean) / mean).abs() > DEVIATION_THRESHOLD);
            if !imbalanced {
                return;
            }
            if self.run_work_steal_cycle().await.is_none() {
                return;
            }
            self.rebalance_passes.fetch_add(1, Ordering::Relaxed);
        }
        self.event_bus
            .emit_load_rebalanced(swarm_id, self.rebalance_passes.load(Ordering::Relaxed) as u32)
            .await;
    }

    pub fn rebalancing_operations(&self) -> u64 {
        self.rebalance_passes.load(Ordering::Relaxed)
    }
}

/// `0.7/(inflight+1) + 0.3*(1000/max(ema_latency, eps))`, as specified for
/// the `weighted` strategy.
fn weighted_score(agent: &Agent) -> f64 {
    const EPS: f64 = 1e-6;
    0.7 / f64::from(agent.in_flight + 1) + 0.3 * (1000.0 / agent.ema_latency_ms.max(EPS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{CoordinationConfig, LoadBalancingConfig, TaskPriority, WorkStealingConfig};

    fn config(strategy: LoadBalancingStrategy) -> CoordinationConfig {
        CoordinationConfig {
            load_balancing: LoadBalancingConfig {
                strategy,
                rebalance_interval_ms: 5000,
            },
            ..CoordinationConfig::default()
        }
    }

    async fn setup(strategy: LoadBalancingStrategy) -> (LoadBalancer, Arc<AgentRegistry>) {
        let registry = Arc::new(AgentRegistry::new());
        let tree = Arc::new(CoordinationTree::new(20, 4));
        let bus = Arc::new(EventBus::default());
        let lb = LoadBalancer::new(registry.clone(), tree, bus, &config(strategy));
        (lb, registry)
    }

    #[tokio::test]
    async fn least_loaded_picks_idlest_healthy_agent() {
        let (lb, registry) = setup(LoadBalancingStrategy::LeastLoaded).await;
        let mut a1 = Agent::new("a1", "worker", 0);
        let mut a2 = Agent::new("a2", "worker", 0);
        let mut a3 = Agent::new("a3", "worker", 0);
        a2.in_flight = 2;
        a3.in_flight = 1;
        registry.register(a1.clone()).await.unwrap();
        registry.register(a2).await.unwrap();
        registry.register(a3).await.unwrap();
        a1.in_flight = 0;

        assert_eq!(lb.select_agent().await, Assignment::Agent("a1".to_string()));
    }

    #[tokio::test]
    async fn no_healthy_agents_yields_no_healthy_agent() {
        let (lb, _registry) = setup(LoadBalancingStrategy::LeastLoaded).await;
        assert_eq!(lb.select_agent().await, Assignment::NoHealthyAgent);
    }

    #[tokio::test]
    async fn global_queue_is_fifo_within_equal_priority() {
        let (lb, _registry) = setup(LoadBalancingStrategy::LeastLoaded).await;
        lb.enqueue_global(Task::new("t1", "build", TaskPriority::Low)).await;
        lb.enqueue_global(Task::new("t2", "build", TaskPriority::Low)).await;
        assert_eq!(lb.global_queue_size().await, 2);
        assert_eq!(lb.dequeue_global().await.unwrap().id, "t1");
    }

    #[tokio::test]
    async fn global_queue_dequeues_higher_priority_first() {
        let (lb, _registry) = setup(LoadBalancingStrategy::LeastLoaded).await;
        lb.enqueue_global(Task::new("low", "build", TaskPriority::Low)).await;
        lb.enqueue_global(Task::new("critical", "build", TaskPriority::Critical)).await;
        lb.enqueue_global(Task::new("medium", "build", TaskPriority::Medium)).await;
        assert_eq!(lb.dequeue_global().await.unwrap().id, "critical");
        assert_eq!(lb.dequeue_global().await.unwrap().id, "medium");
        assert_eq!(lb.dequeue_global().await.unwrap().id, "low");
    }

    #[tokio::test]
    async fn weighted_strategy_prefers_low_load_low_latency() {
        let (lb, registry) = setup(LoadBalancingStrategy::Weighted).await;
        let mut fast_idle = Agent::new("fast", "worker", 0);
        fast_idle.ema_latency_ms = 10.0;
        let mut slow_busy = Agent::new("slow", "worker", 0);
        slow_busy.in_flight = 5;
        slow_busy.ema_latency_ms = 500.0;
        registry.register(fast_idle).await.unwrap();
        registry.register(slow_busy).await.unwrap();

        assert_eq!(lb.select_agent().await, Assignment::Agent("fast".to_string()));
    }

    #[tokio::test]
    async fn work_steal_moves_expected_count_scenario_8() {
        let registry = Arc::new(AgentRegistry::new());
        let tree = Arc::new(CoordinationTree::new(20, 4));
        let bus = Arc::new(EventBus::default());
        let mut cfg = config(LoadBalancingStrategy::LeastLoaded);
        cfg.work_stealing = WorkStealingConfig {
            enabled: true,
            threshold_ratio: 2.0,
            min_tasks_to_steal: 1,
            max_tasks_to_steal: 5,
        };
        let lb = LoadBalancer::new(registry, tree.clone(), bus, &cfg);

        let heavy = tree.place_agent("h1").await.unwrap().node_id;
        let light = tree.place_agent("l1").await.unwrap().node_id;
        for i in 0..10 {
            lb.enqueue_node(heavy, Task::new(format!("t{i}"), "build", TaskPriority::Low))
                .await;
        }

        let (from, to, count) = lb.run_work_steal_cycle().await.unwrap();
        assert_eq!(from, heavy);
        assert_eq!(to, light);
        assert_eq!(count, 5);

        let nodes = tree.snapshot().await;
        let h = nodes.iter().find(|n| n.id == heavy).unwrap();
        let l = nodes.iter().find(|n| n.id == light).unwrap();
        assert_eq!(h.load, 5);
        assert_eq!(l.load, 5);
    }

    #[tokio::test]
    async fn work_steal_is_a_permutation_sum_of_loads_invariant() {
        let registry = Arc::new(AgentRegistry::new());
        let tree = Arc::new(CoordinationTree::new(20, 4));
        let bus = Arc::new(EventBus::default());
        let cfg = config(LoadBalancingStrategy::LeastLoaded);
        let lb = LoadBalancer::new(registry, tree.clone(), bus, &cfg);

        let heavy = tree.place_agent("h1").await.unwrap().node_id;
        let light = tree.place_agent("l1").await.unwrap().node_id;
        for i in 0..8 {
            lb.enqueue_node(heavy, Task::new(format!("t{i}"), "build", TaskPriority::Low))
                .await;
        }
        let before: u32 = tree.snapshot().await.iter().map(|n| n.load).sum();
        lb.run_work_steal_cycle().await;
        let after: u32 = tree.snapshot().await.iter().map(|n| n.load).sum();
        assert_eq!(before, after);
        let _ = light;
    }

    #[tokio::test]
    async fn no_steal_when_disabled() {
        let registry = Arc::new(AgentRegistry::new());
        let tree = Arc::new(CoordinationTree::new(20, 4));
        let bus = Arc::new(EventBus::default());
        let mut cfg = config(LoadBalancingStrategy::LeastLoaded);
        cfg.work_stealing.enabled = false;
        let lb = LoadBalancer::new(registry, tree, bus, &cfg);
        assert!(lb.run_work_steal_cycle().await.is_none());
    }
}
