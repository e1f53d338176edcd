//! End-to-end scenario tests for the swarm coordination core.
//!
//! Each test below exercises one of the concrete scenarios named in the
//! specification's testable-properties section, driven through the public
//! `Core` surface rather than a single service in isolation, so the wiring
//! between components (dispatcher, registry, load balancer, health monitor,
//! consensus, intervention channel) is what gets verified, not just each
//! piece on its own.

use std::sync::Arc;

use swarm_core::domain::models::{
    Agent, AgentHealth, Config, ConsensusDecision, Intervention, InterventionAction, Proposal,
    ProposalKind, Task, TaskPriority,
};
use swarm_core::services::DispatchOutcome;
use swarm_core::Core;

async fn new_core() -> Arc<Core> {
    Core::new("swarm-1", "node-1", Config::default())
}

// =============================================================================
// Scenario 1: dispatch with 3 healthy agents, least-loaded
// =============================================================================

#[tokio::test]
async fn dispatch_picks_the_least_loaded_of_three_healthy_agents() {
    let core = new_core().await;

    let a1 = Agent::new("a1", "worker", 0);
    let mut a2 = Agent::new("a2", "worker", 0);
    let mut a3 = Agent::new("a3", "worker", 0);
    a2.in_flight = 2;
    a3.in_flight = 1;
    for agent in [a1, a2, a3] {
        let id = agent.id.clone();
        core.registry.register(agent).await.unwrap();
        core.tree.place_agent(&id).await.unwrap();
    }

    let outcome = core
        .dispatcher
        .dispatch("swarm-1", Task::new("t1", "build", TaskPriority::Medium))
        .await
        .unwrap();

    assert_eq!(outcome, DispatchOutcome::Assigned("a1".to_string()));
    assert_eq!(core.registry.get("a1").await.unwrap().in_flight, 1);
}

// =============================================================================
// Scenario 2: dispatch with no healthy agents, then a rebalance cycle after
// an agent registers
// =============================================================================

#[tokio::test]
async fn queued_task_is_assigned_at_the_next_rebalance_cycle_once_an_agent_registers() {
    let core = new_core().await;

    let outcome = core
        .dispatcher
        .dispatch("swarm-1", Task::new("t2", "build", TaskPriority::Medium))
        .await
        .unwrap();
    assert_eq!(outcome, DispatchOutcome::Queued);
    assert_eq!(core.load_balancer.global_queue_size().await, 1);

    core.registry.register(Agent::new("a1", "worker", 0)).await.unwrap();
    core.tree.place_agent("a1").await.unwrap();

    // One rebalance cycle, exactly what the background loop runs.
    core.run_rebalance_tick().await;

    assert_eq!(core.load_balancer.global_queue_size().await, 0);
    assert_eq!(core.registry.get("a1").await.unwrap().in_flight, 1);
    assert_eq!(core.registry.agent_for_task("t2").await.as_deref(), Some("a1"));
}

// =============================================================================
// Scenario 3: agent failure mid-flight returns its task to the global queue
// with retry incremented
// =============================================================================

#[tokio::test]
async fn failed_agents_in_flight_task_returns_to_the_global_queue_with_retry_incremented() {
    let core = new_core().await;

    // `health_check_interval_ms` defaults to 1000, so a heartbeat more than
    // 3 intervals stale is enough to trip the failed threshold on the very
    // next tick.
    let mut a1 = Agent::new("a1", "worker", 0);
    a1.last_heartbeat = chrono::Utc::now() - chrono::Duration::seconds(4);
    core.registry.register(a1).await.unwrap();
    core.tree.place_agent("a1").await.unwrap();
    core.registry
        .assign_task("a1", Task::new("t3", "build", TaskPriority::Medium))
        .await
        .unwrap();

    core.run_health_tick().await;

    assert_eq!(core.registry.get("a1").await.unwrap().health, AgentHealth::Failed);
    assert_eq!(core.load_balancer.global_queue_size().await, 1);
    let requeued = core.load_balancer.dequeue_global().await.unwrap();
    assert_eq!(requeued.id, "t3");
    assert_eq!(requeued.retry_count, 1);
}

// =============================================================================
// Scenario 4: quorum proposal with 5 agents
// =============================================================================

#[tokio::test]
async fn quorum_proposal_with_five_agents_reaches_a_decision() {
    let core = new_core().await;
    for i in 1..=5 {
        core.registry.register(Agent::new(format!("a{i}"), "worker", 0)).await.unwrap();
    }
    let agents: Vec<String> = core.registry.healthy_agents().await.into_iter().map(|a| a.id).collect();
    assert_eq!(agents.len(), 5);

    let proposal = Proposal::new(
        "p1",
        ProposalKind::ConfigurationChange,
        "admin",
        serde_json::json!({}),
        chrono::Duration::seconds(5),
    );
    let result = core.consensus.propose(&proposal, &agents).await.unwrap();

    assert_eq!(result.votes.len(), 5);
    assert!((result.participation_rate - 1.0).abs() < f64::EPSILON);
    assert_eq!(result.decision, ConsensusDecision::Approved);
}

// =============================================================================
// Scenario 6: relaunch ceiling
// =============================================================================

#[tokio::test]
async fn eleventh_relaunch_for_a_swarm_is_rejected() {
    let core = new_core().await;

    for i in 0..10 {
        let intervention = Intervention::new(
            format!("i{i}"),
            "swarm-1",
            InterventionAction::RelaunchSwarm,
            "relaunch",
        );
        let outcome = core.intervention_channel.send(intervention).await.unwrap();
        assert!(matches!(outcome, swarm_core::services::SendOutcome::Accepted(_)));
    }

    let eleventh = Intervention::new("i10", "swarm-1", InterventionAction::RelaunchSwarm, "relaunch");
    let outcome = core.intervention_channel.send(eleventh).await.unwrap();
    match outcome {
        swarm_core::services::SendOutcome::Rejected(reason) => {
            assert!(reason.contains("10"));
        }
        swarm_core::services::SendOutcome::Accepted(_) => panic!("11th relaunch should be rejected"),
    }
}
