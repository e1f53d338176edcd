//! Event Bus: the room-scoped publish/subscribe fabric carrying lifecycle,
//! status, and intervention events to external observers.
//!
//! Modeled on the teacher's broadcast-based `EventBus` (sequence numbering
//! via `AtomicU64`, `tokio::sync::broadcast` fan-out), narrowed to the event
//! catalog named in the specification and scoped per room (`swarm-{id}`)
//! instead of a single process-wide channel. Within one room, a
//! `broadcast::Sender` total-orders every publish, which gives the required
//! per-publisher ordering guarantee "for free" (a stronger property than the
//! spec demands, since cross-publisher ordering is explicitly not
//! guaranteed).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing sequence number, assigned process-wide by the
/// bus at publish time (not per room): it is a total order over every event
/// the bus has ever emitted, which the metrics surface and any snapshot
/// document use as a resumption cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl std::fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The event catalog named in §4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventCategory {
    AgentMessage,
    StatusChange,
    HumanIntervention,
    TransparencyInsight,
    SwarmEvent,
    WorkStolen,
    LoadRebalanced,
    AgentFailed,
    AgentDegraded,
    AgentRecovered,
    LeaderElected,
    HeartbeatSent,
    TaskQueued,
    TaskCoordinated,
    ConsensusReached,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentMessage => "agent-message",
            Self::StatusChange => "status-change",
            Self::HumanIntervention => "human-intervention",
            Self::TransparencyInsight => "transparency-insight",
            Self::SwarmEvent => "swarm-event",
            Self::WorkStolen => "work-stolen",
            Self::LoadRebalanced => "load-rebalanced",
            Self::AgentFailed => "agent-failed",
            Self::AgentDegraded => "agent-degraded",
            Self::AgentRecovered => "agent-recovered",
            Self::LeaderElected => "leader-elected",
            Self::HeartbeatSent => "heartbeat-sent",
            Self::TaskQueued => "task-queued",
            Self::TaskCoordinated => "task-coordinated",
            Self::ConsensusReached => "consensus-reached",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event envelope delivered to room subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: EventId,
    pub sequence: SequenceNumber,
    #[serde(rename = "type")]
    pub event_type: EventCategory,
    pub timestamp: DateTime<Utc>,
    pub swarm_id: Option<String>,
    pub agent_id: Option<String>,
    /// Identity of the component/agent that published this event, used only
    /// to reason about per-publisher ordering; never serialized to a field
    /// observers are expected to rely on for routing.
    #[serde(skip)]
    pub publisher: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    fn new(event_type: EventCategory, publisher: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: EventId::new(),
            sequence: SequenceNumber(0),
            event_type,
            timestamp: Utc::now(),
            swarm_id: None,
            agent_id: None,
            publisher: publisher.into(),
            payload,
        }
    }

    #[must_use]
    fn with_swarm(mut self, swarm_id: impl Into<String>) -> Self {
        self.swarm_id = Some(swarm_id.into());
        self
    }

    #[must_use]
    fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }
}

/// Room name for a swarm-scoped subscription, per §4.6 ("Rooms are named
/// `swarm-{id}`").
pub fn room_name(swarm_id: &str) -> String {
    format!("swarm-{swarm_id}")
}

struct Room {
    sender: broadcast::Sender<Arc<EventEnvelope>>,
}

/// Configuration for the event bus's per-room broadcast channels.
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Ring-buffer capacity per room; a slow subscriber that falls more than
    /// this many events behind is lagged and its next `recv()` reports the
    /// number of events it missed (no replay/durable buffer, per §4.6).
    pub room_channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            room_channel_capacity: 1024,
        }
    }
}

/// Room-scoped publish/subscribe fabric. Events published to a room with no
/// subscribers are simply dropped (tracked by `dropped_no_subscribers`); a
/// subscriber whose own receiver falls behind its room's buffer capacity is
/// the "backpressure boundary" default of drop-with-counter from §5.
pub struct EventBus {
    rooms: RwLock<HashMap<String, Room>>,
    sequence: AtomicU64,
    config: EventBusConfig,
    dropped_no_subscribers: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            config,
            dropped_no_subscribers: AtomicU64::new(0),
        }
    }

    async fn sender_for(&self, room_id: &str) -> broadcast::Sender<Arc<EventEnvelope>> {
        if let Some(room) = self.rooms.read().await.get(room_id) {
            return room.sender.clone();
        }
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                let (sender, _) = broadcast::channel(self.config.room_channel_capacity);
                Room { sender }
            })
            .sender
            .clone()
    }

    /// Subscribe to a room; returns a receiver a session task polls and
    /// applies its own [`Subscription`](crate::domain::models::Subscription)
    /// filter to before forwarding to the client.
    pub async fn subscribe(&self, room_id: &str) -> broadcast::Receiver<Arc<EventEnvelope>> {
        self.sender_for(room_id).await.subscribe()
    }

    async fn publish(&self, room_id: &str, mut event: EventEnvelope) {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        event.sequence = SequenceNumber(seq);
        let sender = self.sender_for(room_id).await;
        if sender.send(Arc::new(event)).is_err() {
            self.dropped_no_subscribers.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }

    pub fn dropped_no_subscribers(&self) -> u64 {
        self.dropped_no_subscribers.load(Ordering::Relaxed)
    }

    pub async fn subscriber_count(&self, room_id: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room_id)
            .map_or(0, |r| r.sender.receiver_count())
    }

    // -- Typed emission helpers, one per event in the §4.6 catalog --------

    pub async fn emit_task_queued(&self, swarm_id: &str, task_id: &str) {
        let payload = serde_json::json!({ "taskId": task_id });
        self.publish(
            &room_name(swarm_id),
            EventEnvelope::new(EventCategory::TaskQueued, "dispatcher", payload).with_swarm(swarm_id),
        )
        .await;
    }

    pub async fn emit_task_coordinated(&self, swarm_id: &str, task_id: &str, agent_id: &str, latency_ms: u64) {
        let payload = serde_json::json!({ "taskId": task_id, "agentId": agent_id, "latencyMs": latency_ms });
        self.publish(
            &room_name(swarm_id),
            EventEnvelope::new(EventCategory::TaskCoordinated, "dispatcher", payload)
                .with_swarm(swarm_id)
                .with_agent(agent_id),
        )
        .await;
    }

    pub async fn emit_work_stolen(&self, swarm_id: &str, from: u64, to: u64, count: u32) {
        let payload = serde_json::json!({ "from": from, "to": to, "count": count });
        self.publish(
            &room_name(swarm_id),
            EventEnvelope::new(EventCategory::WorkStolen, "load_balancer", payload).with_swarm(swarm_id),
        )
        .await;
    }

    pub async fn emit_load_rebalanced(&self, swarm_id: &str, steal_passes: u32) {
        let payload = serde_json::json!({ "stealPasses": steal_passes });
        self.publish(
            &room_name(swarm_id),
            EventEnvelope::new(EventCategory::LoadRebalanced, "load_balancer", payload).with_swarm(swarm_id),
        )
        .await;
    }

    pub async fn emit_agent_failed(&self, swarm_id: &str, agent_id: &str) {
        let payload = serde_json::json!({ "agentId": agent_id });
        self.publish(
            &room_name(swarm_id),
            EventEnvelope::new(EventCategory::AgentFailed, "health_monitor", payload)
                .with_swarm(swarm_id)
                .with_agent(agent_id),
        )
        .await;
    }

    pub async fn emit_agent_degraded(&self, swarm_id: &str, agent_id: &str) {
        let payload = serde_json::json!({ "agentId": agent_id });
        self.publish(
            &room_name(swarm_id),
            EventEnvelope::new(EventCategory::AgentDegraded, "health_monitor", payload)
                .with_swarm(swarm_id)
                .with_agent(agent_id),
        )
        .await;
    }

    pub async fn emit_agent_recovered(&self, swarm_id: &str, agent_id: &str) {
        let payload = serde_json::json!({ "agentId": agent_id });
        self.publish(
            &room_name(swarm_id),
            EventEnvelope::new(EventCategory::AgentRecovered, "health_monitor", payload)
                .with_swarm(swarm_id)
                .with_agent(agent_id),
        )
        .await;
    }

    pub async fn emit_leader_elected(&self, swarm_id: &str, agent_id: &str, term: u64) {
        let payload = serde_json::json!({ "agentId": agent_id, "term": term });
        self.publish(
            &room_name(swarm_id),
            EventEnvelope::new(EventCategory::LeaderElected, "consensus", payload)
                .with_swarm(swarm_id)
                .with_agent(agent_id),
        )
        .await;
    }

    pub async fn emit_heartbeat_sent(&self, swarm_id: &str, agent_id: &str) {
        let payload = serde_json::json!({ "agentId": agent_id });
        self.publish(
            &room_name(swarm_id),
            EventEnvelope::new(EventCategory::HeartbeatSent, "consensus", payload)
                .with_swarm(swarm_id)
                .with_agent(agent_id),
        )
        .await;
    }

    pub async fn emit_consensus_reached(&self, swarm_id: &str, proposal_id: &str, decision: &str) {
        let payload = serde_json::json!({ "proposalId": proposal_id, "decision": decision });
        self.publish(
            &room_name(swarm_id),
            EventEnvelope::new(EventCategory::ConsensusReached, "consensus", payload).with_swarm(swarm_id),
        )
        .await;
    }

    pub async fn emit_status_change(&self, swarm_id: &str, agent_id: &str, status: &str) {
        let payload = serde_json::json!({ "agentId": agent_id, "status": status });
        self.publish(
            &room_name(swarm_id),
            EventEnvelope::new(EventCategory::StatusChange, "registry", payload)
                .with_swarm(swarm_id)
                .with_agent(agent_id),
        )
        .await;
    }

    pub async fn emit_human_intervention(&self, swarm_id: &str, intervention_id: &str, action: &str, status: &str) {
        let payload = serde_json::json!({ "interventionId": intervention_id, "action": action, "status": status });
        self.publish(
            &room_name(swarm_id),
            EventEnvelope::new(EventCategory::HumanIntervention, "intervention_channel", payload)
                .with_swarm(swarm_id),
        )
        .await;
    }

    pub async fn emit_agent_message(&self, swarm_id: &str, agent_id: &str, message: serde_json::Value) {
        self.publish(
            &room_name(swarm_id),
            EventEnvelope::new(EventCategory::AgentMessage, agent_id, message)
                .with_swarm(swarm_id)
                .with_agent(agent_id),
        )
        .await;
    }

    pub async fn emit_transparency_insight(&self, swarm_id: &str, insight: serde_json::Value) {
        self.publish(
            &room_name(swarm_id),
            EventEnvelope::new(EventCategory::TransparencyInsight, "observer", insight).with_swarm(swarm_id),
        )
        .await;
    }

    pub async fn emit_swarm_event(&self, swarm_id: &str, payload: serde_json::Value) {
        self.publish(
            &room_name(swarm_id),
            EventEnvelope::new(EventCategory::SwarmEvent, "swarm", payload).with_swarm(swarm_id),
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe(&room_name("s1")).await;
        bus.emit_task_queued("s1", "t1").await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventCategory::TaskQueued);
        assert_eq!(event.swarm_id.as_deref(), Some("s1"));
    }

    #[tokio::test]
    async fn events_from_same_publisher_arrive_in_publication_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe(&room_name("s1")).await;
        for i in 0..20 {
            bus.emit_task_queued("s1", &format!("t{i}")).await;
        }
        for i in 0..20 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.payload["taskId"], format!("t{i}"));
        }
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let bus = EventBus::default();
        let mut rx_a = bus.subscribe(&room_name("a")).await;
        bus.emit_task_queued("b", "t1").await;
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_increments_drop_counter() {
        let bus = EventBus::default();
        bus.emit_task_queued("lonely", "t1").await;
        assert_eq!(bus.dropped_no_subscribers(), 1);
    }

    #[tokio::test]
    async fn sequence_numbers_are_monotonic_across_rooms() {
        let bus = EventBus::default();
        bus.emit_task_queued("a", "t1").await;
        bus.emit_task_queued("b", "t2").await;
        assert_eq!(bus.current_sequence(), SequenceNumber(2));
    }
}
