//! Session transport server implementing the external protocol of §6: a
//! WebSocket handshake followed by a `type`-tagged JSON message exchange,
//! plus `/metrics/snapshot` and `/health` HTTP endpoints.
//!
//! Generalizes the teacher's `adapters::mcp::events_http` single-room SSE/WS
//! server. There, a connection subscribes to one fixed broadcast receiver for
//! its lifetime; here a session's room membership can change mid-connection
//! (`join-swarm`/`leave-swarm`), so the per-connection task holds its
//! receiver behind an `Option` that gets swapped rather than fixed at
//! upgrade time. A session holds at most one active room subscription at a
//! time — the specification bounds "total subscriptions per session" but
//! names no concrete multi-room requirement, so the simplest reading that
//! satisfies every concrete scenario is chosen here.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::core::Core;
use crate::domain::models::{Intervention, InterventionAction, Subscription, TransportConfig, MAX_MESSAGE_LEN};
use crate::services::event_bus::{room_name, EventEnvelope};
use crate::services::intervention_channel::SendOutcome;
use crate::services::metrics::MetricsSnapshot;

const MAX_ID_LEN: usize = 100;
const MAX_FILTER_BYTES: usize = 10_000;

/// Event names a freshly connected session is told the bus can emit, per the
/// `connected` handshake message.
const SUPPORTED_EVENT_NAMES: &[&str] = &[
    "agent-message",
    "status-change",
    "human-intervention",
    "transparency-insight",
    "swarm-event",
    "work-stolen",
    "load-rebalanced",
    "agent-failed",
    "agent-degraded",
    "agent-recovered",
    "leader-elected",
    "heartbeat-sent",
    "task-queued",
    "task-coordinated",
    "consensus-reached",
];

/// Commands accepted by the orchestration-passthrough message type. Fixed
/// per §6 ("command restricted to a fixed allow-list"); the specification
/// names no configuration knob for this list, so it is a crate constant.
const ALLOWED_PASSTHROUGH_COMMANDS: &[&str] = &["ping", "describe-swarm"];

/// Client-sent messages, tagged on `type` per the §6 schema table.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum ClientMessage {
    JoinSwarm {
        swarm_id: String,
        #[serde(default)]
        user_id: Option<String>,
    },
    LeaveSwarm {
        swarm_id: String,
        #[serde(default)]
        user_id: Option<String>,
    },
    SendIntervention {
        swarm_id: String,
        message: String,
        action: String,
        #[serde(default)]
        agent_id: Option<String>,
    },
    RequestStatus {
        #[serde(default)]
        swarm_id: Option<String>,
        #[serde(default)]
        agent_id: Option<String>,
    },
    SetFilter {
        #[serde(default)]
        filter: serde_json::Value,
    },
    Command {
        command: String,
        #[serde(default)]
        args: serde_json::Value,
    },
}

/// Shared state handed to every connection handler.
struct SessionState {
    core: Arc<Core>,
    config: TransportConfig,
}

/// Owns the axum router for the session protocol and metrics/health
/// endpoints; constructed once per [`Core`] at startup.
pub struct SessionServer {
    state: Arc<SessionState>,
}

impl SessionServer {
    pub fn new(core: Arc<Core>) -> Self {
        let config = core.config.transport.clone();
        Self {
            state: Arc::new(SessionState { core, config }),
        }
    }

    fn build_router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_upgrade))
            .route("/metrics/snapshot", get(metrics_snapshot))
            .route("/health", get(health_check))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
    }

    fn bind_addr(&self) -> std::io::Result<SocketAddr> {
        self.state
            .config
            .bind_addr
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid bind_addr: {e}")))
    }

    pub async fn serve(self) -> std::io::Result<()> {
        let addr = self.bind_addr()?;
        let router = self.build_router();
        tracing::info!(%addr, "session transport listening");
        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router).await
    }

    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let addr = self.bind_addr()?;
        let router = self.build_router();
        tracing::info!(%addr, "session transport listening");
        let listener = TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown).await
    }
}

async fn health_check(State(state): State<Arc<SessionState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": "swarm-core",
        "swarmId": state.core.swarm_id,
    }))
}

async fn metrics_snapshot(State(state): State<Arc<SessionState>>) -> Json<MetricsSnapshot> {
    Json(state.core.metrics.snapshot().await)
}

/// Validates the session's `Origin` header against the configured
/// allow-list before upgrading; an empty allow-list permits every origin
/// (the config default), matching the rest of the crate's "no policy means
/// no restriction" stance for optional knobs.
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<SessionState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if !state.config.allowed_origins.is_empty() {
        let origin = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok());
        let allowed = origin.is_some_and(|o| state.config.allowed_origins.iter().any(|a| a == o));
        if !allowed {
            return (StatusCode::FORBIDDEN, "origin not on the allow-list").into_response();
        }
    }
    ws.on_upgrade(move |socket| handle_session(socket, state)).into_response()
}

async fn handle_session(mut socket: WebSocket, state: Arc<SessionState>) {
    let session_id = Uuid::new_v4().to_string();

    let connected = json!({
        "type": "connected",
        "timestamp": Utc::now(),
        "payload": {
            "id": session_id,
            "serverTime": Utc::now(),
            "supportedEvents": SUPPORTED_EVENT_NAMES,
        },
    });
    if socket.send(Message::Text(connected.to_string())).await.is_err() {
        return;
    }

    let mut subscription: Option<Subscription> = None;
    let mut receiver: Option<broadcast::Receiver<Arc<EventEnvelope>>> = None;

    loop {
        tokio::select! {
            biased;

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(sub) = subscription.as_mut() {
                            if !sub.record_and_check_rate_limit(Utc::now(), state.config.rate_limit_max_messages as usize) {
                                if send_error(&mut socket, "RateLimited", &format!("rate limit exceeded for session {session_id}")).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        }
                        if handle_client_text(&text, &state, &session_id, &mut subscription, &mut receiver, &mut socket)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }

            event = recv_event(&mut receiver) => {
                if let Some(envelope) = event {
                    if subscription_matches(&subscription, &envelope) {
                        let outgoing = json!({
                            "type": envelope.event_type.as_str(),
                            "timestamp": envelope.timestamp,
                            "payload": envelope.payload,
                        });
                        if socket.send(Message::Text(outgoing.to_string())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    tracing::debug!(session_id = %session_id, "session disconnected");
}

/// Awaits the active receiver if there is one, or never resolves while the
/// session has no room subscription — letting the `tokio::select!` loop
/// above fall straight through to the inbound-message arm.
async fn recv_event(receiver: &mut Option<broadcast::Receiver<Arc<EventEnvelope>>>) -> Option<Arc<EventEnvelope>> {
    match receiver {
        Some(rx) => match rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => None,
            Err(broadcast::error::RecvError::Closed) => {
                *receiver = None;
                None
            }
        },
        None => std::future::pending::<Option<Arc<EventEnvelope>>>().await,
    }
}

/// Applies the subscriber's filter (if any) to a candidate event. `Null`
/// matches everything; an object filter matches when every key it names
/// agrees with the envelope (checking the typed `agentId`/`type` fields
/// first, falling back to a lookup in the raw payload for anything else).
fn subscription_matches(subscription: &Option<Subscription>, envelope: &EventEnvelope) -> bool {
    let Some(sub) = subscription else { return false };
    match &sub.filter {
        serde_json::Value::Null => true,
        serde_json::Value::Object(map) => map.iter().all(|(key, expected)| match key.as_str() {
            "agentId" => envelope.agent_id.as_deref() == expected.as_str(),
            "type" => expected.as_str().is_some_and(|t| envelope.event_type.as_str() == t),
            _ => envelope.payload.get(key) == Some(expected),
        }),
        _ => true,
    }
}

async fn send_json(socket: &mut WebSocket, value: serde_json::Value) -> Result<(), ()> {
    socket.send(Message::Text(value.to_string())).await.map_err(|_| ())
}

async fn send_ack(socket: &mut WebSocket, msg_type: &str, payload: serde_json::Value) -> Result<(), ()> {
    send_json(
        socket,
        json!({ "type": msg_type, "timestamp": Utc::now(), "payload": payload }),
    )
    .await
}

async fn send_error(socket: &mut WebSocket, code: &str, message: &str) -> Result<(), ()> {
    send_json(
        socket,
        json!({ "type": "error", "timestamp": Utc::now(), "payload": { "code": code, "message": message } }),
    )
    .await
}

fn validate_id(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() || value.chars().count() > MAX_ID_LEN {
        Err(format!("{field} must be non-empty and at most {MAX_ID_LEN} characters"))
    } else {
        Ok(())
    }
}

fn validate_optional_id(field: &str, value: Option<&str>) -> Result<(), String> {
    match value {
        Some(v) if v.chars().count() > MAX_ID_LEN => Err(format!("{field} must be at most {MAX_ID_LEN} characters")),
        _ => Ok(()),
    }
}

async fn handle_client_text(
    text: &str,
    state: &Arc<SessionState>,
    session_id: &str,
    subscription: &mut Option<Subscription>,
    receiver: &mut Option<broadcast::Receiver<Arc<EventEnvelope>>>,
    socket: &mut WebSocket,
) -> Result<(), ()> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => return send_error(socket, "BadRequest", &format!("malformed message: {e}")).await,
    };

    match message {
        ClientMessage::JoinSwarm { swarm_id, user_id } => {
            if let Err(reason) = validate_id("swarmId", &swarm_id).and_then(|()| validate_optional_id("userId", user_id.as_deref())) {
                return send_error(socket, "BadRequest", &reason).await;
            }
            let room = room_name(&swarm_id);
            *receiver = Some(state.core.event_bus.subscribe(&room).await);
            *subscription = Some(Subscription::new(session_id.to_string(), room));
            send_ack(socket, "join-swarm", json!({ "swarmId": swarm_id })).await
        }

        ClientMessage::LeaveSwarm { swarm_id, user_id } => {
            if let Err(reason) = validate_id("swarmId", &swarm_id).and_then(|()| validate_optional_id("userId", user_id.as_deref())) {
                return send_error(socket, "BadRequest", &reason).await;
            }
            if subscription.as_ref().is_some_and(|s| s.room_id == room_name(&swarm_id)) {
                *subscription = None;
                *receiver = None;
            }
            send_ack(socket, "leave-swarm", json!({ "swarmId": swarm_id })).await
        }

        ClientMessage::SendIntervention {
            swarm_id,
            message,
            action,
            agent_id,
        } => {
            if message.chars().count() > MAX_MESSAGE_LEN {
                return send_error(socket, "BadRequest", "message exceeds 5000 characters").await;
            }
            let Some(action) = InterventionAction::parse_str(&action) else {
                return send_error(socket, "BadRequest", &format!("unknown intervention action '{action}'")).await;
            };
            if let Err(reason) = validate_id("swarmId", &swarm_id).and_then(|()| validate_optional_id("agentId", agent_id.as_deref())) {
                return send_error(socket, "BadRequest", &reason).await;
            }

            let mut intervention = Intervention::new(String::new(), swarm_id, action, message);
            intervention.target_agent_id = agent_id;

            match state.core.intervention_channel.send(intervention).await {
                Ok(SendOutcome::Accepted(id)) => {
                    send_ack(socket, "send-intervention", json!({ "status": "accepted", "id": id })).await
                }
                Ok(SendOutcome::Rejected(reason)) => {
                    send_ack(socket, "send-intervention", json!({ "status": "rejected", "reason": reason })).await
                }
                Err(e) => send_error(socket, "BadRequest", &e.to_string()).await,
            }
        }

        ClientMessage::RequestStatus { swarm_id, agent_id } => {
            if let Err(reason) =
                validate_optional_id("swarmId", swarm_id.as_deref()).and_then(|()| validate_optional_id("agentId", agent_id.as_deref()))
            {
                return send_error(socket, "BadRequest", &reason).await;
            }
            let snapshot = state.core.metrics.snapshot().await;
            let agent = match agent_id.as_deref() {
                Some(id) => state.core.registry.get(id).await,
                None => None,
            };
            send_ack(
                socket,
                "request-status",
                json!({ "swarmId": swarm_id, "metrics": snapshot, "agent": agent }),
            )
            .await
        }

        ClientMessage::SetFilter { filter } => {
            let filter_len = serde_json::to_vec(&filter).map(|bytes| bytes.len()).unwrap_or(0);
            if filter_len > MAX_FILTER_BYTES {
                return send_error(socket, "BadRequest", "filter payload exceeds 10000 bytes").await;
            }
            match subscription.as_mut() {
                Some(sub) => {
                    sub.set_filter(filter);
                    send_ack(socket, "set-filter", json!({ "status": "ok" })).await
                }
                None => send_error(socket, "BadRequest", "no active subscription to filter").await,
            }
        }

        ClientMessage::Command { command, args } => {
            if !ALLOWED_PASSTHROUGH_COMMANDS.contains(&command.as_str()) {
                return send_error(socket, "Forbidden", &format!("command '{command}' is not on the allow-list")).await;
            }
            send_ack(socket, "command", json!({ "command": command, "args": args, "status": "accepted" })).await
        }
    }
}
