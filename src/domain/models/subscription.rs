//! Subscription domain model.
//!
//! Represents a session's membership in a swarm-scoped event bus room,
//! along with its optional filter predicate and rate-limit window
//! bookkeeping.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum messages a session may send within the rolling rate-limit window.
pub const DEFAULT_RATE_LIMIT_MAX: usize = 100;

/// Width of the sliding rate-limit window.
pub const RATE_LIMIT_WINDOW_SECS: i64 = 60;

/// A session's membership in one room (`swarm-{id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub session_id: String,
    pub room_id: String,
    /// Field-value filter applied before delivery; empty means no filtering.
    pub filter: serde_json::Value,
    #[serde(skip)]
    recent_messages: VecDeque<DateTime<Utc>>,
}

impl Subscription {
    pub fn new(session_id: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            room_id: room_id.into(),
            filter: serde_json::Value::Null,
            recent_messages: VecDeque::new(),
        }
    }

    pub fn set_filter(&mut self, filter: serde_json::Value) {
        self.filter = filter;
    }

    /// Record a message at `now` and report whether the session is within
    /// its sliding 60-second rate limit (default cap 100).
    pub fn record_and_check_rate_limit(&mut self, now: DateTime<Utc>, max: usize) -> bool {
        let window_start = now - chrono::Duration::seconds(RATE_LIMIT_WINDOW_SECS);
        while self.recent_messages.front().is_some_and(|t| *t < window_start) {
            self.recent_messages.pop_front();
        }
        if self.recent_messages.len() >= max {
            return false;
        }
        self.recent_messages.push_back(now);
        true
    }
}
