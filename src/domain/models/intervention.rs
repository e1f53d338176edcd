//! Intervention domain model.
//!
//! An intervention is a human-issued directive targeting a swarm or an
//! individual agent. Status transitions are monotonic
//! (`pending -> acknowledged -> applied`, or `pending -> rejected`) and the
//! `relaunch-swarm` action is additionally gated by a per-swarm relaunch
//! ceiling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length, in characters, of an intervention message.
pub const MAX_MESSAGE_LEN: usize = 5000;

/// Default relaunch ceiling applied per swarm when none is configured.
pub const DEFAULT_RELAUNCH_CEILING: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionAction {
    Redirect,
    Pause,
    Resume,
    PriorityChange,
    RelaunchSwarm,
    ModifyGoal,
    AddConstraint,
}

impl InterventionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Redirect => "redirect",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::PriorityChange => "priority-change",
            Self::RelaunchSwarm => "relaunch-swarm",
            Self::ModifyGoal => "modify-goal",
            Self::AddConstraint => "add-constraint",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "redirect" => Some(Self::Redirect),
            "pause" => Some(Self::Pause),
            "resume" => Some(Self::Resume),
            "priority-change" => Some(Self::PriorityChange),
            "relaunch-swarm" => Some(Self::RelaunchSwarm),
            "modify-goal" => Some(Self::ModifyGoal),
            "add-constraint" => Some(Self::AddConstraint),
            _ => None,
        }
    }
}

impl std::fmt::Display for InterventionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionStatus {
    Pending,
    Acknowledged,
    Applied,
    Rejected,
}

impl InterventionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acknowledged => "acknowledged",
            Self::Applied => "applied",
            Self::Rejected => "rejected",
        }
    }

    /// Whether moving from `self` to `next` respects the monotonic
    /// pending -> acknowledged -> applied (or -> rejected) ordering.
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Acknowledged)
                | (Self::Pending, Self::Rejected)
                | (Self::Acknowledged, Self::Applied)
                | (Self::Acknowledged, Self::Rejected)
        )
    }
}

impl std::fmt::Display for InterventionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Agent-type composition plan attached to an approved `relaunch-swarm`
/// intervention, derived from the previous attempt's learnings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModificationPlan {
    pub agent_types: Vec<String>,
    pub learnings: Vec<String>,
}

/// A human-issued directive targeting a swarm or agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intervention {
    pub id: String,
    pub swarm_id: String,
    pub target_agent_id: Option<String>,
    pub action: InterventionAction,
    pub message: String,
    pub status: InterventionStatus,
    pub new_priority: Option<String>,
    pub new_goal: Option<String>,
    pub constraints: Vec<String>,
    pub relaunch_count: Option<u32>,
    pub modification_plan: Option<ModificationPlan>,
    pub created_at: DateTime<Utc>,
    pub response_detail: Option<String>,
}

impl Intervention {
    pub fn new(
        id: impl Into<String>,
        swarm_id: impl Into<String>,
        action: InterventionAction,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            swarm_id: swarm_id.into(),
            target_agent_id: None,
            action,
            message: message.into(),
            status: InterventionStatus::Pending,
            new_priority: None,
            new_goal: None,
            constraints: Vec::new(),
            relaunch_count: None,
            modification_plan: None,
            created_at: Utc::now(),
            response_detail: None,
        }
    }

    #[must_use]
    pub fn with_target_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.target_agent_id = Some(agent_id.into());
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.message.chars().count() > MAX_MESSAGE_LEN {
            return Err(format!(
                "intervention message exceeds {MAX_MESSAGE_LEN} characters"
            ));
        }
        Ok(())
    }

    /// Apply a status transition, idempotently no-op'ing on repeat calls to
    /// `acknowledge`/`apply` and refusing any non-monotonic transition.
    pub fn transition(&mut self, next: InterventionStatus) -> Result<(), String> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "cannot transition intervention from {} to {}",
                self.status, next
            ));
        }
        self.status = next;
        Ok(())
    }

    pub fn is_eligible_for_cleanup(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now - self.created_at > max_age
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_oversized_message() {
        let intervention = Intervention::new(
            "i1",
            "s1",
            InterventionAction::Pause,
            "x".repeat(MAX_MESSAGE_LEN + 1),
        );
        assert!(intervention.validate().is_err());
    }

    #[test]
    fn status_transitions_are_monotonic() {
        let mut intervention = Intervention::new("i1", "s1", InterventionAction::Pause, "stop");
        intervention.transition(InterventionStatus::Acknowledged).unwrap();
        intervention.transition(InterventionStatus::Applied).unwrap();
        assert!(intervention.transition(InterventionStatus::Pending).is_err());
    }

    #[test]
    fn repeated_transitions_are_idempotent() {
        let mut intervention = Intervention::new("i1", "s1", InterventionAction::Pause, "stop");
        intervention.transition(InterventionStatus::Acknowledged).unwrap();
        assert!(intervention.transition(InterventionStatus::Acknowledged).is_ok());
        assert_eq!(intervention.status, InterventionStatus::Acknowledged);
    }

    #[test]
    fn action_str_round_trips() {
        for a in [
            InterventionAction::Redirect,
            InterventionAction::Pause,
            InterventionAction::Resume,
            InterventionAction::PriorityChange,
            InterventionAction::RelaunchSwarm,
            InterventionAction::ModifyGoal,
            InterventionAction::AddConstraint,
        ] {
            assert_eq!(InterventionAction::parse_str(a.as_str()), Some(a));
        }
    }
}
