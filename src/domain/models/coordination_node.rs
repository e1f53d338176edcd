//! Coordination tree node domain model.
//!
//! The tree itself is an arena (see `services::coordination_tree`); this
//! module only defines the node's data shape. Parent/child links are stored
//! as [`NodeId`] back-pointers rather than owning references, so the arena
//! can never form a reference cycle.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Index of a [`CoordinationNode`] within a `CoordinationTree` arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// One node in the coordination tree hierarchy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationNode {
    pub id: NodeId,
    pub level: u32,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Agents directly attached to this node (not sub-coordinators).
    pub agent_ids: HashSet<String>,
    /// Maximum number of agents this node may directly hold.
    pub capacity: usize,
    /// Count of tasks currently queued or in flight under this node,
    /// including its subtree; maintained by the load balancer.
    pub load: u32,
}

impl CoordinationNode {
    pub fn root(id: NodeId, capacity: usize) -> Self {
        Self {
            id,
            level: 0,
            parent: None,
            children: Vec::new(),
            agent_ids: HashSet::new(),
            capacity,
            load: 0,
        }
    }

    pub fn child(id: NodeId, level: u32, parent: NodeId, capacity: usize) -> Self {
        Self {
            id,
            level,
            parent: Some(parent),
            children: Vec::new(),
            agent_ids: HashSet::new(),
            capacity,
            load: 0,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_at_capacity(&self) -> bool {
        self.agent_ids.len() >= self.capacity
    }

    pub fn attach_agent(&mut self, agent_id: impl Into<String>) -> bool {
        if self.is_at_capacity() {
            return false;
        }
        self.agent_ids.insert(agent_id.into());
        true
    }

    pub fn detach_agent(&mut self, agent_id: &str) -> bool {
        self.agent_ids.remove(agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_has_no_parent() {
        let root = CoordinationNode::root(NodeId(0), 10);
        assert!(root.is_root());
        assert!(root.is_leaf());
    }

    #[test]
    fn capacity_gates_attachment() {
        let mut node = CoordinationNode::root(NodeId(0), 1);
        assert!(node.attach_agent("a1"));
        assert!(node.is_at_capacity());
        assert!(!node.attach_agent("a2"));
    }

    #[test]
    fn detach_returns_false_for_unknown_agent() {
        let mut node = CoordinationNode::root(NodeId(0), 5);
        assert!(!node.detach_agent("ghost"));
    }
}
