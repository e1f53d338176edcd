//! Coordination Tree: the hierarchical arena of [`CoordinationNode`]s that
//! owns agent placement.
//!
//! Nodes are stored in a `Vec` arena indexed by [`NodeId`]; parent/child
//! relationships are back-pointers by id only, never owning references, so
//! the arena can never form a reference cycle (see `SPEC_FULL.md` §9).
//! The tree is the sole authority for *placement*; the [`AgentRegistry`]
//! remains authoritative for capability and health data.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::domain::error::TreeError;
use crate::domain::models::{CoordinationNode, NodeId};

/// Where a newly placed agent landed, and which ancestors were created to
/// hold it.
#[derive(Debug, Clone)]
pub struct PlacementResult {
    pub node_id: NodeId,
    pub created_nodes: Vec<NodeId>,
}

struct TreeState {
    nodes: Vec<CoordinationNode>,
    /// Fast lookup from an agent id to the node currently holding it.
    agent_location: HashMap<String, NodeId>,
    max_agents_per_node: usize,
    hierarchy_depth: u32,
}

impl TreeState {
    fn node(&self, id: NodeId) -> Result<&CoordinationNode, TreeError> {
        self.nodes
            .get(id.0 as usize)
            .ok_or(TreeError::NodeNotFound(id.0))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut CoordinationNode, TreeError> {
        self.nodes
            .get_mut(id.0 as usize)
            .ok_or(TreeError::NodeNotFound(id.0))
    }

    fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len() as u64)
    }

    fn total_agents(&self) -> usize {
        self.agent_location.len()
    }

    /// Target level per the placement algorithm in §4.2: as the swarm grows,
    /// new agents are placed progressively deeper, capped at
    /// `hierarchy_depth - 1`.
    fn target_level(&self) -> u32 {
        let by_fanout = (self.total_agents() / self.max_agents_per_node.max(1)) as u32;
        by_fanout.min(self.hierarchy_depth.saturating_sub(1))
    }

    /// Find the least-loaded node at `level` that is below capacity, if any.
    fn least_loaded_at_level(&self, level: u32) -> Option<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.level == level && !n.is_at_capacity())
            .min_by_key(|n| n.load)
            .map(|n| n.id)
    }

    /// Find (or create the chain of ancestors down to) a parent at
    /// `level - 1` with sub-coordinator room, creating new nodes as needed.
    fn ensure_parent_chain(&mut self, level: u32, created: &mut Vec<NodeId>) -> NodeId {
        if level == 0 {
            return self.nodes[0].id;
        }
        let parent_level = level - 1;
        let parent = self
            .nodes
            .iter()
            .find(|n| n.level == parent_level && n.children.len() < self.max_agents_per_node)
            .map(|n| n.id)
            .unwrap_or_else(|| {
                let grandparent = self.ensure_parent_chain(parent_level, created);
                let id = self.next_id();
                self.nodes
                    .push(CoordinationNode::child(id, parent_level, grandparent, self.max_agents_per_node));
                if let Ok(gp) = self.node_mut(grandparent) {
                    gp.children.push(id);
                }
                created.push(id);
                id
            });
        parent
    }
}

/// The coordination tree service: placement, removal, and load accounting
/// for the hierarchy of [`CoordinationNode`]s.
pub struct CoordinationTree {
    state: RwLock<TreeState>,
}

impl CoordinationTree {
    /// Construct a tree with a freshly created root, bounded by
    /// `max_agents_per_node` and `hierarchy_depth` from
    /// [`CoordinationConfig`](crate::domain::models::CoordinationConfig).
    pub fn new(max_agents_per_node: usize, hierarchy_depth: u32) -> Self {
        let root = CoordinationNode::root(NodeId(0), max_agents_per_node);
        Self {
            state: RwLock::new(TreeState {
                nodes: vec![root],
                agent_location: HashMap::new(),
                max_agents_per_node,
                hierarchy_depth: hierarchy_depth.max(1),
            }),
        }
    }

    /// Rebuild a tree from a previously taken [`Self::snapshot`], as the
    /// persisted-state loader does at startup. Falls back to a fresh root if
    /// `nodes` is empty so the tree's "root always exists at level 0"
    /// invariant holds regardless of what the snapshot document contained.
    pub fn restore(nodes: Vec<CoordinationNode>, max_agents_per_node: usize, hierarchy_depth: u32) -> Self {
        let nodes = if nodes.is_empty() {
            vec![CoordinationNode::root(NodeId(0), max_agents_per_node)]
        } else {
            nodes
        };
        let agent_location = nodes
            .iter()
            .flat_map(|n| n.agent_ids.iter().map(move |a| (a.clone(), n.id)))
            .collect();
        Self {
            state: RwLock::new(TreeState {
                nodes,
                agent_location,
                max_agents_per_node,
                hierarchy_depth: hierarchy_depth.max(1),
            }),
        }
    }

    /// Place a newly registered agent per the algorithm in §4.2: compute the
    /// target level, pick (or create) the least-loaded node below capacity
    /// there, and attach. Always terminates: the root always exists at level
    /// 0 and each created node strictly reduces the available-slot deficit.
    pub async fn place_agent(&self, agent_id: &str) -> Result<PlacementResult, TreeError> {
        let mut state = self.state.write().await;
        let level = state.target_level();

        let mut created_nodes = Vec::new();
        let node_id = match state.least_loaded_at_level(level) {
            Some(id) => id,
            None => {
                let parent = state.ensure_parent_chain(level, &mut created_nodes);
                let id = state.next_id();
                state
                    .nodes
                    .push(CoordinationNode::child(id, level, parent, state.max_agents_per_node));
                if level > 0 {
                    if let Ok(p) = state.node_mut(parent) {
                        p.children.push(id);
                    }
                }
                created_nodes.push(id);
                id
            }
        };

        let node = state.node_mut(node_id)?;
        if !node.attach_agent(agent_id) {
            return Err(TreeError::NodeAtCapacity(node_id.0));
        }
        state.agent_location.insert(agent_id.to_string(), node_id);

        Ok(PlacementResult {
            node_id,
            created_nodes,
        })
    }

    /// Remove an agent from its node, decrementing the node's load by
    /// `in_flight_to_release` (the count of its in-flight tasks at removal
    /// time). Empty nodes are *not* destroyed, per §4.2, to avoid thrash.
    pub async fn remove_agent(&self, agent_id: &str, in_flight_to_release: u32) -> Result<(), TreeError> {
        let mut state = self.state.write().await;
        let Some(node_id) = state.agent_location.remove(agent_id) else {
            return Ok(());
        };
        let node = state.node_mut(node_id)?;
        node.detach_agent(agent_id);
        node.load = node.load.saturating_sub(in_flight_to_release);
        Ok(())
    }

    pub async fn node_of(&self, agent_id: &str) -> Option<NodeId> {
        self.state.read().await.agent_location.get(agent_id).copied()
    }

    /// Adjust a node's load counter; used on task assignment (+1),
    /// completion (-1), and work-stealing transfers (±count).
    pub async fn adjust_load(&self, node_id: NodeId, delta: i64) -> Result<(), TreeError> {
        let mut state = self.state.write().await;
        let node = state.node_mut(node_id)?;
        node.load = (i64::from(node.load) + delta).max(0) as u32;
        Ok(())
    }

    /// Consistent copy-on-read snapshot of every node, for the rebalance
    /// cycle and the metrics surface.
    pub async fn snapshot(&self) -> Vec<CoordinationNode> {
        self.state.read().await.nodes.clone()
    }

    pub async fn depth(&self) -> u32 {
        self.state
            .read()
            .await
            .nodes
            .iter()
            .map(|n| n.level)
            .max()
            .unwrap_or(0)
            + 1
    }

    pub async fn node_count(&self) -> usize {
        self.state.read().await.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_agents_land_on_root() {
        let tree = CoordinationTree::new(20, 4);
        let result = tree.place_agent("a1").await.unwrap();
        assert_eq!(result.node_id, NodeId(0));
        assert!(result.created_nodes.is_empty());
    }

    #[tokio::test]
    async fn capacity_respected_across_many_placements() {
        let tree = CoordinationTree::new(2, 4);
        for i in 0..10 {
            tree.place_agent(&format!("a{i}")).await.unwrap();
        }
        let snapshot = tree.snapshot().await;
        for node in &snapshot {
            assert!(node.agent_ids.len() <= 2, "node {} over capacity", node.id);
        }
    }

    #[tokio::test]
    async fn every_non_root_node_has_exactly_one_parent() {
        let tree = CoordinationTree::new(2, 4);
        for i in 0..20 {
            tree.place_agent(&format!("a{i}")).await.unwrap();
        }
        let snapshot = tree.snapshot().await;
        for node in &snapshot {
            if node.level > 0 {
                assert!(node.parent.is_some());
            } else {
                assert!(node.parent.is_none());
            }
        }
    }

    #[tokio::test]
    async fn tree_depth_never_exceeds_hierarchy_depth() {
        let tree = CoordinationTree::new(1, 3);
        for i in 0..50 {
            tree.place_agent(&format!("a{i}")).await.unwrap();
        }
        assert!(tree.depth().await <= 3);
    }

    #[tokio::test]
    async fn remove_agent_decrements_load_and_leaves_node_in_place() {
        let tree = CoordinationTree::new(5, 4);
        let placement = tree.place_agent("a1").await.unwrap();
        tree.adjust_load(placement.node_id, 3).await.unwrap();
        tree.remove_agent("a1", 3).await.unwrap();

        let snapshot = tree.snapshot().await;
        let node = snapshot.iter().find(|n| n.id == placement.node_id).unwrap();
        assert_eq!(node.load, 0);
        assert!(!node.agent_ids.contains("a1"));
        // Node itself still exists.
        assert_eq!(tree.node_count().await, 1);
    }

    #[tokio::test]
    async fn removing_unknown_agent_is_a_noop() {
        let tree = CoordinationTree::new(5, 4);
        assert!(tree.remove_agent("ghost", 0).await.is_ok());
    }

    #[tokio::test]
    async fn adjust_load_floors_at_zero() {
        let tree = CoordinationTree::new(5, 4);
        let placement = tree.place_agent("a1").await.unwrap();
        tree.adjust_load(placement.node_id, -10).await.unwrap();
        let snapshot = tree.snapshot().await;
        assert_eq!(snapshot[0].load, 0);
    }
}
