//! The belief tree: an arena of belief nodes rooted at the current belief.
//!
//! Nodes are stored in a contiguous `Vec` and referenced by `NodeId`
//! indices. Nodes are created lazily by `create_or_get_child` and persist
//! for the run.

use solver_core::{Model, NodeId, ObservationResolution};

use crate::mapping::ActionMapping;
use crate::node::BeliefNode;

/// Arena of all belief nodes.
#[derive(Debug)]
pub struct BeliefTree<M: Model> {
    nodes: Vec<BeliefNode<M>>,
    actions: Vec<M::Action>,
    resolution: ObservationResolution,
}

impl<M: Model> BeliefTree<M> {
    /// Create a tree holding only the root belief. Every node's action
    /// mapping is built over the same enumerated action set.
    pub fn new(actions: Vec<M::Action>, resolution: ObservationResolution, now: f64) -> Self {
        let root = BeliefNode::new(
            NodeId(0),
            ActionMapping::new(actions.clone(), resolution),
            now,
        );
        Self {
            nodes: vec![root],
            actions,
            resolution,
        }
    }

    /// The root node id (always 0).
    #[inline]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> &BeliefNode<M> {
        &self.nodes[id.0 as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, id: NodeId) -> &mut BeliefNode<M> {
        &mut self.nodes[id.0 as usize]
    }

    /// Number of nodes in the tree.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All node ids in creation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Resolve the child of `parent` under `(action, observation)`,
    /// creating it if it does not exist yet. Idempotent: repeated calls
    /// return the same node without growing the tree.
    pub fn create_or_get_child(
        &mut self,
        parent: NodeId,
        action: &M::Action,
        observation: &M::Observation,
        now: f64,
    ) -> NodeId {
        if let Some(child) = self.get(parent).child(action, observation) {
            return child;
        }
        let id = NodeId(self.nodes.len() as u32);
        let node = BeliefNode::new(
            id,
            ActionMapping::new(self.actions.clone(), self.resolution),
            now,
        );
        self.nodes.push(node);
        self.nodes[parent.0 as usize]
            .actions_mut()
            .entry_mut(action)
            .expect("child creation under an action outside the model's action set")
            .children
            .insert(observation.clone(), id);
        id
    }
}
