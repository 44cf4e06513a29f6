//! Node registry: the session's view of cluster nodes.
//!
//! Replaced wholesale by each resource offer and patched in place by
//! stat updates. Rankings are computed on demand and cached per bias
//! until the next change.

use std::collections::HashMap;

use tracing::debug;

use skiff_core::{Error, NodeId, RankBias, Result, Stats};

use crate::ranker::{Node, rank_nodes};

/// Nodes in the order the location reported them.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
    /// Cached orderings (indices into `nodes`), dropped on any change.
    ranked: HashMap<RankBias, Vec<usize>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole node set. A repeated id updates the earlier
    /// entry rather than adding a second one.
    pub fn replace(&mut self, nodes: impl IntoIterator<Item = Node>) {
        self.nodes.clear();
        for node in nodes {
            match self.nodes.iter_mut().find(|n| n.id == node.id) {
                Some(existing) => existing.stats = node.stats,
                None => self.nodes.push(node),
            }
        }
        self.ranked.clear();
    }

    /// Merge new stats into a known node.
    ///
    /// Returns `false`, leaving the registry untouched, when the node is
    /// unknown: stats never create nodes, only resource offers do.
    pub fn update_stats(&mut self, id: &str, stats: Stats) -> bool {
        let Some(node) = self.nodes.iter_mut().find(|n| n.id == id) else {
            return false;
        };
        node.merge_stats(stats);
        self.ranked.clear();
        debug!(node = %id, "node stats updated");
        true
    }

    /// Nodes ordered best-first for `bias`.
    pub fn ranked(&mut self, bias: RankBias) -> Result<Vec<Node>> {
        if self.nodes.is_empty() {
            return Err(Error::NotFound("the location has no nodes".to_string()));
        }
        let nodes = &self.nodes;
        let order = self
            .ranked
            .entry(bias)
            .or_insert_with(|| rank_nodes(nodes, bias));
        Ok(order.iter().map(|&i| nodes[i].clone()).collect())
    }

    /// The single best node for `bias`.
    pub fn best(&mut self, bias: RankBias) -> Result<Node> {
        self.ranked(bias)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound("the location has no nodes".to_string()))
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// All nodes, in arrival order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.ranked.clear();
    }

    #[cfg(test)]
    fn is_cached(&self, bias: RankBias) -> bool {
        self.ranked.contains_key(&bias)
    }
}
