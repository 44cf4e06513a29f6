//! Node ranking for placement decisions.
//!
//! Orders nodes by a single scalar stat, highest first. Ties keep the
//! order in which the location reported the nodes. The `cpu` stat is
//! already normalized by the location; nothing here rescales it.

use serde::{Deserialize, Serialize};

use skiff_core::{NodeId, RankBias, Stats};

/// A cluster node and its latest resource stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub stats: Stats,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, stats: Stats) -> Self {
        Self {
            id: id.into(),
            stats,
        }
    }

    /// Value of a stat, treating missing or NaN scores as zero.
    pub fn stat(&self, key: &str) -> f64 {
        match self.stats.get(key) {
            Some(v) if !v.is_nan() => *v,
            _ => 0.0,
        }
    }

    pub fn cpu(&self) -> f64 {
        self.stat(RankBias::Cpu.stat_key())
    }

    pub fn memory(&self) -> f64 {
        self.stat(RankBias::Memory.stat_key())
    }

    /// Merge a stat update into this node. Keys absent from `update`
    /// keep their previous value.
    pub fn merge_stats(&mut self, update: Stats) {
        self.stats.extend(update);
    }
}

/// Rank nodes by `bias`, best first.
///
/// Returns indices into `nodes`. The sort is stable, so nodes with
/// equal scores stay in arrival order.
pub fn rank_nodes(nodes: &[Node], bias: RankBias) -> Vec<usize> {
    let key = bias.stat_key();
    let mut order: Vec<usize> = (0..nodes.len()).collect();
    order.sort_by(|&a, &b| nodes[b].stat(key).total_cmp(&nodes[a].stat(key)));
    order
}
