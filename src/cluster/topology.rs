//! Leader/Follower Topology
//!
//! Groups a flat, ordered node list into triads. Every third position starting at
//! index 1 (`1, 4, 7, ...`) becomes a leader and its immediate neighbours become its
//! followers, so `n` nodes yield exactly `n / 3` disjoint triads.
//!
//! Replication is only possible when the node count is a multiple of three. In every
//! other case the builder returns the flat topology and the caller carries on with
//! [`Architecture::Flat`].

use serde::Serialize;

use super::types::{Architecture, Node, NodeId, Role};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Triad {
    pub leader: Node,
    pub followers: [Node; 2],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    Flat { nodes: Vec<Node> },
    Replicated { nodes: Vec<Node>, triads: Vec<Triad> },
}

impl Topology {
    /// Builds the topology for the requested architecture, degrading to flat when
    /// the node count does not divide into triads.
    pub fn build(nodes: &[Node], requested: Architecture) -> Self {
        match requested {
            Architecture::Flat => Topology::Flat {
                nodes: nodes.to_vec(),
            },
            Architecture::Replicated => match triads(nodes) {
                Some(triads) => Topology::Replicated {
                    nodes: nodes.to_vec(),
                    triads,
                },
                None => {
                    tracing::warn!(
                        "Replication needs a multiple of 3 nodes, got {}; falling back to flat",
                        nodes.len()
                    );
                    Topology::Flat {
                        nodes: nodes.to_vec(),
                    }
                }
            },
        }
    }

    pub fn architecture(&self) -> Architecture {
        match self {
            Topology::Flat { .. } => Architecture::Flat,
            Topology::Replicated { .. } => Architecture::Replicated,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        match self {
            Topology::Flat { nodes } | Topology::Replicated { nodes, .. } => nodes,
        }
    }

    pub fn leaders(&self) -> Vec<Node> {
        match self {
            Topology::Flat { .. } => Vec::new(),
            Topology::Replicated { triads, .. } => {
                triads.iter().map(|t| t.leader.clone()).collect()
            }
        }
    }

    pub fn followers(&self) -> Vec<Node> {
        match self {
            Topology::Flat { .. } => Vec::new(),
            Topology::Replicated { triads, .. } => triads
                .iter()
                .flat_map(|t| t.followers.iter().cloned())
                .collect(),
        }
    }

    /// Nodes that receive shards of the partitioned tables.
    pub fn shard_holders(&self) -> Vec<Node> {
        match self {
            Topology::Flat { nodes } => nodes.clone(),
            Topology::Replicated { .. } => self.followers(),
        }
    }

    /// Nodes that load whole tables themselves in distributed mode, and that the
    /// dispatcher talks to.
    pub fn entry_nodes(&self) -> Vec<Node> {
        match self {
            Topology::Flat { nodes } => nodes.clone(),
            Topology::Replicated { .. } => self.leaders(),
        }
    }

    pub fn role_of(&self, id: &NodeId) -> Role {
        match self {
            Topology::Flat { .. } => Role::Plain,
            Topology::Replicated { triads, .. } => {
                for triad in triads {
                    if &triad.leader.id == id {
                        return Role::Leader;
                    }
                    if triad.followers.iter().any(|f| &f.id == id) {
                        return Role::Follower;
                    }
                }
                Role::Plain
            }
        }
    }

    /// The triad `id` belongs to, if any.
    pub fn triad_of(&self, id: &NodeId) -> Option<&Triad> {
        match self {
            Topology::Flat { .. } => None,
            Topology::Replicated { triads, .. } => triads
                .iter()
                .find(|t| &t.leader.id == id || t.followers.iter().any(|f| &f.id == id)),
        }
    }
}

fn triads(nodes: &[Node]) -> Option<Vec<Triad>> {
    if nodes.is_empty() || nodes.len() % 3 != 0 {
        return None;
    }

    let triads = (1..nodes.len())
        .step_by(3)
        .map(|leader_idx| Triad {
            leader: nodes[leader_idx].clone(),
            followers: [nodes[leader_idx - 1].clone(), nodes[leader_idx + 1].clone()],
        })
        .collect();

    Some(triads)
}
