use serde::Serialize;
use std::path::PathBuf;

use crate::cluster::topology::Topology;
use crate::cluster::types::{Architecture, Mode, Node, NodeId};

/// Initialization protocol phase. `Initialized` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InitPhase {
    Uninitialized,
    Initializing,
    Initialized,
}

/// The coordinator's single source of truth about the fleet.
///
/// Written only by the initializer (under the init lock) and read-only afterwards.
#[derive(Debug, Clone)]
pub struct ClusterState {
    pub phase: InitPhase,
    pub nodes: Vec<Node>,
    pub architecture: Architecture,
    pub mode: Mode,
    /// Tables split into shards.
    pub partitioned: Vec<String>,
    /// Tables loaded whole (by the coordinator in local mode, by the entry nodes in
    /// distributed mode).
    pub whole: Vec<String>,
    pub leaders: Vec<Node>,
    pub followers: Vec<Node>,
    pub mount: PathBuf,
}

impl ClusterState {
    pub fn new(nodes: Vec<Node>, mount: PathBuf) -> Self {
        Self {
            phase: InitPhase::Uninitialized,
            nodes,
            architecture: Architecture::Flat,
            mode: Mode::Local,
            partitioned: Vec::new(),
            whole: Vec::new(),
            leaders: Vec::new(),
            followers: Vec::new(),
            mount,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.phase == InitPhase::Initialized
    }

    /// Records the outcome of a successful initialization round.
    pub fn apply(
        &mut self,
        topology: &Topology,
        mode: Mode,
        partitioned: Vec<String>,
        whole: Vec<String>,
    ) {
        self.architecture = topology.architecture();
        self.mode = mode;
        self.partitioned = partitioned;
        self.whole = whole;
        self.leaders = topology.leaders();
        self.followers = topology.followers();
        self.phase = InitPhase::Initialized;
    }

    pub fn leader_ids(&self) -> Vec<NodeId> {
        self.leaders.iter().map(|n| n.id.clone()).collect()
    }

    pub fn follower_ids(&self) -> Vec<NodeId> {
        self.followers.iter().map(|n| n.id.clone()).collect()
    }

    /// The nodes a dispatch round talks to.
    pub fn entry_nodes(&self) -> Vec<Node> {
        match self.architecture {
            Architecture::Flat => self.nodes.clone(),
            Architecture::Replicated => self.leaders.clone(),
        }
    }

    pub fn snapshot(&self) -> ClusterStatus {
        ClusterStatus {
            phase: self.phase,
            architecture: self.architecture,
            mode: self.mode,
            nodes: self.nodes.iter().map(|n| n.id.clone()).collect(),
            leaders: self.leader_ids(),
            followers: self.follower_ids(),
            partitioned: self.partitioned.clone(),
            whole: self.whole.clone(),
            mount: self.mount.clone(),
        }
    }
}

/// Read-only view served by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub phase: InitPhase,
    pub architecture: Architecture,
    pub mode: Mode,
    pub nodes: Vec<NodeId>,
    pub leaders: Vec<NodeId>,
    pub followers: Vec<NodeId>,
    pub partitioned: Vec<String>,
    pub whole: Vec<String>,
    pub mount: PathBuf,
}
