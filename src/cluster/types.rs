use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ClusterError;

/// The eight TPC-H base tables, largest first by generator cardinality.
pub const TPCH_TABLES: [&str; 8] = [
    "lineitem", "orders", "partsupp", "part", "customer", "supplier", "nation", "region",
];

pub fn is_tpch_table(name: &str) -> bool {
    TPCH_TABLES.contains(&name)
}

pub fn validate_table(name: &str) -> Result<(), ClusterError> {
    if is_tpch_table(name) {
        Ok(())
    } else {
        Err(ClusterError::InvalidTable(name.to_string()))
    }
}

/// Position of `name` in [`TPCH_TABLES`]; lower means larger.
pub fn size_rank(name: &str) -> usize {
    TPCH_TABLES
        .iter()
        .position(|table| *table == name)
        .unwrap_or(TPCH_TABLES.len())
}

/// Stable 1-based node identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn from_index(index: usize) -> Self {
        Self(index.to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A network-addressable worker process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Node {
    pub id: NodeId,
    /// Base URL without a trailing slash, e.g. `http://worker_node_1:5001`.
    pub url: String,
}

impl Node {
    /// A node known only by its address (a leader's view of its followers).
    pub fn from_url(url: &str) -> Self {
        let url = url.trim_end_matches('/').to_string();
        Self {
            id: NodeId(url.clone()),
            url,
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.url, path)
    }
}

/// How the fleet is organized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Architecture {
    /// All nodes are equal and each holds a shard.
    Flat,
    /// Leader/follower triads: followers hold shards, leaders answer for the triad.
    Replicated,
}

impl TryFrom<u8> for Architecture {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Architecture::Flat),
            1 => Ok(Architecture::Replicated),
            other => Err(format!("invalid architecture {} (expected 0 or 1)", other)),
        }
    }
}

impl From<Architecture> for u8 {
    fn from(value: Architecture) -> Self {
        match value {
            Architecture::Flat => 0,
            Architecture::Replicated => 1,
        }
    }
}

/// Where queries execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Mode {
    /// Nodes push partition rows; the coordinator executes against whole tables.
    Local,
    /// Nodes execute against their own shards and report results back.
    Distributed,
}

impl TryFrom<u8> for Mode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Mode::Local),
            1 => Ok(Mode::Distributed),
            other => Err(format!("invalid mode {} (expected 0 or 1)", other)),
        }
    }
}

impl From<Mode> for u8 {
    fn from(value: Mode) -> Self {
        match value {
            Mode::Local => 0,
            Mode::Distributed => 1,
        }
    }
}

/// The part a single node plays in the topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum Role {
    #[default]
    Plain,
    Leader,
    Follower,
}

impl Role {
    pub fn name(self) -> &'static str {
        match self {
            Role::Plain => "plain",
            Role::Leader => "leader",
            Role::Follower => "follower",
        }
    }
}

impl TryFrom<u8> for Role {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Role::Plain),
            1 => Ok(Role::Leader),
            2 => Ok(Role::Follower),
            other => Err(format!("invalid worker type {} (expected 0, 1 or 2)", other)),
        }
    }
}

impl From<Role> for u8 {
    fn from(value: Role) -> Self {
        match value {
            Role::Plain => 0,
            Role::Leader => 1,
            Role::Follower => 2,
        }
    }
}
