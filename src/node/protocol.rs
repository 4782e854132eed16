//! Node Network Protocol
//!
//! Endpoints served by every node. The coordinator calls the first four; leaders call
//! `/process_data` and `/follower_sync` on their followers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::cluster::types::{NodeId, Role};

// --- API Endpoints ---

/// Role, shard files and triad membership pushed once by the coordinator.
pub const ENDPOINT_NODE_INIT: &str = "/receive_init";
/// Execute a query on local data and post the result to `agg_url`.
pub const ENDPOINT_PROCESS_QUERY: &str = "/process_query";
/// Stream the rows of the requested tables to `agg_url`.
pub const ENDPOINT_PROCESS_DATA: &str = "/process_data";
/// Leader only: relay `/process_data` to the triad, then push own rows.
pub const ENDPOINT_LEADER_DATA: &str = "/leader_data";
/// Leader only: pull follower shards, execute, post the result.
pub const ENDPOINT_LEADER_RESULTS: &str = "/leader_results";
/// Follower only: report the shard files this follower holds.
pub const ENDPOINT_FOLLOWER_SYNC: &str = "/follower_sync";

// --- Data Transfer Objects ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitMessage {
    pub worker_type: Role,
    /// Table name to shard (or whole-table) file on the shared mount.
    pub files: BTreeMap<String, PathBuf>,
    /// Set for followers.
    #[serde(default)]
    pub leader_address: Option<String>,
    /// Set for leaders.
    #[serde(default)]
    pub follower_addresses: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    /// Full callback URL the result is posted to.
    pub agg_url: String,
    pub query_id: String,
    pub worker_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRequest {
    pub tables: Vec<String>,
    /// Full URL rows are pushed to.
    pub agg_url: String,
}

/// A follower's answer to `/follower_sync`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FollowerManifest {
    pub files: BTreeMap<String, PathBuf>,
}
