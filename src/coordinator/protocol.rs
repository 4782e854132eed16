//! Coordinator Network Protocol
//!
//! Endpoints served by the coordinator and their request/response bodies. Missing
//! required fields are rejected by the JSON extractor before any handler runs.

use serde::{Deserialize, Serialize};

use crate::cluster::types::{Architecture, Mode, NodeId};
use crate::engine::Row;

// --- API Endpoints ---

/// Explicit initialization with caller-supplied table lists.
pub const ENDPOINT_INIT: &str = "/receive_init";
/// Initialization inferred from a sample query.
pub const ENDPOINT_SMART_INIT: &str = "/receive_smart_init";
/// Runs a query (or data pull) across the cluster.
pub const ENDPOINT_SEND_TASK: &str = "/send_task";
/// Result callback from a node.
pub const ENDPOINT_RECEIVE_RESULT: &str = "/receive_result";
/// Partition rows pushed by a node in local mode.
pub const ENDPOINT_RECEIVE_DATA: &str = "/receive_data";
/// Snapshot of the cluster state.
pub const ENDPOINT_STATUS: &str = "/status";
/// Records written for one request id (`/results/:query_id`).
pub const ENDPOINT_RESULTS: &str = "/results";

// --- Data Transfer Objects ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitRequest {
    pub partition: Vec<String>,
    #[serde(default)]
    pub non_partition: Vec<String>,
    pub arch: Architecture,
    pub mode: Mode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartInitRequest {
    pub arch: Architecture,
    pub mode: Mode,
    pub sample_query: String,
    pub number_query: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    pub query: String,
    /// Tables nodes push back in local mode; defaults to every partitioned table.
    #[serde(default)]
    pub tables: Vec<String>,
    pub query_id: String,
}

/// A node's query result for one request id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultCallback {
    pub results: Vec<Row>,
    pub query_id: String,
    pub worker_id: NodeId,
    #[serde(default)]
    pub elapsed_ms: u64,
}

/// One batch of rows of `name` pushed by a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataBatch {
    pub name: String,
    pub rows: Vec<Row>,
}

/// Generic acknowledgment used by every write endpoint on both process kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
}

impl StatusResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
