//! Cluster Layout Module
//!
//! Shared vocabulary of the coordinator and the nodes.
//!
//! ## Core Concepts
//! - **Identity**: Nodes are positional (`1..=n`) and their addresses are fixed at startup.
//! - **Topology**: `Topology` turns the flat node list into leader/follower triads when
//!   replication is requested and the node count allows it.
//! - **Fan-out**: `fan_out` runs one request per node concurrently and summarizes the
//!   round as per-node successes and failures.
//! - **Transport**: `NodeClient` wraps HTTP/JSON calls with a timeout and bounded retries.

pub mod client;
pub mod fanout;
pub mod topology;
pub mod types;
