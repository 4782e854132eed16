//! TPC-H Query Cluster Library
//!
//! Coordinates distributed execution of analytical queries over a fleet of worker
//! nodes. The binary (`main.rs`) runs either the coordinator or a node on top of
//! these modules.
//!
//! ## Architecture Modules
//! - **`cluster`**: Node identity, architecture/mode/role enums, the leader/follower
//!   topology builder, and the HTTP fan-out plumbing shared by both process kinds.
//! - **`partition`**: Splits `.tbl` files into per-node shards, either by contiguous
//!   line ranges or by a join-key range hash that co-locates two tables.
//! - **`engine`**: The relational engine (SQLite) and the SQL table-reference extractor.
//! - **`coordinator`**: Cluster initialization, query/data dispatch, and the result sink.
//! - **`node`**: The worker-side runtime: shard loading, query execution, and the
//!   leader/follower relay protocol.

pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod node;
pub mod partition;
