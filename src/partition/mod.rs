//! Table Partitioning Module
//!
//! Decides which rows of which tables land on which node.
//!
//! ## Strategies
//! - **Uniform**: contiguous line ranges of equal size; the last shard takes the remainder.
//! - **Join-aware**: right-table rows are bucketed by a range hash over the join key and
//!   the matching left-table rows follow them, so a two-table join never crosses nodes.
//!
//! Shards are written to `{mount}/worker_{id}_{table}.tbl` on a mount shared with the
//! nodes; only paths travel over the network.

pub mod splitter;

/// Field delimiter of the benchmark generator's `.tbl` files.
pub const TBL_DELIMITER: u8 = b'|';
