//! Partitioning plans.
//!
//! An [`InitPlan`] says which tables are split, which are loaded whole, and which pair
//! (if any) is co-located by join key. Explicit initialization takes the lists as
//! given; smart initialization derives them from a sample query and its TPC-H number.

use anyhow::Result;

use crate::cluster::types::{Architecture, Mode, size_rank, validate_table};
use crate::engine::extract::TableReference;
use crate::error::ClusterError;
use crate::partition::splitter::JoinSpec;

use super::protocol::InitRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitPlan {
    pub partition: Vec<String>,
    pub whole: Vec<String>,
    pub architecture: Architecture,
    pub mode: Mode,
    pub join: Option<JoinSpec>,
}

impl InitPlan {
    /// Validates caller-supplied table lists: every name must be a TPC-H table, the
    /// lists must not overlap, and at least one table must be partitioned.
    pub fn explicit(request: &InitRequest) -> Result<Self> {
        let partition = dedup(&request.partition);
        let whole = dedup(&request.non_partition);

        for table in partition.iter().chain(whole.iter()) {
            validate_table(table)?;
        }
        if partition.is_empty() {
            return Err(ClusterError::InvalidPayload("partition list is empty".into()).into());
        }
        if let Some(table) = partition.iter().find(|t| whole.contains(t)) {
            return Err(ClusterError::InvalidPayload(format!(
                "{} is listed as both partitioned and whole",
                table
            ))
            .into());
        }

        Ok(Self {
            partition,
            whole,
            architecture: request.arch,
            mode: request.mode,
            join: None,
        })
    }

    /// Derives a plan from the tables a sample query reads.
    ///
    /// Queries of a known join family co-locate their join pair. Anything else splits
    /// its only main table, or the largest main table when there are several.
    pub fn from_query(
        number_query: u32,
        references: &[TableReference],
        architecture: Architecture,
        mode: Mode,
    ) -> Result<Self> {
        let known: Vec<&TableReference> = references
            .iter()
            .filter(|r| validate_table(&r.table).is_ok())
            .collect();
        if known.is_empty() {
            return Err(ClusterError::InvalidPayload(
                "sample query reads no TPC-H tables".into(),
            )
            .into());
        }
        let tables: Vec<String> = known.iter().map(|r| r.table.clone()).collect();

        if let Some(join) = join_family(number_query) {
            if tables.contains(&join.left_table) && tables.contains(&join.right_table) {
                let partition = vec![join.left_table.clone(), join.right_table.clone()];
                return Ok(Self {
                    whole: rest(&tables, &partition),
                    partition,
                    architecture,
                    mode,
                    join: Some(join),
                });
            }
            tracing::warn!(
                "Query {} does not read {} and {}; using single-table split",
                number_query,
                join.left_table,
                join.right_table
            );
        }

        let main: Vec<&str> = known
            .iter()
            .filter(|r| !r.in_subquery)
            .map(|r| r.table.as_str())
            .collect();
        let candidates: Vec<&str> = if main.is_empty() {
            tables.iter().map(String::as_str).collect()
        } else {
            main
        };
        let target = candidates
            .iter()
            .min_by_key(|t| size_rank(t))
            .map(|t| t.to_string())
            .ok_or_else(|| ClusterError::InvalidPayload("no table to partition".into()))?;

        let partition = vec![target];
        Ok(Self {
            whole: rest(&tables, &partition),
            partition,
            architecture,
            mode,
            join: None,
        })
    }
}

/// Join pair co-located for a TPC-H query number. Key positions are 0-based fields
/// of the generator files.
pub fn join_family(number_query: u32) -> Option<JoinSpec> {
    match number_query {
        // o_orderkey = l_orderkey
        4 | 12 => Some(JoinSpec {
            left_table: "orders".to_string(),
            right_table: "lineitem".to_string(),
            left_key: 0,
            right_key: 0,
        }),
        // p_partkey = l_partkey
        14 | 17 | 19 => Some(JoinSpec {
            left_table: "part".to_string(),
            right_table: "lineitem".to_string(),
            left_key: 0,
            right_key: 1,
        }),
        _ => None,
    }
}

fn dedup(tables: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tables.len());
    for table in tables {
        let table = table.trim().to_lowercase();
        if !out.contains(&table) {
            out.push(table);
        }
    }
    out
}

fn rest(tables: &[String], partition: &[String]) -> Vec<String> {
    tables
        .iter()
        .filter(|t| !partition.contains(t))
        .cloned()
        .collect()
}
