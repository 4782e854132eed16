//! Query Dispatch
//!
//! One `/send_task` is one round against the entry nodes: every node in a flat
//! cluster, or every leader in a replicated one. The endpoint depends on the
//! `(architecture, mode)` pair:
//!
//! | architecture | mode        | endpoint          | callback          |
//! |--------------|-------------|-------------------|-------------------|
//! | flat         | local       | `/process_data`   | `/receive_data`   |
//! | replicated   | local       | `/leader_data`    | `/receive_data`   |
//! | flat         | distributed | `/process_query`  | `/receive_result` |
//! | replicated   | distributed | `/leader_results` | `/receive_result` |
//!
//! In local mode the nodes stream their partitions back, the coordinator runs the
//! query itself and then empties the pulled tables again. In distributed mode every
//! entry node answers through its own result callback.

use anyhow::Result;
use serde_json::json;
use std::time::Instant;

use crate::cluster::fanout::{RoundSummary, fan_out};
use crate::cluster::types::{Architecture, Mode, Node};
use crate::engine::{Row, run_blocking};
use crate::error::ClusterError;
use crate::node::protocol::{
    DataRequest, ENDPOINT_LEADER_DATA, ENDPOINT_LEADER_RESULTS, ENDPOINT_PROCESS_DATA,
    ENDPOINT_PROCESS_QUERY, QueryRequest,
};

use super::Coordinator;
use super::protocol::{ENDPOINT_RECEIVE_DATA, ENDPOINT_RECEIVE_RESULT, TaskRequest};
use super::results::{RecordSource, validate_query_id};
use super::state::ClusterState;

/// Node endpoint a dispatch round calls.
pub fn round_endpoint(architecture: Architecture, mode: Mode) -> &'static str {
    match (architecture, mode) {
        (Architecture::Flat, Mode::Local) => ENDPOINT_PROCESS_DATA,
        (Architecture::Replicated, Mode::Local) => ENDPOINT_LEADER_DATA,
        (Architecture::Flat, Mode::Distributed) => ENDPOINT_PROCESS_QUERY,
        (Architecture::Replicated, Mode::Distributed) => ENDPOINT_LEADER_RESULTS,
    }
}

/// Tables pulled back in local mode: the requested ones that are actually
/// partitioned, or every partitioned table when none are requested.
pub fn pulled_tables(requested: &[String], partitioned: &[String]) -> Vec<String> {
    if requested.is_empty() {
        return partitioned.to_vec();
    }
    partitioned
        .iter()
        .filter(|t| requested.iter().any(|r| r.eq_ignore_ascii_case(t)))
        .cloned()
        .collect()
}

impl Coordinator {
    /// Runs one query round. Returns the coordinator's rows in local mode and an
    /// empty list in distributed mode, where results arrive via callbacks.
    pub async fn send_task(&self, request: TaskRequest) -> Result<Vec<Row>> {
        validate_query_id(&request.query_id)?;
        if request.query.trim().is_empty() {
            return Err(ClusterError::InvalidPayload("query is empty".into()).into());
        }

        let state = self.state.read().await.clone();
        if !state.is_initialized() {
            return Err(ClusterError::NotInitialized.into());
        }

        match state.mode {
            Mode::Local => self.run_local_round(&state, &request).await,
            Mode::Distributed => {
                self.run_distributed_round(&state, &request).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn run_local_round(&self, state: &ClusterState, request: &TaskRequest) -> Result<Vec<Row>> {
        let _round = self.local_round.lock().await;

        let tables = pulled_tables(&request.tables, &state.partitioned);
        let stale = tables.clone();
        run_blocking(&self.engine, move |engine| {
            for table in &stale {
                engine.truncate(table)?;
            }
            Ok(())
        })
        .await?;

        let data_request = DataRequest {
            tables: tables.clone(),
            agg_url: format!("{}{}", self.config.coordinator_url(), ENDPOINT_RECEIVE_DATA),
        };
        let endpoint = round_endpoint(state.architecture, Mode::Local);
        let summary = fan_out(
            &state.entry_nodes(),
            self.config.network.max_concurrency,
            |node: Node| {
                let client = self.client.clone();
                let payload = data_request.clone();
                async move { client.post_expect_success(&node.endpoint(endpoint), &payload).await }
            },
        )
        .await;

        let started = Instant::now();
        let query = request.query.clone();
        let outcome = run_blocking(&self.engine, move |engine| engine.execute(&query)).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        // Pulled rows never outlive the round, whatever the query did
        let cleanup = run_blocking(&self.engine, move |engine| {
            for table in &tables {
                engine.truncate(table)?;
            }
            Ok(())
        })
        .await;
        if let Err(e) = cleanup {
            tracing::error!("Failed to clear pulled tables for {}: {:#}", request.query_id, e);
        }

        let recorded = self.record_round(&request.query_id, &summary).await;
        let rows = outcome?;
        recorded?;
        self.results
            .record(
                &request.query_id,
                RecordSource::Aggregator,
                elapsed_ms,
                json!(rows),
            )
            .await?;
        tracing::info!(
            "Query {} answered locally: {} rows in {} ms",
            request.query_id,
            rows.len(),
            elapsed_ms
        );
        Ok(rows)
    }

    async fn run_distributed_round(&self, state: &ClusterState, request: &TaskRequest) -> Result<()> {
        let agg_url = format!("{}{}", self.config.coordinator_url(), ENDPOINT_RECEIVE_RESULT);
        let endpoint = round_endpoint(state.architecture, Mode::Distributed);

        let summary = fan_out(
            &state.entry_nodes(),
            self.config.network.max_concurrency,
            |node: Node| {
                let client = self.client.clone();
                let payload = QueryRequest {
                    query: request.query.clone(),
                    agg_url: agg_url.clone(),
                    query_id: request.query_id.clone(),
                    worker_id: node.id.clone(),
                };
                async move { client.post_expect_success(&node.endpoint(endpoint), &payload).await }
            },
        )
        .await;
        self.record_round(&request.query_id, &summary).await
    }

    /// Writes the `network_latency` record of a round.
    async fn record_round(&self, query_id: &str, summary: &RoundSummary<()>) -> Result<()> {
        summary.log_failures(query_id);
        let report = summary.report();
        tracing::info!(
            "Round {}: {}/{} nodes in {} ms",
            query_id,
            report.succeeded,
            report.succeeded + report.failed,
            report.elapsed_ms
        );
        self.results
            .record(
                query_id,
                RecordSource::NetworkLatency,
                report.elapsed_ms,
                json!({ "latency_ms": report.elapsed_ms, "round": report }),
            )
            .await?;
        Ok(())
    }
}
