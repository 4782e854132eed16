//! Node-side protocol operations.
//!
//! A node answers only the coordinator and, when it is a follower, its leader. Every
//! operation other than `receive_init` requires a prior init; leader and follower
//! operations additionally check the role assigned at init.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

use crate::cluster::client::NodeClient;
use crate::cluster::fanout::{RoundSummary, fan_out};
use crate::cluster::types::{Node, Role, validate_table};
use crate::config::ClusterConfig;
use crate::coordinator::protocol::{DataBatch, ResultCallback};
use crate::engine::sqlite::SqliteEngine;
use crate::engine::{RelationalEngine, Row, SharedEngine, run_blocking};
use crate::error::ClusterError;
use crate::partition::TBL_DELIMITER;

use super::protocol::*;
use super::state::{NodeState, is_shard_file};

pub struct NodeRuntime {
    config: ClusterConfig,
    engine: SharedEngine,
    state: RwLock<NodeState>,
    /// Serializes follower shard syncs on a leader.
    sync_lock: Mutex<()>,
    client: NodeClient,
}

impl NodeRuntime {
    pub fn new(config: ClusterConfig, engine: SharedEngine) -> Self {
        Self {
            client: NodeClient::new(config.call_timeout(), config.network.retry_attempts),
            engine,
            state: RwLock::new(NodeState::default()),
            sync_lock: Mutex::new(()),
            config,
        }
    }

    pub fn from_config(config: ClusterConfig) -> Result<Self> {
        let engine = SqliteEngine::open(&config.database.path)?;
        if let Some(schema) = &config.database.schema {
            let ddl = std::fs::read_to_string(schema)
                .with_context(|| format!("reading schema {}", schema.display()))?;
            engine.apply_schema(&ddl)?;
        }
        Ok(Self::new(config, Arc::new(engine)))
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub async fn state(&self) -> NodeState {
        self.state.read().await.clone()
    }

    /// Takes the role and files pushed by the coordinator and loads every file,
    /// replacing whatever the tables held before. Returns rows loaded.
    pub async fn receive_init(&self, message: InitMessage) -> Result<usize> {
        for table in message.files.keys() {
            validate_table(table)?;
        }
        match message.worker_type {
            Role::Follower if message.leader_address.is_none() => {
                return Err(ClusterError::InvalidPayload("follower without leader_address".into()).into());
            }
            Role::Leader if message.follower_addresses.is_empty() => {
                return Err(ClusterError::InvalidPayload("leader without follower_addresses".into()).into());
            }
            _ => {}
        }

        let mut state = self.state.write().await;

        let mut stale: Vec<String> = state.loaded_tables.iter().cloned().collect();
        stale.extend(message.files.keys().cloned());
        let files = message.files.clone();
        let loaded = run_blocking(&self.engine, move |engine| {
            for table in &stale {
                engine.truncate(table)?;
            }
            let mut total = 0;
            for (table, path) in &files {
                let rows = engine.bulk_load(table, path, TBL_DELIMITER)?;
                tracing::info!("Loaded {} ({} rows) from {}", table, rows, path.display());
                total += rows;
            }
            Ok(total)
        })
        .await;
        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                // The old tables may already be gone
                state.initialized = false;
                tracing::error!("Init load failed, node needs a new init: {:#}", e);
                return Err(e);
            }
        };

        *state = NodeState {
            initialized: true,
            role: message.worker_type,
            leader: message.leader_address,
            followers: message.follower_addresses,
            shard_files: message
                .files
                .iter()
                .filter(|(_, path)| is_shard_file(path))
                .map(|(t, p)| (t.clone(), p.clone()))
                .collect(),
            loaded_tables: message.files.keys().cloned().collect(),
            files: message.files,
            synced_files: Default::default(),
        };
        tracing::info!(
            "Initialized as {} with {} tables ({} rows)",
            state.role.name(),
            state.loaded_tables.len(),
            loaded
        );
        Ok(loaded)
    }

    async fn require_initialized(&self) -> Result<NodeState> {
        let state = self.state.read().await;
        if !state.initialized {
            return Err(ClusterError::NodeNotInitialized.into());
        }
        Ok(state.clone())
    }

    async fn require_role(&self, expected: Role) -> Result<NodeState> {
        let state = self.require_initialized().await?;
        if state.role != expected {
            return Err(ClusterError::WrongRole {
                expected: expected.name(),
                actual: state.role.name(),
            }
            .into());
        }
        Ok(state)
    }

    /// Runs the query on local data and posts the rows to `agg_url`.
    pub async fn process_query(&self, request: QueryRequest) -> Result<usize> {
        self.require_initialized().await?;
        self.execute_and_report(request).await
    }

    async fn execute_and_report(&self, request: QueryRequest) -> Result<usize> {
        let started = Instant::now();
        let query = request.query.clone();
        let rows = run_blocking(&self.engine, move |engine| engine.execute(&query)).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let count = rows.len();

        let callback = ResultCallback {
            results: rows,
            query_id: request.query_id.clone(),
            worker_id: request.worker_id.clone(),
            elapsed_ms,
        };
        self.client
            .post_expect_success(&request.agg_url, &callback)
            .await?;
        tracing::info!(
            "Query {}: {} rows in {} ms reported to {}",
            request.query_id,
            count,
            elapsed_ms,
            request.agg_url
        );
        Ok(count)
    }

    /// Pushes every row of the requested tables this node holds to `agg_url`, in
    /// batches of `network.batch_size`. Returns rows pushed.
    pub async fn process_data(&self, request: DataRequest) -> Result<usize> {
        let state = self.require_initialized().await?;

        let mut pushed = 0;
        for table in &request.tables {
            validate_table(table)?;
            if !state.loaded_tables.contains(table) {
                tracing::debug!("No rows of {} on this node", table);
                continue;
            }

            let sql = format!("SELECT * FROM {}", table);
            let rows = run_blocking(&self.engine, move |engine| engine.execute(&sql)).await?;
            pushed += self.push_rows(table, rows, &request.agg_url).await?;
        }
        tracing::info!("Pushed {} rows to {}", pushed, request.agg_url);
        Ok(pushed)
    }

    async fn push_rows(&self, table: &str, rows: Vec<Row>, agg_url: &str) -> Result<usize> {
        let batch_size = self.config.network.batch_size.max(1);
        for chunk in rows.chunks(batch_size) {
            let batch = DataBatch {
                name: table.to_string(),
                rows: chunk.to_vec(),
            };
            self.client.post_expect_success(agg_url, &batch).await?;
        }
        Ok(rows.len())
    }

    /// Leader: has both followers push their shards, then pushes its own rows. Fails
    /// without pushing its own rows when a follower did not complete its push.
    pub async fn leader_data(&self, request: DataRequest) -> Result<usize> {
        let state = self.require_role(Role::Leader).await?;
        let followers: Vec<Node> = state.followers.iter().map(|url| Node::from_url(url)).collect();

        let summary = fan_out(
            &followers,
            self.config.network.max_concurrency,
            |node| {
                let client = self.client.clone();
                let payload = request.clone();
                async move {
                    client
                        .post_expect_success(&node.endpoint(ENDPOINT_PROCESS_DATA), &payload)
                        .await
                }
            },
        )
        .await;
        summary.log_failures("leader_data");
        ensure_followers_answered("leader_data", &summary)?;

        self.process_data(request).await
    }

    /// Leader: pulls the followers' shard manifests, loads shards not loaded yet,
    /// then executes and reports like `process_query`. A follower that cannot be
    /// synced fails the call before anything is reported.
    pub async fn leader_results(&self, request: QueryRequest) -> Result<usize> {
        let state = self.require_role(Role::Leader).await?;
        self.sync_followers(&state.followers).await?;
        self.execute_and_report(request).await
    }

    async fn sync_followers(&self, followers: &[String]) -> Result<()> {
        let _sync = self.sync_lock.lock().await;
        let followers: Vec<Node> = followers.iter().map(|url| Node::from_url(url)).collect();

        let summary = fan_out(
            &followers,
            self.config.network.max_concurrency,
            |node| {
                let client = self.client.clone();
                async move {
                    client
                        .post_json::<_, FollowerManifest>(
                            &node.endpoint(ENDPOINT_FOLLOWER_SYNC),
                            &serde_json::json!({}),
                        )
                        .await
                }
            },
        )
        .await;
        summary.log_failures("follower_sync");
        ensure_followers_answered("follower_sync", &summary)?;

        let synced = self.state.read().await.synced_files.clone();
        let pending: Vec<(String, PathBuf)> = summary
            .successes()
            .flat_map(|(_, manifest)| manifest.files.iter())
            .filter(|(_, path)| !synced.contains(*path))
            .map(|(t, p)| (t.clone(), p.clone()))
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        for (table, _) in &pending {
            validate_table(table)?;
        }

        let files = pending.clone();
        run_blocking(&self.engine, move |engine| {
            for (table, path) in &files {
                let rows = engine.bulk_load(table, path, TBL_DELIMITER)?;
                tracing::info!("Synced {} ({} rows) from {}", table, rows, path.display());
            }
            Ok(())
        })
        .await?;

        let mut state = self.state.write().await;
        for (table, path) in pending {
            state.loaded_tables.insert(table);
            state.synced_files.insert(path);
        }
        Ok(())
    }

    /// Follower: the shard files this node was given at init.
    pub async fn follower_sync(&self) -> Result<FollowerManifest> {
        let state = self.require_role(Role::Follower).await?;
        Ok(FollowerManifest {
            files: state.shard_files,
        })
    }
}

/// A triad answer covers the leader and both followers or nothing at all.
fn ensure_followers_answered<T>(label: &str, summary: &RoundSummary<T>) -> Result<()> {
    let failed: Vec<String> = summary.failures().map(|(id, _)| id.to_string()).collect();
    if failed.is_empty() {
        return Ok(());
    }
    Err(anyhow::anyhow!(
        "{}: followers {} did not answer",
        label,
        failed.join(", ")
    ))
}
