//! Coordinator Module
//!
//! The coordinator owns the cluster state, prepares shard files on the shared mount,
//! pushes each node its role and files, and dispatches every query round.
//!
//! ## Submodules
//! - **`state`**: `ClusterState` and its serializable `/status` snapshot.
//! - **`smart`**: `InitPlan`, from explicit table lists or from a sample query.
//! - **`initializer`**: The one-shot initialization protocol.
//! - **`dispatcher`**: Fan-out of `/send_task` rounds by architecture and mode.
//! - **`results`**: `ResultSink`, the per-request JSON records.
//! - **`protocol`**: Endpoint paths and request/response bodies.
//! - **`handlers`**: Axum handlers binding the above to HTTP.

pub mod dispatcher;
pub mod handlers;
pub mod initializer;
pub mod protocol;
pub mod results;
pub mod smart;
pub mod state;

use anyhow::{Context, Result};
use axum::Extension;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::cluster::client::NodeClient;
use crate::config::ClusterConfig;
use crate::engine::extract::{SqlTableExtractor, TableExtractor};
use crate::engine::sqlite::SqliteEngine;
use crate::engine::{RelationalEngine, SharedEngine};
use crate::error::ClusterError;
use crate::partition::splitter::PartitionSplitter;
use protocol::*;
use results::ResultSink;
use state::{ClusterState, ClusterStatus};

pub struct Coordinator {
    config: ClusterConfig,
    state: RwLock<ClusterState>,
    /// Serializes initialization attempts.
    init_lock: Mutex<()>,
    /// Local-mode rounds share the coordinator's tables and run one at a time.
    local_round: Mutex<()>,
    engine: SharedEngine,
    extractor: Arc<dyn TableExtractor>,
    splitter: PartitionSplitter,
    client: NodeClient,
    results: ResultSink,
}

impl Coordinator {
    pub fn new(
        config: ClusterConfig,
        engine: SharedEngine,
        extractor: Arc<dyn TableExtractor>,
    ) -> Result<Self> {
        let nodes = config.node_list();
        if nodes.is_empty() {
            return Err(ClusterError::NoNodes.into());
        }

        let mount = config.cluster.mount.clone();
        Ok(Self {
            state: RwLock::new(ClusterState::new(nodes, mount.clone())),
            init_lock: Mutex::new(()),
            local_round: Mutex::new(()),
            engine,
            extractor,
            splitter: PartitionSplitter::new(mount),
            client: NodeClient::new(config.call_timeout(), config.network.retry_attempts),
            results: ResultSink::new(config.cluster.results_dir.clone()),
            config,
        })
    }

    /// Opens the configured database, applies the schema file if any, and uses the
    /// SQL parser based extractor.
    pub fn from_config(config: ClusterConfig) -> Result<Self> {
        let engine = SqliteEngine::open(&config.database.path)?;
        if let Some(schema) = &config.database.schema {
            let ddl = std::fs::read_to_string(schema)
                .with_context(|| format!("reading schema {}", schema.display()))?;
            engine.apply_schema(&ddl)?;
        }
        Self::new(config, Arc::new(engine), Arc::new(SqlTableExtractor))
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub fn results(&self) -> &ResultSink {
        &self.results
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.read().await.is_initialized()
    }

    pub async fn status(&self) -> ClusterStatus {
        self.state.read().await.snapshot()
    }
}

pub fn router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route(ENDPOINT_INIT, post(handlers::handle_init))
        .route(ENDPOINT_SMART_INIT, post(handlers::handle_smart_init))
        .route(ENDPOINT_SEND_TASK, post(handlers::handle_send_task))
        .route(ENDPOINT_RECEIVE_RESULT, post(handlers::handle_receive_result))
        .route(ENDPOINT_RECEIVE_DATA, post(handlers::handle_receive_data))
        .route(ENDPOINT_STATUS, get(handlers::handle_status))
        .route(
            &format!("{}/:query_id", ENDPOINT_RESULTS),
            get(handlers::handle_results),
        )
        .layer(Extension(coordinator))
}
