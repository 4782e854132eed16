//! Cluster Initialization
//!
//! Runs at most once per coordinator lifetime:
//! 1. Build the topology (flat, or triads when replication is requested and possible).
//! 2. Split the partitioned tables across the shard holders.
//! 3. Place the whole tables: loaded into the coordinator's engine in local mode,
//!    handed to the entry nodes in distributed mode.
//! 4. Push every node its role, files and triad addresses.
//!
//! A node that fails its init message is logged and skipped; it will be missing
//! from later rounds. A failure in steps 2 or 3 leaves the cluster uninitialized.

use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use crate::cluster::fanout::{RoundReport, fan_out};
use crate::cluster::topology::Topology;
use crate::cluster::types::{Architecture, Mode, NodeId, Role};
use crate::engine::run_blocking;
use crate::node::protocol::{ENDPOINT_NODE_INIT, InitMessage};
use crate::partition::TBL_DELIMITER;
use crate::partition::splitter::ShardAssignment;

use super::Coordinator;
use super::protocol::{InitRequest, SmartInitRequest};
use super::smart::InitPlan;
use super::state::InitPhase;

#[derive(Debug, Clone, Serialize)]
pub struct InitReport {
    pub architecture: Architecture,
    pub mode: Mode,
    pub partitioned: Vec<String>,
    pub whole: Vec<String>,
    pub delivery: RoundReport,
}

#[derive(Debug, Clone)]
pub enum InitOutcome {
    Initialized(InitReport),
    AlreadyInitialized,
}

impl Coordinator {
    pub async fn initialize(&self, request: InitRequest) -> Result<InitOutcome> {
        let _guard = self.init_lock.lock().await;
        if self.state.read().await.is_initialized() {
            return Ok(InitOutcome::AlreadyInitialized);
        }

        let plan = InitPlan::explicit(&request)?;
        self.initialize_locked(plan).await
    }

    pub async fn smart_initialize(&self, request: SmartInitRequest) -> Result<InitOutcome> {
        let _guard = self.init_lock.lock().await;
        if self.state.read().await.is_initialized() {
            return Ok(InitOutcome::AlreadyInitialized);
        }

        let references = self.extractor.extract(&request.sample_query)?;
        let plan = InitPlan::from_query(
            request.number_query,
            &references,
            request.arch,
            request.mode,
        )?;
        tracing::info!(
            "Query {} plan: partition {:?}, whole {:?}",
            request.number_query,
            plan.partition,
            plan.whole
        );
        self.initialize_locked(plan).await
    }

    async fn initialize_locked(&self, plan: InitPlan) -> Result<InitOutcome> {
        self.state.write().await.phase = InitPhase::Initializing;

        match self.prepare_and_deliver(&plan).await {
            Ok((topology, delivery)) => {
                let mut state = self.state.write().await;
                state.apply(&topology, plan.mode, plan.partition.clone(), plan.whole.clone());
                tracing::info!(
                    "Cluster initialized: {:?}/{:?}, {} nodes, {} reachable",
                    state.architecture,
                    state.mode,
                    state.nodes.len(),
                    delivery.succeeded
                );
                Ok(InitOutcome::Initialized(InitReport {
                    architecture: state.architecture,
                    mode: state.mode,
                    partitioned: plan.partition,
                    whole: plan.whole,
                    delivery,
                }))
            }
            Err(e) => {
                self.state.write().await.phase = InitPhase::Uninitialized;
                tracing::error!("Initialization failed: {:#}", e);
                Err(e)
            }
        }
    }

    async fn prepare_and_deliver(&self, plan: &InitPlan) -> Result<(Topology, RoundReport)> {
        let nodes = self.state.read().await.nodes.clone();
        let topology = Topology::build(&nodes, plan.architecture);
        let holders: Vec<NodeId> = topology
            .shard_holders()
            .into_iter()
            .map(|n| n.id)
            .collect();

        let shards = self.split_tables(plan, holders).await?;
        let whole_files = self.place_whole_tables(plan).await?;
        let messages = build_init_messages(&topology, &shards, &whole_files);

        let client = self.client.with_timeout(self.config.init_timeout());
        let summary = fan_out(
            topology.nodes(),
            self.config.network.max_concurrency,
            |node| {
                let message = messages.get(&node.id).cloned();
                let client = client.clone();
                async move {
                    let message = message
                        .ok_or_else(|| anyhow::anyhow!("no init message for node {}", node.id))?;
                    client
                        .post_expect_success(&node.endpoint(ENDPOINT_NODE_INIT), &message)
                        .await
                }
            },
        )
        .await;
        summary.log_failures("init");

        Ok((topology, summary.report()))
    }

    async fn split_tables(&self, plan: &InitPlan, holders: Vec<NodeId>) -> Result<ShardAssignment> {
        let splitter = self.splitter.clone();
        let join = plan
            .join
            .clone()
            .map(|join| {
                let left = self.config.table_file(&join.left_table);
                let right = self.config.table_file(&join.right_table);
                (join, left, right)
            });
        let uniform: Vec<(String, PathBuf)> = plan
            .partition
            .iter()
            .filter(|table| {
                plan.join
                    .as_ref()
                    .is_none_or(|j| **table != j.left_table && **table != j.right_table)
            })
            .map(|table| (table.clone(), self.config.table_file(table)))
            .collect();

        tokio::task::spawn_blocking(move || {
            let mut shards = ShardAssignment::default();
            if let Some((join, left, right)) = join {
                shards.merge(splitter.smart_split(&join, &left, &right, &holders)?);
            }
            for (table, source) in uniform {
                shards.merge(splitter.split(&table, &source, &holders)?);
            }
            Ok::<_, anyhow::Error>(shards)
        })
        .await?
    }

    /// Loads whole tables locally (local mode) or returns the files the entry nodes
    /// load themselves (distributed mode).
    async fn place_whole_tables(&self, plan: &InitPlan) -> Result<BTreeMap<String, PathBuf>> {
        let files: BTreeMap<String, PathBuf> = plan
            .whole
            .iter()
            .map(|table| (table.clone(), self.config.table_file(table)))
            .collect();

        match plan.mode {
            Mode::Distributed => Ok(files),
            Mode::Local => {
                run_blocking(&self.engine, move |engine| {
                    for (table, path) in &files {
                        engine.truncate(table)?;
                        let rows = engine.bulk_load(table, path, TBL_DELIMITER)?;
                        tracing::info!("Loaded whole table {} ({} rows)", table, rows);
                    }
                    Ok(())
                })
                .await?;
                Ok(BTreeMap::new())
            }
        }
    }
}

/// One init message per node: its role, its shard files plus (for entry nodes) the
/// whole-table files, and its triad peers.
pub fn build_init_messages(
    topology: &Topology,
    shards: &ShardAssignment,
    whole_files: &BTreeMap<String, PathBuf>,
) -> BTreeMap<NodeId, InitMessage> {
    let entry: HashSet<NodeId> = topology.entry_nodes().into_iter().map(|n| n.id).collect();

    topology
        .nodes()
        .iter()
        .map(|node| {
            let mut files = shards.files_for(&node.id);
            if entry.contains(&node.id) {
                files.extend(whole_files.iter().map(|(t, p)| (t.clone(), p.clone())));
            }

            let role = topology.role_of(&node.id);
            let (leader_address, follower_addresses) = match (role, topology.triad_of(&node.id)) {
                (Role::Leader, Some(triad)) => (
                    None,
                    triad.followers.iter().map(|f| f.url.clone()).collect(),
                ),
                (Role::Follower, Some(triad)) => (Some(triad.leader.url.clone()), Vec::new()),
                _ => (None, Vec::new()),
            };

            let message = InitMessage {
                worker_type: role,
                files,
                leader_address,
                follower_addresses,
            };
            (node.id.clone(), message)
        })
        .collect()
}
