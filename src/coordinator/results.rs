//! Result Sink
//!
//! Persists every per-request artifact as `{query_id}_{source}.json` under the
//! results directory. Writes go to a temporary sibling first and are renamed into
//! place, so a reader never sees a half-written record. Writing the same
//! `(query_id, source)` twice replaces the earlier record.

use anyhow::{Context, Result};
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::cluster::types::NodeId;
use crate::error::ClusterError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordSource {
    /// The coordinator's own result in local mode.
    Aggregator,
    /// A node's result callback.
    Worker(NodeId),
    /// Timing of one dispatch round.
    NetworkLatency,
}

impl RecordSource {
    pub fn suffix(&self) -> String {
        match self {
            RecordSource::Aggregator => "aggregator".to_string(),
            RecordSource::Worker(id) => format!("worker_{}", id),
            RecordSource::NetworkLatency => "network_latency".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub query_id: String,
    pub source: String,
    pub elapsed_ms: u64,
    pub recorded_at_ms: u64,
    pub payload: serde_json::Value,
}

pub struct ResultSink {
    dir: PathBuf,
    /// query id -> sources written by this process
    written: DashMap<String, BTreeSet<String>>,
}

impl ResultSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: DashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, query_id: &str, source: &RecordSource) -> PathBuf {
        self.dir
            .join(format!("{}_{}.json", query_id, source.suffix()))
    }

    pub async fn record(
        &self,
        query_id: &str,
        source: RecordSource,
        elapsed_ms: u64,
        payload: serde_json::Value,
    ) -> Result<PathBuf> {
        validate_query_id(query_id)?;
        if let RecordSource::Worker(id) = &source {
            validate_worker_id(id)?;
        }

        let record = ResultRecord {
            query_id: query_id.to_string(),
            source: source.suffix(),
            elapsed_ms,
            recorded_at_ms: now_ms(),
            payload,
        };
        let path = self.record_path(query_id, &source);
        let tmp = path.with_extension("json.tmp");

        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("creating results dir {}", self.dir.display()))?;
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&record)?)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path).await?;

        self.written
            .entry(query_id.to_string())
            .or_default()
            .insert(record.source);
        tracing::debug!("Recorded {}", path.display());
        Ok(path)
    }

    /// Sources recorded for `query_id` since this process started.
    pub fn sources_for(&self, query_id: &str) -> Vec<String> {
        self.written
            .get(query_id)
            .map(|sources| sources.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every record on disk for `query_id`, sorted by source.
    pub async fn records_for(&self, query_id: &str) -> Result<Vec<ResultRecord>> {
        validate_query_id(query_id)?;

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{}_", query_id);
        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            let Some(source) = stem.strip_prefix(&prefix) else {
                continue;
            };
            // "q_1_aggregator" is not a record of query "q"
            if !source_pattern().is_match(source) {
                continue;
            }
            let bytes = tokio::fs::read(entry.path()).await?;
            records.push(serde_json::from_slice::<ResultRecord>(&bytes)?);
        }
        records.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(records)
    }
}

fn query_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9_.-]{0,127}$").expect("valid query id regex"))
}

fn worker_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9-]{1,64}$").expect("valid worker id regex"))
}

fn source_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(aggregator|network_latency|worker_[A-Za-z0-9-]+)$").expect("valid source regex")
    })
}

/// Request ids become file names, so only a conservative alphabet is accepted.
pub fn validate_query_id(query_id: &str) -> Result<(), ClusterError> {
    if query_id_pattern().is_match(query_id) {
        Ok(())
    } else {
        Err(ClusterError::InvalidQueryId(query_id.to_string()))
    }
}

pub fn validate_worker_id(id: &NodeId) -> Result<(), ClusterError> {
    if worker_id_pattern().is_match(&id.0) {
        Ok(())
    } else {
        Err(ClusterError::InvalidPayload(format!("invalid worker id {:?}", id.0)))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
