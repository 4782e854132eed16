//! Table File Splitter
//!
//! Both strategies read the source file fully and rewrite every shard file fully, so
//! re-running a split overwrites the previous shards cleanly.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

use super::TBL_DELIMITER;
use crate::cluster::types::NodeId;

/// Two tables restricted on a shared key, co-located by [`PartitionSplitter::smart_split`].
///
/// The left table is expected to be unique on its key; each right row references
/// at most one left row. Key columns are 0-based field positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinSpec {
    pub left_table: String,
    pub right_table: String,
    pub left_key: usize,
    pub right_key: usize,
}

/// `(table, node) -> shard file`, produced by a split and consumed once by the
/// initializer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardAssignment {
    files: BTreeMap<NodeId, BTreeMap<String, PathBuf>>,
}

impl ShardAssignment {
    pub fn insert(&mut self, node: NodeId, table: &str, path: PathBuf) {
        self.files
            .entry(node)
            .or_default()
            .insert(table.to_string(), path);
    }

    pub fn merge(&mut self, other: ShardAssignment) {
        for (node, tables) in other.files {
            self.files.entry(node).or_default().extend(tables);
        }
    }

    pub fn get(&self, table: &str, node: &NodeId) -> Option<&PathBuf> {
        self.files.get(node).and_then(|tables| tables.get(table))
    }

    /// Every shard assigned to `node`, keyed by table.
    pub fn files_for(&self, node: &NodeId) -> BTreeMap<String, PathBuf> {
        self.files.get(node).cloned().unwrap_or_default()
    }

    pub fn node_count(&self) -> usize {
        self.files.len()
    }
}

#[derive(Debug, Clone)]
pub struct PartitionSplitter {
    mount: PathBuf,
}

impl PartitionSplitter {
    pub fn new(mount: impl Into<PathBuf>) -> Self {
        Self {
            mount: mount.into(),
        }
    }

    /// `{mount}/worker_{id}_{table}.tbl`
    pub fn shard_path(&self, node: &NodeId, table: &str) -> PathBuf {
        self.mount.join(shard_file_name(node, table))
    }

    /// Uniform range split: every node but the last gets `L / k` contiguous lines,
    /// the last one also absorbs the `L % k` remainder.
    pub fn split(&self, table: &str, source: &Path, nodes: &[NodeId]) -> Result<ShardAssignment> {
        if nodes.is_empty() {
            anyhow::bail!("cannot split {} across zero nodes", table);
        }

        let data = std::fs::read(source)
            .with_context(|| format!("reading table file {}", source.display()))?;
        let lines: Vec<&[u8]> = data.split_inclusive(|b| *b == b'\n').collect();

        std::fs::create_dir_all(&self.mount)?;

        let mut assignment = ShardAssignment::default();
        for (node, range) in nodes.iter().zip(uniform_ranges(lines.len(), nodes.len())) {
            let path = self.shard_path(node, table);
            std::fs::write(&path, lines[range.clone()].concat())
                .with_context(|| format!("writing shard {}", path.display()))?;
            tracing::debug!(
                "Shard {} lines {}..{} -> {}",
                table,
                range.start,
                range.end,
                path.display()
            );
            assignment.insert(node.clone(), table, path);
        }

        tracing::info!(
            "Split {} ({} lines) across {} nodes",
            table,
            lines.len(),
            nodes.len()
        );
        Ok(assignment)
    }

    /// Join-key-aware split. Right rows are routed by a range hash of their key and
    /// each node also receives, once, every left row its right rows reference.
    ///
    /// The range hash `(key / bucket_width) % k` assumes keys densely populated from
    /// zero, which holds for generated benchmark data.
    pub fn smart_split(
        &self,
        join: &JoinSpec,
        left_source: &Path,
        right_source: &Path,
        nodes: &[NodeId],
    ) -> Result<ShardAssignment> {
        if nodes.is_empty() {
            anyhow::bail!(
                "cannot split {}/{} across zero nodes",
                join.left_table,
                join.right_table
            );
        }
        let k = nodes.len();

        let left_data = std::fs::read(left_source)
            .with_context(|| format!("reading table file {}", left_source.display()))?;
        let left_rows = keyed_rows(&left_data, join.left_key)
            .with_context(|| format!("parsing {} join keys", join.left_table))?;
        let width = bucket_width(left_rows.len(), k);

        // Last write wins on duplicate keys
        let left_by_key: HashMap<u64, &[u8]> = left_rows.iter().copied().collect();

        let right_data = std::fs::read(right_source)
            .with_context(|| format!("reading table file {}", right_source.display()))?;
        let right_rows = keyed_rows(&right_data, join.right_key)
            .with_context(|| format!("parsing {} join keys", join.right_table))?;

        let mut left_buffers: Vec<Vec<u8>> = vec![Vec::new(); k];
        let mut right_buffers: Vec<Vec<u8>> = vec![Vec::new(); k];
        let mut seen: Vec<HashSet<u64>> = vec![HashSet::new(); k];

        for (key, row) in right_rows {
            let idx = bucket_for(key, width, k);
            push_row(&mut right_buffers[idx], row);

            if let Some(left_row) = left_by_key.get(&key) {
                if seen[idx].insert(key) {
                    push_row(&mut left_buffers[idx], left_row);
                }
            }
        }

        std::fs::create_dir_all(&self.mount)?;

        let mut assignment = ShardAssignment::default();
        for (idx, node) in nodes.iter().enumerate() {
            for (table, buffer) in [
                (&join.left_table, &left_buffers[idx]),
                (&join.right_table, &right_buffers[idx]),
            ] {
                let path = self.shard_path(node, table);
                // Truncate, then flush the node's whole batch in one append
                std::fs::File::create(&path)
                    .with_context(|| format!("creating shard {}", path.display()))?;
                let mut file = OpenOptions::new().append(true).open(&path)?;
                file.write_all(buffer)?;
                assignment.insert(node.clone(), table, path);
            }
        }

        tracing::info!(
            "Join-split {} ({} rows) / {} across {} nodes, bucket width {}",
            join.left_table,
            left_rows.len(),
            join.right_table,
            k,
            width
        );
        Ok(assignment)
    }
}

pub fn shard_file_name(node: &NodeId, table: &str) -> String {
    format!("worker_{}_{}.tbl", node, table)
}

/// Contiguous line ranges for a uniform split of `lines` lines over `k` nodes.
pub fn uniform_ranges(lines: usize, k: usize) -> Vec<Range<usize>> {
    if k == 0 {
        return Vec::new();
    }
    let base = lines / k;
    (0..k)
        .map(|i| {
            let start = i * base;
            let end = if i + 1 == k { lines } else { start + base };
            start..end
        })
        .collect()
}

/// `|left| / k`, never below one so the range hash stays defined for tiny tables.
pub fn bucket_width(left_rows: usize, k: usize) -> u64 {
    (left_rows / k.max(1)).max(1) as u64
}

pub fn bucket_for(key: u64, width: u64, k: usize) -> usize {
    ((key / width.max(1)) % k as u64) as usize
}

fn push_row(buffer: &mut Vec<u8>, row: &[u8]) {
    buffer.extend_from_slice(row);
    if !row.ends_with(b"\n") {
        buffer.push(b'\n');
    }
}

/// Splits `data` into raw row slices paired with the integer key at `key_col`.
///
/// Rows are cut at the byte offsets the CSV reader reports, so every slice is the
/// exact original text of its row, quoting and line terminator included.
fn keyed_rows(data: &[u8], key_col: usize) -> Result<Vec<(u64, &[u8])>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(TBL_DELIMITER)
        .has_headers(false)
        .flexible(true)
        .from_reader(data);

    let mut starts: Vec<(usize, u64)> = Vec::new();
    let mut record = csv::ByteRecord::new();
    while reader.read_byte_record(&mut record)? {
        let start = record
            .position()
            .map(|p| p.byte() as usize)
            .ok_or_else(|| anyhow::anyhow!("csv reader did not report a record position"))?;
        let field = record.get(key_col).ok_or_else(|| {
            anyhow::anyhow!("row at line {} has no column {}", starts.len() + 1, key_col)
        })?;
        let text = std::str::from_utf8(field)?.trim();
        let key = text.parse::<u64>().with_context(|| {
            format!(
                "join key {:?} at line {} is not an unsigned integer",
                text,
                starts.len() + 1
            )
        })?;
        starts.push((start, key));
    }

    let rows = starts
        .iter()
        .enumerate()
        .map(|(i, (start, key))| {
            let end = starts.get(i + 1).map(|(s, _)| *s).unwrap_or(data.len());
            (*key, &data[*start..end])
        })
        .collect();
    Ok(rows)
}
