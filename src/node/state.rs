use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::cluster::types::Role;

/// What a node knows about itself. Replaced wholesale by every `/receive_init`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NodeState {
    pub initialized: bool,
    pub role: Role,
    /// Leader base URL (followers only).
    pub leader: Option<String>,
    /// Follower base URLs (leaders only).
    pub followers: Vec<String>,
    /// Every file loaded at init, by table.
    pub files: BTreeMap<String, PathBuf>,
    /// The subset of `files` that are split shards, reported by `/follower_sync`.
    pub shard_files: BTreeMap<String, PathBuf>,
    /// Tables holding rows on this node.
    pub loaded_tables: BTreeSet<String>,
    /// Follower shard files a leader has already appended to its own tables.
    pub synced_files: BTreeSet<PathBuf>,
}

fn shard_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^worker_\d+_.+\.tbl$").expect("valid shard regex"))
}

/// True when `path` names a split shard (`worker_{id}_{table}.tbl`) rather than a
/// whole table file.
pub fn is_shard_file(path: &Path) -> bool {
    path.file_name()
        .map(|name| shard_pattern().is_match(&name.to_string_lossy()))
        .unwrap_or(false)
}
