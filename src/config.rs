//! Cluster Configuration
//!
//! Static configuration read once at process startup by both the coordinator and the
//! nodes. Every field has a default so a partial file is valid.
//!
//! ```toml
//! [cluster]
//! num_nodes = 4
//! node_host = "worker_node_{id}"
//! node_base_port = 5001
//! coordinator_url = "http://aggregator:5001"
//! mount = "/mnt/shared"
//!
//! [network]
//! call_timeout_secs = 120
//!
//! [database]
//! path = ":memory:"
//! schema = "schema/tpch.sql"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cluster::types::{Node, NodeId};
use crate::error::ClusterError;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub cluster: ClusterSection,
    pub network: NetworkSection,
    pub database: DatabaseSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    pub num_nodes: usize,
    /// Host name template; `{id}` is replaced with the 1-based node id.
    pub node_host: String,
    pub node_base_port: u16,
    /// When set, node `i` listens on `node_base_port + i - 1`.
    pub port_per_node: bool,
    /// Explicit node base URLs. Overrides the naming convention when non-empty.
    pub nodes: Vec<String>,
    /// Base URL nodes use to reach the coordinator.
    pub coordinator_url: String,
    /// Shared mount point holding shard files.
    pub mount: PathBuf,
    /// Directory holding the raw `{table}.tbl` files.
    pub data_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            num_nodes: 2,
            node_host: "worker_node_{id}".to_string(),
            node_base_port: 5001,
            port_per_node: false,
            nodes: Vec::new(),
            coordinator_url: "http://aggregator:5001".to_string(),
            mount: PathBuf::from("/mnt/shared"),
            data_dir: PathBuf::from("/mnt/shared/tbl"),
            results_dir: PathBuf::from("query-results"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSection {
    pub call_timeout_secs: u64,
    pub init_timeout_secs: u64,
    pub retry_attempts: usize,
    pub max_concurrency: usize,
    /// Rows per `/receive_data` batch when a node streams a table back.
    pub batch_size: usize,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            call_timeout_secs: 120,
            init_timeout_secs: 600,
            retry_attempts: 3,
            max_concurrency: 16,
            batch_size: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    /// SQLite database file, or `:memory:`.
    pub path: String,
    /// Optional DDL file applied at startup.
    pub schema: Option<PathBuf>,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: ":memory:".to_string(),
            schema: None,
        }
    }
}

impl ClusterConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: ClusterConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.cluster.nodes.is_empty() && self.cluster.num_nodes == 0 {
            return Err(ClusterError::NoNodes.into());
        }
        if self.network.batch_size == 0 {
            return Err(ClusterError::Config("network.batch_size must be positive".into()).into());
        }
        Ok(())
    }

    /// The positional node list. Node `i` is reachable at an address derived from
    /// the naming convention unless explicit URLs are configured.
    pub fn node_list(&self) -> Vec<Node> {
        if !self.cluster.nodes.is_empty() {
            return self
                .cluster
                .nodes
                .iter()
                .enumerate()
                .map(|(idx, url)| Node {
                    id: NodeId::from_index(idx + 1),
                    url: url.trim_end_matches('/').to_string(),
                })
                .collect();
        }

        (1..=self.cluster.num_nodes)
            .map(|index| {
                let host = self.cluster.node_host.replace("{id}", &index.to_string());
                let port = if self.cluster.port_per_node {
                    self.cluster.node_base_port as usize + index - 1
                } else {
                    self.cluster.node_base_port as usize
                };
                Node {
                    id: NodeId::from_index(index),
                    url: format!("http://{}:{}", host, port),
                }
            })
            .collect()
    }

    pub fn coordinator_url(&self) -> &str {
        self.cluster.coordinator_url.trim_end_matches('/')
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.network.call_timeout_secs)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.network.init_timeout_secs)
    }

    /// Location of the raw, unsplit file for `table`.
    pub fn table_file(&self, table: &str) -> PathBuf {
        self.cluster.data_dir.join(format!("{}.tbl", table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_to_empty_file() {
        let config = ClusterConfig::from_toml("").unwrap();
        assert_eq!(config.cluster.num_nodes, 2);
        assert_eq!(config.network.retry_attempts, 3);
        assert_eq!(config.database.path, ":memory:");
    }

    #[test]
    fn test_node_list_from_naming_convention() {
        let config = ClusterConfig::from_toml(
            r#"
            [cluster]
            num_nodes = 3
            node_host = "worker_node_{id}"
            node_base_port = 5001
            "#,
        )
        .unwrap();

        let nodes = config.node_list();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].id.0, "1");
        assert_eq!(nodes[2].url, "http://worker_node_3:5001");
    }

    #[test]
    fn test_node_list_with_port_per_node() {
        let config = ClusterConfig::from_toml(
            r#"
            [cluster]
            num_nodes = 2
            node_host = "localhost"
            node_base_port = 7000
            port_per_node = true
            "#,
        )
        .unwrap();

        let urls: Vec<String> = config.node_list().into_iter().map(|n| n.url).collect();
        assert_eq!(urls, vec!["http://localhost:7000", "http://localhost:7001"]);
    }

    #[test]
    fn test_explicit_nodes_override_convention() {
        let config = ClusterConfig::from_toml(
            r#"
            [cluster]
            num_nodes = 9
            nodes = ["http://10.0.0.1:5001/", "http://10.0.0.2:5001"]
            "#,
        )
        .unwrap();

        let nodes = config.node_list();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].url, "http://10.0.0.1:5001");
        assert_eq!(nodes[1].id.0, "2");
    }

    #[test]
    fn test_zero_nodes_rejected() {
        let result = ClusterConfig::from_toml("[cluster]\nnum_nodes = 0\n");
        assert!(result.is_err());
    }
}
