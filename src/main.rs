use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tpch_cluster::config::ClusterConfig;
use tpch_cluster::coordinator::{self, Coordinator};
use tpch_cluster::node::{self, runtime::NodeRuntime};

#[derive(Debug, Parser)]
#[command(name = "tpch_cluster", about = "TPC-H query cluster: coordinator or worker node")]
struct Cli {
    /// Cluster configuration file (TOML)
    #[arg(long, short, global = true, default_value = "cluster.toml")]
    config: PathBuf,

    /// Log level: error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    role: Role,
}

#[derive(Debug, Subcommand)]
enum Role {
    /// Run the coordinator (aggregator)
    Coordinator {
        #[arg(long, default_value = "0.0.0.0:5001")]
        bind: SocketAddr,
    },
    /// Run a worker node
    Node {
        #[arg(long, default_value = "0.0.0.0:5001")]
        bind: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .init();

    // 1. Configuration:
    let config = ClusterConfig::load(&cli.config)?;

    // 2. Context object and router:
    let (app, bind_addr) = match cli.role {
        Role::Coordinator { bind } => {
            let nodes = config.node_list();
            tracing::info!("Starting coordinator on {} with {} nodes", bind, nodes.len());
            for node in &nodes {
                tracing::info!("  - node {} at {}", node.id, node.url);
            }
            let coordinator = Arc::new(Coordinator::from_config(config)?);
            (coordinator::router(coordinator), bind)
        }
        Role::Node { bind } => {
            tracing::info!("Starting node on {}", bind);
            let runtime = Arc::new(NodeRuntime::from_config(config)?);
            (node::router(runtime), bind)
        }
    };

    // 3. Start HTTP server:
    tracing::info!("HTTP server listening on {}", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {}", bind_addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
