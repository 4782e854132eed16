use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reqwest::StatusCode;
use serde::Serialize;
use std::path::PathBuf;
use tpch_cluster::cluster::types::{Architecture, Mode, TPCH_TABLES, validate_table};
use tpch_cluster::coordinator::protocol::{
    ENDPOINT_INIT, ENDPOINT_RESULTS, ENDPOINT_SEND_TASK, ENDPOINT_SMART_INIT, ENDPOINT_STATUS,
    InitRequest, SmartInitRequest, TaskRequest,
};

#[derive(Parser)]
#[command(name = "manager", about = "Initializes the cluster and sends queries to the coordinator")]
struct Cli {
    /// Coordinator base URL
    #[arg(short, long, global = true, default_value = "http://localhost:5001")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize with an explicit list of partitioned tables; every other TPC-H
    /// table is loaded whole
    Init {
        /// Tables to partition
        #[arg(short, long, num_args = 1.., required = true)]
        partition: Vec<String>,

        /// Architecture (0: flat, 1: leader/follower)
        #[arg(short, long)]
        arch: u8,

        /// Mode (0: local, 1: distributed)
        #[arg(short, long)]
        mode: u8,
    },

    /// Initialize from a sample query
    SmartInit {
        /// SQL file
        #[arg(short, long)]
        query_file: PathBuf,

        /// TPC-H query number
        #[arg(short, long)]
        number: u32,

        #[arg(short, long)]
        arch: u8,

        #[arg(short, long)]
        mode: u8,
    },

    /// Run a query on the cluster
    Send {
        /// SQL file
        #[arg(short, long)]
        query_file: PathBuf,

        /// Request id; a random one is generated when omitted
        #[arg(short = 'i', long)]
        query_id: Option<String>,

        /// Tables to pull back in local mode
        #[arg(short, long, num_args = 0..)]
        tables: Vec<String>,
    },

    /// Show the records written for a request id
    Results { query_id: String },

    /// Show the coordinator's cluster state
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let cli = Cli::parse();
    let base = cli.url.trim_end_matches('/').to_string();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Init {
            partition,
            arch,
            mode,
        } => {
            let (arch, mode) = parse_arch_mode(arch, mode)?;
            for table in &partition {
                validate_table(table)?;
            }
            let non_partition = TPCH_TABLES
                .iter()
                .filter(|t| !partition.iter().any(|p| p == *t))
                .map(|t| t.to_string())
                .collect();
            let request = InitRequest {
                partition,
                non_partition,
                arch,
                mode,
            };
            report_init(post(&client, &base, ENDPOINT_INIT, &request).await?).await
        }
        Commands::SmartInit {
            query_file,
            number,
            arch,
            mode,
        } => {
            let (arch, mode) = parse_arch_mode(arch, mode)?;
            let request = SmartInitRequest {
                arch,
                mode,
                sample_query: read_query(&query_file)?,
                number_query: number,
            };
            report_init(post(&client, &base, ENDPOINT_SMART_INIT, &request).await?).await
        }
        Commands::Send {
            query_file,
            query_id,
            tables,
        } => {
            for table in &tables {
                validate_table(table)?;
            }
            let query_id = query_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let request = TaskRequest {
                query: read_query(&query_file)?,
                tables,
                query_id: query_id.clone(),
            };
            let response = post(&client, &base, ENDPOINT_SEND_TASK, &request).await?;
            println!("query id: {}", query_id);
            print_body(response).await
        }
        Commands::Results { query_id } => {
            let url = format!("{}{}/{}", base, ENDPOINT_RESULTS, query_id);
            print_body(client.get(url).send().await?).await
        }
        Commands::Status => {
            let url = format!("{}{}", base, ENDPOINT_STATUS);
            print_body(client.get(url).send().await?).await
        }
    }
}

fn parse_arch_mode(arch: u8, mode: u8) -> Result<(Architecture, Mode)> {
    let arch = Architecture::try_from(arch).map_err(anyhow::Error::msg)?;
    let mode = Mode::try_from(mode).map_err(anyhow::Error::msg)?;
    Ok((arch, mode))
}

fn read_query(path: &PathBuf) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading query file {}", path.display()))
}

async fn post<T: Serialize>(
    client: &reqwest::Client,
    base: &str,
    endpoint: &str,
    payload: &T,
) -> Result<reqwest::Response> {
    let url = format!("{}{}", base, endpoint);
    client
        .post(&url)
        .json(payload)
        .send()
        .await
        .with_context(|| format!("POST {}", url))
}

async fn report_init(response: reqwest::Response) -> Result<()> {
    match response.status() {
        StatusCode::OK => {
            println!("System initialized");
            Ok(())
        }
        StatusCode::CREATED => {
            println!("System already initialized");
            Ok(())
        }
        status => {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("initialization failed ({}): {}", status, body)
        }
    }
}

async fn print_body(response: reqwest::Response) -> Result<()> {
    let status = response.status();
    let body = response
        .json::<serde_json::Value>()
        .await
        .unwrap_or_else(|_| serde_json::json!({"error": "invalid json"}));
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        anyhow::bail!("coordinator returned {}", status);
    }
    Ok(())
}
