//! End-to-end cluster scenarios.
//!
//! Every test starts a real coordinator and real nodes as axum servers on ephemeral
//! localhost ports, all sharing one temporary directory as the mount, then drives
//! the coordinator over HTTP the way the manager CLI does. Each node logs the paths
//! of the requests it receives.

use axum::Router;
use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tpch_cluster::cluster::types::NodeId;
use tpch_cluster::config::ClusterConfig;
use tpch_cluster::coordinator::{self, Coordinator};
use tpch_cluster::engine::extract::SqlTableExtractor;
use tpch_cluster::engine::sqlite::SqliteEngine;
use tpch_cluster::engine::{RelationalEngine, SharedEngine};
use tpch_cluster::node::{self, runtime::NodeRuntime};

const SCHEMA: &str = include_str!("../schema/tpch.sql");

type CallLog = Arc<Mutex<Vec<String>>>;

struct TestCluster {
    _dir: TempDir,
    base: String,
    coordinator: Arc<Coordinator>,
    nodes: Vec<Arc<NodeRuntime>>,
    /// Request paths received, per node
    calls: Vec<CallLog>,
    http: reqwest::Client,
}

async fn log_call(State(log): State<CallLog>, request: Request, next: Next) -> Response {
    log.lock().unwrap().push(request.uri().path().to_string());
    next.run(request).await
}

fn engine() -> SharedEngine {
    let engine = SqliteEngine::in_memory().unwrap();
    engine.apply_schema(SCHEMA).unwrap();
    Arc::new(engine)
}

fn base_config(dir: &Path) -> ClusterConfig {
    let mut config = ClusterConfig::default();
    config.cluster.mount = dir.join("mnt");
    config.cluster.data_dir = dir.join("tbl");
    config.cluster.results_dir = dir.join("results");
    config.network.retry_attempts = 1;
    config.network.call_timeout_secs = 30;
    config.network.init_timeout_secs = 30;
    config.network.batch_size = 128;
    config
}

async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn serve(listener: TcpListener, app: Router) {
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
}

/// Starts `n` nodes and a coordinator. `write_tables` fills the data dir first.
async fn start_cluster(n: usize, write_tables: impl FnOnce(&Path)) -> TestCluster {
    let dir = tempfile::tempdir().unwrap();
    let mut config = base_config(dir.path());
    std::fs::create_dir_all(&config.cluster.data_dir).unwrap();
    write_tables(&config.cluster.data_dir);

    let mut nodes = Vec::new();
    let mut calls = Vec::new();
    let mut urls = Vec::new();
    for _ in 0..n {
        let runtime = Arc::new(NodeRuntime::new(config.clone(), engine()));
        let log: CallLog = Arc::default();
        let (listener, addr) = bind().await;
        let app = node::router(runtime.clone())
            .layer(middleware::from_fn_with_state(log.clone(), log_call));
        serve(listener, app);
        nodes.push(runtime);
        calls.push(log);
        urls.push(format!("http://{}", addr));
    }

    let (listener, addr) = bind().await;
    let base = format!("http://{}", addr);
    config.cluster.nodes = urls;
    config.cluster.coordinator_url = base.clone();
    let coordinator =
        Arc::new(Coordinator::new(config, engine(), Arc::new(SqlTableExtractor)).unwrap());
    serve(listener, coordinator::router(coordinator.clone()));

    TestCluster {
        _dir: dir,
        base,
        coordinator,
        nodes,
        calls,
        http: reqwest::Client::new(),
    }
}

impl TestCluster {
    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let response = self
            .http
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    /// Requests node `idx` received on `path` so far.
    fn calls_to(&self, idx: usize, path: &str) -> usize {
        self.calls[idx].lock().unwrap().iter().filter(|p| *p == path).count()
    }

    async fn get(&self, path: &str) -> Value {
        self.http
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

fn count(engine: &SharedEngine, table: &str) -> i64 {
    let rows = engine
        .execute(&format!("SELECT COUNT(*) AS n FROM {}", table))
        .unwrap();
    rows[0]["n"].as_i64().unwrap()
}

fn lineitem_lines(rows: u64, orders: u64) -> String {
    (0..rows)
        .map(|i| {
            format!(
                "{}|{}|7|{}|17|21168.23|0.04|0.02|N|O|1996-03-13|1996-02-12|1996-03-22|DELIVER IN PERSON|TRUCK|regular|\n",
                i % orders,
                i,
                i + 1
            )
        })
        .collect()
}

fn orders_lines(orders: u64) -> String {
    (0..orders)
        .map(|k| format!("{}|370|O|172799.49|1996-01-02|5-LOW|Clerk#000000951|0|sleep|\n", k))
        .collect()
}

fn write(dir: &Path, table: &str, text: &str) {
    std::fs::write(dir.join(format!("{}.tbl", table)), text).unwrap();
}

fn small_tables(dir: &Path) {
    write(dir, "region", "0|AFRICA|lar deposits|\n1|AMERICA|hs use|\n");
    write(
        dir,
        "nation",
        "0|ALGERIA|0|haggle|\n1|ARGENTINA|1|al foxes|\n2|BRAZIL|1|y alongside|\n",
    );
}

fn worker_total(records: &Value) -> i64 {
    records
        .as_array()
        .unwrap()
        .iter()
        .filter(|r| r["source"].as_str().unwrap().starts_with("worker_"))
        .map(|r| r["payload"][0]["n"].as_i64().unwrap())
        .sum()
}

#[tokio::test]
async fn flat_local_pulls_partitions_and_cleans_up() {
    // ARRANGE: 4 nodes, lineitem (1000 lines) partitioned, three small tables whole
    let cluster = start_cluster(4, |dir| {
        write(dir, "lineitem", &lineitem_lines(1000, 100));
        write(dir, "orders", &orders_lines(100));
        small_tables(dir);
    })
    .await;

    // ACT: initialize
    let (status, body) = cluster
        .post(
            "/receive_init",
            json!({
                "partition": ["lineitem"],
                "non_partition": ["orders", "region", "nation"],
                "arch": 0,
                "mode": 0
            }),
        )
        .await;

    // ASSERT: every node holds a quarter, the coordinator holds the whole tables
    assert_eq!(status, 200, "{}", body);
    for node in &cluster.nodes {
        assert_eq!(count(node.engine(), "lineitem"), 250);
    }
    let engine = cluster.coordinator.engine();
    assert_eq!(count(engine, "orders"), 100);
    assert_eq!(count(engine, "region"), 2);
    assert_eq!(count(engine, "nation"), 3);
    assert_eq!(count(engine, "lineitem"), 0);

    // ACT: run a query
    let (status, rows) = cluster
        .post(
            "/send_task",
            json!({
                "query": "SELECT COUNT(*) AS n, COUNT(DISTINCT o_orderkey) AS o \
                          FROM lineitem JOIN orders ON l_orderkey = o_orderkey",
                "tables": ["lineitem"],
                "query_id": "scenario_a"
            }),
        )
        .await;

    // ASSERT: all 1000 rows were pulled, then deleted again
    assert_eq!(status, 200, "{}", rows);
    assert_eq!(rows, json!([{ "n": 1000, "o": 100 }]));
    assert_eq!(count(engine, "lineitem"), 0);

    let records = cluster.get("/results/scenario_a").await;
    let sources: Vec<&str> = records
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["source"].as_str().unwrap())
        .collect();
    assert_eq!(sources, vec!["aggregator", "network_latency"]);
    assert_eq!(records[1]["payload"]["round"]["succeeded"], 4);

    // A second init changes nothing
    let (status, body) = cluster
        .post(
            "/receive_init",
            json!({ "partition": ["orders"], "non_partition": [], "arch": 1, "mode": 1 }),
        )
        .await;
    assert_eq!(status, 201);
    assert_eq!(body["message"], "already initialized");
    assert_eq!(cluster.get("/status").await["mode"], 0);

    // Even payloads that do not decode are answered as repeats
    let (status, body) = cluster
        .post(
            "/receive_init",
            json!({ "partition": ["orders"], "non_partition": [], "arch": 7, "mode": 0 }),
        )
        .await;
    assert_eq!(status, 201, "{}", body);
    let (status, _) = cluster
        .post("/receive_smart_init", json!({ "number_query": "twelve" }))
        .await;
    assert_eq!(status, 201);
    for idx in 0..4 {
        assert_eq!(cluster.calls_to(idx, "/receive_init"), 1);
    }
}

#[tokio::test]
async fn replicated_distributed_routes_through_leaders() {
    // ARRANGE: 6 nodes -> triads (1,2,3) and (4,5,6)
    let cluster = start_cluster(6, |dir| {
        write(dir, "lineitem", &lineitem_lines(600, 60));
        small_tables(dir);
    })
    .await;

    let (status, body) = cluster
        .post(
            "/receive_init",
            json!({ "partition": ["lineitem"], "non_partition": ["region"], "arch": 1, "mode": 1 }),
        )
        .await;
    assert_eq!(status, 200, "{}", body);

    let state = cluster.get("/status").await;
    assert_eq!(state["architecture"], 1);
    assert_eq!(state["leaders"], json!(["2", "5"]));
    assert_eq!(state["followers"], json!(["1", "3", "4", "6"]));

    // Followers hold the shards, leaders the whole tables
    for (idx, node) in cluster.nodes.iter().enumerate() {
        let is_leader = idx % 3 == 1;
        let expected_lineitem = if is_leader { 0 } else { 150 };
        let expected_region = if is_leader { 2 } else { 0 };
        assert_eq!(count(node.engine(), "lineitem"), expected_lineitem);
        assert_eq!(count(node.engine(), "region"), expected_region);
    }

    // ACT
    let query = json!({
        "query": "SELECT COUNT(*) AS n FROM lineitem",
        "tables": [],
        "query_id": "scenario_b"
    });
    let (status, rows) = cluster.post("/send_task", query).await;

    // ASSERT: two leader records covering the whole table
    assert_eq!(status, 200, "{}", rows);
    assert_eq!(rows, json!([]));
    let records = cluster.get("/results/scenario_b").await;
    let sources: Vec<&str> = records
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["source"].as_str().unwrap())
        .collect();
    assert_eq!(sources, vec!["network_latency", "worker_2", "worker_5"]);
    assert_eq!(worker_total(&records), 600);
    assert_eq!(records[0]["payload"]["round"]["nodes"].as_array().unwrap().len(), 2);

    // The coordinator called each leader once; each leader synced its two followers once
    for (leader, followers) in [(1, [0, 2]), (4, [3, 5])] {
        assert_eq!(cluster.calls_to(leader, "/leader_results"), 1);
        let syncs: usize = followers
            .iter()
            .map(|&idx| cluster.calls_to(idx, "/follower_sync"))
            .sum();
        assert_eq!(syncs, 2);
    }
    let outbound: usize = (0..6)
        .map(|idx| {
            cluster.calls_to(idx, "/leader_results")
                + cluster.calls_to(idx, "/process_query")
                + cluster.calls_to(idx, "/process_data")
                + cluster.calls_to(idx, "/leader_data")
        })
        .sum();
    assert_eq!(outbound, 2);

    // A repeated query does not load follower shards twice
    let (status, _) = cluster
        .post(
            "/send_task",
            json!({ "query": "SELECT COUNT(*) AS n FROM lineitem", "query_id": "scenario_b2" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(worker_total(&cluster.get("/results/scenario_b2").await), 600);
    for idx in [1, 4] {
        assert_eq!(cluster.nodes[idx].state().await.synced_files.len(), 2);
    }
}

#[tokio::test]
async fn replicated_local_relays_data_pull() {
    let cluster = start_cluster(3, |dir| {
        write(dir, "lineitem", &lineitem_lines(90, 10));
        small_tables(dir);
    })
    .await;

    let (status, _) = cluster
        .post(
            "/receive_init",
            json!({ "partition": ["lineitem"], "non_partition": ["nation"], "arch": 1, "mode": 0 }),
        )
        .await;
    assert_eq!(status, 200);

    let (status, rows) = cluster
        .post(
            "/send_task",
            json!({ "query": "SELECT COUNT(*) AS n FROM lineitem", "query_id": "relay" }),
        )
        .await;

    assert_eq!(status, 200, "{}", rows);
    assert_eq!(rows, json!([{ "n": 90 }]));
    assert_eq!(count(cluster.coordinator.engine(), "lineitem"), 0);
}

#[tokio::test]
async fn smart_init_colocates_join_pair() {
    // ARRANGE: 40 orders, 4 lineitems each
    let cluster = start_cluster(2, |dir| {
        write(dir, "orders", &orders_lines(40));
        write(dir, "lineitem", &lineitem_lines(160, 40));
    })
    .await;

    let (status, body) = cluster
        .post(
            "/receive_smart_init",
            json!({
                "arch": 0,
                "mode": 1,
                "sample_query": "select l_shipmode, count(*) from orders, lineitem \
                                 where o_orderkey = l_orderkey group by l_shipmode",
                "number_query": 12
            }),
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(
        cluster.get("/status").await["partitioned"],
        json!(["orders", "lineitem"])
    );

    // ACT: each node joins only its own shards
    let (status, _) = cluster
        .post(
            "/send_task",
            json!({
                "query": "SELECT COUNT(*) AS n FROM orders JOIN lineitem ON o_orderkey = l_orderkey",
                "query_id": "q12"
            }),
        )
        .await;

    // ASSERT: no lineitem lost its order
    assert_eq!(status, 200);
    let records = cluster.get("/results/q12").await;
    assert_eq!(worker_total(&records), 160);
    for node in &cluster.nodes {
        assert_eq!(count(node.engine(), "orders"), 20);
    }
}

#[tokio::test]
async fn requests_are_validated() {
    let cluster = start_cluster(2, |dir| small_tables(dir)).await;

    let (status, _) = cluster
        .post(
            "/send_task",
            json!({ "query": "SELECT 1", "query_id": "early" }),
        )
        .await;
    assert_eq!(status, 409, "not initialized yet");

    let (status, body) = cluster
        .post(
            "/receive_init",
            json!({ "partition": ["lineitems"], "arch": 0, "mode": 0 }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);

    let (status, body) = cluster
        .post("/receive_init", json!({ "partition": ["lineitem"], "arch": 7, "mode": 0 }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
    assert_eq!(cluster.get("/status").await["phase"], "Uninitialized");

    let (status, _) = cluster
        .post(
            "/receive_result",
            json!({ "results": [], "query_id": "x", "worker_id": "../../etc" }),
        )
        .await;
    assert_eq!(status, 400);

    let (status, _) = cluster
        .post(
            "/receive_result",
            json!({ "results": [{"n": 1}], "query_id": "manual", "worker_id": NodeId::from_index(9) }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(cluster.coordinator.results().sources_for("manual"), vec!["worker_9"]);
}
