//! Node Module Tests
//!
//! ## Test Scopes
//! - **Init**: file loading, role bookkeeping, reload without duplicates, rejection
//!   of malformed messages.
//! - **Roles**: leader-only and follower-only operations refuse other roles.
//! - **Callbacks**: query results and batched data pushes against a local capture
//!   server.
//! - **Triads**: a leader with one live and one unreachable follower reports nothing.

#[cfg(test)]
mod tests {
    use crate::cluster::types::{NodeId, Role};
    use crate::config::ClusterConfig;
    use crate::engine::sqlite::SqliteEngine;
    use crate::engine::RelationalEngine;
    use crate::error::{ClusterError, status_for};
    use crate::node::protocol::{DataRequest, InitMessage, QueryRequest};
    use crate::node::router;
    use crate::node::runtime::NodeRuntime;
    use crate::node::state::is_shard_file;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Extension, Json, Router};
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    const SCHEMA: &str = include_str!("../../schema/tpch.sql");

    type Captured = Arc<Mutex<Vec<Value>>>;

    fn runtime(batch_size: usize) -> NodeRuntime {
        let mut config = ClusterConfig::default();
        config.network.batch_size = batch_size;
        config.network.retry_attempts = 1;
        config.network.call_timeout_secs = 5;
        let engine = SqliteEngine::in_memory().unwrap();
        engine.apply_schema(SCHEMA).unwrap();
        NodeRuntime::new(config, Arc::new(engine))
    }

    fn write_nation(dir: &Path, name: &str, keys: std::ops::Range<u32>) -> PathBuf {
        let path = dir.join(name);
        let text: String = keys
            .map(|k| format!("{}|NATION_{}|{}|comment|\n", k, k, k % 5))
            .collect();
        std::fs::write(&path, text).unwrap();
        path
    }

    fn init_message(role: Role, files: &[(&str, &Path)]) -> InitMessage {
        InitMessage {
            worker_type: role,
            files: files
                .iter()
                .map(|(t, p)| (t.to_string(), p.to_path_buf()))
                .collect::<BTreeMap<_, _>>(),
            leader_address: match role {
                Role::Follower => Some("http://127.0.0.1:1".to_string()),
                _ => None,
            },
            follower_addresses: match role {
                Role::Leader => vec!["http://127.0.0.1:1".to_string(); 2],
                _ => Vec::new(),
            },
        }
    }

    fn count(runtime: &NodeRuntime, table: &str) -> i64 {
        let rows = runtime
            .engine()
            .execute(&format!("SELECT COUNT(*) AS n FROM {}", table))
            .unwrap();
        rows[0]["n"].as_i64().unwrap()
    }

    async fn capture(Extension(seen): Extension<Captured>, Json(body): Json<Value>) -> StatusCode {
        seen.lock().await.push(body);
        StatusCode::OK
    }

    /// Serves `POST /sink` on an ephemeral port and records every body.
    async fn capture_server() -> (String, Captured) {
        let seen: Captured = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/sink", post(capture))
            .layer(Extension(seen.clone()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/sink", addr), seen)
    }

    // ============================================================
    // SHARD FILE RECOGNITION
    // ============================================================

    #[test]
    fn test_shard_file_names() {
        assert!(is_shard_file(Path::new("/mnt/shared/worker_3_lineitem.tbl")));
        assert!(is_shard_file(Path::new("worker_12_orders.tbl")));
        assert!(!is_shard_file(Path::new("/mnt/shared/tbl/lineitem.tbl")));
        assert!(!is_shard_file(Path::new("/mnt/worker_x_lineitem.tbl")));
    }

    // ============================================================
    // INIT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_init_loads_files_and_records_shards() {
        // ARRANGE: one shard and one whole table
        let dir = tempfile::tempdir().unwrap();
        let shard = write_nation(dir.path(), "worker_1_nation.tbl", 0..4);
        let whole = dir.path().join("region.tbl");
        std::fs::write(&whole, "0|AFRICA|c|\n").unwrap();
        let runtime = runtime(100);

        // ACT
        let loaded = runtime
            .receive_init(init_message(
                Role::Follower,
                &[("nation", shard.as_path()), ("region", whole.as_path())],
            ))
            .await
            .unwrap();

        // ASSERT
        assert_eq!(loaded, 5);
        let state = runtime.state().await;
        assert!(state.initialized);
        assert_eq!(state.role, Role::Follower);
        assert_eq!(state.shard_files.keys().collect::<Vec<_>>(), vec!["nation"]);
        assert_eq!(state.loaded_tables.len(), 2);
    }

    #[tokio::test]
    async fn test_repeated_init_reloads_without_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let shard = write_nation(dir.path(), "worker_1_nation.tbl", 0..4);
        let runtime = runtime(100);
        let message = init_message(Role::Plain, &[("nation", shard.as_path())]);

        runtime.receive_init(message.clone()).await.unwrap();
        runtime.receive_init(message).await.unwrap();

        assert_eq!(count(&runtime, "nation"), 4);
    }

    #[tokio::test]
    async fn test_failed_reload_leaves_node_uninitialized() {
        // ARRANGE: a node that was initialized once
        let dir = tempfile::tempdir().unwrap();
        let shard = write_nation(dir.path(), "worker_1_nation.tbl", 0..3);
        let runtime = runtime(100);
        runtime
            .receive_init(init_message(Role::Plain, &[("nation", shard.as_path())]))
            .await
            .unwrap();

        // ACT: the second init points at a file that is not there
        let missing = dir.path().join("worker_1_region.tbl");
        let err = runtime
            .receive_init(init_message(
                Role::Plain,
                &[("nation", shard.as_path()), ("region", missing.as_path())],
            ))
            .await;

        // ASSERT: the node refuses work until it is initialized again
        assert!(err.is_err());
        assert!(!runtime.state().await.initialized);
        let err = runtime
            .process_query(query("http://127.0.0.1:1/sink"))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClusterError>(),
            Some(ClusterError::NodeNotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_init_rejects_malformed_messages() {
        let dir = tempfile::tempdir().unwrap();
        let shard = write_nation(dir.path(), "worker_1_nation.tbl", 0..1);
        let runtime = runtime(100);

        let unknown = runtime
            .receive_init(init_message(Role::Plain, &[("nations", shard.as_path())]))
            .await
            .unwrap_err();
        assert_eq!(status_for(&unknown), StatusCode::BAD_REQUEST);

        let mut orphan = init_message(Role::Follower, &[("nation", shard.as_path())]);
        orphan.leader_address = None;
        let err = runtime.receive_init(orphan).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClusterError>(),
            Some(ClusterError::InvalidPayload(_))
        ));
        assert!(!runtime.state().await.initialized);
    }

    // ============================================================
    // ROLE TESTS
    // ============================================================

    fn query(agg_url: &str) -> QueryRequest {
        QueryRequest {
            query: "SELECT COUNT(*) AS n FROM nation".to_string(),
            agg_url: agg_url.to_string(),
            query_id: "q1".to_string(),
            worker_id: NodeId::from_index(1),
        }
    }

    #[tokio::test]
    async fn test_operations_require_init() {
        let runtime = runtime(100);
        let err = runtime.process_query(query("http://127.0.0.1:1/sink")).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClusterError>(),
            Some(ClusterError::NodeNotInitialized)
        ));
        assert_eq!(status_for(&err), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_follower_sync_is_follower_only() {
        let dir = tempfile::tempdir().unwrap();
        let shard = write_nation(dir.path(), "worker_1_nation.tbl", 0..2);

        let leader = runtime(100);
        leader
            .receive_init(init_message(Role::Leader, &[]))
            .await
            .unwrap();
        let err = leader.follower_sync().await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClusterError>(),
            Some(ClusterError::WrongRole {
                expected: "follower",
                actual: "leader"
            })
        ));

        let follower = runtime(100);
        follower
            .receive_init(init_message(Role::Follower, &[("nation", shard.as_path())]))
            .await
            .unwrap();
        let manifest = follower.follower_sync().await.unwrap();
        assert_eq!(manifest.files.get("nation"), Some(&shard));
    }

    #[tokio::test]
    async fn test_leader_operations_refuse_plain_nodes() {
        let runtime = runtime(100);
        runtime
            .receive_init(init_message(Role::Plain, &[]))
            .await
            .unwrap();

        let err = runtime
            .leader_results(query("http://127.0.0.1:1/sink"))
            .await
            .unwrap_err();
        assert_eq!(status_for(&err), StatusCode::CONFLICT);
    }

    // ============================================================
    // CALLBACK TESTS
    // ============================================================

    #[tokio::test]
    async fn test_process_query_posts_result() {
        let dir = tempfile::tempdir().unwrap();
        let shard = write_nation(dir.path(), "worker_1_nation.tbl", 0..7);
        let runtime = runtime(100);
        runtime
            .receive_init(init_message(Role::Plain, &[("nation", shard.as_path())]))
            .await
            .unwrap();
        let (url, seen) = capture_server().await;

        let rows = runtime.process_query(query(&url)).await.unwrap();

        assert_eq!(rows, 1);
        let seen = seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["query_id"], "q1");
        assert_eq!(seen[0]["worker_id"], "1");
        assert_eq!(seen[0]["results"][0]["n"], 7);
        assert!(seen[0]["elapsed_ms"].is_u64());
    }

    #[tokio::test]
    async fn test_process_query_engine_error_is_returned() {
        let runtime = runtime(100);
        runtime
            .receive_init(init_message(Role::Plain, &[]))
            .await
            .unwrap();
        let (url, seen) = capture_server().await;

        let mut request = query(&url);
        request.query = "SELECT * FROM no_such_table".to_string();
        let err = runtime.process_query(request).await.unwrap_err();

        assert_eq!(status_for(&err), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(seen.lock().await.is_empty(), "nothing is reported on failure");
    }

    #[tokio::test]
    async fn test_process_data_pushes_batches() {
        // ARRANGE: 5 rows, batches of 2
        let dir = tempfile::tempdir().unwrap();
        let shard = write_nation(dir.path(), "worker_2_nation.tbl", 0..5);
        let runtime = runtime(2);
        runtime
            .receive_init(init_message(Role::Plain, &[("nation", shard.as_path())]))
            .await
            .unwrap();
        let (url, seen) = capture_server().await;

        // ACT: region is requested but not held here
        let pushed = runtime
            .process_data(DataRequest {
                tables: vec!["nation".to_string(), "region".to_string()],
                agg_url: url,
            })
            .await
            .unwrap();

        // ASSERT
        assert_eq!(pushed, 5);
        let seen = seen.lock().await;
        let sizes: Vec<usize> = seen
            .iter()
            .map(|batch| batch["rows"].as_array().unwrap().len())
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert!(seen.iter().all(|batch| batch["name"] == "nation"));
        assert_eq!(seen[0]["rows"][0]["n_name"], "NATION_0");
    }

    #[tokio::test]
    async fn test_process_data_rejects_unknown_table() {
        let runtime = runtime(10);
        runtime
            .receive_init(init_message(Role::Plain, &[]))
            .await
            .unwrap();

        let err = runtime
            .process_data(DataRequest {
                tables: vec!["nation; DROP TABLE nation".to_string()],
                agg_url: "http://127.0.0.1:1/sink".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(status_for(&err), StatusCode::BAD_REQUEST);
    }

    // ============================================================
    // TRIAD TESTS
    // ============================================================

    /// A leader whose first follower is a live node holding `rows` nation rows and
    /// whose second follower does not exist. The leader itself holds region.
    async fn leader_with_missing_follower(dir: &Path, rows: u32) -> NodeRuntime {
        let shard = write_nation(dir, "worker_1_nation.tbl", 0..rows);
        let follower = Arc::new(runtime(100));
        follower
            .receive_init(init_message(Role::Follower, &[("nation", shard.as_path())]))
            .await
            .unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(follower);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let region = dir.join("region.tbl");
        std::fs::write(&region, "0|AFRICA|c|\n").unwrap();
        let mut message = init_message(Role::Leader, &[("region", region.as_path())]);
        message.follower_addresses = vec![format!("http://{}", addr), "http://127.0.0.1:1".to_string()];
        let leader = runtime(100);
        leader.receive_init(message).await.unwrap();
        leader
    }

    #[tokio::test]
    async fn test_leader_results_fails_when_a_follower_is_missing() {
        // ARRANGE
        let dir = tempfile::tempdir().unwrap();
        let leader = leader_with_missing_follower(dir.path(), 2).await;
        let (url, seen) = capture_server().await;

        // ACT
        let result = leader.leader_results(query(&url)).await;

        // ASSERT: no partial answer reaches the sink
        let err = result.unwrap_err();
        assert_eq!(status_for(&err), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().contains("127.0.0.1:1"));
        assert!(seen.lock().await.is_empty());
        assert!(leader.state().await.synced_files.is_empty());
    }

    #[tokio::test]
    async fn test_leader_data_fails_when_a_follower_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let leader = leader_with_missing_follower(dir.path(), 2).await;
        let (url, seen) = capture_server().await;

        let result = leader
            .leader_data(DataRequest {
                tables: vec!["nation".to_string(), "region".to_string()],
                agg_url: url,
            })
            .await;

        assert!(result.is_err());
        // The live follower pushed its shard; the leader kept its own rows back
        let seen = seen.lock().await;
        assert!(seen.iter().all(|batch| batch["name"] == "nation"));
    }
}
