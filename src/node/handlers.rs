use axum::Json;
use axum::extract::Extension;
use axum::http::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::error::status_for;

use super::protocol::*;
use super::runtime::NodeRuntime;

fn failure(operation: &str, e: anyhow::Error) -> (StatusCode, Json<Value>) {
    let status = status_for(&e);
    if status.is_server_error() {
        tracing::error!("{} failed: {:#}", operation, e);
    } else {
        tracing::warn!("{} rejected: {:#}", operation, e);
    }
    (
        status,
        Json(json!({ "success": false, "error": format!("{:#}", e) })),
    )
}

fn success(message: String) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "success": true, "message": message })),
    )
}

pub async fn handle_init(
    Extension(runtime): Extension<Arc<NodeRuntime>>,
    Json(message): Json<InitMessage>,
) -> (StatusCode, Json<Value>) {
    match runtime.receive_init(message).await {
        Ok(rows) => success(format!("Loaded {} rows", rows)),
        Err(e) => failure("init", e),
    }
}

pub async fn handle_process_query(
    Extension(runtime): Extension<Arc<NodeRuntime>>,
    Json(req): Json<QueryRequest>,
) -> (StatusCode, Json<Value>) {
    match runtime.process_query(req).await {
        Ok(rows) => success(format!("Reported {} rows", rows)),
        Err(e) => failure("process_query", e),
    }
}

pub async fn handle_process_data(
    Extension(runtime): Extension<Arc<NodeRuntime>>,
    Json(req): Json<DataRequest>,
) -> (StatusCode, Json<Value>) {
    match runtime.process_data(req).await {
        Ok(rows) => success(format!("Pushed {} rows", rows)),
        Err(e) => failure("process_data", e),
    }
}

pub async fn handle_leader_data(
    Extension(runtime): Extension<Arc<NodeRuntime>>,
    Json(req): Json<DataRequest>,
) -> (StatusCode, Json<Value>) {
    match runtime.leader_data(req).await {
        Ok(rows) => success(format!("Pushed {} rows", rows)),
        Err(e) => failure("leader_data", e),
    }
}

pub async fn handle_leader_results(
    Extension(runtime): Extension<Arc<NodeRuntime>>,
    Json(req): Json<QueryRequest>,
) -> (StatusCode, Json<Value>) {
    match runtime.leader_results(req).await {
        Ok(rows) => success(format!("Reported {} rows", rows)),
        Err(e) => failure("leader_results", e),
    }
}

pub async fn handle_follower_sync(
    Extension(runtime): Extension<Arc<NodeRuntime>>,
) -> (StatusCode, Json<Value>) {
    match runtime.follower_sync().await {
        Ok(manifest) => (StatusCode::OK, Json(json!(manifest))),
        Err(e) => failure("follower_sync", e),
    }
}
