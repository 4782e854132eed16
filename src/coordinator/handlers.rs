use axum::Json;
use axum::body::Bytes;
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

use crate::cluster::types::validate_table;
use crate::engine::run_blocking;
use crate::error::{ClusterError, status_for};

use super::Coordinator;
use super::initializer::InitOutcome;
use super::protocol::*;
use super::results::RecordSource;
use super::state::ClusterStatus;

fn init_response(outcome: anyhow::Result<InitOutcome>) -> (StatusCode, Json<StatusResponse>) {
    match outcome {
        Ok(InitOutcome::Initialized(_)) => (StatusCode::OK, Json(StatusResponse::ok("Success"))),
        Ok(InitOutcome::AlreadyInitialized) => (
            StatusCode::CREATED,
            Json(StatusResponse::ok("already initialized")),
        ),
        Err(e) => (status_for(&e), Json(StatusResponse::error(format!("{:#}", e)))),
    }
}

fn already_initialized() -> (StatusCode, Json<StatusResponse>) {
    init_response(Ok(InitOutcome::AlreadyInitialized))
}

/// Decodes an init body after the idempotence check, so a repeated init is answered
/// as such whatever it carries.
fn decode_init<T: DeserializeOwned>(body: &[u8]) -> Result<T, (StatusCode, Json<StatusResponse>)> {
    serde_json::from_slice(body).map_err(|e| {
        let err = ClusterError::InvalidPayload(e.to_string());
        (err.status_code(), Json(StatusResponse::error(err.to_string())))
    })
}

pub async fn handle_init(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    body: Bytes,
) -> (StatusCode, Json<StatusResponse>) {
    if coordinator.is_initialized().await {
        return already_initialized();
    }
    let req: InitRequest = match decode_init(&body) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    tracing::info!("Init request: partition {:?}, whole {:?}", req.partition, req.non_partition);
    init_response(coordinator.initialize(req).await)
}

pub async fn handle_smart_init(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    body: Bytes,
) -> (StatusCode, Json<StatusResponse>) {
    if coordinator.is_initialized().await {
        return already_initialized();
    }
    let req: SmartInitRequest = match decode_init(&body) {
        Ok(req) => req,
        Err(rejection) => return rejection,
    };
    tracing::info!("Smart init request for query {}", req.number_query);
    init_response(coordinator.smart_initialize(req).await)
}

pub async fn handle_send_task(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Json(req): Json<TaskRequest>,
) -> (StatusCode, Json<Value>) {
    let query_id = req.query_id.clone();
    match coordinator.send_task(req).await {
        Ok(rows) => (StatusCode::OK, Json(json!(rows))),
        Err(e) => {
            tracing::warn!("Task {} failed: {:#}", query_id, e);
            (
                status_for(&e),
                Json(json!({ "success": false, "error": format!("{:#}", e) })),
            )
        }
    }
}

pub async fn handle_receive_result(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Json(req): Json<ResultCallback>,
) -> (StatusCode, Json<StatusResponse>) {
    tracing::info!(
        "Result for {} from node {}: {} rows in {} ms",
        req.query_id,
        req.worker_id,
        req.results.len(),
        req.elapsed_ms
    );
    let outcome = coordinator
        .results()
        .record(
            &req.query_id,
            RecordSource::Worker(req.worker_id.clone()),
            req.elapsed_ms,
            json!(req.results),
        )
        .await;

    match outcome {
        Ok(_) => (StatusCode::OK, Json(StatusResponse::ok("Success"))),
        Err(e) => (status_for(&e), Json(StatusResponse::error(format!("{:#}", e)))),
    }
}

pub async fn handle_receive_data(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Json(batch): Json<DataBatch>,
) -> (StatusCode, Json<StatusResponse>) {
    if let Err(e) = validate_table(&batch.name) {
        return (e.status_code(), Json(StatusResponse::error(e.to_string())));
    }

    let count = batch.rows.len();
    let table = batch.name.clone();
    let outcome = run_blocking(coordinator.engine(), move |engine| {
        engine.insert(&batch.name, &batch.rows)
    })
    .await;

    match outcome {
        Ok(_) => {
            tracing::debug!("Received {} rows of {}", count, table);
            (StatusCode::OK, Json(StatusResponse::ok("Success")))
        }
        Err(e) => {
            tracing::error!("Failed to insert {} rows into {}: {:#}", count, table, e);
            (status_for(&e), Json(StatusResponse::error(format!("{:#}", e))))
        }
    }
}

pub async fn handle_status(Extension(coordinator): Extension<Arc<Coordinator>>) -> Json<ClusterStatus> {
    Json(coordinator.status().await)
}

pub async fn handle_results(
    Extension(coordinator): Extension<Arc<Coordinator>>,
    Path(query_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    match coordinator.results().records_for(&query_id).await {
        Ok(records) => (StatusCode::OK, Json(json!(records))),
        Err(e) => (
            status_for(&e),
            Json(json!({ "success": false, "error": format!("{:#}", e) })),
        ),
    }
}
