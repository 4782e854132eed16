//! Node Module
//!
//! The worker process. A node holds shard files (and, in distributed mode, whole
//! tables) in its own engine and serves the coordinator's rounds. In a replicated
//! cluster a leader answers for its triad: it relays data pulls to its followers and,
//! before running a query, appends the followers' shards to its own tables.
//!
//! ## Submodules
//! - **`runtime`**: `NodeRuntime`, the operations behind every endpoint.
//! - **`state`**: `NodeState` and shard-file recognition.
//! - **`protocol`**: Endpoint paths and request/response bodies.
//! - **`handlers`**: Axum handlers.

pub mod handlers;
pub mod protocol;
pub mod runtime;
pub mod state;

use axum::Extension;
use axum::Router;
use axum::routing::post;
use std::sync::Arc;

use protocol::*;
use runtime::NodeRuntime;

pub fn router(runtime: Arc<NodeRuntime>) -> Router {
    Router::new()
        .route(ENDPOINT_NODE_INIT, post(handlers::handle_init))
        .route(ENDPOINT_PROCESS_QUERY, post(handlers::handle_process_query))
        .route(ENDPOINT_PROCESS_DATA, post(handlers::handle_process_data))
        .route(ENDPOINT_LEADER_DATA, post(handlers::handle_leader_data))
        .route(ENDPOINT_LEADER_RESULTS, post(handlers::handle_leader_results))
        .route(ENDPOINT_FOLLOWER_SYNC, post(handlers::handle_follower_sync))
        .layer(Extension(runtime))
}

#[cfg(test)]
mod tests;
