//! Concurrent fan-out / fan-in over a set of nodes.
//!
//! All calls of a round are in flight together (bounded by `concurrency`) and the
//! round resolves only when every call has either succeeded or failed. A failing node
//! never fails the round; it shows up as a [`CallOutcome::Failure`] in the summary.

use futures::StreamExt;
use serde::Serialize;
use std::future::Future;
use std::time::Instant;

use super::types::{Node, NodeId};

#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome<T> {
    Success(T),
    Failure { reason: String },
}

#[derive(Debug, Clone)]
pub struct NodeCall<T> {
    pub node_id: NodeId,
    pub elapsed_ms: u64,
    pub outcome: CallOutcome<T>,
}

#[derive(Debug, Clone)]
pub struct RoundSummary<T> {
    /// One entry per target, in completion order.
    pub calls: Vec<NodeCall<T>>,
    /// Wall-clock time from the first call issued to the last call resolved.
    pub elapsed_ms: u64,
}

/// Serializable view of a round, without the per-call payloads.
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub elapsed_ms: u64,
    pub succeeded: usize,
    pub failed: usize,
    pub nodes: Vec<NodeReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub node_id: NodeId,
    pub success: bool,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> RoundSummary<T> {
    pub fn succeeded(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c.outcome, CallOutcome::Success(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.calls.len() - self.succeeded()
    }

    pub fn successes(&self) -> impl Iterator<Item = (&NodeId, &T)> {
        self.calls.iter().filter_map(|c| match &c.outcome {
            CallOutcome::Success(value) => Some((&c.node_id, value)),
            CallOutcome::Failure { .. } => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&NodeId, &str)> {
        self.calls.iter().filter_map(|c| match &c.outcome {
            CallOutcome::Failure { reason } => Some((&c.node_id, reason.as_str())),
            CallOutcome::Success(_) => None,
        })
    }

    pub fn report(&self) -> RoundReport {
        RoundReport {
            elapsed_ms: self.elapsed_ms,
            succeeded: self.succeeded(),
            failed: self.failed(),
            nodes: self
                .calls
                .iter()
                .map(|c| NodeReport {
                    node_id: c.node_id.clone(),
                    success: matches!(c.outcome, CallOutcome::Success(_)),
                    elapsed_ms: c.elapsed_ms,
                    error: match &c.outcome {
                        CallOutcome::Failure { reason } => Some(reason.clone()),
                        CallOutcome::Success(_) => None,
                    },
                })
                .collect(),
        }
    }

    /// Logs every failed call with the round label.
    pub fn log_failures(&self, label: &str) {
        for (node_id, reason) in self.failures() {
            tracing::warn!("{}: node {} failed: {}", label, node_id, reason);
        }
    }
}

/// Issues `call` against every target concurrently and waits for all of them.
pub async fn fan_out<T, F, Fut>(targets: &[Node], concurrency: usize, call: F) -> RoundSummary<T>
where
    F: Fn(Node) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let started = Instant::now();

    let calls = futures::stream::iter(targets.iter().cloned().map(|node| {
        let node_id = node.id.clone();
        let pending = call(node);
        async move {
            let call_started = Instant::now();
            let outcome = match pending.await {
                Ok(value) => CallOutcome::Success(value),
                Err(e) => CallOutcome::Failure {
                    reason: format!("{:#}", e),
                },
            };
            NodeCall {
                node_id,
                elapsed_ms: call_started.elapsed().as_millis() as u64,
                outcome,
            }
        }
    }))
    .buffer_unordered(concurrency.max(1))
    .collect::<Vec<_>>()
    .await;

    RoundSummary {
        calls,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}
