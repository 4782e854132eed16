//! HTTP client for coordinator-to-node and node-to-node calls.
//!
//! Every call carries a timeout. Only failures to connect are retried, a bounded number
//! of times with jittered exponential backoff: once a request may have reached the
//! node (a timeout, a reset mid-response) the call fails as is, since `/process_data`
//! and `/leader_data` push rows as a side effect and a resend would push them twice.
//! A response with a non-success status is never retried and is reported with its
//! body text.

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct NodeClient {
    http: reqwest::Client,
    timeout: Duration,
    attempts: usize,
}

impl NodeClient {
    pub fn new(timeout: Duration, attempts: usize) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
            attempts: attempts.max(1),
        }
    }

    /// Same connection pool, different per-call timeout.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            http: self.http.clone(),
            timeout,
            attempts: self.attempts,
        }
    }

    pub async fn post_with_retry<T: Serialize>(
        &self,
        url: &str,
        payload: &T,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let response = self
                .http
                .post(url)
                .json(payload)
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if !e.is_connect() || attempt + 1 == self.attempts {
                        return Err(anyhow::anyhow!("POST {} failed: {}", url, e));
                    }
                    tracing::debug!("POST {} attempt {} failed: {}", url, attempt + 1, e);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }

    /// Posts `payload` and fails unless the node answered with a 2xx status.
    pub async fn post_expect_success<T: Serialize>(&self, url: &str, payload: &T) -> Result<()> {
        let response = self.post_with_retry(url, payload).await?;
        ensure_success(url, response).await?;
        Ok(())
    }

    /// Posts `payload` and decodes a JSON body from a 2xx response.
    pub async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        payload: &T,
    ) -> Result<R> {
        let response = self.post_with_retry(url, payload).await?;
        let response = ensure_success(url, response).await?;
        Ok(response.json::<R>().await?)
    }
}

async fn ensure_success(url: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(anyhow::anyhow!("POST {} returned {}: {}", url, status, body))
}
