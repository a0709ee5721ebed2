//! Minimal JSON-RPC over HTTP client shared by the node and wallet adapters

use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, trace};

use crate::errors::{TicketBuyerError, TicketBuyerResult};
use crate::metrics::metrics;

/// Connection settings for one JSON-RPC backend
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub timeout: Duration,
    /// Client-side request cap; `0` disables it
    pub rate_limit_rps: u32,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

pub struct JsonRpcClient {
    endpoint: RpcEndpoint,
    http: Client,
    limiter: Option<DefaultDirectRateLimiter>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("url", &self.endpoint.url)
            .field("rate_limit_rps", &self.endpoint.rate_limit_rps)
            .finish()
    }
}

impl JsonRpcClient {
    pub fn new(endpoint: RpcEndpoint) -> TicketBuyerResult<Self> {
        let http = Client::builder()
            .timeout(endpoint.timeout)
            .build()
            .map_err(|e| TicketBuyerError::Configuration(format!("HTTP client: {}", e)))?;

        let limiter = NonZeroU32::new(endpoint.rate_limit_rps)
            .map(|rps| RateLimiter::direct(Quota::per_second(rps)));

        Ok(Self {
            endpoint,
            http,
            limiter,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.endpoint.url
    }

    /// Issue one call and decode its `result` into `T`
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> TicketBuyerResult<T> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(method, id, url = %self.endpoint.url, "RPC request");

        let mut req = self.http.post(&self.endpoint.url).json(&payload);
        if let Some(user) = &self.endpoint.user {
            req = req.basic_auth(user, self.endpoint.password.as_ref());
        }

        let started = Instant::now();
        let resp = req.send().await.map_err(|e| self.transport_error(e))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;
        metrics().rpc_latency.observe(started.elapsed().as_secs_f64());

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(TicketBuyerError::Configuration(format!(
                "RPC authentication rejected by {}",
                self.endpoint.url
            )));
        }

        let envelope: RpcEnvelope = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(e) if status.is_server_error() => {
                return Err(TicketBuyerError::Transport {
                    endpoint: self.endpoint.url.clone(),
                    message: format!("HTTP {}: {}", status, e),
                });
            }
            Err(e) => {
                return Err(TicketBuyerError::MalformedResponse {
                    method: method.to_string(),
                    reason: format!("HTTP {}: {}", status, e),
                });
            }
        };

        if let Some(err) = envelope.error {
            debug!(method, code = err.code, message = %err.message, "RPC returned error");
            return Err(TicketBuyerError::Rpc {
                method: method.to_string(),
                code: err.code,
                message: err.message,
            });
        }

        serde_json::from_value(envelope.result).map_err(|e| TicketBuyerError::MalformedResponse {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    fn transport_error(&self, e: reqwest::Error) -> TicketBuyerError {
        if e.is_timeout() {
            TicketBuyerError::Timeout {
                endpoint: self.endpoint.url.clone(),
                timeout_ms: self.endpoint.timeout.as_millis() as u64,
            }
        } else {
            TicketBuyerError::Transport {
                endpoint: self.endpoint.url.clone(),
                message: e.to_string(),
            }
        }
    }
}
