//! Notification fan-out.
//!
//! When a watchdog expires it hands its ordered target list to a
//! [`Dispatch`] implementation, which calls every target once, in order, and
//! reports one [`Delivery`] per target index. A failing target never stops
//! the remaining ones.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::Target;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const MAX_LOGGED_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Request to {url} failed: {reason}")]
    Transport { url: String, reason: String },
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
}

/// Outcome of one notification attempt.
#[derive(Debug)]
pub enum Delivery {
    /// The target answered 200.
    Delivered,
    /// Transport error or any other status. Counted against the target.
    Failed(DeliveryError),
    /// Nothing was sent because the target or its body is unsupported.
    Skipped { reason: String },
}

impl Delivery {
    pub fn is_failure(&self) -> bool {
        matches!(self, Delivery::Failed(_))
    }
}

/// Sends one notification cycle for an endpoint.
///
/// Implementations must return exactly one [`Delivery`] per target, in the
/// order of `targets`.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, endpoint: &str, targets: &[Target]) -> Vec<Delivery>;
}

/// Calls targets over HTTP with a shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
}

impl HttpDispatcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build the shared client. `timeout` bounds each whole request; `None`
    /// leaves requests unbounded.
    pub fn build_client(timeout: Option<Duration>) -> Result<Client, reqwest::Error> {
        let mut builder = Client::builder()
            .user_agent(concat!("deadmanswitch/", env!("CARGO_PKG_VERSION")))
            .pool_max_idle_per_host(4);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        builder.build()
    }

    async fn deliver(&self, endpoint: &str, target: &Target) -> Delivery {
        let (url, request) = match target {
            Target::Get { url } => (url, self.client.get(url)),
            Target::Post { url, body } => {
                let body = match body.encode() {
                    Ok(b) => b,
                    Err(reason) => {
                        warn!(endpoint, url = %url, %reason, "Unsupported POST body, skipping target");
                        return Delivery::Skipped { reason };
                    }
                };
                let request = self
                    .client
                    .post(url)
                    .header(CONTENT_TYPE, FORM_CONTENT_TYPE)
                    .header(CONTENT_LENGTH, body.len().to_string())
                    .body(body);
                (url, request)
            }
            Target::Unsupported { reason } => {
                warn!(endpoint, %reason, "Unsupported target, skipping");
                return Delivery::Skipped {
                    reason: reason.clone(),
                };
            }
        };

        match request.send().await {
            Ok(resp) if resp.status() == StatusCode::OK => {
                info!(endpoint, url = %url, "Notification delivered");
                Delivery::Delivered
            }
            Ok(resp) => {
                let status = resp.status().as_u16();
                let err = DeliveryError::Status {
                    url: url.clone(),
                    status,
                    body: error_body(resp).await,
                };
                warn!(endpoint, url = %url, status, error = %err, "Notification rejected");
                Delivery::Failed(err)
            }
            Err(e) => {
                let err = DeliveryError::Transport {
                    url: url.clone(),
                    reason: e.to_string(),
                };
                warn!(endpoint, url = %url, error = %err, "Notification failed");
                Delivery::Failed(err)
            }
        }
    }
}

#[async_trait]
impl Dispatch for HttpDispatcher {
    async fn dispatch(&self, endpoint: &str, targets: &[Target]) -> Vec<Delivery> {
        let mut deliveries = Vec::with_capacity(targets.len());
        for target in targets {
            deliveries.push(self.deliver(endpoint, target).await);
        }
        deliveries
    }
}

/// First `MAX_LOGGED_BODY` bytes of a rejected response. Reading stops
/// there and the response is dropped, so an endless body cannot hold up the
/// cycle.
async fn error_body(mut resp: Response) -> String {
    let mut buf = Vec::new();
    while buf.len() <= MAX_LOGGED_BODY {
        match resp.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) | Err(_) => break,
        }
    }
    truncate(&String::from_utf8_lossy(&buf), MAX_LOGGED_BODY)
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
