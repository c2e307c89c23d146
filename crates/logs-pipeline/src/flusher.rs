// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of a batch to the logs intake.
//!
//! ```text
//!   batch ──> JSON {"logs": [...]} ──> zstd (optional) ──> POST /api/v1/ingest
//! ```
//!
//! A [`Deliverer`] performs exactly one attempt; retries, backoff and the
//! circuit breaker live above it in the pipeline.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE, USER_AGENT};
use tokio::sync::OnceCell;
use tracing::{debug, error};
use zstd::stream::write::Encoder;

use crate::config::Config;
use crate::constants::{INGEST_PATH, USER_AGENT as USER_AGENT_VALUE};
use crate::context::Context;
use crate::errors::TransportError;
use crate::record::{IngestRequest, IngestResponse, Record};

const API_KEY_HEADER: &str = "X-API-Key";

/// Status and, for non-2xx answers, body of a delivery attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryResponse {
    pub status: u16,
    pub body: String,
}

impl DeliveryResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one batch, once.
///
/// `Err` means no response was obtained at all. Any HTTP status, including
/// errors, comes back as `Ok`.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(
        &self,
        ctx: &Context,
        records: &[Record],
    ) -> Result<DeliveryResponse, TransportError>;
}

/// [`Deliverer`] posting JSON batches over HTTP.
#[derive(Debug)]
pub struct HttpDeliverer {
    client: reqwest::Client,
    url: String,
    api_key: String,
    use_compression: bool,
    compression_level: i32,
    headers: OnceCell<HeaderMap>,
}

impl HttpDeliverer {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            client: get_client(config.timeout),
            url: format!("{}{INGEST_PATH}", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            use_compression: config.use_compression,
            compression_level: config.compression_level,
            headers: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn get_headers(&self) -> Result<&HeaderMap, TransportError> {
        self.headers
            .get_or_try_init(|| async {
                let mut headers = HeaderMap::new();
                let api_key = HeaderValue::from_str(&self.api_key).map_err(|e| {
                    TransportError::with_source("API key is not a valid header value", e)
                })?;
                headers.insert(API_KEY_HEADER, api_key);
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
                Ok::<_, TransportError>(headers)
            })
            .await
    }

    /// Compresses the payload when enabled. On encoder failure the payload is
    /// sent as-is and `false` is returned so no encoding header is set.
    fn compress(&self, data: Vec<u8>) -> (Vec<u8>, bool) {
        if !self.use_compression {
            return (data, false);
        }
        match self.encode(&data) {
            Ok(compressed) => (compressed, true),
            Err(e) => {
                debug!("LOGS | Failed to compress data: {}", e);
                (data, false)
            }
        }
    }

    fn encode(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        let mut encoder = Encoder::new(Vec::new(), self.compression_level)?;
        encoder.write_all(data)?;
        encoder.finish()
    }
}

#[async_trait]
impl Deliverer for HttpDeliverer {
    async fn deliver(
        &self,
        ctx: &Context,
        records: &[Record],
    ) -> Result<DeliveryResponse, TransportError> {
        let payload = serde_json::to_vec(&IngestRequest { logs: records })
            .map_err(|e| TransportError::with_source("failed to serialize batch", e))?;
        let (body, compressed) = self.compress(payload);

        let mut request = self
            .client
            .post(&self.url)
            .headers(self.get_headers().await?.clone());
        if compressed {
            request = request.header(CONTENT_ENCODING, "zstd");
        }

        let response = tokio::select! {
            biased;
            () = ctx.done() => return Err(TransportError::cancelled()),
            sent = request.body(body).send() => {
                sent.map_err(|e| TransportError::with_source("failed to send request", e))?
            }
        };

        let status = response.status();
        if status.is_success() {
            if tracing::enabled!(tracing::Level::DEBUG) {
                let acknowledged = response
                    .json::<IngestResponse>()
                    .await
                    .map(|ack| ack.received);
                debug!(
                    "LOGS | Intake acknowledged {:?} of {} records",
                    acknowledged.ok(),
                    records.len()
                );
            }
            return Ok(DeliveryResponse {
                status: status.as_u16(),
                body: String::new(),
            });
        }

        // Only read the body when there is something to report.
        let body = tokio::select! {
            biased;
            () = ctx.done() => String::new(),
            text = response.text() => text.unwrap_or_default(),
        };
        if status == reqwest::StatusCode::FORBIDDEN || status == reqwest::StatusCode::UNAUTHORIZED {
            error!("LOGS | Request was denied by the intake. Please verify that your API key is valid.");
        }
        Ok(DeliveryResponse {
            status: status.as_u16(),
            body,
        })
    }
}

/// Builds the intake client, falling back to reqwest defaults when the
/// configured builder fails.
#[must_use]
pub fn get_client(timeout: Duration) -> reqwest::Client {
    match build_client(timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("LOGS | Failed to build HTTP client: {}, using reqwest defaults", e);
            reqwest::Client::new()
        }
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(270)))
        .tcp_keepalive(Some(Duration::from_secs(120)))
        .build()
}
