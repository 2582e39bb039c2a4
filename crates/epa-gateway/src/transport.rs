//! # HTTP Transport
//!
//! Thin reqwest wrapper shared by the insurance and pharmacy adapters:
//! bearer-authenticated JSON POSTs with a per-attempt correlation header,
//! and failure mapping into [`TransportError`], the classification the
//! resilience policy retries on.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use epa_resilience::{ClassifyFailure, FailureClass};

/// Failure crossing the wire boundary.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request did not complete inside its per-attempt timeout. The
    /// remote may still be processing it.
    #[error("timeout calling {operation}")]
    Timeout { operation: &'static str },
    /// The request never reached the remote.
    #[error("connection failure calling {operation}: {detail}")]
    Connect {
        operation: &'static str,
        detail: String,
    },
    /// The remote answered 5xx or 429.
    #[error("{operation} upstream unavailable: HTTP {status}")]
    RemoteUnavailable {
        operation: &'static str,
        status: u16,
    },
    /// The remote rejected the request with a 4xx.
    #[error("{operation} rejected by upstream: HTTP {status}: {body}")]
    RemoteRejected {
        operation: &'static str,
        status: u16,
        body: String,
    },
    /// A 2xx arrived but the body was not the JSON the contract promises.
    #[error("malformed response from {operation}: {detail}")]
    Deserialize {
        operation: &'static str,
        detail: String,
    },
    /// The transport could not be built from configuration.
    #[error("transport configuration rejected: {detail}")]
    Config { detail: String },
}

impl ClassifyFailure for TransportError {
    fn failure_class(&self) -> FailureClass {
        match self {
            TransportError::Timeout { .. }
            | TransportError::Connect { .. }
            | TransportError::RemoteUnavailable { .. } => FailureClass::Transient,
            TransportError::RemoteRejected { .. }
            | TransportError::Deserialize { .. }
            | TransportError::Config { .. } => FailureClass::Permanent,
        }
    }
}

/// Bearer-authenticated JSON transport. Cheap to clone; clones share the
/// underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Build a transport for `base_url`, attaching `api_key` as a bearer
    /// token on every request. `timeout` bounds each attempt unless the
    /// caller overrides it per call. The base URL is parsed here so a
    /// misconfigured endpoint fails at startup, not on the first send.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, TransportError> {
        let parsed = Url::parse(base_url).map_err(|err| TransportError::Config {
            detail: format!("invalid base URL '{base_url}': {err}"),
        })?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(TransportError::Config {
                detail: format!("base URL scheme must be http or https, got '{}'", parsed.scheme()),
            });
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers({
                let mut headers = HeaderMap::new();
                headers.insert(
                    AUTHORIZATION,
                    HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| {
                        TransportError::Config {
                            detail: "API key contains non-header characters".to_string(),
                        }
                    })?,
                );
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
                headers
            })
            .build()
            .map_err(|err| TransportError::Config {
                detail: format!("failed to build HTTP client: {err}"),
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// POST a JSON document and parse the JSON reply. `request_id` travels
    /// as `X-Request-ID` so one retried operation is traceable attempt by
    /// attempt in upstream logs.
    pub async fn post_json<B>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
        timeout_override: Option<Duration>,
        request_id: &str,
    ) -> Result<serde_json::Value, TransportError>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self
            .client
            .post(&url)
            .header("X-Request-ID", request_id)
            .json(body);
        if let Some(timeout) = timeout_override {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                TransportError::Timeout { operation }
            } else {
                TransportError::Connect {
                    operation,
                    detail: err.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(TransportError::RemoteUnavailable {
                operation,
                status: status.as_u16(),
            });
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::RemoteRejected {
                operation,
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|err| TransportError::Deserialize {
                operation,
                detail: err.to_string(),
            })
    }
}
