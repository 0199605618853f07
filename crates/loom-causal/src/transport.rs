// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP transport for the `/features` and `/signal` endpoints.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::error::{CausalError, Result};
use crate::retry::{retry, RetryConfig, RetryableError, RETRYABLE_STATUSES};

/// Static client marker sent as the `User-Agent`.
pub const USER_AGENT: &str = "Causal Rust Client";

const ACCEPT_VALUE: &str = "application/json,text/plain";
const CONTENT_TYPE_VALUE: &str = "application/json";

/// The two logical POST endpoints of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
	Features,
	Signal,
}

impl Endpoint {
	pub fn path(&self) -> &'static str {
		match self {
			Endpoint::Features => "/features",
			Endpoint::Signal => "/signal",
		}
	}
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.path())
	}
}

/// Sends encoded bodies to the service.
///
/// `Ok(None)` means the request never produced a usable response; callers
/// treat that as an empty, non-fatal result. A received non-2xx response is
/// an error.
#[async_trait]
pub trait Transport: Send + Sync {
	async fn post(
		&self,
		endpoint: Endpoint,
		headers: Vec<(String, String)>,
		body: Vec<u8>,
	) -> Result<Option<Vec<u8>>>;
}

/// Converts name/value pairs into a header map, skipping pairs that are not
/// valid HTTP headers.
pub(crate) fn header_map(pairs: &[(String, String)]) -> HeaderMap {
	let mut headers = HeaderMap::new();
	for (name, value) in pairs {
		match (
			HeaderName::from_bytes(name.as_bytes()),
			HeaderValue::from_str(value),
		) {
			(Ok(name), Ok(value)) => {
				headers.insert(name, value);
			}
			_ => warn!(header = %name, "Ignoring invalid header"),
		}
	}
	headers
}

/// Returns a reqwest builder carrying the static Causal request headers.
pub fn client_builder(extra_headers: &[(String, String)]) -> reqwest::ClientBuilder {
	let mut headers = HeaderMap::new();
	headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_VALUE));
	headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_VALUE));
	headers.extend(header_map(extra_headers));

	Client::builder()
		.user_agent(USER_AGENT)
		.default_headers(headers)
}

#[derive(Debug)]
enum AttemptError {
	Transport(reqwest::Error),
	Status { status: StatusCode, body: String },
}

impl RetryableError for AttemptError {
	fn is_retryable(&self) -> bool {
		match self {
			AttemptError::Transport(e) => e.is_retryable(),
			AttemptError::Status { status, .. } => RETRYABLE_STATUSES.contains(status),
		}
	}
}

/// [`Transport`] backed by reqwest.
#[derive(Debug, Clone)]
pub struct HttpTransport {
	base_url: String,
	http_client: Client,
	retry_config: RetryConfig,
	verbose: bool,
}

impl HttpTransport {
	pub fn new(
		base_url: impl Into<String>,
		request_timeout: Duration,
		retry_config: RetryConfig,
		extra_headers: &[(String, String)],
		verbose: bool,
	) -> Result<Self> {
		let http_client = client_builder(extra_headers)
			.timeout(request_timeout)
			.build()
			.map_err(CausalError::ClientBuild)?;

		Ok(Self {
			base_url: base_url.into().trim_end_matches('/').to_string(),
			http_client,
			retry_config,
			verbose,
		})
	}

	async fn attempt(
		&self,
		url: &str,
		headers: &HeaderMap,
		body: &[u8],
	) -> std::result::Result<Vec<u8>, AttemptError> {
		let response = self
			.http_client
			.post(url)
			.headers(headers.clone())
			.body(body.to_vec())
			.send()
			.await
			.map_err(AttemptError::Transport)?;
		let status = response.status();
		if !status.is_success() {
			let body = response.text().await.unwrap_or_default();
			return Err(AttemptError::Status { status, body });
		}

		let bytes = response.bytes().await.map_err(AttemptError::Transport)?;
		Ok(bytes.to_vec())
	}
}

#[async_trait]
impl Transport for HttpTransport {
	async fn post(
		&self,
		endpoint: Endpoint,
		headers: Vec<(String, String)>,
		body: Vec<u8>,
	) -> Result<Option<Vec<u8>>> {
		let url = format!("{}{}", self.base_url, endpoint.path());
		if self.verbose {
			debug!(url = %url, body = %String::from_utf8_lossy(&body), "Sending request");
		} else {
			debug!(url = %url, bytes = body.len(), "Sending request");
		}

		let headers = header_map(&headers);
		let result = retry(&self.retry_config, || self.attempt(&url, &headers, &body)).await;

		match result {
			Ok(bytes) => {
				if self.verbose {
					debug!(url = %url, body = %String::from_utf8_lossy(&bytes), "Received response");
				}
				Ok(Some(bytes))
			}
			Err(AttemptError::Status { status, body }) => {
				warn!(url = %url, status = status.as_u16(), "Request returned an error status");
				Err(CausalError::NetworkResponse {
					endpoint: endpoint.path().to_string(),
					status: status.as_u16(),
					body,
				})
			}
			Err(AttemptError::Transport(e)) => {
				warn!(url = %url, error = %e, "Request produced no response");
				Ok(None)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use wiremock::matchers::{body_string, header, method, path};
	use wiremock::{Mock, MockServer, ResponseTemplate};

	fn transport(base_url: &str, retry_config: RetryConfig) -> HttpTransport {
		HttpTransport::new(
			base_url,
			Duration::from_secs(5),
			retry_config,
			&[("x-extra".to_string(), "1".to_string())],
			true,
		)
		.unwrap()
	}

	#[test]
	fn test_endpoint_paths() {
		assert_eq!(Endpoint::Features.path(), "/features");
		assert_eq!(Endpoint::Signal.to_string(), "/signal");
	}

	#[tokio::test]
	async fn test_post_sends_static_and_session_headers() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/features"))
			.and(header("user-agent", USER_AGENT))
			.and(header("content-type", CONTENT_TYPE_VALUE))
			.and(header("x-extra", "1"))
			.and(header("x-causal-deviceid", "d1"))
			.and(body_string("{}"))
			.respond_with(ResponseTemplate::new(200).set_body_string("ok"))
			.expect(1)
			.mount(&server)
			.await;

		let result = transport(&format!("{}/", server.uri()), RetryConfig::none())
			.post(
				Endpoint::Features,
				vec![("x-causal-deviceid".to_string(), "d1".to_string())],
				b"{}".to_vec(),
			)
			.await
			.unwrap();

		assert_eq!(result, Some(b"ok".to_vec()));
		let requests = server.received_requests().await.unwrap();
		assert_eq!(requests[0].headers.get("accept").unwrap(), ACCEPT_VALUE);
	}

	#[tokio::test]
	async fn test_invalid_session_header_is_dropped_not_fatal() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/features"))
			.and(header("x-causal-deviceid", "d1"))
			.respond_with(ResponseTemplate::new(200).set_body_string("ok"))
			.expect(1)
			.mount(&server)
			.await;

		let result = transport(&server.uri(), RetryConfig::none())
			.post(
				Endpoint::Features,
				vec![
					("x-causal-device id".to_string(), "d1".to_string()),
					("x-causal-deviceid".to_string(), "d1".to_string()),
				],
				b"{}".to_vec(),
			)
			.await
			.unwrap();

		assert_eq!(result, Some(b"ok".to_vec()));
	}

	#[test]
	fn test_header_map_skips_invalid_pairs() {
		let headers = header_map(&[
			("x-causal-device id".to_string(), "d1".to_string()),
			("x-causal-userid".to_string(), "bad\nvalue".to_string()),
			("x-causal-deviceid".to_string(), "d1".to_string()),
		]);
		assert_eq!(headers.len(), 1);
		assert_eq!(headers.get("x-causal-deviceid").unwrap(), "d1");
	}

	#[tokio::test]
	async fn test_non_success_status_is_network_response() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/signal"))
			.respond_with(ResponseTemplate::new(400).set_body_string("bad"))
			.expect(1)
			.mount(&server)
			.await;

		let err = transport(&server.uri(), RetryConfig::default())
			.post(Endpoint::Signal, vec![], b"{}".to_vec())
			.await
			.unwrap_err();

		assert!(matches!(
			err,
			CausalError::NetworkResponse { status: 400, ref body, .. } if body == "bad"
		));
	}

	#[tokio::test]
	async fn test_retryable_status_is_retried() {
		let server = MockServer::start().await;
		Mock::given(method("POST"))
			.and(path("/features"))
			.respond_with(ResponseTemplate::new(503))
			.expect(2)
			.mount(&server)
			.await;

		let cfg = RetryConfig {
			max_attempts: 2,
			base_delay: Duration::from_millis(1),
			max_delay: Duration::from_millis(1),
			backoff_factor: 1.0,
			jitter: false,
		};
		let err = transport(&server.uri(), cfg)
			.post(Endpoint::Features, vec![], b"{}".to_vec())
			.await
			.unwrap_err();

		assert!(matches!(err, CausalError::NetworkResponse { status: 503, .. }));
	}

	#[tokio::test]
	async fn test_unreachable_server_yields_empty_result() {
		// Port 9 (discard) is not expected to accept HTTP connections.
		let result = transport("http://127.0.0.1:9", RetryConfig::none())
			.post(Endpoint::Features, vec![], b"{}".to_vec())
			.await
			.unwrap();

		assert!(result.is_none());
	}
}
