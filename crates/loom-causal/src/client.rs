// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Causal client: feature resolution against the remote decision service.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loom_causal_core::{
	codec, EncodedFeatureStatus, Feature, FeatureCacheItem, FeatureKey, FeatureState, Session,
	SignalEvent,
};
use reqwest::{Client, Url};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::FeatureCache;
use crate::error::{CausalError, Result};
use crate::listener::{PushListener, SseConfig};
use crate::retry::RetryConfig;
use crate::session_store::SessionStore;
use crate::timer::{SessionTimer, DEFAULT_SESSION_EXPIRY};
use crate::transport::{self, Endpoint, HttpTransport, Transport};

/// Configuration for the Causal client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
	/// Timeout for individual requests to `/features` and `/signal`.
	pub request_timeout: Duration,
	/// Retry configuration for HTTP requests.
	pub retry_config: RetryConfig,
	/// Idle window after which the feature cache is flushed.
	pub session_expiry: Duration,
	/// Push channel reconnection behavior.
	pub sse_config: SseConfig,
	/// Log request and response bodies at debug level.
	pub verbose_logging: bool,
	/// Headers added to every request.
	pub extra_headers: Vec<(String, String)>,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			request_timeout: Duration::from_secs(10),
			retry_config: RetryConfig::default(),
			session_expiry: DEFAULT_SESSION_EXPIRY,
			sse_config: SseConfig::default(),
			verbose_logging: false,
			extra_headers: Vec::new(),
		}
	}
}

/// Builder for constructing a [`CausalClient`].
pub struct CausalClientBuilder {
	base_url: Option<String>,
	device_id: Option<String>,
	config: ClientConfig,
	transport: Option<Arc<dyn Transport>>,
}

impl CausalClientBuilder {
	pub fn new() -> Self {
		Self {
			base_url: None,
			device_id: None,
			config: ClientConfig::default(),
			transport: None,
		}
	}

	/// Sets the base URL of the Causal service, e.g. `https://tools.causallabs.io`.
	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = Some(url.into());
		self
	}

	/// Sets the device identifier used for the push channel.
	///
	/// A random UUID is generated when none is given.
	pub fn device_id(mut self, device_id: impl Into<String>) -> Self {
		self.device_id = Some(device_id.into());
		self
	}

	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.config.request_timeout = timeout;
		self
	}

	pub fn retry_config(mut self, config: RetryConfig) -> Self {
		self.config.retry_config = config;
		self
	}

	pub fn session_expiry(mut self, expiry: Duration) -> Self {
		self.config.session_expiry = expiry;
		self
	}

	pub fn sse_config(mut self, config: SseConfig) -> Self {
		self.config.sse_config = config;
		self
	}

	pub fn verbose_logging(mut self, enable: bool) -> Self {
		self.config.verbose_logging = enable;
		self
	}

	/// Adds a header sent with every request, including the push channel.
	pub fn extra_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.config.extra_headers.push((name.into(), value.into()));
		self
	}

	/// Replaces the HTTP transport for `/features` and `/signal`.
	pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn build(self) -> Result<CausalClient> {
		let base_url = self.base_url.ok_or(CausalError::InvalidBaseUrl)?;
		let base_url = base_url.trim_end_matches('/').to_string();

		let parsed = Url::parse(&base_url).map_err(|_| CausalError::InvalidBaseUrl)?;
		if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
			return Err(CausalError::InvalidBaseUrl);
		}

		let device_id = self
			.device_id
			.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

		let mut stream_url =
			Url::parse(&format!("{base_url}/sse")).map_err(|_| CausalError::InvalidBaseUrl)?;
		stream_url.query_pairs_mut().append_pair("id", &device_id);

		let transport: Arc<dyn Transport> = match self.transport {
			Some(transport) => transport,
			None => Arc::new(HttpTransport::new(
				base_url.clone(),
				self.config.request_timeout,
				self.config.retry_config.clone(),
				&self.config.extra_headers,
				self.config.verbose_logging,
			)?),
		};

		let sse_client = transport::client_builder(&self.config.extra_headers)
			.connect_timeout(self.config.request_timeout)
			.build()
			.map_err(CausalError::ClientBuild)?;

		let timer = SessionTimer::new(self.config.session_expiry);

		info!(base_url = %base_url, device_id = %device_id, "Causal client created");

		Ok(CausalClient {
			inner: Arc::new(ClientInner {
				base_url,
				device_id,
				stream_url: stream_url.to_string(),
				config: self.config,
				transport,
				sse_client,
				cache: FeatureCache::new(),
				session: Mutex::new(SessionStore::new(timer)),
				listener: Mutex::new(None),
				listening: AtomicBool::new(false),
				registered: AtomicBool::new(false),
			}),
		})
	}
}

impl Default for CausalClientBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct ClientInner {
	base_url: String,
	device_id: String,
	stream_url: String,
	config: ClientConfig,
	transport: Arc<dyn Transport>,
	sse_client: Client,
	cache: FeatureCache,
	// Lock order: `listener` before `session`.
	session: Mutex<SessionStore>,
	listener: Mutex<Option<Arc<PushListener>>>,
	listening: AtomicBool,
	registered: AtomicBool,
}

/// Client for resolving features against the Causal service.
///
/// Resolved statuses are cached per [`FeatureKey`] and served locally until
/// the server invalidates them over the push channel or the session goes
/// idle past its expiry window. Clones share all state.
#[derive(Clone)]
pub struct CausalClient {
	inner: Arc<ClientInner>,
}

impl CausalClient {
	pub fn builder() -> CausalClientBuilder {
		CausalClientBuilder::new()
	}

	/// Generates a fresh impression id for one render.
	pub fn new_impression_id() -> String {
		uuid::Uuid::new_v4().to_string()
	}

	pub fn base_url(&self) -> &str {
		&self.inner.base_url
	}

	pub fn device_id(&self) -> &str {
		&self.inner.device_id
	}

	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	pub fn cache(&self) -> &FeatureCache {
		&self.inner.cache
	}

	/// Whether the last resolve response reported this device as registered.
	pub fn is_device_registered(&self) -> bool {
		self.inner.registered.load(Ordering::SeqCst)
	}

	pub async fn session(&self) -> Option<Session> {
		self.inner.session.lock().await.current().ok().cloned()
	}

	/// Assigns the session. When its identity changes the timer is
	/// invalidated and the push listener is rebuilt for the new session.
	/// The cache is left alone.
	pub async fn set_session(&self, session: Session) {
		let mut slot = self.inner.listener.lock().await;
		let headers = session.headers();
		let changed = self.inner.session.lock().await.set(session);
		if !changed && slot.is_some() {
			return;
		}

		if let Some(previous) = slot.take() {
			previous.stop().await;
		}

		let listener = Arc::new(PushListener::new(
			self.inner.stream_url.clone(),
			headers,
			self.inner.cache.clone(),
			self.inner.config.sse_config.clone(),
			self.inner.sse_client.clone(),
		));
		if self.inner.listening.load(Ordering::SeqCst) {
			listener.start().await;
		}
		*slot = Some(listener);
	}

	/// Resolves `keys` for a render identified by `impression_id`.
	///
	/// A complete cache hit is served locally and the server is told about
	/// the new impression in the background. Statuses come back in request
	/// order; an empty result means the request produced no response.
	pub async fn resolve(
		&self,
		keys: &[FeatureKey],
		impression_id: &str,
	) -> Result<Vec<EncodedFeatureStatus>> {
		self.resolve_with(keys, Some(impression_id)).await
	}

	/// Warms the cache for `keys` without a render.
	pub async fn resolve_for_cache_fill(&self, keys: &[FeatureKey]) -> Result<()> {
		self.resolve_with(keys, None).await.map(|_| ())
	}

	async fn resolve_with(
		&self,
		keys: &[FeatureKey],
		impression_id: Option<&str>,
	) -> Result<Vec<EncodedFeatureStatus>> {
		let (session_id, session_args, session_keys, headers) = {
			let store = self.inner.session.lock().await;
			(
				store.id()?,
				store.session_args()?,
				store.session_keys()?,
				store.headers()?,
			)
		};

		if keys.is_empty() {
			return Ok(Vec::new());
		}

		// A hit counts as session activity; an idle session re-resolves.
		let cached = {
			let mut store = self.inner.session.lock().await;
			let cached = self.inner.cache.get_all(keys).await;
			if cached.is_empty() {
				cached
			} else if store.timer().is_expired() {
				let flushed = self.inner.cache.evict_all().await;
				info!(flushed = flushed.len(), "Session expired, feature cache flushed");
				store.timer_mut().start();
				Vec::new()
			} else {
				store.timer_mut().keep_alive();
				cached
			}
		};
		if !cached.is_empty() {
			debug!(features = keys.len(), "Serving features from cache");
			let Some(impression_id) = impression_id else {
				return Ok(cached.into_iter().map(|item| item.status).collect());
			};
			self.signal_cached_features(&cached, &session_keys, headers, impression_id);
			return Ok(cached
				.iter()
				.map(|item| item.status.with_impression(impression_id))
				.collect());
		}

		let sequence = self.inner.cache.reserve_sequence();
		let body = codec::encode_resolve_request(&session_args, impression_id, keys)?;
		let Some(bytes) = self
			.inner
			.transport
			.post(Endpoint::Features, headers, body)
			.await?
		else {
			return Ok(Vec::new());
		};

		let response = codec::decode_resolve_response(&bytes)?;
		if response.statuses.len() != keys.len() {
			return Err(CausalError::parse_failure(format!(
				"Expected {} impressions in the response, found {}.",
				keys.len(),
				response.statuses.len()
			)));
		}

		let statuses: Vec<EncodedFeatureStatus> = match impression_id {
			Some(impression_id) => response
				.statuses
				.iter()
				.map(|status| status.with_impression(impression_id))
				.collect(),
			None => response.statuses,
		};

		{
			let mut store = self.inner.session.lock().await;
			if store.id().ok().as_ref() == Some(&session_id) {
				store.apply_response(&response.session_json)?;
			} else {
				debug!("Session changed while resolving, skipping session merge");
			}

			if store.timer().is_expired() {
				let flushed = self.inner.cache.evict_all().await;
				info!(flushed = flushed.len(), "Session expired, feature cache flushed");
				store.timer_mut().start();
			} else {
				store.timer_mut().keep_alive();
			}

			let items = keys
				.iter()
				.cloned()
				.zip(statuses.iter().cloned())
				.map(|(key, status)| FeatureCacheItem::new(key, status))
				.collect();
			let written = self.inner.cache.put_all_sequenced(items, sequence).await;
			debug!(written, sequence, "Cached resolved features");
		}

		self.inner
			.registered
			.store(response.is_device_registered, Ordering::SeqCst);

		Ok(statuses)
	}

	fn signal_cached_features(
		&self,
		items: &[FeatureCacheItem],
		session_keys: &serde_json::Map<String, serde_json::Value>,
		headers: Vec<(String, String)>,
		new_impression_id: &str,
	) {
		let body = match codec::encode_signal_cached_features(items, session_keys, new_impression_id)
		{
			Ok(body) => body,
			Err(e) => {
				warn!(error = %e, "Failed to encode cached feature signal");
				return;
			}
		};

		let transport = Arc::clone(&self.inner.transport);
		tokio::spawn(async move {
			if let Err(e) = transport.post(Endpoint::Signal, headers, body).await {
				warn!(error = %e, "Failed to signal cached features");
			}
		});
	}

	/// Sends an event to `/signal`.
	pub async fn signal(&self, event: &SignalEvent, impression_id: Option<&str>) -> Result<()> {
		let (session_keys, headers) = {
			let store = self.inner.session.lock().await;
			(store.session_keys()?, store.headers()?)
		};

		let body = codec::encode_signal_event(event, &session_keys, impression_id)?;
		self.inner
			.transport
			.post(Endpoint::Signal, headers, body)
			.await?;
		debug!(
			feature = %event.feature_name,
			event = %event.event_name,
			"Signal sent"
		);
		Ok(())
	}

	/// Sends an event in the background. Failures are logged.
	pub fn signal_and_forget(&self, event: SignalEvent, impression_id: Option<String>) {
		let client = self.clone();
		tokio::spawn(async move {
			if let Err(e) = client.signal(&event, impression_id.as_deref()).await {
				warn!(
					feature = %event.feature_name,
					event = %event.event_name,
					error = %e,
					"Failed to send signal"
				);
			}
		});
	}

	/// Touches the session timer and tells the server the session is active.
	pub async fn keep_alive(&self) {
		let prepared = {
			let mut store = self.inner.session.lock().await;
			store.timer_mut().keep_alive();
			store
				.session_keys()
				.and_then(|keys| store.headers().map(|headers| (keys, headers)))
		};

		let result = match prepared {
			Ok((session_keys, headers)) => match codec::encode_keep_alive(&session_keys) {
				Ok(body) => self
					.inner
					.transport
					.post(Endpoint::Signal, headers, body)
					.await
					.map(|_| ()),
				Err(e) => Err(e.into()),
			},
			Err(e) => Err(e),
		};

		if let Err(e) = result {
			warn!(error = %e, "Keep-alive failed");
		}
	}

	pub async fn clear_cache(&self) {
		let removed = self.inner.cache.evict_all().await;
		debug!(removed = removed.len(), "Feature cache cleared");
	}

	/// Starts the push listener, now or as soon as a session is set.
	pub async fn start_listening(&self) {
		self.inner.listening.store(true, Ordering::SeqCst);
		if let Some(listener) = self.inner.listener.lock().await.as_ref() {
			listener.start().await;
		}
	}

	pub async fn stop_listening(&self) {
		self.inner.listening.store(false, Ordering::SeqCst);
		if let Some(listener) = self.inner.listener.lock().await.as_ref() {
			listener.stop().await;
		}
	}

	pub async fn is_listening(&self) -> bool {
		match self.inner.listener.lock().await.as_ref() {
			Some(listener) => listener.is_running(),
			None => false,
		}
	}

	/// The push listener bound to the current session, if one is set.
	pub async fn push_listener(&self) -> Option<Arc<PushListener>> {
		self.inner.listener.lock().await.clone()
	}

	/// Resolves typed features and applies the results to them.
	///
	/// Every status is computed before any feature is updated. On an empty
	/// result the features keep their current state.
	pub async fn request_features(
		&self,
		features: &mut [&mut dyn Feature],
		impression_id: &str,
	) -> Result<()> {
		let keys: Vec<FeatureKey> = features.iter().map(|feature| feature.key()).collect();
		let statuses = self.resolve(&keys, impression_id).await?;
		if statuses.len() != features.len() {
			warn!(
				requested = features.len(),
				"No statuses resolved, features left unchanged"
			);
			return Ok(());
		}

		for (feature, status) in features.iter_mut().zip(statuses) {
			feature.update(FeatureState::from(status));
		}
		Ok(())
	}

	/// Seeds the cache from already resolved feature instances.
	pub async fn cache_features(&self, features: &[&dyn Feature]) -> Result<()> {
		let items = features
			.iter()
			.map(|feature| FeatureCacheItem::from_feature(*feature))
			.collect::<loom_causal_core::Result<Vec<_>>>()?;
		self.inner.cache.put_all(items).await;
		Ok(())
	}
}
