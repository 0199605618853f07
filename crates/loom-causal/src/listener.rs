// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Push channel listener for server-driven cache invalidation.
//!
//! The listener keeps a single SSE connection to `GET /sse` open for one
//! session and turns `flushcache` / `flushfeatures` events into evictions on
//! the shared [`FeatureCache`]. It reconnects with backoff until stopped.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::{Event, Eventsource};
use futures::StreamExt;
use loom_causal_core::PushEvent;
use reqwest::header::{HeaderMap, ACCEPT, CACHE_CONTROL};
use reqwest::Client;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cache::FeatureCache;
use crate::transport::header_map;

/// Configuration for SSE reconnection behavior.
#[derive(Debug, Clone)]
pub struct SseConfig {
	/// Base delay for reconnection attempts.
	pub reconnect_base_delay: Duration,
	/// Maximum delay for reconnection attempts.
	pub reconnect_max_delay: Duration,
	/// Maximum number of consecutive failed attempts (0 = unlimited).
	pub max_reconnect_attempts: u32,
}

impl Default for SseConfig {
	fn default() -> Self {
		Self {
			reconnect_base_delay: Duration::from_secs(1),
			reconnect_max_delay: Duration::from_secs(30),
			max_reconnect_attempts: 0,
		}
	}
}

impl SseConfig {
	fn delay_after(&self, consecutive_failures: u32) -> Duration {
		let factor = 2u32.saturating_pow(consecutive_failures.min(10));
		self.reconnect_base_delay
			.saturating_mul(factor)
			.min(self.reconnect_max_delay)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
	Stopped,
	Starting,
	Started,
}

const STOPPED: u8 = 0;
const STARTING: u8 = 1;
const STARTED: u8 = 2;

#[derive(Debug)]
struct RunningTask {
	handle: JoinHandle<()>,
	shutdown_tx: mpsc::Sender<()>,
}

/// Where and how to connect, fixed for the listener's lifetime.
#[derive(Debug, Clone)]
struct StreamTarget {
	url: String,
	headers: HeaderMap,
	http_client: Client,
	config: SseConfig,
}

#[derive(Debug, Default)]
struct Counters {
	state: AtomicU8,
	connection_attempts: AtomicU64,
	events_received: AtomicU64,
}

/// A push listener bound to one session.
#[derive(Debug)]
pub struct PushListener {
	target: StreamTarget,
	cache: FeatureCache,
	counters: Arc<Counters>,
	task: Mutex<Option<RunningTask>>,
}

impl PushListener {
	pub fn new(
		stream_url: impl Into<String>,
		headers: Vec<(String, String)>,
		cache: FeatureCache,
		config: SseConfig,
		http_client: Client,
	) -> Self {
		Self {
			target: StreamTarget {
				url: stream_url.into(),
				headers: header_map(&headers),
				http_client,
				config,
			},
			cache,
			counters: Arc::new(Counters::default()),
			task: Mutex::new(None),
		}
	}

	pub fn stream_url(&self) -> &str {
		&self.target.url
	}

	pub fn state(&self) -> ListenerState {
		match self.counters.state.load(Ordering::SeqCst) {
			STARTED => ListenerState::Started,
			STARTING => ListenerState::Starting,
			_ => ListenerState::Stopped,
		}
	}

	/// True from `start` until `stop`, including while reconnecting.
	pub fn is_running(&self) -> bool {
		self.state() != ListenerState::Stopped
	}

	pub fn connection_attempts(&self) -> u64 {
		self.counters.connection_attempts.load(Ordering::SeqCst)
	}

	pub fn events_received(&self) -> u64 {
		self.counters.events_received.load(Ordering::SeqCst)
	}

	/// Starts the background connection. No-op while already running.
	pub async fn start(&self) {
		let mut task = self.task.lock().await;
		if let Some(running) = task.as_ref() {
			if !running.handle.is_finished() {
				debug!(url = %self.target.url, "Push listener already running");
				return;
			}
		}

		let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
		self.counters.state.store(STARTING, Ordering::SeqCst);

		let handle = tokio::spawn(run_listener_loop(
			self.target.clone(),
			self.cache.clone(),
			Arc::clone(&self.counters),
			shutdown_rx,
		));

		*task = Some(RunningTask {
			handle,
			shutdown_tx,
		});
	}

	/// Stops the connection. No-op when already stopped; never fails.
	pub async fn stop(&self) {
		let Some(running) = self.task.lock().await.take() else {
			return;
		};

		let _ = running.shutdown_tx.try_send(());
		running.handle.abort();
		let _ = running.handle.await;
		self.counters.state.store(STOPPED, Ordering::SeqCst);
		info!(url = %self.target.url, "Push listener stopped");
	}
}

impl Drop for PushListener {
	fn drop(&mut self) {
		if let Some(running) = self.task.get_mut().take() {
			running.handle.abort();
		}
	}
}

async fn run_listener_loop(
	target: StreamTarget,
	cache: FeatureCache,
	counters: Arc<Counters>,
	mut shutdown_rx: mpsc::Receiver<()>,
) {
	let mut consecutive_failures: u32 = 0;

	loop {
		if shutdown_rx.try_recv().is_ok() {
			break;
		}

		counters.connection_attempts.fetch_add(1, Ordering::SeqCst);
		info!(url = %target.url, "Connecting to push channel");

		let outcome = tokio::select! {
			outcome = connect_and_process(&target, &cache, &counters) => outcome,
			_ = shutdown_rx.recv() => break,
		};

		match outcome {
			Ok(()) => {
				debug!("Push channel ended normally");
				consecutive_failures = 0;
			}
			Err(message) => {
				error!(error = %message, "Push channel error");
				consecutive_failures += 1;
			}
		}

		counters.state.store(STARTING, Ordering::SeqCst);

		let max = target.config.max_reconnect_attempts;
		if max > 0 && consecutive_failures >= max {
			error!(
				attempts = consecutive_failures,
				"Max reconnection attempts reached, stopping push listener"
			);
			break;
		}

		let delay = target.config.delay_after(consecutive_failures);
		warn!(
			delay_ms = delay.as_millis() as u64,
			attempts = consecutive_failures,
			"Reconnecting to push channel"
		);

		tokio::select! {
			_ = tokio::time::sleep(delay) => {}
			_ = shutdown_rx.recv() => break,
		}
	}

	counters.state.store(STOPPED, Ordering::SeqCst);
}

async fn connect_and_process(
	target: &StreamTarget,
	cache: &FeatureCache,
	counters: &Counters,
) -> Result<(), String> {
	let response = target
		.http_client
		.get(&target.url)
		.headers(target.headers.clone())
		.header(ACCEPT, "text/event-stream")
		.header(CACHE_CONTROL, "no-cache")
		.send()
		.await
		.map_err(|e| e.to_string())?;
	if !response.status().is_success() {
		return Err(format!("push channel returned status {}", response.status()));
	}

	counters.state.store(STARTED, Ordering::SeqCst);
	info!("Push channel connected");

	let mut events = response.bytes_stream().eventsource();
	while let Some(event) = events.next().await {
		let event = event.map_err(|e| e.to_string())?;
		counters.events_received.fetch_add(1, Ordering::SeqCst);
		process_event(event, cache).await;
	}

	Ok(())
}

async fn process_event(event: Event, cache: &FeatureCache) {
	match PushEvent::parse(&event.event, &event.data) {
		Some(push) => apply_push_event(&push, cache).await,
		None => warn!(event_type = %event.event, "Dropping unrecognized push event"),
	}
}

/// Applies one push event to the cache.
pub async fn apply_push_event(event: &PushEvent, cache: &FeatureCache) {
	match event {
		PushEvent::FlushCache { timestamp } => {
			let removed = cache.evict_all().await;
			info!(
				removed = removed.len(),
				timestamp = %timestamp,
				sent_at = ?event.timestamp_utc(),
				"Feature cache flushed by server"
			);
		}
		PushEvent::FlushFeatures { names } => {
			let names: HashSet<String> = names.iter().cloned().collect();
			let removed = cache.evict_named(&names).await;
			info!(
				features = ?names,
				removed = removed.len(),
				"Features flushed by server"
			);
		}
		PushEvent::Hello { timestamp } => {
			debug!(timestamp = %timestamp, "Push channel hello");
		}
	}
}
