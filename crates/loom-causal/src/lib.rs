// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Causal feature runtime for Rust.
//!
//! This crate resolves declared features against the Causal decision service,
//! caches the results per feature identity and keeps that cache coherent.
//!
//! # Features
//!
//! - **Cached Resolution**: complete cache hits are served locally and the new
//!   impression is signalled in the background
//! - **Push Invalidation**: an SSE listener evicts cached features when the
//!   server flushes them
//! - **Session Expiry**: the cache is flushed after the session has been idle
//!   for longer than the expiry window
//! - **Typed Features**: anything implementing [`Feature`] can be requested
//!
//! # Example
//!
//! ```ignore
//! use loom_causal::{CausalClient, DynamicFeature, Feature, Session};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = CausalClient::builder()
//!         .base_url("https://tools.causallabs.io/api")
//!         .build()?;
//!
//!     client
//!         .set_session(Session::new().with_key("deviceId", json!("device-1")))
//!         .await;
//!     client.start_listening().await;
//!
//!     let mut banner = DynamicFeature::new("Banner").with_arg("page", json!("home"));
//!     let impression_id = CausalClient::new_impression_id();
//!     client.request_features(&mut [&mut banner], &impression_id).await?;
//!
//!     if banner.is_on() {
//!         println!("{:?}", banner.output("title"));
//!     }
//!     Ok(())
//! }
//! ```

mod cache;
mod client;
mod error;
mod listener;
mod retry;
mod session_store;
mod timer;
mod transport;

pub use cache::FeatureCache;
pub use client::{CausalClient, CausalClientBuilder, ClientConfig};
pub use error::{CausalError, Result};
pub use listener::{apply_push_event, ListenerState, PushListener, SseConfig};
pub use retry::{retry, RetryConfig, RetryableError, RETRYABLE_STATUSES};
pub use session_store::SessionStore;
pub use timer::{SessionTimer, DEFAULT_SESSION_EXPIRY};
pub use transport::{client_builder, Endpoint, HttpTransport, Transport, USER_AGENT};

// Re-export core types for convenience
pub use loom_causal_core::{
	codec, DynamicFeature, EncodedFeatureStatus, Feature, FeatureCacheItem, FeatureKey,
	FeatureState, PushEvent, Session, SessionId, SignalEvent,
};
