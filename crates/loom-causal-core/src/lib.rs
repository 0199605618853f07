// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Causal feature runtime.
//!
//! This crate holds everything that does not perform I/O: feature identity
//! and resolved statuses, the session model, the JSON wire codec for the
//! `/features` and `/signal` endpoints, and push-channel event parsing. The
//! runtime itself lives in `loom-causal`.
//!
//! # Example
//!
//! ```
//! use loom_causal_core::{codec, FeatureKey, Session};
//! use serde_json::json;
//!
//! let session = Session::new().with_key("deviceId", json!("device-1"));
//! let key = FeatureKey::named("Banner");
//!
//! let body = codec::encode_resolve_request(&session.args_json(), Some("imp-1"), &[key]).unwrap();
//! assert!(String::from_utf8(body).unwrap().contains(r#""name":"Banner""#));
//! ```

pub mod codec;
pub mod error;
pub mod feature;
pub mod push;
pub mod session;

pub use codec::{ResolveResponse, SignalEvent, PROTOCOL_VERSION, SESSION_FEATURE};
pub use error::{CodecError, Result};
pub use feature::{
	canonical_json, DynamicFeature, EncodedFeatureStatus, Feature, FeatureCacheItem, FeatureKey,
	FeatureState, IMPRESSION_FIELD, OFF_SENTINEL,
};
pub use push::PushEvent;
pub use session::{Session, SessionId, SESSION_HEADER_PREFIX};
