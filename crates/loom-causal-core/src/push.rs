// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Push-channel (SSE) event types.
//!
//! # Events
//!
//! - `flushcache` - drop every cached feature; data is a timestamp
//! - `flushfeatures` - drop the named features; data is a space-delimited name list
//! - `hello` - sent on connect; data is a timestamp
//!
//! Event tags are compared exactly. Anything else is not a push event.

use chrono::{DateTime, TimeZone, Utc};

pub const FLUSH_CACHE_EVENT: &str = "flushcache";
pub const FLUSH_FEATURES_EVENT: &str = "flushfeatures";
pub const HELLO_EVENT: &str = "hello";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
	FlushCache { timestamp: String },
	FlushFeatures { names: Vec<String> },
	Hello { timestamp: String },
}

impl PushEvent {
	/// Classifies an inbound event. Returns `None` for unknown tags.
	pub fn parse(event_type: &str, data: &str) -> Option<Self> {
		match event_type {
			FLUSH_CACHE_EVENT => Some(PushEvent::FlushCache {
				timestamp: data.trim().to_string(),
			}),
			FLUSH_FEATURES_EVENT => Some(PushEvent::FlushFeatures {
				names: data
					.split(' ')
					.filter(|name| !name.is_empty())
					.map(str::to_string)
					.collect(),
			}),
			HELLO_EVENT => Some(PushEvent::Hello {
				timestamp: data.trim().to_string(),
			}),
			_ => None,
		}
	}

	pub fn event_type(&self) -> &'static str {
		match self {
			PushEvent::FlushCache { .. } => FLUSH_CACHE_EVENT,
			PushEvent::FlushFeatures { .. } => FLUSH_FEATURES_EVENT,
			PushEvent::Hello { .. } => HELLO_EVENT,
		}
	}

	/// Interprets the timestamp payload as epoch milliseconds or RFC 3339.
	/// Informational only.
	pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
		let raw = match self {
			PushEvent::FlushCache { timestamp } | PushEvent::Hello { timestamp } => timestamp,
			PushEvent::FlushFeatures { .. } => return None,
		};

		if let Ok(millis) = raw.parse::<i64>() {
			return Utc.timestamp_millis_opt(millis).single();
		}
		DateTime::parse_from_rfc3339(raw)
			.ok()
			.map(|ts| ts.with_timezone(&Utc))
	}
}
