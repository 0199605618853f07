// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::time::Duration;

use tokio::time::Instant;

/// Default idle window after which a session is considered expired.
pub const DEFAULT_SESSION_EXPIRY: Duration = Duration::from_secs(1800);

/// Tracks time since the last session activity.
#[derive(Debug, Clone)]
pub struct SessionTimer {
	duration: Duration,
	last_touched_at: Option<Instant>,
}

impl SessionTimer {
	pub fn new(duration: Duration) -> Self {
		Self {
			duration,
			last_touched_at: None,
		}
	}

	pub fn duration(&self) -> Duration {
		self.duration
	}

	/// True when never started, invalidated, or idle for at least the window.
	pub fn is_expired(&self) -> bool {
		match self.last_touched_at {
			None => true,
			Some(touched) => touched.elapsed() >= self.duration,
		}
	}

	pub fn start(&mut self) {
		self.last_touched_at = Some(Instant::now());
	}

	pub fn keep_alive(&mut self) {
		self.last_touched_at = Some(Instant::now());
	}

	pub fn invalidate(&mut self) {
		self.last_touched_at = None;
	}
}

impl Default for SessionTimer {
	fn default() -> Self {
		Self::new(DEFAULT_SESSION_EXPIRY)
	}
}
