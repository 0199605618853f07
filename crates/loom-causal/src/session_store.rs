// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Holder of the current session and its activity timer.

use loom_causal_core::{Session, SessionId};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{CausalError, Result};
use crate::timer::SessionTimer;

#[derive(Debug, Default)]
pub struct SessionStore {
	session: Option<Session>,
	timer: SessionTimer,
}

impl SessionStore {
	pub fn new(timer: SessionTimer) -> Self {
		Self {
			session: None,
			timer,
		}
	}

	/// Replaces the session. Returns true when the session id changed, in
	/// which case the timer has been invalidated.
	pub fn set(&mut self, session: Session) -> bool {
		let new_id = session.id();
		let changed = self.session.as_ref().map(Session::id).as_ref() != Some(&new_id);
		self.session = Some(session);
		if changed {
			debug!(session_id = %new_id, "Session identity changed");
			self.timer.invalidate();
		}
		changed
	}

	pub fn current(&self) -> Result<&Session> {
		self.session.as_ref().ok_or(CausalError::MissingSession)
	}

	pub fn id(&self) -> Result<SessionId> {
		self.current().map(Session::id)
	}

	pub fn headers(&self) -> Result<Vec<(String, String)>> {
		self.current().map(Session::headers)
	}

	pub fn session_keys(&self) -> Result<Map<String, Value>> {
		self.current().map(|session| session.keys().clone())
	}

	pub fn session_args(&self) -> Result<Map<String, Value>> {
		self.current().map(Session::args_json)
	}

	/// Merges the `session` object of a resolve response.
	pub fn apply_response(&mut self, session_json: &Map<String, Value>) -> Result<()> {
		let session = self.session.as_mut().ok_or(CausalError::MissingSession)?;
		session.apply_update(session_json);
		Ok(())
	}

	pub fn timer(&self) -> &SessionTimer {
		&self.timer
	}

	pub fn timer_mut(&mut self) -> &mut SessionTimer {
		&mut self.timer
	}
}
