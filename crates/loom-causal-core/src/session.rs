// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session identity and arguments.

use std::fmt;

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::feature::canonical_json;

/// Prefix for the request headers derived from session key fields.
pub const SESSION_HEADER_PREFIX: &str = "x-causal-";

/// Stable identifier derived from a session's arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// The caller's session: key fields, other arguments, and server outputs.
///
/// Key fields identify the session to the server (they are sent as the `id`
/// of every signal and as `x-causal-*` headers). Outputs are written by
/// resolution responses only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
	keys: Map<String, Value>,
	args: Map<String, Value>,
	outputs: Map<String, Value>,
}

impl Session {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_key(mut self, name: impl Into<String>, value: Value) -> Self {
		self.keys.insert(name.into(), value);
		self
	}

	pub fn with_arg(mut self, name: impl Into<String>, value: Value) -> Self {
		self.args.insert(name.into(), value);
		self
	}

	/// Derived from the canonical form of all arguments, so it changes
	/// exactly when the argument identity changes.
	pub fn id(&self) -> SessionId {
		let mut hasher = Sha256::new();
		hasher.update(canonical_json(&Value::Object(self.keys.clone())).as_bytes());
		hasher.update([0u8]);
		hasher.update(canonical_json(&Value::Object(self.args.clone())).as_bytes());
		SessionId(hex::encode(hasher.finalize()))
	}

	pub fn keys(&self) -> &Map<String, Value> {
		&self.keys
	}

	pub fn outputs(&self) -> &Map<String, Value> {
		&self.outputs
	}

	pub fn output(&self, name: &str) -> Option<&Value> {
		self.outputs.get(name)
	}

	/// Key fields and arguments merged, as sent in a resolve request.
	pub fn args_json(&self) -> Map<String, Value> {
		let mut merged = self.keys.clone();
		for (name, value) in &self.args {
			merged.insert(name.clone(), value.clone());
		}
		merged
	}

	/// One header per string-valued key field, named `x-causal-<lowercased key>`.
	pub fn headers(&self) -> Vec<(String, String)> {
		self.keys
			.iter()
			.filter_map(|(name, value)| {
				value.as_str().map(|value| {
					(
						format!("{}{}", SESSION_HEADER_PREFIX, name.to_lowercase()),
						value.to_string(),
					)
				})
			})
			.collect()
	}

	/// Merges a server `session` object. Output fields win; echoed key and
	/// argument fields are ignored so caller input is preserved.
	pub fn apply_update(&mut self, session_json: &Map<String, Value>) {
		for (name, value) in session_json {
			if self.keys.contains_key(name) || self.args.contains_key(name) {
				continue;
			}
			self.outputs.insert(name.clone(), value.clone());
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn session() -> Session {
		Session::new()
			.with_key("deviceId", json!("device-1"))
			.with_key("userTier", json!(3))
			.with_arg("locale", json!("en-US"))
	}

	#[test]
	fn test_headers_only_emit_string_keys() {
		let headers = session().headers();
		assert_eq!(
			headers,
			vec![("x-causal-deviceid".to_string(), "device-1".to_string())]
		);
	}

	#[test]
	fn test_id_changes_with_arguments_only() {
		let base = session();
		let mut updated = base.clone();
		let mut server = Map::new();
		server.insert("arrivalKey".to_string(), json!("abc"));
		updated.apply_update(&server);
		assert_eq!(base.id(), updated.id());

		let other = session().with_arg("locale", json!("fr-FR"));
		assert_ne!(base.id(), other.id());
	}

	#[test]
	fn test_apply_update_preserves_caller_arguments() {
		let mut session = session();
		let mut server = Map::new();
		server.insert("deviceId".to_string(), json!("echoed"));
		server.insert("locale".to_string(), json!("xx"));
		server.insert("sessionId".to_string(), json!("s-1"));
		session.apply_update(&server);

		assert_eq!(session.keys()["deviceId"], json!("device-1"));
		assert_eq!(session.args_json()["locale"], json!("en-US"));
		assert_eq!(session.output("sessionId"), Some(&json!("s-1")));
		assert!(session.output("deviceId").is_none());
	}

	#[test]
	fn test_args_json_merges_keys_and_args() {
		let args = session().args_json();
		assert_eq!(args.len(), 3);
		assert_eq!(args["userTier"], json!(3));
	}
}
