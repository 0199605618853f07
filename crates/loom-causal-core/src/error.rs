// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Errors raised while encoding or decoding Causal payloads.
#[derive(Debug, Error)]
pub enum CodecError {
	/// The payload was valid JSON but structurally wrong.
	#[error("parse failure: {message}")]
	ParseFailure { message: String },

	/// The payload could not be serialized or deserialized at all.
	#[error("json error: {source}")]
	Json {
		payload: String,
		#[source]
		source: serde_json::Error,
	},

	/// A feature was offered for caching before it was resolved.
	#[error("feature {name} cannot be cached in its current state")]
	InvalidFeature { name: String },
}

impl CodecError {
	pub fn parse_failure(message: impl Into<String>) -> Self {
		CodecError::ParseFailure {
			message: message.into(),
		}
	}

	pub fn json(payload: &[u8], source: serde_json::Error) -> Self {
		CodecError::Json {
			payload: String::from_utf8_lossy(payload).into_owned(),
			source,
		}
	}
}

pub type Result<T> = std::result::Result<T, CodecError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_failure_displays_message() {
		let err = CodecError::parse_failure("Unable to locate session in the response.");
		assert_eq!(
			err.to_string(),
			"parse failure: Unable to locate session in the response."
		);
	}

	#[test]
	fn test_json_error_keeps_payload() {
		let source = serde_json::from_slice::<serde_json::Value>(b"{oops").unwrap_err();
		let err = CodecError::json(b"{oops", source);
		match err {
			CodecError::Json { payload, .. } => assert_eq!(payload, "{oops"),
			other => panic!("unexpected error: {other:?}"),
		}
	}
}
