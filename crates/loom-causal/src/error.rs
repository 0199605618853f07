// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the Causal runtime.

use loom_causal_core::CodecError;
use thiserror::Error;

/// Result type alias for the Causal runtime.
pub type Result<T> = std::result::Result<T, CausalError>;

/// Errors that can occur in the Causal runtime.
#[derive(Error, Debug)]
pub enum CausalError {
	/// An operation needed a session and none has been set.
	#[error("No session has been set")]
	MissingSession,

	/// The server payload was malformed or structurally invalid.
	#[error("Failed to parse server response: {message}")]
	ParseFailure {
		/// Names the missing or invalid field.
		message: String,
	},

	/// The server answered with a non-2xx status.
	#[error("Request to {endpoint} failed with status {status}: {body}")]
	NetworkResponse {
		/// Request path.
		endpoint: String,
		/// HTTP status code.
		status: u16,
		/// Response body, if it could be read.
		body: String,
	},

	/// Serialization failed at the JSON boundary.
	#[error("JSON error: {source}")]
	Json {
		/// The offending payload, lossily decoded.
		payload: String,
		#[source]
		source: serde_json::Error,
	},

	/// A feature was offered for caching before it was resolved.
	#[error("Feature {name} cannot be cached in its current state")]
	InvalidFeature {
		/// The feature name.
		name: String,
	},

	/// Base URL is missing or invalid.
	#[error("Invalid or missing base URL")]
	InvalidBaseUrl,

	/// The HTTP client could not be constructed.
	#[error("Failed to build HTTP client: {0}")]
	ClientBuild(#[source] reqwest::Error),
}

impl From<CodecError> for CausalError {
	fn from(err: CodecError) -> Self {
		match err {
			CodecError::ParseFailure { message } => CausalError::ParseFailure { message },
			CodecError::Json { payload, source } => CausalError::Json { payload, source },
			CodecError::InvalidFeature { name } => CausalError::InvalidFeature { name },
		}
	}
}

impl CausalError {
	pub(crate) fn parse_failure(message: impl Into<String>) -> Self {
		CausalError::ParseFailure {
			message: message.into(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_codec_errors_flatten() {
		let message = "Unable to locate session in the response.";
		let err: CausalError = CodecError::parse_failure(message).into();
		assert!(matches!(err, CausalError::ParseFailure { message: ref m } if m == message));

		let err: CausalError = CodecError::InvalidFeature {
			name: "Banner".to_string(),
		}
		.into();
		assert!(matches!(err, CausalError::InvalidFeature { ref name } if name == "Banner"));
	}

	#[test]
	fn test_network_response_display() {
		let err = CausalError::NetworkResponse {
			endpoint: "/features".to_string(),
			status: 400,
			body: "bad request".to_string(),
		};
		assert_eq!(
			err.to_string(),
			"Request to /features failed with status 400: bad request"
		);
	}
}
