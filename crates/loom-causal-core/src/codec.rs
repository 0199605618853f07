// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! JSON wire codec for the `/features` and `/signal` endpoints.
//!
//! # Request bodies
//!
//! | Body | Shape |
//! |------|-------|
//! | resolve | `{"v":1,"args":{..},"impressionId"?:"..","reqs":[{"name":"..","args":{..}}]}` |
//! | event signal | `{"v":1,"id":{..},"impressionId"?:"..","feature"?:"..","event":"..","args":{..}}` |
//! | cached features | `{"v":1,"id":{..},"cachedFeatures":{"<name>":{"newImpression":"..","impression"?:".."}}}` |
//! | keep-alive | `{"v":1,"id":{..}}` |
//!
//! The server reads `name` as the first key of each `reqs` element, so
//! request elements are serialized from a struct whose field order is fixed.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{CodecError, Result};
use crate::feature::{EncodedFeatureStatus, FeatureCacheItem, FeatureKey, OFF_SENTINEL};

/// Protocol version marker sent in every request body.
pub const PROTOCOL_VERSION: u32 = 1;

/// Feature name used for events that belong to the session itself.
pub const SESSION_FEATURE: &str = "session";

/// An analytics event to send through `/signal`.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
	pub feature_name: String,
	pub event_name: String,
	pub args: Map<String, Value>,
}

impl SignalEvent {
	pub fn new(feature_name: impl Into<String>, event_name: impl Into<String>) -> Self {
		Self {
			feature_name: feature_name.into(),
			event_name: event_name.into(),
			args: Map::new(),
		}
	}

	/// An event on the session pseudo-feature.
	pub fn session(event_name: impl Into<String>) -> Self {
		Self::new(SESSION_FEATURE, event_name)
	}

	pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
		self.args.insert(key.into(), value);
		self
	}

	pub fn is_session_event(&self) -> bool {
		self.feature_name == SESSION_FEATURE
	}
}

/// Decoded body of a `/features` response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveResponse {
	pub is_device_registered: bool,
	pub session_json: Map<String, Value>,
	pub statuses: Vec<EncodedFeatureStatus>,
}

#[derive(Serialize)]
struct ResolveRequestBody<'a> {
	v: u32,
	args: &'a Map<String, Value>,
	#[serde(rename = "impressionId", skip_serializing_if = "Option::is_none")]
	impression_id: Option<&'a str>,
	reqs: Vec<FeatureRequest<'a>>,
}

#[derive(Serialize)]
struct FeatureRequest<'a> {
	name: &'a str,
	args: &'a Map<String, Value>,
}

#[derive(Serialize)]
struct SignalEventBody<'a> {
	v: u32,
	id: &'a Map<String, Value>,
	#[serde(rename = "impressionId", skip_serializing_if = "Option::is_none")]
	impression_id: Option<&'a str>,
	#[serde(skip_serializing_if = "Option::is_none")]
	feature: Option<&'a str>,
	event: &'a str,
	args: &'a Map<String, Value>,
}

#[derive(Serialize)]
struct CachedFeaturesBody<'a> {
	v: u32,
	id: &'a Map<String, Value>,
	#[serde(rename = "cachedFeatures")]
	cached_features: Map<String, Value>,
}

#[derive(Serialize)]
struct KeepAliveBody<'a> {
	v: u32,
	id: &'a Map<String, Value>,
}

fn to_bytes<T: Serialize>(body: &T) -> Result<Vec<u8>> {
	serde_json::to_vec(body).map_err(|source| CodecError::Json {
		payload: String::new(),
		source,
	})
}

pub fn encode_resolve_request(
	session_args: &Map<String, Value>,
	impression_id: Option<&str>,
	keys: &[FeatureKey],
) -> Result<Vec<u8>> {
	let body = ResolveRequestBody {
		v: PROTOCOL_VERSION,
		args: session_args,
		impression_id,
		reqs: keys
			.iter()
			.map(|key| FeatureRequest {
				name: key.name(),
				args: key.args(),
			})
			.collect(),
	};
	to_bytes(&body)
}

pub fn encode_signal_event(
	event: &SignalEvent,
	session_keys: &Map<String, Value>,
	impression_id: Option<&str>,
) -> Result<Vec<u8>> {
	let body = SignalEventBody {
		v: PROTOCOL_VERSION,
		id: session_keys,
		impression_id,
		feature: (!event.is_session_event()).then_some(event.feature_name.as_str()),
		event: &event.event_name,
		args: &event.args,
	};
	to_bytes(&body)
}

/// Tells the server that cached results were rendered again under
/// `new_impression_id`.
pub fn encode_signal_cached_features(
	items: &[FeatureCacheItem],
	session_keys: &Map<String, Value>,
	new_impression_id: &str,
) -> Result<Vec<u8>> {
	let mut cached_features = Map::new();
	for item in items {
		let mut link = Map::new();
		link.insert(
			"newImpression".to_string(),
			Value::String(new_impression_id.to_string()),
		);
		if let Some(previous) = item.status.impression_id() {
			link.insert("impression".to_string(), Value::String(previous.to_string()));
		}
		cached_features.insert(item.key.name().to_string(), Value::Object(link));
	}

	let body = CachedFeaturesBody {
		v: PROTOCOL_VERSION,
		id: session_keys,
		cached_features,
	};
	to_bytes(&body)
}

pub fn encode_keep_alive(session_keys: &Map<String, Value>) -> Result<Vec<u8>> {
	to_bytes(&KeepAliveBody {
		v: PROTOCOL_VERSION,
		id: session_keys,
	})
}

pub fn decode_resolve_response(bytes: &[u8]) -> Result<ResolveResponse> {
	let value: Value =
		serde_json::from_slice(bytes).map_err(|source| CodecError::json(bytes, source))?;
	let Value::Object(mut body) = value else {
		return Err(CodecError::parse_failure(
			"Unable to parse the response as a JSON object.",
		));
	};

	let is_device_registered = body
		.get("registered")
		.and_then(Value::as_bool)
		.unwrap_or(false);

	let session_json = match body.remove("session") {
		Some(Value::Object(session)) => session,
		_ => {
			return Err(CodecError::parse_failure(
				"Unable to locate session in the response.",
			))
		}
	};

	let impressions = match body.remove("impressions") {
		Some(Value::Array(impressions)) => impressions,
		_ => {
			return Err(CodecError::parse_failure(
				"Unable to locate impressions in the response.",
			))
		}
	};

	let statuses = impressions
		.into_iter()
		.enumerate()
		.map(|(index, impression)| match impression {
			Value::String(ref s) if s == OFF_SENTINEL => Ok(EncodedFeatureStatus::Off),
			Value::Object(outputs) => Ok(EncodedFeatureStatus::On { outputs }),
			_ => Err(CodecError::parse_failure(format!(
				"Unable to parse impression {index} in the response."
			))),
		})
		.collect::<Result<Vec<_>>>()?;

	Ok(ResolveResponse {
		is_device_registered,
		session_json,
		statuses,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn obj(value: Value) -> Map<String, Value> {
		value.as_object().cloned().unwrap()
	}

	fn parse(bytes: &[u8]) -> Value {
		serde_json::from_slice(bytes).unwrap()
	}

	#[test]
	fn test_resolve_request_shape() {
		let keys = vec![
			FeatureKey::new("A", obj(json!({"x": 1}))),
			FeatureKey::new("B", obj(json!({"y": [1, 2.5, null]}))),
		];
		let bytes =
			encode_resolve_request(&obj(json!({"deviceId": "d1"})), Some("imp1"), &keys).unwrap();

		assert_eq!(
			parse(&bytes),
			json!({
				"v": 1,
				"args": {"deviceId": "d1"},
				"impressionId": "imp1",
				"reqs": [
					{"name": "A", "args": {"x": 1}},
					{"name": "B", "args": {"y": [1, 2.5, null]}},
				],
			})
		);
	}

	#[test]
	fn test_request_name_is_first_key_of_each_element() {
		let keys = vec![FeatureKey::new("A", obj(json!({"aaa": 1})))];
		let bytes = encode_resolve_request(&Map::new(), None, &keys).unwrap();
		let text = String::from_utf8(bytes).unwrap();
		assert!(text.contains(r#"{"name":"A","args":{"aaa":1}}"#), "{text}");
	}

	#[test]
	fn test_empty_resolve_request_is_well_formed() {
		let bytes = encode_resolve_request(&Map::new(), None, &[]).unwrap();
		assert_eq!(parse(&bytes), json!({"v": 1, "args": {}, "reqs": []}));
	}

	#[test]
	fn test_integers_survive_encoding() {
		let keys = vec![FeatureKey::new("A", obj(json!({"n": 10})))];
		let bytes = encode_resolve_request(&Map::new(), None, &keys).unwrap();
		let text = String::from_utf8(bytes).unwrap();
		assert!(text.contains(r#""n":10}"#), "{text}");
		assert!(!text.contains("10.0"));
	}

	#[test]
	fn test_signal_event_omits_session_feature_and_absent_impression() {
		let keys = obj(json!({"deviceId": "d1"}));

		let session_event = SignalEvent::session("appOpened");
		let bytes = encode_signal_event(&session_event, &keys, None).unwrap();
		assert_eq!(
			parse(&bytes),
			json!({"v": 1, "id": {"deviceId": "d1"}, "event": "appOpened", "args": {}})
		);

		let feature_event = SignalEvent::new("Banner", "click").with_arg("pos", json!(2));
		let bytes = encode_signal_event(&feature_event, &keys, Some("imp1")).unwrap();
		assert_eq!(
			parse(&bytes),
			json!({
				"v": 1,
				"id": {"deviceId": "d1"},
				"impressionId": "imp1",
				"feature": "Banner",
				"event": "click",
				"args": {"pos": 2},
			})
		);
	}

	#[test]
	fn test_cached_features_links_previous_impression() {
		let items = vec![
			FeatureCacheItem::new(
				FeatureKey::named("A"),
				EncodedFeatureStatus::On {
					outputs: obj(json!({"_impression": "imp1"})),
				},
			),
			FeatureCacheItem::new(FeatureKey::named("B"), EncodedFeatureStatus::Off),
		];
		let bytes = encode_signal_cached_features(&items, &obj(json!({"deviceId": "d1"})), "imp2")
			.unwrap();

		assert_eq!(
			parse(&bytes),
			json!({
				"v": 1,
				"id": {"deviceId": "d1"},
				"cachedFeatures": {
					"A": {"newImpression": "imp2", "impression": "imp1"},
					"B": {"newImpression": "imp2"},
				},
			})
		);
	}

	#[test]
	fn test_keep_alive_body() {
		let bytes = encode_keep_alive(&obj(json!({"deviceId": "d1"}))).unwrap();
		assert_eq!(parse(&bytes), json!({"v": 1, "id": {"deviceId": "d1"}}));
	}

	#[test]
	fn test_decode_off_and_on_impressions() {
		let body = json!({
			"registered": true,
			"session": {"sessionId": "s1"},
			"impressions": ["OFF", {"title": "hi", "count": 10}],
		});
		let decoded = decode_resolve_response(body.to_string().as_bytes()).unwrap();

		assert!(decoded.is_device_registered);
		assert_eq!(decoded.session_json["sessionId"], json!("s1"));
		assert_eq!(
			decoded.statuses,
			vec![
				EncodedFeatureStatus::Off,
				EncodedFeatureStatus::On {
					outputs: obj(json!({"title": "hi", "count": 10})),
				},
			]
		);
	}

	#[test]
	fn test_decode_defaults_registered_to_false() {
		let body = json!({"session": {}, "impressions": []});
		let decoded = decode_resolve_response(body.to_string().as_bytes()).unwrap();
		assert!(!decoded.is_device_registered);
		assert!(decoded.statuses.is_empty());
	}

	#[test]
	fn test_decode_names_missing_fields() {
		let missing_session = json!({"impressions": []}).to_string();
		match decode_resolve_response(missing_session.as_bytes()) {
			Err(CodecError::ParseFailure { message }) => {
				assert_eq!(message, "Unable to locate session in the response.")
			}
			other => panic!("unexpected result: {other:?}"),
		}

		let missing_impressions = json!({"session": {}}).to_string();
		match decode_resolve_response(missing_impressions.as_bytes()) {
			Err(CodecError::ParseFailure { message }) => {
				assert_eq!(message, "Unable to locate impressions in the response.")
			}
			other => panic!("unexpected result: {other:?}"),
		}
	}

	#[test]
	fn test_decode_rejects_unknown_impression_shape() {
		let body = json!({"session": {}, "impressions": [{}, "ON"]}).to_string();
		match decode_resolve_response(body.as_bytes()) {
			Err(CodecError::ParseFailure { message }) => assert!(message.contains("impression 1")),
			other => panic!("unexpected result: {other:?}"),
		}
	}

	#[test]
	fn test_decode_rejects_invalid_json() {
		let err = decode_resolve_response(b"not json").unwrap_err();
		assert!(matches!(err, CodecError::Json { .. }));
	}

	#[test]
	fn test_simulated_round_trip() {
		let keys = vec![
			FeatureKey::new("A", obj(json!({"x": 1}))),
			FeatureKey::new("B", obj(json!({"y": 2}))),
		];
		let request = parse(&encode_resolve_request(&Map::new(), Some("imp1"), &keys).unwrap());

		// A server that turns on every feature whose first argument is odd.
		let impressions: Vec<Value> = request["reqs"]
			.as_array()
			.unwrap()
			.iter()
			.map(|req| {
				let first = req["args"].as_object().unwrap().values().next().unwrap();
				if first.as_i64().unwrap() % 2 == 1 {
					json!({"_impression": request["impressionId"], "name": req["name"]})
				} else {
					json!("OFF")
				}
			})
			.collect();
		let response = json!({"session": {}, "impressions": impressions});

		let decoded = decode_resolve_response(response.to_string().as_bytes()).unwrap();
		assert_eq!(
			decoded.statuses,
			vec![
				EncodedFeatureStatus::On {
					outputs: obj(json!({"_impression": "imp1", "name": "A"})),
				},
				EncodedFeatureStatus::Off,
			]
		);
	}
}
