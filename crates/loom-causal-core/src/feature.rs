// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Feature identity, resolved statuses and the typed feature seam.
//!
//! A [`FeatureKey`] identifies one argument-parameterized feature request.
//! Two keys are equal when their names match and their arguments are deep
//! equal; the argument map is reduced to a canonical JSON string (object keys
//! sorted recursively) at construction time and identity is computed from
//! that string alone.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{CodecError, Result};

/// Output field that carries the impression id of an `On` status.
pub const IMPRESSION_FIELD: &str = "_impression";

/// The sentinel impression value the server sends for a disabled feature.
pub const OFF_SENTINEL: &str = "OFF";

/// Serializes a JSON value with every object's keys in sorted order.
pub fn canonical_json(value: &Value) -> String {
	let mut out = String::new();
	write_canonical(value, &mut out);
	out
}

fn write_canonical(value: &Value, out: &mut String) {
	match value {
		Value::Object(map) => {
			let mut entries: Vec<(&String, &Value)> = map.iter().collect();
			entries.sort_by(|a, b| a.0.cmp(b.0));
			out.push('{');
			for (i, (key, item)) in entries.into_iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				out.push_str(&Value::String(key.clone()).to_string());
				out.push(':');
				write_canonical(item, out);
			}
			out.push('}');
		}
		Value::Array(items) => {
			out.push('[');
			for (i, item) in items.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				write_canonical(item, out);
			}
			out.push(']');
		}
		scalar => out.push_str(&scalar.to_string()),
	}
}

/// Identity of a feature request: its name plus its canonicalized arguments.
#[derive(Debug, Clone)]
pub struct FeatureKey {
	name: String,
	args: Map<String, Value>,
	canonical_args: String,
}

impl FeatureKey {
	pub fn new(name: impl Into<String>, args: Map<String, Value>) -> Self {
		let canonical_args = canonical_json(&Value::Object(args.clone()));
		Self {
			name: name.into(),
			args,
			canonical_args,
		}
	}

	/// Creates a key for a feature that takes no arguments.
	pub fn named(name: impl Into<String>) -> Self {
		Self::new(name, Map::new())
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn args(&self) -> &Map<String, Value> {
		&self.args
	}

	pub fn canonical_args(&self) -> &str {
		&self.canonical_args
	}

	/// Returns a hex-encoded SHA-256 over the name and canonical arguments.
	pub fn fingerprint(&self) -> String {
		let mut hasher = Sha256::new();
		hasher.update(self.name.as_bytes());
		hasher.update([0u8]);
		hasher.update(self.canonical_args.as_bytes());
		hex::encode(hasher.finalize())
	}
}

impl PartialEq for FeatureKey {
	fn eq(&self, other: &Self) -> bool {
		self.name == other.name && self.canonical_args == other.canonical_args
	}
}

impl Eq for FeatureKey {}

impl Hash for FeatureKey {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.name.hash(state);
		self.canonical_args.hash(state);
	}
}

impl fmt::Display for FeatureKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}{}", self.name, self.canonical_args)
	}
}

/// The last known server verdict for a feature.
#[derive(Debug, Clone, PartialEq)]
pub enum EncodedFeatureStatus {
	Off,
	On { outputs: Map<String, Value> },
}

impl EncodedFeatureStatus {
	pub fn is_on(&self) -> bool {
		matches!(self, EncodedFeatureStatus::On { .. })
	}

	pub fn outputs(&self) -> Option<&Map<String, Value>> {
		match self {
			EncodedFeatureStatus::On { outputs } => Some(outputs),
			EncodedFeatureStatus::Off => None,
		}
	}

	/// The impression id embedded in the outputs, if any.
	pub fn impression_id(&self) -> Option<&str> {
		self.outputs()
			.and_then(|outputs| outputs.get(IMPRESSION_FIELD))
			.and_then(Value::as_str)
	}

	/// Returns a copy scoped to `impression_id`. `Off` is returned unchanged.
	pub fn with_impression(&self, impression_id: &str) -> Self {
		match self {
			EncodedFeatureStatus::Off => EncodedFeatureStatus::Off,
			EncodedFeatureStatus::On { outputs } => {
				let mut outputs = outputs.clone();
				outputs.insert(
					IMPRESSION_FIELD.to_string(),
					Value::String(impression_id.to_string()),
				);
				EncodedFeatureStatus::On { outputs }
			}
		}
	}
}

/// The unit of cache storage and of bulk cache operations.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCacheItem {
	pub key: FeatureKey,
	pub status: EncodedFeatureStatus,
}

impl FeatureCacheItem {
	pub fn new(key: FeatureKey, status: EncodedFeatureStatus) -> Self {
		Self { key, status }
	}

	/// Builds a cache item from a typed feature.
	///
	/// Fails with [`CodecError::InvalidFeature`] while the feature is unrequested.
	pub fn from_feature(feature: &dyn Feature) -> Result<Self> {
		let status = feature
			.state()
			.to_status()
			.ok_or_else(|| CodecError::InvalidFeature {
				name: feature.name().to_string(),
			})?;
		Ok(Self::new(feature.key(), status))
	}
}

/// State held by a typed feature instance.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FeatureState {
	#[default]
	Unrequested,
	Off,
	On { outputs: Map<String, Value> },
}

impl FeatureState {
	pub fn to_status(&self) -> Option<EncodedFeatureStatus> {
		match self {
			FeatureState::Unrequested => None,
			FeatureState::Off => Some(EncodedFeatureStatus::Off),
			FeatureState::On { outputs } => Some(EncodedFeatureStatus::On {
				outputs: outputs.clone(),
			}),
		}
	}
}

impl From<EncodedFeatureStatus> for FeatureState {
	fn from(status: EncodedFeatureStatus) -> Self {
		match status {
			EncodedFeatureStatus::Off => FeatureState::Off,
			EncodedFeatureStatus::On { outputs } => FeatureState::On { outputs },
		}
	}
}

/// A declared feature whose resolution the runtime can drive.
///
/// Generated feature types implement this; [`DynamicFeature`] covers
/// features that are only known at runtime.
pub trait Feature: Send + Sync {
	fn name(&self) -> &str;

	/// Request arguments, serialized to JSON.
	fn args(&self) -> Map<String, Value>;

	fn state(&self) -> &FeatureState;

	/// Applies a resolved state. Must not fail; output decoding is lazy.
	fn update(&mut self, state: FeatureState);

	fn key(&self) -> FeatureKey {
		FeatureKey::new(self.name(), self.args())
	}
}

/// A feature described entirely by its name and argument map.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicFeature {
	name: String,
	args: Map<String, Value>,
	state: FeatureState,
}

impl DynamicFeature {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			args: Map::new(),
			state: FeatureState::Unrequested,
		}
	}

	pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
		self.args.insert(key.into(), value);
		self
	}

	pub fn is_on(&self) -> bool {
		matches!(self.state, FeatureState::On { .. })
	}

	pub fn output(&self, name: &str) -> Option<&Value> {
		match &self.state {
			FeatureState::On { outputs } => outputs.get(name),
			_ => None,
		}
	}

	pub fn impression_id(&self) -> Option<&str> {
		self.output(IMPRESSION_FIELD).and_then(Value::as_str)
	}
}

impl Feature for DynamicFeature {
	fn name(&self) -> &str {
		&self.name
	}

	fn args(&self) -> Map<String, Value> {
		self.args.clone()
	}

	fn state(&self) -> &FeatureState {
		&self.state
	}

	fn update(&mut self, state: FeatureState) {
		self.state = state;
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use std::collections::HashSet;

	fn args(value: Value) -> Map<String, Value> {
		value.as_object().cloned().unwrap()
	}

	#[test]
	fn test_canonical_json_sorts_nested_keys() {
		let value = json!({"b": 1, "a": {"z": [3, {"y": null, "x": true}], "c": "s"}});
		assert_eq!(
			canonical_json(&value),
			r#"{"a":{"c":"s","z":[3,{"x":true,"y":null}]},"b":1}"#
		);
	}

	#[test]
	fn test_canonical_json_keeps_integers_distinct_from_floats() {
		assert_eq!(canonical_json(&json!({"n": 10})), r#"{"n":10}"#);
		assert_eq!(canonical_json(&json!({"n": 10.5})), r#"{"n":10.5}"#);
	}

	#[test]
	fn test_feature_key_equality_ignores_arg_order() {
		let mut first = Map::new();
		first.insert("x".to_string(), json!(1));
		first.insert("y".to_string(), json!({"b": 2, "a": 1}));
		let mut second = Map::new();
		second.insert("y".to_string(), json!({"a": 1, "b": 2}));
		second.insert("x".to_string(), json!(1));

		let a = FeatureKey::new("Banner", first);
		let b = FeatureKey::new("Banner", second);
		assert_eq!(a, b);
		assert_eq!(a.fingerprint(), b.fingerprint());

		let mut set = HashSet::new();
		set.insert(a);
		assert!(set.contains(&b));
	}

	#[test]
	fn test_feature_key_differs_by_name_and_args() {
		let a = FeatureKey::new("A", args(json!({"x": 1})));
		assert_ne!(a, FeatureKey::new("B", args(json!({"x": 1}))));
		assert_ne!(a, FeatureKey::new("A", args(json!({"x": 2}))));
		assert_ne!(a.fingerprint(), FeatureKey::named("A").fingerprint());
	}

	#[test]
	fn test_with_impression_overwrites_existing_id() {
		let status = EncodedFeatureStatus::On {
			outputs: args(json!({"title": "hi", "_impression": "imp1"})),
		};
		let scoped = status.with_impression("imp2");
		assert_eq!(status.impression_id(), Some("imp1"));
		assert_eq!(scoped.impression_id(), Some("imp2"));
		assert_eq!(scoped.outputs().unwrap()["title"], json!("hi"));
		assert_eq!(
			EncodedFeatureStatus::Off.with_impression("imp2"),
			EncodedFeatureStatus::Off
		);
	}

	#[test]
	fn test_cache_item_from_unrequested_feature_is_invalid() {
		let feature = DynamicFeature::new("Banner").with_arg("x", json!(1));
		let err = FeatureCacheItem::from_feature(&feature).unwrap_err();
		assert!(matches!(err, CodecError::InvalidFeature { ref name } if name == "Banner"));
	}

	#[test]
	fn test_cache_item_from_resolved_feature() {
		let mut feature = DynamicFeature::new("Banner").with_arg("x", json!(1));
		feature.update(FeatureState::On {
			outputs: args(json!({"title": "hello"})),
		});

		let item = FeatureCacheItem::from_feature(&feature).unwrap();
		assert_eq!(item.key, FeatureKey::new("Banner", args(json!({"x": 1}))));
		assert!(item.status.is_on());
		assert_eq!(feature.output("title"), Some(&json!("hello")));
	}
}
