// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Caller-supplied attributes a flag is evaluated against.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationContext {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub targeting_key: Option<String>,
	#[serde(default)]
	pub attributes: BTreeMap<String, serde_json::Value>,
}

impl EvaluationContext {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_targeting_key(mut self, targeting_key: impl Into<String>) -> Self {
		self.targeting_key = Some(targeting_key.into());
		self
	}

	pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
		self.attributes.insert(key.into(), value);
		self
	}

	pub fn attribute(&self, key: &str) -> Option<&serde_json::Value> {
		self.attributes.get(key)
	}

	/// Computes a stable fingerprint of the context for cache keys.
	///
	/// The context is written as canonical JSON (object keys sorted at every
	/// depth, no whitespace) and hashed with SHA-256. Two contexts that differ
	/// only in attribute insertion order share a fingerprint.
	///
	/// Returns a hex-encoded SHA-256 hash.
	pub fn fingerprint(&self) -> String {
		let mut hasher = Sha256::new();

		hasher.update(b"{\"attributes\":{");
		for (i, (key, value)) in self.attributes.iter().enumerate() {
			if i > 0 {
				hasher.update(b",");
			}
			write_string(&mut hasher, key);
			hasher.update(b":");
			write_canonical(&mut hasher, value);
		}
		hasher.update(b"},\"targetingKey\":");
		match &self.targeting_key {
			Some(key) => write_string(&mut hasher, key),
			None => hasher.update(b"null"),
		}
		hasher.update(b"}");

		hex::encode(hasher.finalize())
	}
}

fn write_string(hasher: &mut Sha256, value: &str) {
	let escaped = serde_json::Value::from(value).to_string();
	hasher.update(escaped.as_bytes());
}

fn write_canonical(hasher: &mut Sha256, value: &serde_json::Value) {
	match value {
		serde_json::Value::Object(map) => {
			let mut keys: Vec<&String> = map.keys().collect();
			keys.sort();
			hasher.update(b"{");
			for (i, key) in keys.into_iter().enumerate() {
				if i > 0 {
					hasher.update(b",");
				}
				write_string(hasher, key);
				hasher.update(b":");
				if let Some(inner) = map.get(key) {
					write_canonical(hasher, inner);
				}
			}
			hasher.update(b"}");
		}
		serde_json::Value::Array(items) => {
			hasher.update(b"[");
			for (i, item) in items.iter().enumerate() {
				if i > 0 {
					hasher.update(b",");
				}
				write_canonical(hasher, item);
			}
			hasher.update(b"]");
		}
		scalar => hasher.update(scalar.to_string().as_bytes()),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_fingerprint_is_deterministic() {
		let ctx = EvaluationContext::new()
			.with_targeting_key("user-1")
			.with_attribute("plan", json!("pro"));
		assert_eq!(ctx.fingerprint(), ctx.clone().fingerprint());
		assert_eq!(ctx.fingerprint().len(), 64);
	}

	#[test]
	fn test_fingerprint_ignores_nested_key_order() {
		let a: serde_json::Value =
			serde_json::from_str(r#"{"x": 1, "y": {"b": 2, "a": 3}}"#).unwrap();
		let b: serde_json::Value =
			serde_json::from_str(r#"{"y": {"a": 3, "b": 2}, "x": 1}"#).unwrap();
		let ctx_a = EvaluationContext::new().with_attribute("nested", a);
		let ctx_b = EvaluationContext::new().with_attribute("nested", b);
		assert_eq!(ctx_a.fingerprint(), ctx_b.fingerprint());
	}

	#[test]
	fn test_fingerprint_distinguishes_contexts() {
		let base = EvaluationContext::new().with_targeting_key("user-1");
		let other_key = EvaluationContext::new().with_targeting_key("user-2");
		let with_attr = base.clone().with_attribute("plan", json!("pro"));
		let no_key = EvaluationContext::new();

		assert_ne!(base.fingerprint(), other_key.fingerprint());
		assert_ne!(base.fingerprint(), with_attr.fingerprint());
		assert_ne!(base.fingerprint(), no_key.fingerprint());
	}

	#[test]
	fn test_fingerprint_distinguishes_value_types() {
		let number = EvaluationContext::new().with_attribute("age", json!(30));
		let string = EvaluationContext::new().with_attribute("age", json!("30"));
		assert_ne!(number.fingerprint(), string.fingerprint());
	}
}
