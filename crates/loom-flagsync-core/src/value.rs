// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed flag values and the conversion strategy used by generic resolution.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Object payload of a structure flag.
pub type StructValue = serde_json::Map<String, serde_json::Value>;

/// The value types a flag variant can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
	Boolean,
	String,
	Integer,
	Double,
	Structure,
}

impl fmt::Display for ValueKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ValueKind::Boolean => "boolean",
			ValueKind::String => "string",
			ValueKind::Integer => "integer",
			ValueKind::Double => "double",
			ValueKind::Structure => "structure",
		};
		f.write_str(name)
	}
}

/// A single variant value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
	Bool(bool),
	String(String),
	Integer(i64),
	Double(f64),
	Structure(StructValue),
}

impl FlagValue {
	/// Converts a JSON value from a configuration payload.
	///
	/// Numbers that fit in `i64` become [`FlagValue::Integer`]; every other
	/// number is a [`FlagValue::Double`]. Arrays and `null` are not valid
	/// variant values.
	pub fn from_json(value: &serde_json::Value) -> Option<Self> {
		match value {
			serde_json::Value::Bool(b) => Some(FlagValue::Bool(*b)),
			serde_json::Value::String(s) => Some(FlagValue::String(s.clone())),
			serde_json::Value::Number(n) => match n.as_i64() {
				Some(i) => Some(FlagValue::Integer(i)),
				None => n.as_f64().map(FlagValue::Double),
			},
			serde_json::Value::Object(map) => Some(FlagValue::Structure(map.clone())),
			serde_json::Value::Array(_) | serde_json::Value::Null => None,
		}
	}

	pub fn kind(&self) -> ValueKind {
		match self {
			FlagValue::Bool(_) => ValueKind::Boolean,
			FlagValue::String(_) => ValueKind::String,
			FlagValue::Integer(_) => ValueKind::Integer,
			FlagValue::Double(_) => ValueKind::Double,
			FlagValue::Structure(_) => ValueKind::Structure,
		}
	}

	/// Returns true if a caller asking for `requested` can be served this value.
	///
	/// Integers widen to doubles; nothing else converts.
	pub fn satisfies(&self, requested: ValueKind) -> bool {
		let actual = self.kind();
		actual == requested || (actual == ValueKind::Integer && requested == ValueKind::Double)
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			FlagValue::Bool(b) => Some(*b),
			_ => None,
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			FlagValue::String(s) => Some(s),
			_ => None,
		}
	}
}

/// Scalar metadata attached to flags and flag sets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
	Bool(bool),
	String(String),
	Integer(i64),
	Double(f64),
}

impl MetadataValue {
	/// Converts a JSON scalar. Objects, arrays and `null` are rejected.
	pub fn from_json(value: &serde_json::Value) -> Option<Self> {
		match value {
			serde_json::Value::Bool(b) => Some(MetadataValue::Bool(*b)),
			serde_json::Value::String(s) => Some(MetadataValue::String(s.clone())),
			serde_json::Value::Number(n) => match n.as_i64() {
				Some(i) => Some(MetadataValue::Integer(i)),
				None => n.as_f64().map(MetadataValue::Double),
			},
			_ => None,
		}
	}
}

impl From<&str> for MetadataValue {
	fn from(value: &str) -> Self {
		MetadataValue::String(value.to_string())
	}
}

/// Metadata map returned alongside a resolution.
pub type FlagMetadata = BTreeMap<String, MetadataValue>;

/// Conversion strategy between stored variant values and a requested type.
///
/// One implementation exists per OpenFeature value type so that a single
/// generic resolve path serves all of them.
pub trait FlagType: Sized + Clone + Send + Sync + 'static {
	/// The kind a caller requests when resolving as `Self`.
	const KIND: ValueKind;

	/// Extracts `Self` from a stored value, or `None` on a type mismatch.
	fn from_flag_value(value: &FlagValue) -> Option<Self>;
}

impl FlagType for bool {
	const KIND: ValueKind = ValueKind::Boolean;

	fn from_flag_value(value: &FlagValue) -> Option<Self> {
		value.as_bool()
	}
}

impl FlagType for String {
	const KIND: ValueKind = ValueKind::String;

	fn from_flag_value(value: &FlagValue) -> Option<Self> {
		value.as_str().map(str::to_string)
	}
}

impl FlagType for i64 {
	const KIND: ValueKind = ValueKind::Integer;

	fn from_flag_value(value: &FlagValue) -> Option<Self> {
		match value {
			FlagValue::Integer(i) => Some(*i),
			_ => None,
		}
	}
}

impl FlagType for f64 {
	const KIND: ValueKind = ValueKind::Double;

	fn from_flag_value(value: &FlagValue) -> Option<Self> {
		match value {
			FlagValue::Double(d) => Some(*d),
			FlagValue::Integer(i) => Some(*i as f64),
			_ => None,
		}
	}
}

impl FlagType for StructValue {
	const KIND: ValueKind = ValueKind::Structure;

	fn from_flag_value(value: &FlagValue) -> Option<Self> {
		match value {
			FlagValue::Structure(map) => Some(map.clone()),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn test_from_json_numbers() {
		assert_eq!(FlagValue::from_json(&json!(7)), Some(FlagValue::Integer(7)));
		assert_eq!(
			FlagValue::from_json(&json!(1.5)),
			Some(FlagValue::Double(1.5))
		);
		assert_eq!(FlagValue::from_json(&json!(null)), None);
		assert_eq!(FlagValue::from_json(&json!([1, 2])), None);
	}

	#[test]
	fn test_integer_widens_to_double() {
		let value = FlagValue::Integer(3);
		assert!(value.satisfies(ValueKind::Double));
		assert!(!FlagValue::Double(3.0).satisfies(ValueKind::Integer));
		assert_eq!(f64::from_flag_value(&value), Some(3.0));
		assert_eq!(i64::from_flag_value(&FlagValue::Double(3.0)), None);
	}

	#[test]
	fn test_flag_type_mismatch() {
		let value = FlagValue::String("on".to_string());
		assert_eq!(bool::from_flag_value(&value), None);
		assert_eq!(String::from_flag_value(&value), Some("on".to_string()));
		assert!(StructValue::from_flag_value(&value).is_none());
	}

	#[test]
	fn test_metadata_rejects_objects() {
		assert_eq!(
			MetadataValue::from_json(&json!("growth")),
			Some(MetadataValue::String("growth".to_string()))
		);
		assert!(MetadataValue::from_json(&json!({"a": 1})).is_none());
	}
}
