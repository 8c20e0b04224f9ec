// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag definitions, configuration payload parsing and immutable snapshots.
//!
//! A configuration document looks like:
//!
//! ```json
//! {
//!   "flags": {
//!     "welcome-message": {
//!       "state": "ENABLED",
//!       "variants": { "on": "hi", "off": "bye" },
//!       "defaultVariant": "on",
//!       "targeting": {},
//!       "metadata": { "team": "growth" }
//!     }
//!   },
//!   "metadata": { "flagSetId": "web" }
//! }
//! ```
//!
//! Delta documents have the same shape plus an optional `"removed"` list.
//! Validation is all-or-nothing: a single bad flag rejects the whole document.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{FlagsError, Result};
use crate::sync::SyncMetadata;
use crate::value::{FlagMetadata, FlagValue, MetadataValue};

/// Whether a flag is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagState {
	Enabled,
	Disabled,
}

impl FlagState {
	fn parse(raw: &str) -> Option<Self> {
		match raw {
			"ENABLED" => Some(FlagState::Enabled),
			"DISABLED" => Some(FlagState::Disabled),
			_ => None,
		}
	}
}

/// A validated flag. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagDefinition {
	pub key: String,
	pub state: FlagState,
	pub variants: BTreeMap<String, FlagValue>,
	pub default_variant: String,
	/// Opaque rule tree handed to the targeting evaluator.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub targeting: Option<serde_json::Value>,
	pub metadata: FlagMetadata,
}

impl FlagDefinition {
	pub fn is_enabled(&self) -> bool {
		self.state == FlagState::Enabled
	}

	pub fn variant(&self, name: &str) -> Option<&FlagValue> {
		self.variants.get(name)
	}

	pub fn default_value(&self) -> Option<&FlagValue> {
		self.variants.get(&self.default_variant)
	}

	/// Builds a definition from one entry of a document's `flags` object.
	pub fn from_json(key: &str, raw: serde_json::Value) -> Result<Self> {
		if key.is_empty() {
			return Err(FlagsError::Parse("flag key must not be empty".to_string()));
		}

		let raw: RawFlag =
			serde_json::from_value(raw).map_err(|e| FlagsError::invalid_flag(key, e.to_string()))?;

		let state = FlagState::parse(&raw.state)
			.ok_or_else(|| {
				FlagsError::invalid_flag(key, format!("unknown state '{}'", raw.state))
			})?;

		if raw.variants.is_empty() {
			return Err(FlagsError::invalid_flag(key, "variants must not be empty"));
		}

		let mut variants = BTreeMap::new();
		for (name, value) in &raw.variants {
			let value = FlagValue::from_json(value).ok_or_else(|| {
				FlagsError::invalid_flag(key, format!("variant '{name}' has an unsupported value"))
			})?;
			variants.insert(name.clone(), value);
		}

		if !variants.contains_key(&raw.default_variant) {
			return Err(FlagsError::invalid_flag(
				key,
				format!("defaultVariant '{}' is not a variant", raw.default_variant),
			));
		}

		let targeting = match raw.targeting {
			None | Some(serde_json::Value::Null) => None,
			Some(serde_json::Value::Object(map)) if map.is_empty() => None,
			Some(rule) => Some(rule),
		};

		let metadata = parse_metadata(&raw.metadata).map_err(|name| {
			FlagsError::invalid_flag(key, format!("metadata '{name}' must be a scalar"))
		})?;

		Ok(Self {
			key: key.to_string(),
			state,
			variants,
			default_variant: raw.default_variant,
			targeting,
			metadata,
		})
	}
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFlag {
	state: String,
	variants: serde_json::Map<String, serde_json::Value>,
	default_variant: String,
	#[serde(default)]
	targeting: Option<serde_json::Value>,
	#[serde(default)]
	metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct RawDocument {
	#[serde(default)]
	flags: Option<serde_json::Map<String, serde_json::Value>>,
	#[serde(default)]
	metadata: Option<serde_json::Map<String, serde_json::Value>>,
	#[serde(default)]
	removed: Vec<String>,
}

fn parse_metadata(
	raw: &serde_json::Map<String, serde_json::Value>,
) -> std::result::Result<FlagMetadata, String> {
	raw.iter()
		.map(|(name, value)| {
			MetadataValue::from_json(value)
				.map(|value| (name.clone(), value))
				.ok_or_else(|| name.clone())
		})
		.collect()
}

fn parse_flags(
	raw: serde_json::Map<String, serde_json::Value>,
) -> Result<HashMap<String, Arc<FlagDefinition>>> {
	let mut flags = HashMap::with_capacity(raw.len());
	for (key, value) in raw {
		let flag = FlagDefinition::from_json(&key, value)?;
		flags.insert(key, Arc::new(flag));
	}
	Ok(flags)
}

fn parse_set_metadata(
	raw: Option<serde_json::Map<String, serde_json::Value>>,
) -> Result<FlagMetadata> {
	match raw {
		Some(raw) => parse_metadata(&raw).map_err(|name| {
			FlagsError::Parse(format!("flag set metadata '{name}' must be a scalar"))
		}),
		None => Ok(FlagMetadata::new()),
	}
}

/// A complete, validated flag set.
#[derive(Debug, Clone, Default)]
pub struct FlagSet {
	pub flags: HashMap<String, Arc<FlagDefinition>>,
	pub metadata: FlagMetadata,
}

impl FlagSet {
	/// Parses a full configuration document.
	pub fn parse(raw: &str) -> Result<Self> {
		let doc: RawDocument = serde_json::from_str(raw)?;
		let flags = doc
			.flags
			.ok_or_else(|| FlagsError::Parse("missing 'flags' object".to_string()))?;
		Ok(Self {
			flags: parse_flags(flags)?,
			metadata: parse_set_metadata(doc.metadata)?,
		})
	}
}

/// A partial update: upserted flags plus removed keys.
#[derive(Debug, Clone, Default)]
pub struct FlagDelta {
	pub upserts: HashMap<String, Arc<FlagDefinition>>,
	pub removed: Vec<String>,
	/// Replaces the set metadata when present.
	pub metadata: Option<FlagMetadata>,
}

impl FlagDelta {
	pub fn parse(raw: &str) -> Result<Self> {
		let doc: RawDocument = serde_json::from_str(raw)?;
		let upserts = match doc.flags {
			Some(flags) => parse_flags(flags)?,
			None => HashMap::new(),
		};
		let metadata = match doc.metadata {
			Some(raw) => Some(parse_set_metadata(Some(raw))?),
			None => None,
		};
		Ok(Self {
			upserts,
			removed: doc.removed,
			metadata,
		})
	}

	/// Applies this delta to a copy of `base`. The base snapshot is untouched.
	pub fn apply_to(self, base: Option<&FlagConfigSnapshot>) -> FlagSet {
		let (mut flags, base_metadata) = match base {
			Some(snapshot) => (snapshot.flags.clone(), snapshot.metadata.clone()),
			None => (HashMap::new(), FlagMetadata::new()),
		};
		for key in &self.removed {
			flags.remove(key);
		}
		flags.extend(self.upserts);
		FlagSet {
			flags,
			metadata: self.metadata.unwrap_or(base_metadata),
		}
	}
}

/// An immutable view of the whole flag configuration at one point in time.
#[derive(Debug, Clone)]
pub struct FlagConfigSnapshot {
	flags: HashMap<String, Arc<FlagDefinition>>,
	version: Option<String>,
	generation: u64,
	metadata: FlagMetadata,
	sync_metadata: SyncMetadata,
	received_at: DateTime<Utc>,
}

impl FlagConfigSnapshot {
	pub fn new(set: FlagSet, version: Option<String>, sync_metadata: SyncMetadata) -> Self {
		Self {
			flags: set.flags,
			version,
			generation: 0,
			metadata: set.metadata,
			sync_metadata,
			received_at: Utc::now(),
		}
	}

	/// Stamps the generation the store assigns when publishing.
	pub fn with_generation(mut self, generation: u64) -> Self {
		self.generation = generation;
		self
	}

	pub fn get(&self, key: &str) -> Option<&Arc<FlagDefinition>> {
		self.flags.get(key)
	}

	pub fn contains(&self, key: &str) -> bool {
		self.flags.contains_key(key)
	}

	pub fn flags(&self) -> impl Iterator<Item = &Arc<FlagDefinition>> {
		self.flags.values()
	}

	pub fn len(&self) -> usize {
		self.flags.len()
	}

	pub fn is_empty(&self) -> bool {
		self.flags.is_empty()
	}

	pub fn version(&self) -> Option<&str> {
		self.version.as_deref()
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// Flag-set metadata from the payload.
	pub fn metadata(&self) -> &FlagMetadata {
		&self.metadata
	}

	pub fn sync_metadata(&self) -> &SyncMetadata {
		&self.sync_metadata
	}

	pub fn received_at(&self) -> DateTime<Utc> {
		self.received_at
	}
}

/// Keys that were added, removed or modified between two snapshots, sorted.
///
/// Flag-set metadata is overlaid on every resolution, so a metadata change
/// reports every key in `new`.
pub fn diff_flag_keys(
	old: Option<&FlagConfigSnapshot>,
	new: &FlagConfigSnapshot,
) -> Vec<String> {
	let Some(old) = old else {
		let mut keys: Vec<String> = new.flags.keys().cloned().collect();
		keys.sort();
		return keys;
	};

	let metadata_changed = old.metadata != new.metadata;
	let mut changed = BTreeSet::new();
	for (key, flag) in &new.flags {
		match old.flags.get(key) {
			Some(previous)
				if !metadata_changed && (Arc::ptr_eq(previous, flag) || previous == flag) => {}
			_ => {
				changed.insert(key.clone());
			}
		}
	}
	for key in old.flags.keys() {
		if !new.flags.contains_key(key) {
			changed.insert(key.clone());
		}
	}
	changed.into_iter().collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn snapshot(raw: serde_json::Value) -> FlagConfigSnapshot {
		let set = FlagSet::parse(&raw.to_string()).unwrap();
		FlagConfigSnapshot::new(set, None, SyncMetadata::default())
	}

	fn bool_flag(default_variant: &str) -> serde_json::Value {
		json!({
			"state": "ENABLED",
			"variants": {"on": true, "off": false},
			"defaultVariant": default_variant
		})
	}

	#[test]
	fn test_parse_full_document() {
		let raw = json!({
			"flags": {
				"welcome-message": {
					"state": "ENABLED",
					"variants": {"on": "hi", "off": "bye"},
					"defaultVariant": "on",
					"targeting": {},
					"metadata": {"team": "growth"}
				}
			},
			"metadata": {"flagSetId": "web"}
		});
		let set = FlagSet::parse(&raw.to_string()).unwrap();
		let flag = &set.flags["welcome-message"];
		assert_eq!(flag.state, FlagState::Enabled);
		assert_eq!(flag.default_value(), Some(&FlagValue::String("hi".to_string())));
		assert!(flag.targeting.is_none());
		assert_eq!(flag.metadata["team"], MetadataValue::String("growth".to_string()));
		assert_eq!(
			set.metadata["flagSetId"],
			MetadataValue::String("web".to_string())
		);
	}

	#[test]
	fn test_rejects_unknown_default_variant() {
		let raw = json!({"flags": {"a": bool_flag("maybe")}});
		let err = FlagSet::parse(&raw.to_string()).unwrap_err();
		assert!(matches!(err, FlagsError::InvalidFlag { ref key, .. } if key == "a"));
	}

	#[test]
	fn test_rejects_bad_state_and_empty_variants() {
		let bad_state = json!({"flags": {"a": {
			"state": "ON", "variants": {"on": true}, "defaultVariant": "on"
		}}});
		assert!(FlagSet::parse(&bad_state.to_string()).is_err());

		let empty = json!({"flags": {"a": {
			"state": "ENABLED", "variants": {}, "defaultVariant": "on"
		}}});
		assert!(FlagSet::parse(&empty.to_string()).is_err());
	}

	#[test]
	fn test_rejects_non_object_documents() {
		assert!(FlagSet::parse("not json").is_err());
		assert!(FlagSet::parse("[]").is_err());
		assert!(FlagSet::parse("{}").is_err());
		assert!(FlagSet::parse(r#"{"flags": []}"#).is_err());
	}

	#[test]
	fn test_one_bad_flag_rejects_document() {
		let raw = json!({"flags": {
			"good": bool_flag("on"),
			"bad": {"state": "ENABLED", "variants": {"on": [1]}, "defaultVariant": "on"}
		}});
		assert!(FlagSet::parse(&raw.to_string()).is_err());
	}

	#[test]
	fn test_rejects_structured_metadata() {
		let mut flag = bool_flag("on");
		flag["metadata"] = json!({"owner": {"team": "x"}});
		let raw = json!({"flags": {"a": flag}});
		assert!(FlagSet::parse(&raw.to_string()).is_err());
	}

	#[test]
	fn test_delta_upserts_and_removes() {
		let base = snapshot(json!({"flags": {
			"a": bool_flag("on"),
			"b": bool_flag("on"),
			"c": bool_flag("on")
		}}));
		let delta = FlagDelta::parse(
			&json!({
				"flags": {"a": bool_flag("off"), "d": bool_flag("on")},
				"removed": ["b"]
			})
			.to_string(),
		)
		.unwrap();

		let set = delta.apply_to(Some(&base));
		let mut keys: Vec<_> = set.flags.keys().cloned().collect();
		keys.sort();
		assert_eq!(keys, vec!["a", "c", "d"]);
		assert_eq!(set.flags["a"].default_variant, "off");
		// the base snapshot is not modified
		assert_eq!(base.get("a").unwrap().default_variant, "on");
		assert!(base.contains("b"));
	}

	#[test]
	fn test_diff_flag_keys() {
		let old = snapshot(json!({"flags": {
			"kept": bool_flag("on"),
			"changed": bool_flag("on"),
			"gone": bool_flag("on")
		}}));
		let new = snapshot(json!({"flags": {
			"kept": bool_flag("on"),
			"changed": bool_flag("off"),
			"added": bool_flag("on")
		}}));
		assert_eq!(diff_flag_keys(Some(&old), &new), vec!["added", "changed", "gone"]);
		assert_eq!(diff_flag_keys(None, &old), vec!["changed", "gone", "kept"]);
		assert!(diff_flag_keys(Some(&old), &old).is_empty());
	}

	#[test]
	fn test_set_metadata_change_reports_every_key() {
		let old = snapshot(json!({
			"flags": {"a": bool_flag("on"), "b": bool_flag("on")},
			"metadata": {"team": "web"}
		}));
		let new = snapshot(json!({
			"flags": {"a": bool_flag("on"), "b": bool_flag("on")},
			"metadata": {"team": "mobile"}
		}));
		assert_eq!(diff_flag_keys(Some(&old), &new), vec!["a", "b"]);

		let dropped = snapshot(json!({"flags": {"a": bool_flag("on")}}));
		assert_eq!(diff_flag_keys(Some(&old), &dropped), vec!["a", "b"]);
	}

	#[test]
	fn test_null_targeting_is_no_targeting() {
		let mut flag = bool_flag("on");
		flag["targeting"] = serde_json::Value::Null;
		let def = FlagDefinition::from_json("a", flag).unwrap();
		assert!(def.targeting.is_none());
	}
}
