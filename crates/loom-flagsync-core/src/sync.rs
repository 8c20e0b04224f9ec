// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Payloads and storage events emitted by sync channels.
//!
//! Channels never parse flag definitions themselves. They hand raw JSON to the
//! resolver wrapped in a [`StorageEvent`], and the resolver's writer task does
//! the parsing and swapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Provenance attached to a configuration (selector, source, etag, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncMetadata(BTreeMap<String, String>);

impl SyncMetadata {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.0.insert(key.into(), value.into());
		self
	}

	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
		self.0.insert(key.into(), value.into());
	}

	pub fn get(&self, key: &str) -> Option<&str> {
		self.0.get(key).map(String::as_str)
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
		self.0.iter()
	}
}

/// Raw configuration content as received from a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadContent {
	/// A complete flag set that replaces the current one.
	Full(String),
	/// Upserts plus an optional `removed` list applied on top of the current set.
	Delta(String),
}

impl PayloadContent {
	pub fn raw(&self) -> &str {
		match self {
			PayloadContent::Full(raw) | PayloadContent::Delta(raw) => raw,
		}
	}

	pub fn is_delta(&self) -> bool {
		matches!(self, PayloadContent::Delta(_))
	}
}

/// One configuration update produced by a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPayload {
	pub content: PayloadContent,
	/// Channel-specific version tag (SSE event id, ETag, file mtime).
	pub version: Option<String>,
	pub metadata: SyncMetadata,
}

impl SyncPayload {
	pub fn full(raw: impl Into<String>) -> Self {
		Self {
			content: PayloadContent::Full(raw.into()),
			version: None,
			metadata: SyncMetadata::default(),
		}
	}

	pub fn delta(raw: impl Into<String>) -> Self {
		Self {
			content: PayloadContent::Delta(raw.into()),
			version: None,
			metadata: SyncMetadata::default(),
		}
	}

	pub fn with_version(mut self, version: impl Into<String>) -> Self {
		self.version = Some(version.into());
		self
	}

	pub fn with_metadata(mut self, metadata: SyncMetadata) -> Self {
		self.metadata = metadata;
		self
	}
}

/// A sync failure reported to the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
	pub message: String,
	/// True once retries are exhausted or the error cannot be retried.
	pub fatal: bool,
}

impl SyncFailure {
	pub fn transient(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			fatal: false,
		}
	}

	pub fn fatal(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			fatal: true,
		}
	}
}

/// Events flowing from the sync driver into the resolver's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageEvent {
	/// First configuration received since the resolver started.
	Ready(SyncPayload),
	/// A later configuration.
	Changed(SyncPayload),
	/// The source is connected but its data may be out of date.
	Stale(String),
	Error(SyncFailure),
}

impl StorageEvent {
	pub fn name(&self) -> &'static str {
		match self {
			StorageEvent::Ready(_) => "ready",
			StorageEvent::Changed(_) => "changed",
			StorageEvent::Stale(_) => "stale",
			StorageEvent::Error(_) => "error",
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_sync_metadata_builder() {
		let metadata = SyncMetadata::new()
			.with("selector", "app=web")
			.with("source", "sse");
		assert_eq!(metadata.get("selector"), Some("app=web"));
		assert_eq!(metadata.get("etag"), None);
		assert_eq!(metadata.iter().count(), 2);
	}

	#[test]
	fn test_sync_metadata_serializes_as_map() {
		let metadata = SyncMetadata::new().with("source", "file");
		let json = serde_json::to_value(&metadata).unwrap();
		assert_eq!(json, serde_json::json!({"source": "file"}));
	}

	#[test]
	fn test_payload_content() {
		let payload = SyncPayload::delta("{}").with_version("7");
		assert!(payload.content.is_delta());
		assert_eq!(payload.content.raw(), "{}");
		assert_eq!(payload.version.as_deref(), Some("7"));
	}

	#[test]
	fn test_failure_constructors() {
		assert!(!SyncFailure::transient("reset").fatal);
		assert!(SyncFailure::fatal("gave up").fatal);
		assert_eq!(
			StorageEvent::Error(SyncFailure::fatal("x")).name(),
			"error"
		);
	}
}
