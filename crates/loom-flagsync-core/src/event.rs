// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Provider lifecycle and change events delivered to subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::resolution::ErrorType;
use crate::sync::SyncMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderEventKind {
	Ready,
	ConfigurationChanged,
	Stale,
	Error,
}

impl ProviderEventKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ProviderEventKind::Ready => "PROVIDER_READY",
			ProviderEventKind::ConfigurationChanged => "PROVIDER_CONFIGURATION_CHANGED",
			ProviderEventKind::Stale => "PROVIDER_STALE",
			ProviderEventKind::Error => "PROVIDER_ERROR",
		}
	}
}

impl std::fmt::Display for ProviderEventKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventError {
	pub error_type: ErrorType,
	pub message: String,
	/// A fatal error is terminal: the provider will not recover on its own.
	pub fatal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEvent {
	pub kind: ProviderEventKind,
	/// Sorted keys of added, removed or modified flags.
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub flags_changed: Vec<String>,
	#[serde(default)]
	pub sync_metadata: SyncMetadata,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<EventError>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
	/// Monotonic per publisher; stamped by the event bus.
	#[serde(default)]
	pub sequence: u64,
	pub timestamp: DateTime<Utc>,
}

impl ProviderEvent {
	fn new(kind: ProviderEventKind) -> Self {
		Self {
			kind,
			flags_changed: Vec::new(),
			sync_metadata: SyncMetadata::default(),
			error: None,
			message: None,
			sequence: 0,
			timestamp: Utc::now(),
		}
	}

	pub fn ready(flags_changed: Vec<String>, sync_metadata: SyncMetadata) -> Self {
		Self {
			flags_changed,
			sync_metadata,
			..Self::new(ProviderEventKind::Ready)
		}
	}

	pub fn configuration_changed(flags_changed: Vec<String>, sync_metadata: SyncMetadata) -> Self {
		Self {
			flags_changed,
			sync_metadata,
			..Self::new(ProviderEventKind::ConfigurationChanged)
		}
	}

	pub fn stale(message: impl Into<String>) -> Self {
		Self {
			message: Some(message.into()),
			..Self::new(ProviderEventKind::Stale)
		}
	}

	pub fn error(error_type: ErrorType, message: impl Into<String>, fatal: bool) -> Self {
		let message = message.into();
		Self {
			message: Some(message.clone()),
			error: Some(EventError {
				error_type,
				message,
				fatal,
			}),
			..Self::new(ProviderEventKind::Error)
		}
	}

	pub fn is_fatal(&self) -> bool {
		self.error.as_ref().is_some_and(|e| e.fatal)
	}
}
