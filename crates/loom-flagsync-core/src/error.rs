// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for flag configuration payloads.

use thiserror::Error;

/// Result type alias for configuration parsing.
pub type Result<T> = std::result::Result<T, FlagsError>;

/// Errors raised while turning a sync payload into flag definitions.
#[derive(Error, Debug)]
pub enum FlagsError {
	/// The payload is not a well-formed flag configuration document.
	#[error("Invalid flag configuration: {0}")]
	Parse(String),

	/// A single flag definition failed validation.
	#[error("Invalid flag {key}: {reason}")]
	InvalidFlag {
		/// Key of the offending flag.
		key: String,
		/// What was wrong with it.
		reason: String,
	},

	/// The payload was not valid JSON.
	#[error("Malformed JSON: {0}")]
	Json(#[from] serde_json::Error),
}

impl FlagsError {
	pub(crate) fn invalid_flag(key: &str, reason: impl Into<String>) -> Self {
		FlagsError::InvalidFlag {
			key: key.to_string(),
			reason: reason.into(),
		}
	}
}
