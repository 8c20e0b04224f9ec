// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for flag sync and the resolver lifecycle.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Result type alias for resolver lifecycle operations.
pub type Result<T> = std::result::Result<T, ResolverError>;

/// Errors raised by sync channels while opening or reading a session.
#[derive(Error, Debug)]
pub enum SyncError {
	/// Failed to connect to the sync server.
	#[error("Failed to connect to sync server: {0}")]
	Connect(#[source] reqwest::Error),

	/// Server returned an error response.
	#[error("Sync server returned an error: {status} - {message}")]
	Http {
		/// HTTP status code.
		status: u16,
		/// Error message from server.
		message: String,
	},

	/// The event stream broke mid-session.
	#[error("Sync stream error: {0}")]
	Stream(String),

	/// Reading a local flag source failed.
	#[error("Flag source I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// The file watcher failed.
	#[error("Flag file watch error: {0}")]
	Watch(#[from] notify::Error),

	/// Nothing arrived on the session for too long.
	#[error("Sync stream idle for {0:?}")]
	Idle(Duration),

	/// The source closed the session.
	#[error("Sync session closed by source")]
	Closed,

	/// The source refused the session.
	#[error("Sync source unavailable: {0}")]
	Unavailable(String),

	#[error("Sync cancelled")]
	Cancelled,
}

impl SyncError {
	/// Returns true if reconnecting may succeed.
	pub fn is_retryable(&self) -> bool {
		match self {
			SyncError::Connect(_)
			| SyncError::Stream(_)
			| SyncError::Io(_)
			| SyncError::Watch(_)
			| SyncError::Idle(_)
			| SyncError::Closed
			| SyncError::Unavailable(_) => true,
			SyncError::Http { status, .. } => {
				matches!(*status, 408 | 429 | 500..=599)
			}
			SyncError::Cancelled => false,
		}
	}
}

/// Errors returned by resolver and provider lifecycle calls.
#[derive(Error, Debug)]
pub enum ResolverError {
	/// No configuration arrived before the init deadline. Sync keeps running.
	#[error("Resolver initialization timed out after {0:?}")]
	InitTimeout(Duration),

	/// Sync gave up; the resolver will not recover on its own.
	#[error("Resolver entered a fatal state: {0}")]
	Fatal(String),

	#[error("Resolver has been shut down")]
	Shutdown,

	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error(transparent)]
	Sync(#[from] SyncError),
}
