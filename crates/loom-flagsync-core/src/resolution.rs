// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resolution results returned to callers.
//!
//! Resolution never fails with `Err`. Every failure is encoded in
//! [`ResolutionDetails`] with the caller's default value, reason
//! [`Reason::Error`] and a [`ResolutionError`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::FlagMetadata;

/// Why a value was returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
	/// No targeting rules; the default variant was served.
	Static,
	/// Targeting ran and matched nothing; the default variant was served.
	Default,
	TargetingMatch,
	/// The flag is disabled; the caller's default was served.
	Disabled,
	Error,
}

impl fmt::Display for Reason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			Reason::Static => "STATIC",
			Reason::Default => "DEFAULT",
			Reason::TargetingMatch => "TARGETING_MATCH",
			Reason::Disabled => "DISABLED",
			Reason::Error => "ERROR",
		};
		f.write_str(name)
	}
}

/// Classification of a resolution or provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
	FlagNotFound,
	ParseError,
	TypeMismatch,
	General,
	ProviderNotReady,
	InvalidContext,
}

impl fmt::Display for ErrorType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ErrorType::FlagNotFound => "FLAG_NOT_FOUND",
			ErrorType::ParseError => "PARSE_ERROR",
			ErrorType::TypeMismatch => "TYPE_MISMATCH",
			ErrorType::General => "GENERAL",
			ErrorType::ProviderNotReady => "PROVIDER_NOT_READY",
			ErrorType::InvalidContext => "INVALID_CONTEXT",
		};
		f.write_str(name)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionError {
	pub error_type: ErrorType,
	pub message: String,
}

impl ResolutionError {
	pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
		Self {
			error_type,
			message: message.into(),
		}
	}
}

impl fmt::Display for ResolutionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.error_type, self.message)
	}
}

/// The outcome of resolving one flag as type `T`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionDetails<T> {
	pub value: T,
	pub variant: Option<String>,
	pub reason: Reason,
	pub error: Option<ResolutionError>,
	pub flag_metadata: FlagMetadata,
}

impl<T> ResolutionDetails<T> {
	/// A failed resolution carrying the caller's default.
	pub fn error(default: T, error_type: ErrorType, message: impl Into<String>) -> Self {
		Self {
			value: default,
			variant: None,
			reason: Reason::Error,
			error: Some(ResolutionError::new(error_type, message)),
			flag_metadata: FlagMetadata::new(),
		}
	}

	pub fn from_error(default: T, error: ResolutionError) -> Self {
		Self {
			value: default,
			variant: None,
			reason: Reason::Error,
			error: Some(error),
			flag_metadata: FlagMetadata::new(),
		}
	}

	pub fn error_type(&self) -> Option<ErrorType> {
		self.error.as_ref().map(|e| e.error_type)
	}

	pub fn is_error(&self) -> bool {
		self.error.is_some()
	}
}
