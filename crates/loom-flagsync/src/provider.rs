// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! OpenFeature-style provider facade over a [`Resolver`].

use std::sync::atomic::{AtomicBool, Ordering};

use loom_flagsync_core::{EvaluationContext, ResolutionDetails, StructValue};
use serde::Serialize;
use tracing::{debug, info};

use crate::bus::EventSubscription;
use crate::config::{ConfigError, ResolverConfig};
use crate::error::{ResolverError, Result};
use crate::resolver::{Resolver, ResolverState};

pub const PROVIDER_NAME: &str = "flagd-in-process";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderMetadata {
	pub name: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderStatus {
	NotReady,
	Ready,
	Stale,
	/// Initialization failed but sync is still trying.
	Error,
	Fatal,
}

#[derive(Debug)]
pub struct InProcessProvider {
	resolver: Resolver,
	init_failed: AtomicBool,
}

impl InProcessProvider {
	pub fn new(resolver: Resolver) -> Self {
		Self {
			resolver,
			init_failed: AtomicBool::new(false),
		}
	}

	pub fn from_config(config: &ResolverConfig) -> std::result::Result<Self, ConfigError> {
		Ok(Self::new(Resolver::from_config(config)?))
	}

	pub fn metadata(&self) -> ProviderMetadata {
		ProviderMetadata {
			name: PROVIDER_NAME,
		}
	}

	/// Starts sync and waits for the first configuration.
	///
	/// The context is accepted for API parity; in-process evaluation uses
	/// the context of each resolve call.
	pub async fn initialize(&self, context: &EvaluationContext) -> Result<()> {
		debug!(
			targeting_key = context.targeting_key.as_deref().unwrap_or("-"),
			"Initializing provider"
		);
		match self.resolver.init().await {
			Ok(()) => {
				self.init_failed.store(false, Ordering::SeqCst);
				info!(provider = PROVIDER_NAME, "Provider ready");
				Ok(())
			}
			Err(e) => {
				if matches!(e, ResolverError::InitTimeout(_)) {
					self.init_failed.store(true, Ordering::SeqCst);
				}
				Err(e)
			}
		}
	}

	pub async fn shutdown(&self) {
		self.resolver.shutdown().await;
	}

	pub fn status(&self) -> ProviderStatus {
		match self.resolver.state() {
			ResolverState::Ready => ProviderStatus::Ready,
			ResolverState::Stale => ProviderStatus::Stale,
			ResolverState::FatalError => ProviderStatus::Fatal,
			ResolverState::Initializing if self.init_failed.load(Ordering::SeqCst) => {
				ProviderStatus::Error
			}
			ResolverState::Initializing | ResolverState::NotReady => ProviderStatus::NotReady,
		}
	}

	pub fn events(&self) -> EventSubscription {
		self.resolver.subscribe()
	}

	pub fn resolver(&self) -> &Resolver {
		&self.resolver
	}

	pub fn resolve_boolean_value(
		&self,
		flag_key: &str,
		default: bool,
		context: &EvaluationContext,
	) -> ResolutionDetails<bool> {
		self.resolver.resolve_boolean_value(flag_key, default, context)
	}

	pub fn resolve_string_value(
		&self,
		flag_key: &str,
		default: String,
		context: &EvaluationContext,
	) -> ResolutionDetails<String> {
		self.resolver.resolve_string_value(flag_key, default, context)
	}

	pub fn resolve_integer_value(
		&self,
		flag_key: &str,
		default: i64,
		context: &EvaluationContext,
	) -> ResolutionDetails<i64> {
		self.resolver.resolve_integer_value(flag_key, default, context)
	}

	pub fn resolve_double_value(
		&self,
		flag_key: &str,
		default: f64,
		context: &EvaluationContext,
	) -> ResolutionDetails<f64> {
		self.resolver.resolve_double_value(flag_key, default, context)
	}

	pub fn resolve_structure_value(
		&self,
		flag_key: &str,
		default: StructValue,
		context: &EvaluationContext,
	) -> ResolutionDetails<StructValue> {
		self.resolver.resolve_structure_value(flag_key, default, context)
	}
}
