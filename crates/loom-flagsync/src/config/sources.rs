// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: defaults, TOML files and environment variables.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use super::error::ConfigError;
use super::{CacheType, ResolverConfigLayer, ResolverType, SyncMode};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ResolverConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ResolverConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ResolverConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ResolverConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ResolverConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ResolverConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: `FLAGD_<FIELD>`, with durations in milliseconds (`*_MS`).
#[derive(Debug, Default)]
pub struct EnvSource {
	vars: Option<HashMap<String, String>>,
}

impl EnvSource {
	/// Reads the process environment.
	pub fn new() -> Self {
		Self::default()
	}

	/// Reads from a fixed set of variables instead of the process environment.
	pub fn from_vars<I, K, V>(vars: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		Self {
			vars: Some(
				vars.into_iter()
					.map(|(k, v)| (k.into(), v.into()))
					.collect(),
			),
		}
	}

	fn var(&self, name: &str) -> Option<String> {
		let value = match &self.vars {
			Some(vars) => vars.get(name).cloned(),
			None => std::env::var(name).ok(),
		};
		value.filter(|s| !s.is_empty())
	}

	fn bool(&self, name: &str) -> Option<bool> {
		self.var(name)
			.map(|v| v.eq_ignore_ascii_case("true") || v == "1")
	}

	fn parse<T: FromStr>(&self, name: &str, kind: &str) -> Result<Option<T>, ConfigError> {
		match self.var(name) {
			Some(v) => v
				.parse()
				.map(Some)
				.map_err(|_| ConfigError::invalid(name, format!("invalid {kind} value '{v}'"))),
			None => Ok(None),
		}
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ResolverConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ResolverConfigLayer {
			host: self.var("FLAGD_HOST"),
			port: self.parse("FLAGD_PORT", "u16")?,
			tls: self.bool("FLAGD_TLS"),
			cert_path: self.var("FLAGD_SERVER_CERT_PATH").map(PathBuf::from),
			socket_path: self.var("FLAGD_SOCKET_PATH").map(PathBuf::from),
			cache: self.parse::<CacheType>("FLAGD_CACHE", "cache type")?,
			max_cache_size: self.parse("FLAGD_MAX_CACHE_SIZE", "usize")?,
			resolver: self.parse::<ResolverType>("FLAGD_RESOLVER", "resolver type")?,
			selector: self.var("FLAGD_SOURCE_SELECTOR"),
			max_event_stream_retries: self.parse("FLAGD_MAX_EVENT_STREAM_RETRIES", "u32")?,
			retry_backoff_ms: self.parse("FLAGD_RETRY_BACKOFF_MS", "u64")?,
			retry_backoff_max_ms: self.parse("FLAGD_RETRY_BACKOFF_MAX_MS", "u64")?,
			deadline_ms: self.parse("FLAGD_DEADLINE_MS", "u64")?,
			stream_deadline_ms: self.parse("FLAGD_STREAM_DEADLINE_MS", "u64")?,
			offline_flag_source_path: self.var("FLAGD_OFFLINE_FLAG_SOURCE_PATH").map(PathBuf::from),
			offline_poll_interval_ms: self.parse("FLAGD_OFFLINE_POLL_MS", "u64")?,
			sync_mode: self.parse::<SyncMode>("FLAGD_SYNC_MODE", "sync mode")?,
			poll_interval_ms: self.parse("FLAGD_POLL_INTERVAL_MS", "u64")?,
			sync_token: self.var("FLAGD_SYNC_TOKEN"),
		})
	}
}
