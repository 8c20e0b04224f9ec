// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered resolver configuration.
//!
//! Configuration is merged from built-in defaults, an optional TOML file and
//! `FLAGD_*` environment variables, in that order of increasing precedence.
//!
//! ```toml
//! host = "flagd.internal"
//! port = 8015
//! tls = true
//! selector = "app=web"
//! max_event_stream_retries = 5
//! retry_backoff_ms = 1000
//! ```

pub mod error;
pub mod sources;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use error::ConfigError;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8015;
const DEFAULT_MAX_CACHE_SIZE: usize = 1000;
const MAX_CACHE_SIZE_LIMIT: usize = 10_000_000;
const DEFAULT_MAX_EVENT_STREAM_RETRIES: u32 = 5;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
const DEFAULT_RETRY_BACKOFF_MAX_MS: u64 = 120_000;
const DEFAULT_DEADLINE_MS: u64 = 5000;
const DEFAULT_STREAM_DEADLINE_MS: u64 = 60_000;
const DEFAULT_OFFLINE_POLL_MS: u64 = 5000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
	#[default]
	Lru,
	Disabled,
}

impl FromStr for CacheType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"lru" => Ok(CacheType::Lru),
			"disabled" | "none" => Ok(CacheType::Disabled),
			other => Err(format!("unknown cache type '{other}'")),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolverType {
	#[default]
	InProcess,
	Rpc,
}

impl FromStr for ResolverType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"in-process" | "in_process" | "inprocess" => Ok(ResolverType::InProcess),
			"rpc" => Ok(ResolverType::Rpc),
			other => Err(format!("unknown resolver type '{other}'")),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
	#[default]
	Stream,
	Poll,
}

impl FromStr for SyncMode {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"stream" => Ok(SyncMode::Stream),
			"poll" => Ok(SyncMode::Poll),
			other => Err(format!("unknown sync mode '{other}'")),
		}
	}
}

/// One layer of partially specified configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfigLayer {
	pub host: Option<String>,
	pub port: Option<u16>,
	pub tls: Option<bool>,
	pub cert_path: Option<PathBuf>,
	pub socket_path: Option<PathBuf>,
	pub cache: Option<CacheType>,
	pub max_cache_size: Option<usize>,
	pub resolver: Option<ResolverType>,
	pub selector: Option<String>,
	pub max_event_stream_retries: Option<u32>,
	pub retry_backoff_ms: Option<u64>,
	pub retry_backoff_max_ms: Option<u64>,
	pub deadline_ms: Option<u64>,
	pub stream_deadline_ms: Option<u64>,
	pub offline_flag_source_path: Option<PathBuf>,
	pub offline_poll_interval_ms: Option<u64>,
	pub sync_mode: Option<SyncMode>,
	pub poll_interval_ms: Option<u64>,
	pub sync_token: Option<String>,
}

fn overlay<T>(slot: &mut Option<T>, other: Option<T>) {
	if other.is_some() {
		*slot = other;
	}
}

impl ResolverConfigLayer {
	pub fn merge(&mut self, other: Self) {
		overlay(&mut self.host, other.host);
		overlay(&mut self.port, other.port);
		overlay(&mut self.tls, other.tls);
		overlay(&mut self.cert_path, other.cert_path);
		overlay(&mut self.socket_path, other.socket_path);
		overlay(&mut self.cache, other.cache);
		overlay(&mut self.max_cache_size, other.max_cache_size);
		overlay(&mut self.resolver, other.resolver);
		overlay(&mut self.selector, other.selector);
		overlay(&mut self.max_event_stream_retries, other.max_event_stream_retries);
		overlay(&mut self.retry_backoff_ms, other.retry_backoff_ms);
		overlay(&mut self.retry_backoff_max_ms, other.retry_backoff_max_ms);
		overlay(&mut self.deadline_ms, other.deadline_ms);
		overlay(&mut self.stream_deadline_ms, other.stream_deadline_ms);
		overlay(&mut self.offline_flag_source_path, other.offline_flag_source_path);
		overlay(&mut self.offline_poll_interval_ms, other.offline_poll_interval_ms);
		overlay(&mut self.sync_mode, other.sync_mode);
		overlay(&mut self.poll_interval_ms, other.poll_interval_ms);
		overlay(&mut self.sync_token, other.sync_token);
	}

	pub fn finalize(self) -> ResolverConfig {
		ResolverConfig {
			host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
			port: self.port.unwrap_or(DEFAULT_PORT),
			tls: self.tls.unwrap_or(false),
			cert_path: self.cert_path,
			socket_path: self.socket_path,
			cache: self.cache.unwrap_or_default(),
			max_cache_size: self.max_cache_size.unwrap_or(DEFAULT_MAX_CACHE_SIZE),
			resolver: self.resolver.unwrap_or_default(),
			selector: self.selector,
			max_event_stream_retries: self
				.max_event_stream_retries
				.unwrap_or(DEFAULT_MAX_EVENT_STREAM_RETRIES),
			retry_backoff: Duration::from_millis(
				self.retry_backoff_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
			),
			retry_backoff_max: Duration::from_millis(
				self.retry_backoff_max_ms.unwrap_or(DEFAULT_RETRY_BACKOFF_MAX_MS),
			),
			deadline: Duration::from_millis(self.deadline_ms.unwrap_or(DEFAULT_DEADLINE_MS)),
			stream_deadline: Duration::from_millis(
				self.stream_deadline_ms.unwrap_or(DEFAULT_STREAM_DEADLINE_MS),
			),
			offline_flag_source_path: self.offline_flag_source_path,
			offline_poll_interval: Duration::from_millis(
				self.offline_poll_interval_ms.unwrap_or(DEFAULT_OFFLINE_POLL_MS),
			),
			sync_mode: self.sync_mode.unwrap_or_default(),
			poll_interval: Duration::from_millis(
				self.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
			),
			sync_token: self.sync_token,
		}
	}
}

/// Fully resolved resolver configuration.
#[derive(Clone, PartialEq)]
pub struct ResolverConfig {
	pub host: String,
	pub port: u16,
	pub tls: bool,
	/// PEM root certificate trusted for TLS connections.
	pub cert_path: Option<PathBuf>,
	pub socket_path: Option<PathBuf>,
	pub cache: CacheType,
	pub max_cache_size: usize,
	pub resolver: ResolverType,
	pub selector: Option<String>,
	pub max_event_stream_retries: u32,
	pub retry_backoff: Duration,
	pub retry_backoff_max: Duration,
	/// How long `init` waits for the first configuration.
	pub deadline: Duration,
	/// How long a stream may stay silent before the data is considered stale.
	pub stream_deadline: Duration,
	/// When set, flags are read from this file and no network sync happens.
	pub offline_flag_source_path: Option<PathBuf>,
	pub offline_poll_interval: Duration,
	pub sync_mode: SyncMode,
	pub poll_interval: Duration,
	pub sync_token: Option<String>,
}

impl Default for ResolverConfig {
	fn default() -> Self {
		ResolverConfigLayer::default().finalize()
	}
}

impl fmt::Debug for ResolverConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ResolverConfig")
			.field("host", &self.host)
			.field("port", &self.port)
			.field("tls", &self.tls)
			.field("cert_path", &self.cert_path)
			.field("socket_path", &self.socket_path)
			.field("cache", &self.cache)
			.field("max_cache_size", &self.max_cache_size)
			.field("resolver", &self.resolver)
			.field("selector", &self.selector)
			.field("max_event_stream_retries", &self.max_event_stream_retries)
			.field("retry_backoff", &self.retry_backoff)
			.field("retry_backoff_max", &self.retry_backoff_max)
			.field("deadline", &self.deadline)
			.field("stream_deadline", &self.stream_deadline)
			.field("offline_flag_source_path", &self.offline_flag_source_path)
			.field("offline_poll_interval", &self.offline_poll_interval)
			.field("sync_mode", &self.sync_mode)
			.field("poll_interval", &self.poll_interval)
			.field("sync_token", &self.sync_token.as_ref().map(|_| "[REDACTED]"))
			.finish()
	}
}

impl ResolverConfig {
	/// Base URL of the sync server.
	pub fn base_url(&self) -> String {
		let scheme = if self.tls { "https" } else { "http" };
		format!("{}://{}:{}", scheme, self.host, self.port)
	}

	/// Effective cache capacity; zero when caching is disabled.
	pub fn cache_capacity(&self) -> usize {
		match self.cache {
			CacheType::Lru => self.max_cache_size,
			CacheType::Disabled => 0,
		}
	}

	/// Rejects configurations this crate cannot serve.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.resolver == ResolverType::Rpc {
			return Err(ConfigError::Unsupported(
				"the rpc resolver is not available; use in-process".to_string(),
			));
		}
		if self.socket_path.is_some() {
			return Err(ConfigError::Unsupported(
				"unix socket sync is not available over HTTP".to_string(),
			));
		}
		if self.offline_flag_source_path.is_none() && self.port == 0 {
			return Err(ConfigError::invalid("port", "must be non-zero"));
		}
		if self.max_cache_size > MAX_CACHE_SIZE_LIMIT {
			return Err(ConfigError::invalid(
				"max_cache_size",
				format!("must be at most {MAX_CACHE_SIZE_LIMIT}"),
			));
		}
		if self.retry_backoff > self.retry_backoff_max {
			return Err(ConfigError::Validation(format!(
				"retry_backoff ({:?}) exceeds retry_backoff_max ({:?})",
				self.retry_backoff, self.retry_backoff_max
			)));
		}
		if self.poll_interval.is_zero() || self.offline_poll_interval.is_zero() {
			return Err(ConfigError::Validation(
				"poll intervals must be non-zero".to_string(),
			));
		}
		if let Some(cert_path) = &self.cert_path {
			if !cert_path.exists() {
				return Err(ConfigError::Tls(format!(
					"certificate {} does not exist",
					cert_path.display()
				)));
			}
		}
		Ok(())
	}
}

fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<ResolverConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ResolverConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	let config = merged.finalize();
	config.validate()?;

	info!(
		host = %config.host,
		port = config.port,
		tls = config.tls,
		sync_mode = ?config.sync_mode,
		offline = config.offline_flag_source_path.is_some(),
		cache_capacity = config.cache_capacity(),
		"Resolver configuration loaded"
	);

	Ok(config)
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`FLAGD_*`)
/// 2. Config file at `path`, when given
/// 3. Built-in defaults
pub fn load_config(path: Option<&Path>) -> Result<ResolverConfig, ConfigError> {
	let mut sources: Vec<Box<dyn ConfigSource>> =
		vec![Box::new(DefaultsSource), Box::new(EnvSource::new())];
	if let Some(path) = path {
		sources.push(Box::new(TomlSource::new(path)));
	}
	load_from_sources(sources)
}

/// Load configuration from explicit sources, for embedding and tests.
pub fn load_config_with_sources(
	sources: Vec<Box<dyn ConfigSource>>,
) -> Result<ResolverConfig, ConfigError> {
	load_from_sources(sources)
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn test_default_values() {
		let config = ResolverConfig::default();
		assert_eq!(config.host, "localhost");
		assert_eq!(config.port, 8015);
		assert!(!config.tls);
		assert_eq!(config.cache, CacheType::Lru);
		assert_eq!(config.max_cache_size, 1000);
		assert_eq!(config.max_event_stream_retries, 5);
		assert_eq!(config.retry_backoff, Duration::from_millis(1000));
		assert_eq!(config.retry_backoff_max, Duration::from_millis(120_000));
		assert_eq!(config.deadline, Duration::from_millis(5000));
		assert_eq!(config.stream_deadline, Duration::from_secs(60));
		assert_eq!(config.sync_mode, SyncMode::Stream);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_merge_overwrites() {
		let mut base = ResolverConfigLayer {
			host: Some("a".to_string()),
			port: Some(1),
			..Default::default()
		};
		base.merge(ResolverConfigLayer {
			port: Some(2),
			..Default::default()
		});
		assert_eq!(base.host.as_deref(), Some("a"));
		assert_eq!(base.port, Some(2));
	}

	#[test]
	fn test_env_overrides_toml_overrides_defaults() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "host = \"from-toml\"\nport = 9000").unwrap();

		let config = load_config_with_sources(vec![
			Box::new(EnvSource::from_vars([("FLAGD_PORT", "9100")])),
			Box::new(DefaultsSource),
			Box::new(TomlSource::new(file.path())),
		])
		.unwrap();

		assert_eq!(config.host, "from-toml");
		assert_eq!(config.port, 9100);
		assert_eq!(config.max_cache_size, 1000);
	}

	#[test]
	fn test_base_url() {
		let mut config = ResolverConfig::default();
		assert_eq!(config.base_url(), "http://localhost:8015");
		config.tls = true;
		config.host = "flags.example.com".to_string();
		config.port = 443;
		assert_eq!(config.base_url(), "https://flags.example.com:443");
	}

	#[test]
	fn test_cache_capacity() {
		let mut config = ResolverConfig::default();
		assert_eq!(config.cache_capacity(), 1000);
		config.cache = CacheType::Disabled;
		assert_eq!(config.cache_capacity(), 0);
	}

	#[test]
	fn test_validate_rejects_rpc_and_sockets() {
		let config = ResolverConfig {
			resolver: ResolverType::Rpc,
			..Default::default()
		};
		assert!(matches!(config.validate(), Err(ConfigError::Unsupported(_))));

		let config = ResolverConfig {
			socket_path: Some(PathBuf::from("/tmp/flagd.sock")),
			..Default::default()
		};
		assert!(matches!(config.validate(), Err(ConfigError::Unsupported(_))));
	}

	#[test]
	fn test_validate_rejects_bad_values() {
		let config = ResolverConfig {
			port: 0,
			..Default::default()
		};
		assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { .. })));

		let config = ResolverConfig {
			cert_path: Some(PathBuf::from("/nonexistent/ca.pem")),
			..Default::default()
		};
		assert!(matches!(config.validate(), Err(ConfigError::Tls(_))));

		let config = ResolverConfig {
			retry_backoff: Duration::from_secs(10),
			retry_backoff_max: Duration::from_secs(1),
			..Default::default()
		};
		assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
	}

	#[test]
	fn test_validate_rejects_oversized_cache() {
		let config = ResolverConfig {
			max_cache_size: usize::MAX / 64,
			..Default::default()
		};
		match config.validate() {
			Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "max_cache_size"),
			other => panic!("expected max_cache_size rejection, got {other:?}"),
		}

		let config = ResolverConfig {
			max_cache_size: MAX_CACHE_SIZE_LIMIT,
			..Default::default()
		};
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_debug_redacts_sync_token() {
		let config = ResolverConfig {
			sync_token: Some("super-secret".to_string()),
			..Default::default()
		};
		let debug = format!("{config:?}");
		assert!(!debug.contains("super-secret"));
		assert!(debug.contains("[REDACTED]"));
	}

	#[test]
	fn test_enum_parsing() {
		assert_eq!("LRU".parse::<CacheType>(), Ok(CacheType::Lru));
		assert_eq!("in-process".parse::<ResolverType>(), Ok(ResolverType::InProcess));
		assert_eq!("poll".parse::<SyncMode>(), Ok(SyncMode::Poll));
		assert!("grpc".parse::<SyncMode>().is_err());
	}
}
