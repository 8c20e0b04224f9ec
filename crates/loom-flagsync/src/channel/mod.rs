// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Sync channels: live sources of flag configuration.
//!
//! A channel opens sessions. A session is a stream of [`SyncMessage`]s that
//! ends when the source disconnects; the [`SyncDriver`](crate::SyncDriver)
//! reconnects according to the retry policy. Channels never touch the flag
//! store. They only report what the source sent.

mod file;
mod memory;
mod poll;
mod sse;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use loom_flagsync_core::SyncPayload;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{ConfigError, ResolverConfig, SyncMode};
use crate::error::SyncError;

pub use file::FileSyncChannel;
pub use memory::{MemorySyncChannel, MemorySyncHandle};
pub use poll::PollingSyncChannel;
pub use sse::SseSyncChannel;

/// Path of the server-sent-events endpoint relative to the base URL.
pub const STREAM_PATH: &str = "/sync/stream";
/// Path of the polling endpoint relative to the base URL.
pub const POLL_PATH: &str = "/sync/flags";

/// One message from an open session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
	Configuration(SyncPayload),
	/// The session is alive but the data may be out of date.
	Degraded(String),
	/// Liveness only.
	Heartbeat,
}

/// An open session. The end of the stream is a disconnect.
pub type SyncSession = BoxStream<'static, Result<SyncMessage, SyncError>>;

/// Connection state of a sync driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
	Disconnected,
	Connecting,
	Streaming,
	/// Retries are exhausted or shutdown was requested. No further sessions.
	Terminated,
}

#[async_trait]
pub trait SyncChannel: Send + Sync + 'static {
	/// Short name used in logs and sync metadata.
	fn kind(&self) -> &'static str;

	/// Opens a session. Implementations must return promptly once `cancel`
	/// fires.
	async fn open(&self, cancel: &CancellationToken) -> Result<SyncSession, SyncError>;
}

/// Builds the channel selected by configuration.
///
/// An offline flag source path wins, then polling, then streaming.
pub fn from_config(config: &ResolverConfig) -> Result<Arc<dyn SyncChannel>, ConfigError> {
	config.validate()?;

	if let Some(path) = &config.offline_flag_source_path {
		info!(path = %path.display(), "Using offline flag source");
		return Ok(Arc::new(FileSyncChannel::new(path.clone(), config.offline_poll_interval)));
	}

	let client = http_client(config)?;
	let base_url = config.base_url();
	match config.sync_mode {
		SyncMode::Poll => {
			info!(
				base_url = %base_url,
				interval_ms = config.poll_interval.as_millis() as u64,
				"Using polling flag sync"
			);
			Ok(Arc::new(PollingSyncChannel::new(
				client,
				format!("{base_url}{POLL_PATH}"),
				config.poll_interval,
				config.selector.clone(),
				config.sync_token.clone(),
			)))
		}
		SyncMode::Stream => {
			info!(base_url = %base_url, "Using streaming flag sync");
			Ok(Arc::new(SseSyncChannel::new(
				client,
				format!("{base_url}{STREAM_PATH}"),
				config.stream_deadline,
				config.selector.clone(),
				config.sync_token.clone(),
			)))
		}
	}
}

fn user_agent() -> String {
	format!("loom-flagsync/{}", env!("CARGO_PKG_VERSION"))
}

fn http_client(config: &ResolverConfig) -> Result<reqwest::Client, ConfigError> {
	let mut builder = reqwest::Client::builder().user_agent(user_agent());

	if let Some(cert_path) = &config.cert_path {
		let pem = std::fs::read(cert_path).map_err(|e| {
			ConfigError::Tls(format!("failed to read {}: {e}", cert_path.display()))
		})?;
		let cert = reqwest::Certificate::from_pem(&pem)
			.map_err(|e| {
				ConfigError::Tls(format!("invalid certificate {}: {e}", cert_path.display()))
			})?;
		builder = builder.add_root_certificate(cert);
	}

	builder
		.build()
		.map_err(|e| ConfigError::Tls(format!("failed to build HTTP client: {e}")))
}

/// Adds the optional bearer token and selector query to a request.
fn authorize(
	request: reqwest::RequestBuilder,
	selector: Option<&str>,
	token: Option<&str>,
) -> reqwest::RequestBuilder {
	let request = match selector {
		Some(selector) => request.query(&[("selector", selector)]),
		None => request,
	};
	match token {
		Some(token) => request.bearer_auth(token),
		None => request,
	}
}

/// Turns a non-success response into [`SyncError::Http`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SyncError> {
	let status = response.status();
	if status.is_success() || status == reqwest::StatusCode::NOT_MODIFIED {
		return Ok(response);
	}
	Err(SyncError::Http {
		status: status.as_u16(),
		message: response.text().await.unwrap_or_default(),
	})
}
