// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP polling sync channel with `ETag` revalidation.
//!
//! Every session starts with an unconditional fetch so a reconnect always
//! re-delivers the current configuration. Later polls send `If-None-Match`
//! and a `304 Not Modified` only confirms liveness.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use loom_flagsync_core::{SyncMetadata, SyncPayload};
use parking_lot::Mutex;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{authorize, check_status, SyncChannel, SyncMessage, SyncSession};
use crate::error::SyncError;

#[derive(Debug)]
struct PollTarget {
	client: reqwest::Client,
	url: String,
	selector: Option<String>,
	token: Option<String>,
	etag: Mutex<Option<String>>,
}

impl PollTarget {
	async fn fetch(&self) -> Result<SyncMessage, SyncError> {
		let mut request = authorize(
			self.client.get(&self.url),
			self.selector.as_deref(),
			self.token.as_deref(),
		);
		let etag = self.etag.lock().clone();
		if let Some(etag) = &etag {
			request = request.header(IF_NONE_MATCH, etag);
		}

		let response = request.send().await.map_err(SyncError::Connect)?;
		let response = check_status(response).await?;

		if response.status() == StatusCode::NOT_MODIFIED {
			debug!(url = %self.url, "Flag configuration not modified");
			return Ok(SyncMessage::Heartbeat);
		}

		let new_etag = response
			.headers()
			.get(ETAG)
			.and_then(|v| v.to_str().ok())
			.map(str::to_string);
		let body = response.text().await.map_err(SyncError::Connect)?;

		let mut metadata = SyncMetadata::new().with("source", "poll");
		if let Some(selector) = &self.selector {
			metadata.insert("selector", selector.clone());
		}
		let mut payload = SyncPayload::full(body);
		if let Some(etag) = &new_etag {
			metadata.insert("etag", etag.clone());
			payload = payload.with_version(etag.clone());
		}
		*self.etag.lock() = new_etag;

		Ok(SyncMessage::Configuration(payload.with_metadata(metadata)))
	}
}

#[derive(Debug, Clone)]
pub struct PollingSyncChannel {
	target: Arc<PollTarget>,
	interval: Duration,
}

impl PollingSyncChannel {
	pub fn new(
		client: reqwest::Client,
		url: impl Into<String>,
		interval: Duration,
		selector: Option<String>,
		token: Option<String>,
	) -> Self {
		Self {
			target: Arc::new(PollTarget {
				client,
				url: url.into(),
				selector,
				token,
				etag: Mutex::new(None),
			}),
			interval,
		}
	}

	/// The `ETag` of the last configuration received, if any.
	pub fn etag(&self) -> Option<String> {
		self.target.etag.lock().clone()
	}
}

#[async_trait]
impl SyncChannel for PollingSyncChannel {
	fn kind(&self) -> &'static str {
		"poll"
	}

	async fn open(&self, cancel: &CancellationToken) -> Result<SyncSession, SyncError> {
		info!(url = %self.target.url, "Polling flag configuration");
		*self.target.etag.lock() = None;

		let first = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(SyncError::Cancelled),
			first = self.target.fetch() => first?,
		};

		let target = Arc::clone(&self.target);
		let interval = self.interval;
		let session = async_stream::stream! {
			yield Ok(first);
			let mut failing = false;
			loop {
				tokio::time::sleep(interval).await;
				match target.fetch().await {
					Ok(message) => {
						failing = false;
						yield Ok(message);
					}
					Err(e) if !failing => {
						failing = true;
						warn!(url = %target.url, error = %e, "Flag poll failed");
						yield Ok(SyncMessage::Degraded(e.to_string()));
					}
					Err(e) => {
						yield Err(e);
						break;
					}
				}
			}
		};

		Ok(Box::pin(session))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_new_channel_has_no_etag() {
		let channel = PollingSyncChannel::new(
			reqwest::Client::new(),
			"http://localhost:8015/sync/flags",
			Duration::from_secs(30),
			None,
			None,
		);
		assert_eq!(channel.kind(), "poll");
		assert!(channel.etag().is_none());
	}

	#[tokio::test]
	async fn test_open_is_cancellable() {
		let channel = PollingSyncChannel::new(
			reqwest::Client::new(),
			"http://10.255.255.1:8015/sync/flags",
			Duration::from_secs(30),
			None,
			None,
		);
		let cancel = CancellationToken::new();
		cancel.cancel();
		assert!(matches!(channel.open(&cancel).await, Err(SyncError::Cancelled)));
	}
}
