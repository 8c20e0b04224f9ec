// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SSE (Server-Sent Events) sync channel.
//!
//! The server pushes `configuration` events carrying a full flag document,
//! `patch` events carrying a delta, and `heartbeat` events. The SSE event id,
//! when present, becomes the payload version.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::{Event, Eventsource};
use futures::StreamExt;
use loom_flagsync_core::{SyncMetadata, SyncPayload};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{authorize, check_status, SyncChannel, SyncMessage, SyncSession};
use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct SseSyncChannel {
	client: reqwest::Client,
	url: String,
	stale_after: Duration,
	selector: Option<String>,
	token: Option<String>,
}

impl SseSyncChannel {
	pub fn new(
		client: reqwest::Client,
		url: impl Into<String>,
		stale_after: Duration,
		selector: Option<String>,
		token: Option<String>,
	) -> Self {
		Self {
			client,
			url: url.into(),
			stale_after,
			selector,
			token,
		}
	}

	fn metadata(&self) -> SyncMetadata {
		let mut metadata = SyncMetadata::new().with("source", "sse");
		if let Some(selector) = &self.selector {
			metadata.insert("selector", selector.clone());
		}
		metadata
	}
}

#[async_trait]
impl SyncChannel for SseSyncChannel {
	fn kind(&self) -> &'static str {
		"sse"
	}

	async fn open(&self, cancel: &CancellationToken) -> Result<SyncSession, SyncError> {
		info!(url = %self.url, "Connecting to SSE stream");

		let request = authorize(
			self.client
				.get(&self.url)
				.header(ACCEPT, "text/event-stream")
				.header(CACHE_CONTROL, "no-cache"),
			self.selector.as_deref(),
			self.token.as_deref(),
		);

		let response = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(SyncError::Cancelled),
			response = request.send() => response.map_err(SyncError::Connect)?,
		};
		let response = check_status(response).await?;
		info!(url = %self.url, "SSE connection established");

		let metadata = self.metadata();
		let stale_after = self.stale_after.max(Duration::from_millis(1));
		let mut events = Box::pin(response.bytes_stream().eventsource());

		let session = async_stream::stream! {
			let mut degraded = false;
			loop {
				match tokio::time::timeout(stale_after, events.next()).await {
					Ok(Some(Ok(event))) => {
						degraded = false;
						if let Some(message) = to_message(event, &metadata) {
							yield Ok(message);
						}
					}
					Ok(Some(Err(e))) => {
						yield Err(SyncError::Stream(e.to_string()));
						break;
					}
					Ok(None) => {
						debug!("SSE stream ended");
						break;
					}
					Err(_) if !degraded => {
						degraded = true;
						yield Ok(SyncMessage::Degraded(format!(
							"no events for {} ms",
							stale_after.as_millis()
						)));
					}
					Err(_) => {
						yield Err(SyncError::Idle(stale_after));
						break;
					}
				}
			}
		};

		Ok(Box::pin(session))
	}
}

/// Maps one SSE event to a sync message. Unknown and empty events are skipped.
fn to_message(event: Event, metadata: &SyncMetadata) -> Option<SyncMessage> {
	let version = (!event.id.is_empty()).then(|| event.id.clone());
	let payload = |raw: String, delta: bool| {
		let payload = if delta {
			SyncPayload::delta(raw)
		} else {
			SyncPayload::full(raw)
		};
		let payload = payload.with_metadata(metadata.clone());
		match &version {
			Some(version) => payload.with_version(version.clone()),
			None => payload,
		}
	};

	match event.event.as_str() {
		"heartbeat" => Some(SyncMessage::Heartbeat),
		_ if event.data.trim().is_empty() => None,
		"configuration" | "message" => Some(SyncMessage::Configuration(payload(event.data, false))),
		"patch" => Some(SyncMessage::Configuration(payload(event.data, true))),
		other => {
			debug!(event_type = other, "Ignoring unknown SSE event");
			None
		}
	}
}
