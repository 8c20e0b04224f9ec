// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Session driver: opens sync sessions, reconnects with backoff and turns
//! channel messages into [`StorageEvent`]s.

use std::sync::Arc;

use futures::StreamExt;
use loom_flagsync_core::{StorageEvent, SyncFailure};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backoff::{BackoffLoop, RetryPolicy};
use crate::channel::{ChannelState, SyncChannel, SyncMessage};
use crate::error::SyncError;

/// How one session ended.
enum SessionEnd {
	Cancelled,
	Disconnected,
	Failed(SyncError),
}

pub struct SyncDriver {
	channel: Arc<dyn SyncChannel>,
	policy: RetryPolicy,
	state: watch::Sender<ChannelState>,
}

impl std::fmt::Debug for SyncDriver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SyncDriver")
			.field("channel", &self.channel.kind())
			.field("policy", &self.policy)
			.field("state", &*self.state.borrow())
			.finish()
	}
}

impl SyncDriver {
	pub fn new(channel: Arc<dyn SyncChannel>, policy: RetryPolicy) -> Self {
		let (state, _) = watch::channel(ChannelState::Disconnected);
		Self {
			channel,
			policy,
			state,
		}
	}

	pub fn state(&self) -> ChannelState {
		*self.state.borrow()
	}

	pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
		self.state.subscribe()
	}

	/// Runs sessions until cancelled, until retries are exhausted, or until a
	/// non-retryable error. Every storage event is handed to `sink` in order.
	///
	/// - The first configuration ever delivered is `Ready`, later ones `Changed`.
	/// - `Degraded` becomes `Stale`.
	/// - A failed open, a stream error or the end of a session is a transient
	///   `Error` followed by a backoff wait.
	/// - Exhaustion or a non-retryable error is a fatal `Error`, after which the
	///   driver is `Terminated`.
	///
	/// Cancellation is observed while opening, while reading and while waiting.
	pub async fn run<F>(&self, cancel: CancellationToken, mut sink: F)
	where
		F: FnMut(StorageEvent) + Send,
	{
		let kind = self.channel.kind();
		let mut backoff = BackoffLoop::new(self.policy.clone());
		let mut delivered = false;

		loop {
			if cancel.is_cancelled() {
				break;
			}

			self.set_state(ChannelState::Connecting);
			info!(channel = kind, attempt = backoff.failures(), "Opening sync session");

			let opened = tokio::select! {
				biased;
				_ = cancel.cancelled() => break,
				opened = self.channel.open(&cancel) => opened,
			};

			let end = match opened {
				Ok(mut session) => {
					self.set_state(ChannelState::Streaming);
					info!(channel = kind, "Sync session established");
					loop {
						let next = tokio::select! {
							biased;
							_ = cancel.cancelled() => None,
							next = session.next() => Some(next),
						};
						let Some(next) = next else {
							break SessionEnd::Cancelled;
						};
						match next {
							Some(Ok(SyncMessage::Configuration(payload))) => {
								backoff.reset();
								let event = if delivered {
									StorageEvent::Changed(payload)
								} else {
									StorageEvent::Ready(payload)
								};
								delivered = true;
								debug!(
									channel = kind,
									event = event.name(),
									"Configuration received"
								);
								sink(event);
							}
							Some(Ok(SyncMessage::Heartbeat)) => {
								debug!(channel = kind, "Heartbeat received");
								backoff.reset();
							}
							Some(Ok(SyncMessage::Degraded(reason))) => {
								warn!(channel = kind, reason = %reason, "Sync source degraded");
								sink(StorageEvent::Stale(reason));
							}
							Some(Err(e)) => break SessionEnd::Failed(e),
							None => break SessionEnd::Disconnected,
						}
					}
				}
				Err(e) => SessionEnd::Failed(e),
			};

			self.set_state(ChannelState::Disconnected);

			let message = match end {
				SessionEnd::Cancelled | SessionEnd::Failed(SyncError::Cancelled) => break,
				SessionEnd::Disconnected => {
					debug!(channel = kind, "Sync session ended");
					"sync session ended".to_string()
				}
				SessionEnd::Failed(e) if !e.is_retryable() => {
					error!(channel = kind, error = %e, "Sync failed with a non-retryable error");
					sink(StorageEvent::Error(SyncFailure::fatal(e.to_string())));
					break;
				}
				SessionEnd::Failed(e) => {
					warn!(channel = kind, error = %e, "Sync session failed");
					e.to_string()
				}
			};

			match backoff.next_delay() {
				Some(delay) => {
					sink(StorageEvent::Error(SyncFailure::transient(message)));
					if !backoff.wait(delay, &cancel).await {
						info!(channel = kind, "Shutdown requested during reconnect wait");
						break;
					}
				}
				None => {
					let attempts = backoff.failures().saturating_sub(1);
					error!(
						channel = kind,
						attempts, "Max reconnection attempts reached, stopping sync"
					);
					sink(StorageEvent::Error(SyncFailure::fatal(format!(
						"gave up after {attempts} reconnect attempts: {message}"
					))));
					break;
				}
			}
		}

		self.set_state(ChannelState::Terminated);
		info!(channel = kind, "Sync driver stopped");
	}

	fn set_state(&self, state: ChannelState) {
		self.state.send_replace(state);
	}
}
