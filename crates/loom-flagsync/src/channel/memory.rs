// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process sync channel fed by the application.
//!
//! Useful for offline bootstrap, embedding flag documents shipped with the
//! binary, and for driving the resolver deterministically in tests. Messages
//! pushed while no session is open are buffered and delivered by the next one.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use loom_flagsync_core::{SyncMetadata, SyncPayload};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{SyncChannel, SyncMessage, SyncSession};
use crate::error::SyncError;

#[derive(Debug)]
enum Command {
	Message(SyncMessage),
	Disconnect,
	Fail(String),
}

#[derive(Debug)]
struct Shared {
	receiver: Arc<Mutex<mpsc::UnboundedReceiver<Command>>>,
	failing_opens: AtomicU32,
	unavailable: AtomicBool,
	opens: AtomicU32,
}

#[derive(Debug, Clone)]
pub struct MemorySyncChannel {
	shared: Arc<Shared>,
}

/// Application side of a [`MemorySyncChannel`].
#[derive(Debug, Clone)]
pub struct MemorySyncHandle {
	sender: mpsc::UnboundedSender<Command>,
	shared: Arc<Shared>,
}

impl MemorySyncChannel {
	pub fn new() -> (Self, MemorySyncHandle) {
		let (sender, receiver) = mpsc::unbounded_channel();
		let shared = Arc::new(Shared {
			receiver: Arc::new(Mutex::new(receiver)),
			failing_opens: AtomicU32::new(0),
			unavailable: AtomicBool::new(false),
			opens: AtomicU32::new(0),
		});
		let handle = MemorySyncHandle {
			sender,
			shared: Arc::clone(&shared),
		};
		(Self { shared }, handle)
	}

	/// A channel preloaded with one full configuration.
	pub fn with_configuration(raw: impl Into<String>) -> (Self, MemorySyncHandle) {
		let (channel, handle) = Self::new();
		handle.push_full(raw);
		(channel, handle)
	}
}

fn metadata() -> SyncMetadata {
	SyncMetadata::new().with("source", "memory")
}

impl MemorySyncHandle {
	/// Queues a complete flag document.
	pub fn push_full(&self, raw: impl Into<String>) {
		self.push(SyncPayload::full(raw).with_metadata(metadata()));
	}

	/// Queues a delta (upserts plus `removed`) on top of the current set.
	pub fn push_delta(&self, raw: impl Into<String>) {
		self.push(SyncPayload::delta(raw).with_metadata(metadata()));
	}

	pub fn push(&self, payload: SyncPayload) {
		self.send(Command::Message(SyncMessage::Configuration(payload)));
	}

	pub fn mark_stale(&self, reason: impl Into<String>) {
		self.send(Command::Message(SyncMessage::Degraded(reason.into())));
	}

	pub fn heartbeat(&self) {
		self.send(Command::Message(SyncMessage::Heartbeat));
	}

	/// Ends the current session cleanly.
	pub fn disconnect(&self) {
		self.send(Command::Disconnect);
	}

	/// Ends the current session with a stream error.
	pub fn fail_session(&self, message: impl Into<String>) {
		self.send(Command::Fail(message.into()));
	}

	/// Makes the next `count` calls to `open` fail.
	pub fn fail_next_opens(&self, count: u32) {
		self.shared.failing_opens.store(count, Ordering::SeqCst);
	}

	/// While set, every call to `open` fails.
	pub fn set_unavailable(&self, unavailable: bool) {
		self.shared.unavailable.store(unavailable, Ordering::SeqCst);
	}

	/// Number of times `open` has been called.
	pub fn open_count(&self) -> u32 {
		self.shared.opens.load(Ordering::SeqCst)
	}

	fn send(&self, command: Command) {
		// The receiver lives as long as the shared state this handle holds.
		let _ = self.sender.send(command);
	}
}

#[async_trait]
impl SyncChannel for MemorySyncChannel {
	fn kind(&self) -> &'static str {
		"memory"
	}

	async fn open(&self, cancel: &CancellationToken) -> Result<SyncSession, SyncError> {
		let attempt = self.shared.opens.fetch_add(1, Ordering::SeqCst) + 1;
		if cancel.is_cancelled() {
			return Err(SyncError::Cancelled);
		}
		if self.shared.unavailable.load(Ordering::SeqCst) {
			return Err(SyncError::Unavailable("memory source marked unavailable".to_string()));
		}
		let injected = self
			.shared
			.failing_opens
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if injected {
			return Err(SyncError::Unavailable(format!("open {attempt} rejected")));
		}

		let receiver = Arc::clone(&self.shared.receiver);
		let mut receiver = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(SyncError::Cancelled),
			guard = receiver.lock_owned() => guard,
		};
		debug!(attempt, "Memory sync session opened");

		let session = async_stream::stream! {
			while let Some(command) = receiver.recv().await {
				match command {
					Command::Message(message) => yield Ok(message),
					Command::Disconnect => break,
					Command::Fail(message) => {
						yield Err(SyncError::Stream(message));
						break;
					}
				}
			}
		};
		Ok(Box::pin(session))
	}
}
