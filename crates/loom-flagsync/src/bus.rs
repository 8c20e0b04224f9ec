// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Fan-out of provider events to subscribers.
//!
//! Publishing never blocks. Each subscriber reads from its own position in a
//! bounded broadcast ring; a subscriber that falls more than the capacity
//! behind loses its oldest undelivered events (counted in
//! [`EventSubscription::dropped`]) while everyone else is unaffected.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use loom_flagsync_core::ProviderEvent;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_EVENT_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct EventBus {
	sender: broadcast::Sender<ProviderEvent>,
	/// Held while stamping and sending so sequence order is delivery order.
	next_sequence: Mutex<u64>,
	published: AtomicU64,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity.max(1));
		Self {
			sender,
			next_sequence: Mutex::new(1),
			published: AtomicU64::new(0),
		}
	}

	/// Stamps the next sequence number and delivers the event to every
	/// current subscriber. Returns the stamped sequence.
	pub fn publish(&self, mut event: ProviderEvent) -> u64 {
		let mut next = self.next_sequence.lock();
		event.sequence = *next;
		*next += 1;

		let kind = event.kind;
		let sequence = event.sequence;
		match self.sender.send(event) {
			Ok(receivers) => {
				debug!(event = %kind, sequence, receivers, "Published provider event");
			}
			Err(_) => {
				debug!(event = %kind, sequence, "No subscribers for provider event");
			}
		}
		self.published.fetch_add(1, Ordering::Relaxed);
		sequence
	}

	pub fn subscribe(&self) -> EventSubscription {
		EventSubscription {
			receiver: self.sender.subscribe(),
			dropped: 0,
		}
	}

	/// Runs `handler` for every event on a dedicated task until the returned
	/// handle is dropped or the bus goes away.
	pub fn subscribe_handler<F, Fut>(&self, mut handler: F) -> SubscriptionHandle
	where
		F: FnMut(ProviderEvent) -> Fut + Send + 'static,
		Fut: Future<Output = ()> + Send + 'static,
	{
		let mut subscription = self.subscribe();
		let task = tokio::spawn(async move {
			while let Some(event) = subscription.recv().await {
				handler(event).await;
			}
		});
		SubscriptionHandle { task: Some(task) }
	}

	pub fn subscriber_count(&self) -> usize {
		self.sender.receiver_count()
	}

	/// Total events published so far.
	pub fn published(&self) -> u64 {
		self.published.load(Ordering::Relaxed)
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(DEFAULT_EVENT_CAPACITY)
	}
}

/// A subscriber's view of the event stream. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventSubscription {
	receiver: broadcast::Receiver<ProviderEvent>,
	dropped: u64,
}

impl EventSubscription {
	/// Waits for the next event. Returns `None` once the bus is gone.
	pub async fn recv(&mut self) -> Option<ProviderEvent> {
		loop {
			match self.receiver.recv().await {
				Ok(event) => return Some(event),
				Err(RecvError::Lagged(missed)) => self.record_lag(missed),
				Err(RecvError::Closed) => return None,
			}
		}
	}

	/// Returns the next buffered event without waiting.
	pub fn try_recv(&mut self) -> Option<ProviderEvent> {
		loop {
			match self.receiver.try_recv() {
				Ok(event) => return Some(event),
				Err(TryRecvError::Lagged(missed)) => self.record_lag(missed),
				Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
			}
		}
	}

	/// Events this subscriber missed because it fell behind.
	pub fn dropped(&self) -> u64 {
		self.dropped
	}

	fn record_lag(&mut self, missed: u64) {
		self.dropped += missed;
		warn!(
			missed,
			total_dropped = self.dropped,
			"Slow event subscriber dropped events"
		);
	}
}

/// Owns a handler task started by [`EventBus::subscribe_handler`].
#[derive(Debug)]
pub struct SubscriptionHandle {
	task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
	pub fn unsubscribe(mut self) {
		self.abort();
	}

	pub fn is_active(&self) -> bool {
		self.task.as_ref().is_some_and(|t| !t.is_finished())
	}

	fn abort(&mut self) {
		if let Some(task) = self.task.take() {
			task.abort();
		}
	}
}

impl Drop for SubscriptionHandle {
	fn drop(&mut self) {
		self.abort();
	}
}
