// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The in-process resolver.
//!
//! One supervised writer task runs the [`SyncDriver`] and is the only code
//! that replaces the flag snapshot or publishes events. Resolve calls are
//! synchronous: they read the current snapshot and the resolution cache and
//! never wait on the network.

use std::sync::Arc;
use std::time::Duration;

use loom_flagsync_core::{
	diff_flag_keys, evaluate_flag, ErrorType, Evaluation, EvaluationContext, FlagConfigSnapshot,
	FlagDelta, FlagSet, FlagType, PayloadContent, ProviderEvent, Reason, ResolutionDetails,
	RuleEvaluator, StorageEvent, StructValue, SyncFailure, SyncMetadata, SyncPayload,
	TargetingEvaluator,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::backoff::RetryPolicy;
use crate::bus::{EventBus, EventSubscription, SubscriptionHandle, DEFAULT_EVENT_CAPACITY};
use crate::cache::{CacheStats, CachedResolution, ResolutionCache};
use crate::channel::{self, ChannelState, SyncChannel};
use crate::config::{ConfigError, ResolverConfig};
use crate::driver::SyncDriver;
use crate::error::{ResolverError, Result};
use crate::store::FlagStore;

const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Lifecycle state of a [`Resolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverState {
	NotReady,
	Initializing,
	Ready,
	/// Serving the last known configuration while the source is unhealthy.
	Stale,
	/// Sync gave up. Terminal.
	FatalError,
}

impl ResolverState {
	fn is_settled(self) -> bool {
		matches!(
			self,
			ResolverState::Ready | ResolverState::Stale | ResolverState::FatalError
		)
	}
}

/// State shared between the resolver handle and its writer task.
struct Inner {
	store: FlagStore,
	cache: ResolutionCache,
	bus: EventBus,
	state: watch::Sender<ResolverState>,
	evaluator: Arc<dyn TargetingEvaluator>,
	fatal: Mutex<Option<String>>,
}

impl Inner {
	fn state(&self) -> ResolverState {
		*self.state.borrow()
	}

	fn handle(&self, event: StorageEvent) {
		match event {
			StorageEvent::Ready(payload) | StorageEvent::Changed(payload) => {
				self.apply_payload(payload)
			}
			StorageEvent::Stale(reason) => self.mark_stale(reason),
			StorageEvent::Error(failure) => self.handle_failure(failure),
		}
	}

	/// Parses and publishes a configuration. A payload that fails to parse is
	/// reported and dropped; the previous snapshot keeps serving.
	fn apply_payload(&self, payload: SyncPayload) {
		let current = self.store.snapshot();
		let parsed = match &payload.content {
			PayloadContent::Full(raw) => FlagSet::parse(raw),
			PayloadContent::Delta(raw) => {
				FlagDelta::parse(raw).map(|delta| delta.apply_to(current.as_deref()))
			}
		};
		let set = match parsed {
			Ok(set) => set,
			Err(e) => {
				warn!(
					error = %e,
					version = payload.version.as_deref().unwrap_or("-"),
					"Rejected flag configuration"
				);
				self.bus.publish(ProviderEvent::error(
					ErrorType::ParseError,
					format!("invalid flag configuration: {e}"),
					false,
				));
				return;
			}
		};

		let sync_metadata = payload.metadata.clone();
		let snapshot = FlagConfigSnapshot::new(set, payload.version, payload.metadata);
		let changed = diff_flag_keys(current.as_deref(), &snapshot);

		// Readers still holding the old snapshot evaluate against the old
		// generation, so their cache writes are discarded.
		self.cache.invalidate_all(self.store.next_generation());
		let snapshot = self.store.replace(snapshot);
		let previous = self.state.send_replace(ResolverState::Ready);

		info!(
			generation = snapshot.generation(),
			flags = snapshot.len(),
			changed = changed.len(),
			"Flag configuration applied"
		);

		if current.is_none() {
			self.bus.publish(ProviderEvent::ready(changed, sync_metadata));
			return;
		}
		if previous != ResolverState::Ready {
			self.bus.publish(ProviderEvent::ready(Vec::new(), sync_metadata.clone()));
		}
		if !changed.is_empty() {
			self.bus.publish(ProviderEvent::configuration_changed(changed, sync_metadata));
		}
	}

	fn mark_stale(&self, reason: String) {
		let moved = self.state.send_if_modified(|state| {
			if *state == ResolverState::Ready {
				*state = ResolverState::Stale;
				true
			} else {
				false
			}
		});
		if moved {
			warn!(reason = %reason, "Serving stale flag configuration");
			self.bus.publish(ProviderEvent::stale(reason));
		}
	}

	fn handle_failure(&self, failure: SyncFailure) {
		if failure.fatal {
			error!(error = %failure.message, "Flag sync stopped");
			*self.fatal.lock() = Some(failure.message.clone());
			self.state.send_replace(ResolverState::FatalError);
			self.bus.publish(ProviderEvent::error(ErrorType::General, failure.message, true));
			return;
		}
		debug!(error = %failure.message, "Transient sync failure");
		self.mark_stale(failure.message);
	}

	fn resolve<T: FlagType>(
		&self,
		flag_key: &str,
		default: T,
		context: &EvaluationContext,
	) -> ResolutionDetails<T> {
		let Some(snapshot) = self.store.snapshot() else {
			return match self.state() {
				ResolverState::FatalError => {
					let message = self
						.fatal
						.lock()
						.clone()
						.unwrap_or_else(|| "flag sync failed".to_string());
					ResolutionDetails::error(default, ErrorType::General, message)
				}
				_ => ResolutionDetails::error(
					default,
					ErrorType::ProviderNotReady,
					"provider is not ready",
				),
			};
		};

		let generation = snapshot.generation();
		let fingerprint = self.cache.is_enabled().then(|| context.fingerprint());
		if let Some(fingerprint) = &fingerprint {
			if let Some(hit) = self.cache.try_get(flag_key, T::KIND, fingerprint, generation) {
				if let Some(value) = T::from_flag_value(&hit.value) {
					return ResolutionDetails {
						value,
						variant: Some(hit.variant),
						reason: hit.reason,
						error: None,
						flag_metadata: hit.flag_metadata,
					};
				}
			}
		}

		let Some(flag) = snapshot.get(flag_key) else {
			return ResolutionDetails::error(
				default,
				ErrorType::FlagNotFound,
				format!("flag '{flag_key}' not found"),
			);
		};

		let evaluated = match evaluate_flag(
			flag,
			T::KIND,
			context,
			self.evaluator.as_ref(),
			snapshot.metadata(),
		) {
			Ok(Evaluation::Value(evaluated)) => evaluated,
			Ok(Evaluation::Disabled(flag_metadata)) => {
				return ResolutionDetails {
					value: default,
					variant: None,
					reason: Reason::Disabled,
					error: None,
					flag_metadata,
				};
			}
			Err(e) => {
				debug!(flag_key, error = %e, "Flag evaluation failed");
				return ResolutionDetails::from_error(default, e);
			}
		};

		let Some(value) = T::from_flag_value(&evaluated.value) else {
			return ResolutionDetails::error(
				default,
				ErrorType::TypeMismatch,
				format!("flag '{flag_key}' is not a {}", T::KIND),
			);
		};

		if let Some(fingerprint) = &fingerprint {
			self.cache.put(
				flag_key,
				T::KIND,
				fingerprint,
				CachedResolution {
					generation,
					value: evaluated.value,
					variant: evaluated.variant.clone(),
					reason: evaluated.reason,
					flag_metadata: evaluated.flag_metadata.clone(),
				},
			);
		}

		ResolutionDetails {
			value,
			variant: Some(evaluated.variant),
			reason: evaluated.reason,
			error: None,
			flag_metadata: evaluated.flag_metadata,
		}
	}
}

enum Lifecycle {
	Idle,
	Running {
		cancel: CancellationToken,
		handle: JoinHandle<()>,
	},
	Stopped,
}

/// Builder for constructing a [`Resolver`].
pub struct ResolverBuilder {
	channel: Arc<dyn SyncChannel>,
	policy: RetryPolicy,
	cache_capacity: usize,
	event_capacity: usize,
	init_timeout: Duration,
	evaluator: Arc<dyn TargetingEvaluator>,
}

impl ResolverBuilder {
	pub fn new(channel: Arc<dyn SyncChannel>) -> Self {
		Self {
			channel,
			policy: RetryPolicy::default(),
			cache_capacity: DEFAULT_CACHE_CAPACITY,
			event_capacity: DEFAULT_EVENT_CAPACITY,
			init_timeout: DEFAULT_INIT_TIMEOUT,
			evaluator: Arc::new(RuleEvaluator),
		}
	}

	pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.policy = policy;
		self
	}

	/// Sets the resolution cache size. Zero disables caching.
	pub fn cache_capacity(mut self, capacity: usize) -> Self {
		self.cache_capacity = capacity;
		self
	}

	pub fn event_capacity(mut self, capacity: usize) -> Self {
		self.event_capacity = capacity;
		self
	}

	/// Sets how long [`Resolver::init`] waits for the first configuration.
	pub fn init_timeout(mut self, timeout: Duration) -> Self {
		self.init_timeout = timeout;
		self
	}

	/// Replaces the built-in [`RuleEvaluator`].
	pub fn evaluator(mut self, evaluator: Arc<dyn TargetingEvaluator>) -> Self {
		self.evaluator = evaluator;
		self
	}

	pub fn build(self) -> Resolver {
		let (state, _) = watch::channel(ResolverState::NotReady);
		Resolver {
			inner: Arc::new(Inner {
				store: FlagStore::new(),
				cache: ResolutionCache::new(self.cache_capacity),
				bus: EventBus::new(self.event_capacity),
				state,
				evaluator: self.evaluator,
				fatal: Mutex::new(None),
			}),
			driver: Arc::new(SyncDriver::new(self.channel, self.policy)),
			init_timeout: self.init_timeout,
			lifecycle: tokio::sync::Mutex::new(Lifecycle::Idle),
		}
	}
}

/// Evaluates flags locally against configuration streamed from a sync channel.
pub struct Resolver {
	inner: Arc<Inner>,
	driver: Arc<SyncDriver>,
	init_timeout: Duration,
	lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl std::fmt::Debug for Resolver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Resolver")
			.field("state", &self.state())
			.field("generation", &self.inner.store.generation())
			.field("driver", &self.driver)
			.finish()
	}
}

impl Resolver {
	pub fn builder(channel: Arc<dyn SyncChannel>) -> ResolverBuilder {
		ResolverBuilder::new(channel)
	}

	/// Builds a resolver and its sync channel from finalized configuration.
	pub fn from_config(config: &ResolverConfig) -> std::result::Result<Self, ConfigError> {
		let channel = channel::from_config(config)?;
		Ok(Self::builder(channel)
			.retry_policy(RetryPolicy::from_config(config))
			.cache_capacity(config.cache_capacity())
			.init_timeout(config.deadline)
			.build())
	}

	/// Starts sync and waits for the first configuration, using the
	/// configured init timeout.
	pub async fn init(&self) -> Result<()> {
		self.init_with_timeout(self.init_timeout).await
	}

	/// Starts sync and waits up to `timeout` for the first configuration.
	///
	/// On timeout sync keeps running in the background and the resolver
	/// becomes ready whenever data arrives. Calling this again while running
	/// waits for the same outcome without starting a second writer.
	#[instrument(skip(self), fields(timeout_ms = timeout.as_millis() as u64))]
	pub async fn init_with_timeout(&self, timeout: Duration) -> Result<()> {
		{
			let mut lifecycle = self.lifecycle.lock().await;
			match &*lifecycle {
				Lifecycle::Stopped => return Err(ResolverError::Shutdown),
				Lifecycle::Running { .. } => {}
				Lifecycle::Idle => {
					self.inner.state.send_replace(ResolverState::Initializing);
					let cancel = CancellationToken::new();
					let handle = self.spawn_writer(cancel.clone());
					*lifecycle = Lifecycle::Running { cancel, handle };
					info!("Resolver initializing");
				}
			}
		}

		let mut state = self.inner.state.subscribe();
		let outcome = tokio::time::timeout(timeout, async {
			state
				.wait_for(|s| s.is_settled() || *s == ResolverState::NotReady)
				.await
				.map(|s| *s)
		})
		.await;

		match outcome {
			Ok(Ok(ResolverState::Ready | ResolverState::Stale)) => {
				info!(generation = self.inner.store.generation(), "Resolver ready");
				Ok(())
			}
			Ok(Ok(ResolverState::FatalError)) => Err(ResolverError::Fatal(
				self.inner
					.fatal
					.lock()
					.clone()
					.unwrap_or_else(|| "flag sync failed".to_string()),
			)),
			Ok(Ok(_)) | Ok(Err(_)) => Err(ResolverError::Shutdown),
			Err(_) => {
				warn!(
					timeout_ms = timeout.as_millis() as u64,
					"No flag configuration before init deadline, continuing in background"
				);
				Err(ResolverError::InitTimeout(timeout))
			}
		}
	}

	fn spawn_writer(&self, cancel: CancellationToken) -> JoinHandle<()> {
		let inner = Arc::clone(&self.inner);
		let driver = Arc::clone(&self.driver);
		tokio::spawn(async move {
			driver.run(cancel, |event| inner.handle(event)).await;
		})
	}

	/// Stops sync and joins the writer task. Idempotent.
	///
	/// The last snapshot stays in place, so resolve calls keep serving it.
	/// `FatalError` is terminal and survives shutdown.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		let mut lifecycle = self.lifecycle.lock().await;
		if let Lifecycle::Running { cancel, handle } =
			std::mem::replace(&mut *lifecycle, Lifecycle::Stopped)
		{
			cancel.cancel();
			if let Err(e) = handle.await {
				warn!(error = %e, "Flag sync task ended abnormally");
			}
			info!("Resolver shut down");
		}
		self.inner.state.send_if_modified(|state| match state {
			ResolverState::FatalError | ResolverState::NotReady => false,
			_ => {
				*state = ResolverState::NotReady;
				true
			}
		});
	}

	pub fn state(&self) -> ResolverState {
		self.inner.state()
	}

	pub fn watch_state(&self) -> watch::Receiver<ResolverState> {
		self.inner.state.subscribe()
	}

	pub fn channel_state(&self) -> ChannelState {
		self.driver.state()
	}

	pub fn snapshot(&self) -> Option<Arc<FlagConfigSnapshot>> {
		self.inner.store.snapshot()
	}

	/// Sync metadata of the current snapshot.
	pub fn metadata(&self) -> SyncMetadata {
		self.inner
			.store
			.snapshot()
			.map(|s| s.sync_metadata().clone())
			.unwrap_or_default()
	}

	pub fn subscribe(&self) -> EventSubscription {
		self.inner.bus.subscribe()
	}

	pub fn subscribe_handler<F, Fut>(&self, handler: F) -> SubscriptionHandle
	where
		F: FnMut(ProviderEvent) -> Fut + Send + 'static,
		Fut: std::future::Future<Output = ()> + Send + 'static,
	{
		self.inner.bus.subscribe_handler(handler)
	}

	pub fn cache_stats(&self) -> CacheStats {
		self.inner.cache.stats()
	}

	/// Resolves `flag_key` as `T`. Never blocks and never fails: errors are
	/// reported in the returned details alongside `default`.
	pub fn resolve<T: FlagType>(
		&self,
		flag_key: &str,
		default: T,
		context: &EvaluationContext,
	) -> ResolutionDetails<T> {
		self.inner.resolve(flag_key, default, context)
	}

	pub fn resolve_boolean_value(
		&self,
		flag_key: &str,
		default: bool,
		context: &EvaluationContext,
	) -> ResolutionDetails<bool> {
		self.resolve(flag_key, default, context)
	}

	pub fn resolve_string_value(
		&self,
		flag_key: &str,
		default: String,
		context: &EvaluationContext,
	) -> ResolutionDetails<String> {
		self.resolve(flag_key, default, context)
	}

	pub fn resolve_integer_value(
		&self,
		flag_key: &str,
		default: i64,
		context: &EvaluationContext,
	) -> ResolutionDetails<i64> {
		self.resolve(flag_key, default, context)
	}

	pub fn resolve_double_value(
		&self,
		flag_key: &str,
		default: f64,
		context: &EvaluationContext,
	) -> ResolutionDetails<f64> {
		self.resolve(flag_key, default, context)
	}

	pub fn resolve_structure_value(
		&self,
		flag_key: &str,
		default: StructValue,
		context: &EvaluationContext,
	) -> ResolutionDetails<StructValue> {
		self.resolve(flag_key, default, context)
	}
}

impl Drop for Resolver {
	fn drop(&mut self) {
		if let Lifecycle::Running { cancel, .. } = self.lifecycle.get_mut() {
			cancel.cancel();
		}
	}
}
