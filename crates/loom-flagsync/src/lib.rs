// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process flag resolution for Loom.
//!
//! Flag configuration is synchronized from a flag source in the background and
//! evaluated locally, so resolving a flag never touches the network.
//!
//! # Features
//!
//! - **Live sync**: server-sent events, HTTP polling with `ETag`s, a watched
//!   local file, or an in-memory source fed by the application
//! - **Atomic snapshots**: readers always see one complete configuration
//! - **Resolution cache**: bounded LRU keyed by flag, type and context
//!   fingerprint, invalidated on every configuration change
//! - **Bounded reconnects**: exponential backoff, then a terminal fatal state
//! - **Provider events**: `PROVIDER_READY`, `PROVIDER_CONFIGURATION_CHANGED`,
//!   `PROVIDER_STALE` and `PROVIDER_ERROR` delivered to subscribers
//!
//! # Example
//!
//! ```ignore
//! use loom_flagsync::{load_config, EvaluationContext, InProcessProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config(Some("flagd.toml".as_ref()))?;
//!     let provider = InProcessProvider::from_config(&config)?;
//!     provider.initialize(&EvaluationContext::new()).await?;
//!
//!     let context = EvaluationContext::new()
//!         .with_targeting_key("user-123")
//!         .with_attribute("plan", serde_json::json!("enterprise"));
//!     let details = provider.resolve_boolean_value("new-checkout", false, &context);
//!     println!("{} ({})", details.value, details.reason);
//!
//!     provider.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod bus;
pub mod cache;
pub mod channel;
pub mod config;
mod driver;
mod error;
mod provider;
mod resolver;
pub mod store;

pub use backoff::{BackoffLoop, RetryPolicy};
pub use bus::{EventBus, EventSubscription, SubscriptionHandle};
pub use cache::{CacheStats, CachedResolution, ResolutionCache};
pub use channel::{
	ChannelState, FileSyncChannel, MemorySyncChannel, MemorySyncHandle, PollingSyncChannel,
	SseSyncChannel, SyncChannel, SyncMessage, SyncSession,
};
pub use config::{load_config, ConfigError, ResolverConfig};
pub use driver::SyncDriver;
pub use error::{ResolverError, Result, SyncError};
pub use provider::{InProcessProvider, ProviderMetadata, ProviderStatus, PROVIDER_NAME};
pub use resolver::{Resolver, ResolverBuilder, ResolverState};
pub use store::FlagStore;

// Re-export core types for convenience
pub use loom_flagsync_core::{
	ErrorType, EvaluationContext, FlagConfigSnapshot, FlagDefinition, FlagType, FlagValue,
	ProviderEvent, ProviderEventKind, Reason, ResolutionDetails, ResolutionError, StorageEvent,
	StructValue, SyncMetadata, SyncPayload, TargetingEvaluator,
};
