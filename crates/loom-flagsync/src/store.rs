// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Atomically swapped flag configuration snapshots.
//!
//! Readers take one `Arc` of the current snapshot and evaluate against it
//! without holding any lock. The resolver's writer task is the only caller of
//! [`FlagStore::replace`]; a published snapshot is never mutated.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use loom_flagsync_core::{FlagConfigSnapshot, FlagDefinition};
use tracing::debug;

#[derive(Debug)]
pub struct FlagStore {
	current: ArcSwapOption<FlagConfigSnapshot>,
}

impl FlagStore {
	pub fn new() -> Self {
		Self {
			current: ArcSwapOption::empty(),
		}
	}

	/// Looks up a flag in the current snapshot.
	pub fn get(&self, key: &str) -> Option<Arc<FlagDefinition>> {
		self.current.load().as_ref().and_then(|s| s.get(key).cloned())
	}

	/// Returns the current snapshot, if any configuration has been received.
	pub fn snapshot(&self) -> Option<Arc<FlagConfigSnapshot>> {
		self.current.load_full()
	}

	pub fn has_snapshot(&self) -> bool {
		self.current.load().is_some()
	}

	/// Generation of the current snapshot, or 0 before the first one.
	pub fn generation(&self) -> u64 {
		self.current.load().as_ref().map_or(0, |s| s.generation())
	}

	/// The generation the next [`replace`](Self::replace) will assign.
	pub fn next_generation(&self) -> u64 {
		self.generation() + 1
	}

	/// Publishes a new snapshot under the next generation.
	pub fn replace(&self, snapshot: FlagConfigSnapshot) -> Arc<FlagConfigSnapshot> {
		let snapshot = Arc::new(snapshot.with_generation(self.next_generation()));
		self.current.store(Some(Arc::clone(&snapshot)));
		debug!(
			generation = snapshot.generation(),
			flags = snapshot.len(),
			version = snapshot.version().unwrap_or("-"),
			"Flag snapshot replaced"
		);
		snapshot
	}
}

impl Default for FlagStore {
	fn default() -> Self {
		Self::new()
	}
}
