// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded cache of resolution results.
//!
//! Entries are keyed by (flag key, requested kind, context fingerprint) and
//! tagged with the snapshot generation they were computed against. The cache
//! tracks a current generation; swapping snapshots bumps it and drops every
//! entry. Puts and gets for any other generation are ignored, so a resolution
//! that raced a snapshot swap can never be served from the new generation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use loom_flagsync_core::{FlagMetadata, FlagValue, Reason, ValueKind};
use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

const MAX_SHARDS: usize = 16;
const MIN_ENTRIES_PER_SHARD: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
	flag_key: String,
	kind: ValueKind,
	fingerprint: String,
}

/// A cached successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResolution {
	pub generation: u64,
	pub value: FlagValue,
	pub variant: String,
	pub reason: Reason,
	pub flag_metadata: FlagMetadata,
}

/// Hit and miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
	pub hits: u64,
	pub misses: u64,
}

#[derive(Debug)]
pub struct ResolutionCache {
	shards: Vec<Mutex<LruCache<CacheKey, CachedResolution>>>,
	capacity: usize,
	generation: AtomicU64,
	hits: AtomicU64,
	misses: AtomicU64,
}

impl ResolutionCache {
	/// Creates a cache holding at most `capacity` entries. Zero disables it.
	///
	/// Small caches use a single shard so eviction is exact LRU.
	pub fn new(capacity: usize) -> Self {
		let shard_count = (capacity / MIN_ENTRIES_PER_SHARD).clamp(1, MAX_SHARDS);
		let shards = if capacity == 0 {
			Vec::new()
		} else {
			(0..shard_count)
				.filter_map(|i| {
					let share = capacity / shard_count + usize::from(i < capacity % shard_count);
					NonZeroUsize::new(share).map(|n| {
						// Grows on demand instead of reserving `n` slots up front.
						let mut lru = LruCache::unbounded();
						lru.resize(n);
						Mutex::new(lru)
					})
				})
				.collect()
		};

		Self {
			shards,
			capacity,
			generation: AtomicU64::new(0),
			hits: AtomicU64::new(0),
			misses: AtomicU64::new(0),
		}
	}

	pub fn disabled() -> Self {
		Self::new(0)
	}

	pub fn is_enabled(&self) -> bool {
		!self.shards.is_empty()
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn generation(&self) -> u64 {
		self.generation.load(Ordering::Acquire)
	}

	pub fn len(&self) -> usize {
		self.shards.iter().map(|s| s.lock().len()).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn stats(&self) -> CacheStats {
		CacheStats {
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
		}
	}

	fn shard(&self, key: &CacheKey) -> Option<&Mutex<LruCache<CacheKey, CachedResolution>>> {
		if self.shards.is_empty() {
			return None;
		}
		let mut hasher = DefaultHasher::new();
		key.hash(&mut hasher);
		let index = (hasher.finish() as usize) % self.shards.len();
		self.shards.get(index)
	}

	/// Returns the cached resolution computed against `generation`.
	pub fn try_get(
		&self,
		flag_key: &str,
		kind: ValueKind,
		fingerprint: &str,
		generation: u64,
	) -> Option<CachedResolution> {
		let key = CacheKey {
			flag_key: flag_key.to_string(),
			kind,
			fingerprint: fingerprint.to_string(),
		};
		let found = self.shard(&key).and_then(|shard| {
			let mut shard = shard.lock();
			if generation != self.generation() {
				return None;
			}
			shard
				.get(&key)
				.filter(|entry| entry.generation == generation)
				.cloned()
		});

		if found.is_some() {
			self.hits.fetch_add(1, Ordering::Relaxed);
		} else {
			self.misses.fetch_add(1, Ordering::Relaxed);
		}
		found
	}

	/// Stores a resolution. Discarded unless `entry.generation` is current.
	pub fn put(&self, flag_key: &str, kind: ValueKind, fingerprint: &str, entry: CachedResolution) {
		let key = CacheKey {
			flag_key: flag_key.to_string(),
			kind,
			fingerprint: fingerprint.to_string(),
		};
		let Some(shard) = self.shard(&key) else {
			return;
		};
		let mut shard = shard.lock();
		if entry.generation != self.generation() {
			trace!(
				flag_key,
				entry_generation = entry.generation,
				"Discarding resolution from an older generation"
			);
			return;
		}
		shard.put(key, entry);
	}

	/// Drops every entry and moves the cache to `new_generation`.
	pub fn invalidate_all(&self, new_generation: u64) {
		self.generation.store(new_generation, Ordering::Release);
		for shard in &self.shards {
			shard.lock().clear();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(generation: u64) -> CachedResolution {
		CachedResolution {
			generation,
			value: FlagValue::Bool(true),
			variant: "on".to_string(),
			reason: Reason::Static,
			flag_metadata: FlagMetadata::new(),
		}
	}

	#[test]
	fn test_put_and_get() {
		let cache = ResolutionCache::new(10);
		cache.invalidate_all(1);
		cache.put("a", ValueKind::Boolean, "fp", entry(1));

		assert_eq!(cache.try_get("a", ValueKind::Boolean, "fp", 1), Some(entry(1)));
		assert!(cache.try_get("a", ValueKind::String, "fp", 1).is_none());
		assert!(cache.try_get("a", ValueKind::Boolean, "other", 1).is_none());
		assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 2 });
	}

	#[test]
	fn test_invalidate_drops_entries() {
		let cache = ResolutionCache::new(10);
		cache.invalidate_all(1);
		cache.put("a", ValueKind::Boolean, "fp", entry(1));
		cache.invalidate_all(2);

		assert!(cache.is_empty());
		assert!(cache.try_get("a", ValueKind::Boolean, "fp", 1).is_none());
		assert!(cache.try_get("a", ValueKind::Boolean, "fp", 2).is_none());
	}

	#[test]
	fn test_stale_generation_put_is_discarded() {
		let cache = ResolutionCache::new(10);
		cache.invalidate_all(2);
		cache.put("a", ValueKind::Boolean, "fp", entry(1));
		assert!(cache.is_empty());
	}

	#[test]
	fn test_lru_eviction() {
		let cache = ResolutionCache::new(2);
		cache.invalidate_all(1);
		cache.put("a", ValueKind::Boolean, "fp", entry(1));
		cache.put("b", ValueKind::Boolean, "fp", entry(1));
		// touch a so b is least recently used
		assert!(cache.try_get("a", ValueKind::Boolean, "fp", 1).is_some());
		cache.put("c", ValueKind::Boolean, "fp", entry(1));

		assert_eq!(cache.len(), 2);
		assert!(cache.try_get("b", ValueKind::Boolean, "fp", 1).is_none());
		assert!(cache.try_get("a", ValueKind::Boolean, "fp", 1).is_some());
	}

	#[test]
	fn test_disabled_cache_always_misses() {
		let cache = ResolutionCache::disabled();
		assert!(!cache.is_enabled());
		cache.put("a", ValueKind::Boolean, "fp", entry(0));
		assert!(cache.try_get("a", ValueKind::Boolean, "fp", 0).is_none());
		assert_eq!(cache.len(), 0);
	}

	#[test]
	fn test_large_cache_is_sharded() {
		let cache = ResolutionCache::new(10_000);
		assert_eq!(cache.shards.len(), MAX_SHARDS);
		let small = ResolutionCache::new(63);
		assert_eq!(small.shards.len(), 1);
	}

	#[test]
	fn test_huge_capacity_does_not_preallocate() {
		let cache = ResolutionCache::new(usize::MAX / 64);
		assert_eq!(cache.shards.len(), MAX_SHARDS);
		cache.invalidate_all(1);
		cache.put("a", ValueKind::Boolean, "fp", entry(1));
		assert_eq!(cache.len(), 1);
		assert!(cache.try_get("a", ValueKind::Boolean, "fp", 1).is_some());
	}
}
