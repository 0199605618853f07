// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Local in-memory cache of resolved feature statuses.
//!
//! The cache is a reader/writer mapping from [`FeatureKey`] to the last known
//! [`EncodedFeatureStatus`]. Reads share the lock; every write, including a
//! whole batch, holds the exclusive lock for its full duration so readers
//! never observe a partially applied batch.
//!
//! Each entry remembers the write sequence it was stored under. Writers that
//! reserved a sequence before their network round trip use
//! [`FeatureCache::put_all_sequenced`], which refuses to overwrite an entry
//! stored under a newer sequence.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use loom_causal_core::{EncodedFeatureStatus, FeatureCacheItem, FeatureKey};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug)]
struct CacheEntry {
	status: EncodedFeatureStatus,
	sequence: u64,
}

#[derive(Debug, Default)]
struct CacheShared {
	entries: RwLock<HashMap<FeatureKey, CacheEntry>>,
	next_sequence: AtomicU64,
}

/// Thread-safe feature cache. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct FeatureCache {
	shared: Arc<CacheShared>,
}

impl FeatureCache {
	pub fn new() -> Self {
		Self::default()
	}

	/// Hands out a write sequence. Later reservations always compare greater.
	pub fn reserve_sequence(&self) -> u64 {
		self.shared.next_sequence.fetch_add(1, Ordering::SeqCst) + 1
	}

	pub async fn is_empty(&self) -> bool {
		self.shared.entries.read().await.is_empty()
	}

	pub async fn size(&self) -> usize {
		self.shared.entries.read().await.len()
	}

	pub async fn contains(&self, key: &FeatureKey) -> bool {
		self.shared.entries.read().await.contains_key(key)
	}

	pub async fn get(&self, key: &FeatureKey) -> Option<FeatureCacheItem> {
		self.shared
			.entries
			.read()
			.await
			.get(key)
			.map(|entry| FeatureCacheItem::new(key.clone(), entry.status.clone()))
	}

	/// Returns one item per requested key, in request order, or nothing at
	/// all if any key is missing.
	pub async fn get_all(&self, keys: &[FeatureKey]) -> Vec<FeatureCacheItem> {
		let entries = self.shared.entries.read().await;
		let mut items = Vec::with_capacity(keys.len());
		for key in keys {
			match entries.get(key) {
				Some(entry) => items.push(FeatureCacheItem::new(key.clone(), entry.status.clone())),
				None => return Vec::new(),
			}
		}
		items
	}

	pub async fn put(&self, item: FeatureCacheItem) {
		self.put_all(vec![item]).await;
	}

	/// Stores a batch. A key repeated within the batch keeps its last item.
	pub async fn put_all(&self, items: Vec<FeatureCacheItem>) {
		let sequence = self.reserve_sequence();
		self.put_all_sequenced(items, sequence).await;
	}

	/// Stores a batch under `sequence`, skipping keys already written under a
	/// newer sequence. Returns how many entries were written.
	pub async fn put_all_sequenced(&self, items: Vec<FeatureCacheItem>, sequence: u64) -> usize {
		let mut entries = self.shared.entries.write().await;
		let mut written = 0;
		for item in items {
			if let Some(existing) = entries.get(&item.key) {
				if existing.sequence > sequence {
					debug!(
						feature = %item.key,
						stored = existing.sequence,
						incoming = sequence,
						"Skipping stale cache write"
					);
					continue;
				}
			}
			entries.insert(
				item.key,
				CacheEntry {
					status: item.status,
					sequence,
				},
			);
			written += 1;
		}
		written
	}

	/// Removes everything and returns the removed keys.
	pub async fn evict_all(&self) -> Vec<FeatureKey> {
		let mut entries = self.shared.entries.write().await;
		entries.drain().map(|(key, _)| key).collect()
	}

	/// Removes every entry whose feature name is in `names` (exact match).
	pub async fn evict_named(&self, names: &HashSet<String>) -> Vec<FeatureKey> {
		let mut entries = self.shared.entries.write().await;
		let doomed: Vec<FeatureKey> = entries
			.keys()
			.filter(|key| names.contains(key.name()))
			.cloned()
			.collect();
		for key in &doomed {
			entries.remove(key);
		}
		doomed
	}
}
