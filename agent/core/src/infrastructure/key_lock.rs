// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Sharded Key Locks
//!
//! Serializes work on the same aggregate key (external exchange id, connection id) while
//! letting unrelated keys proceed in parallel. Keys hash onto a fixed set of async
//! mutexes, so two different keys may occasionally share a shard; that only costs
//! throughput, never correctness.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Per-aggregate mutual exclusion for the reconcilers

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::{Mutex, MutexGuard};

const DEFAULT_SHARDS: usize = 64;

pub struct KeyedLocks {
    shards: Vec<Mutex<()>>,
}

impl KeyedLocks {
    pub fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards: (0..shards).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Held for the duration of one reconciliation step on `key`.
    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.shards[self.shard_of(key)].lock().await
    }

    fn shard_of(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }
}

impl Default for KeyedLocks {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}
