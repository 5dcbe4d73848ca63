// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Sharded index façade.
//!
//! `N` shards behave like one index: every operation routes through
//! `key % n_shards`. The builder side wraps each [`ShardBuilder`] in its own
//! mutex — the lock and the state it protects are one allocation, so holding
//! a shard's lock *is* owning its builder. Locks are only ever held for one
//! shard's mutation at a time, never across inter-shard I/O.
//!
//! The reader side is a separate handle type. The pipeline guarantees
//! readers never run concurrently with a merge of the same shard, so
//! readers take no locks at all.

use std::collections::HashSet;
use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;
use rayon::prelude::*;

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::record::IndexRecord;
use crate::shard::{self, ShardBuilder, ShardReader};

/// Anything the background merger can scan. Object-safe so one merger
/// thread can watch builders of different record types.
pub trait MergeScan: Send + Sync {
    /// Merge every shard whose spill exceeds `threshold` bytes.
    fn merge_over_threshold(&self, threshold: u64);

    /// Acquire and release every shard lock once, so any in-flight
    /// mutation has finished when this returns.
    fn quiesce(&self);
}

// ============================================================================
// BUILDER SIDE
// ============================================================================

pub struct ShardedBuilder<R: IndexRecord> {
    db_name: String,
    cfg: Arc<IndexConfig>,
    shards: Vec<Mutex<ShardBuilder<R>>>,
}

impl<R: IndexRecord> ShardedBuilder<R> {
    pub fn new(db_name: &str, cfg: Arc<IndexConfig>) -> Result<Self> {
        let hash_table_size = cfg.hash_table_size;
        Self::with_hash_table_size(db_name, cfg, hash_table_size)
    }

    pub fn with_hash_table_size(
        db_name: &str,
        cfg: Arc<IndexConfig>,
        hash_table_size: u64,
    ) -> Result<Self> {
        shard::create_directories(&cfg, db_name)?;
        let shards = (0..cfg.n_shards)
            .map(|id| {
                Mutex::new(ShardBuilder::with_hash_table_size(
                    db_name,
                    id,
                    Arc::clone(&cfg),
                    hash_table_size,
                ))
            })
            .collect();
        Ok(ShardedBuilder {
            db_name: db_name.to_string(),
            cfg,
            shards,
        })
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn n_shards(&self) -> u64 {
        self.shards.len() as u64
    }

    pub fn shard_for(&self, key: u64) -> u64 {
        key % self.n_shards()
    }

    /// Direct access to one shard's lock (used by the merger thread and by
    /// tests that need to drive a single shard).
    pub fn shard(&self, id: u64) -> &Mutex<ShardBuilder<R>> {
        &self.shards[id as usize]
    }

    /// Route a record to its shard. Flushes that shard's buffer to spill
    /// while still holding its lock if the add filled it.
    pub fn add(&self, key: u64, record: R) -> Result<()> {
        let mut shard = self.shards[self.shard_for(key) as usize].lock();
        shard.add(key, record);
        if shard.buffer_full() {
            shard.append()?;
        }
        Ok(())
    }

    /// Flush every shard's in-memory buffer to spill.
    pub fn flush(&self) -> Result<()> {
        for shard in &self.shards {
            shard.lock().append()?;
        }
        Ok(())
    }

    /// Merge every shard on a pool of `merge_threads` workers. Per-shard
    /// failures are logged; the first error is returned after every shard
    /// has been attempted.
    pub fn merge(&self) -> Result<()> {
        self.merge_with(|builder| builder.merge())
    }

    /// Merge with a rescoring hook (see [`ShardBuilder::merge_rescored`]).
    pub fn merge_rescored(
        &self,
        rescore: &(dyn Fn(u64, &mut Vec<R>) -> bool + Sync),
    ) -> Result<()> {
        self.merge_with(|builder| builder.merge_rescored(rescore))
    }

    fn merge_with<F>(&self, op: F) -> Result<()>
    where
        F: Fn(&mut ShardBuilder<R>) -> Result<()> + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.cfg.merge_threads)
            .build()
            .map_err(|e| IndexError::Config(format!("merge pool: {e}")))?;

        let errors: Vec<IndexError> = pool.install(|| {
            self.shards
                .par_iter()
                .filter_map(|shard| {
                    let mut builder = shard.lock();
                    match op(&mut builder) {
                        Ok(()) => None,
                        Err(e) => {
                            warn!("merge failed for shard {}: {}", builder.shard_id(), e);
                            Some(e)
                        }
                    }
                })
                .collect()
        });

        match errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Re-merge every shard (the global optimize pass).
    pub fn optimize(&self) -> Result<()> {
        self.merge()
    }

    pub fn truncate(&self) -> Result<()> {
        for shard in &self.shards {
            shard.lock().truncate()?;
        }
        Ok(())
    }

    pub fn truncate_cache(&self) -> Result<()> {
        for shard in &self.shards {
            shard.lock().truncate_cache()?;
        }
        Ok(())
    }

    /// Union of keys whose merged posting total meets `min_count`. Shards
    /// that fail to scan are skipped with a warning (a corrupt shard should
    /// not hide every other shard's keys).
    pub fn get_keys(&self, min_count: u64) -> HashSet<u64> {
        let mut out = HashSet::new();
        for shard in &self.shards {
            let builder = shard.lock();
            if let Err(e) = builder.get_keys_into(min_count, &mut out) {
                warn!("get_keys skipping shard {}: {}", builder.shard_id(), e);
            }
        }
        out
    }

    /// Sum of per-shard unique-value estimates.
    pub fn unique_count(&self) -> u64 {
        self.shards
            .iter()
            .map(|shard| shard.lock().unique_count().unwrap_or(0))
            .sum()
    }
}

impl<R: IndexRecord> MergeScan for ShardedBuilder<R> {
    fn merge_over_threshold(&self, threshold: u64) {
        for shard in &self.shards {
            let mut builder = shard.lock();
            if builder.spill_size() > threshold {
                if let Err(e) = builder.merge() {
                    warn!(
                        "background merge failed for shard {}: {}",
                        builder.shard_id(),
                        e
                    );
                }
            }
        }
    }

    fn quiesce(&self) {
        for shard in &self.shards {
            drop(shard.lock());
        }
    }
}

// ============================================================================
// READER SIDE
// ============================================================================

pub struct ShardedIndex<R: IndexRecord> {
    shards: Vec<ShardReader<R>>,
}

impl<R: IndexRecord> ShardedIndex<R> {
    pub fn new(db_name: &str, cfg: Arc<IndexConfig>) -> Self {
        let hash_table_size = cfg.hash_table_size;
        Self::with_hash_table_size(db_name, cfg, hash_table_size)
    }

    pub fn with_hash_table_size(
        db_name: &str,
        cfg: Arc<IndexConfig>,
        hash_table_size: u64,
    ) -> Self {
        let shards = (0..cfg.n_shards)
            .map(|id| {
                ShardReader::with_hash_table_size(db_name, id, Arc::clone(&cfg), hash_table_size)
            })
            .collect();
        ShardedIndex { shards }
    }

    pub fn n_shards(&self) -> u64 {
        self.shards.len() as u64
    }

    /// Posting list for `key` from the one shard that can hold it.
    pub fn find(&mut self, key: u64) -> Result<Vec<R>> {
        let shard = (key % self.n_shards()) as usize;
        self.shards[shard].find(key)
    }

    /// Drop all cached key state (call after a merge pass).
    pub fn invalidate(&mut self) {
        for shard in &mut self.shards {
            shard.invalidate();
        }
    }
}
