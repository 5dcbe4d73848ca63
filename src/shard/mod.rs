// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! On-disk shard: paged data file, key directory, spill pair, meta.
//!
//! One shard owns five files under its mount:
//!
//! ```text
//! {mount_prefix}/{shard_id % 8}/full_text/{db}/{shard_id}.data
//!                                              {shard_id}.keys
//!                                              {shard_id}.meta
//!                                              {shard_id}.cache
//!                                              {shard_id}.cache.keys
//! ```
//!
//! `.data` is the paged posting file ([`codec`]), `.keys` the fixed-size
//! hash-table directory ([`directory`]), `.meta` the unique-value counter,
//! and the `.cache` pair is the append-only spill consumed by the next
//! merge. The builder ([`builder::ShardBuilder`]) is the only writer; the
//! reader ([`reader::ShardReader`]) never writes.

pub mod builder;
pub mod codec;
pub mod directory;
pub mod reader;

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{IndexConfig, NUM_MOUNTS};

pub use builder::ShardBuilder;
pub use reader::ShardReader;

/// Resolved file paths for one shard.
#[derive(Debug, Clone)]
pub struct ShardFiles {
    pub data: PathBuf,
    pub keys: PathBuf,
    pub meta: PathBuf,
    pub cache: PathBuf,
    pub cache_keys: PathBuf,
}

impl ShardFiles {
    pub fn new(cfg: &IndexConfig, db_name: &str, shard_id: u64) -> ShardFiles {
        let dir = shard_dir(cfg, db_name, shard_id);
        let stem = shard_id.to_string();
        ShardFiles {
            data: dir.join(format!("{stem}.data")),
            keys: dir.join(format!("{stem}.keys")),
            meta: dir.join(format!("{stem}.meta")),
            cache: dir.join(format!("{stem}.cache")),
            cache_keys: dir.join(format!("{stem}.cache.keys")),
        }
    }
}

/// Directory holding a shard's files: `{mount_prefix}/{id % 8}/full_text/{db}`.
pub fn shard_dir(cfg: &IndexConfig, db_name: &str, shard_id: u64) -> PathBuf {
    cfg.mount_prefix
        .join((shard_id % NUM_MOUNTS).to_string())
        .join("full_text")
        .join(db_name)
}

/// Create the full mount tree for a database. Fatal if it cannot be created;
/// everything downstream assumes the directories exist.
pub fn create_directories(cfg: &Arc<IndexConfig>, db_name: &str) -> crate::error::Result<()> {
    for mount in 0..NUM_MOUNTS {
        let dir = cfg
            .mount_prefix
            .join(mount.to_string())
            .join("full_text")
            .join(db_name);
        std::fs::create_dir_all(&dir).map_err(|e| crate::error::IndexError::io(&dir, e))?;
    }
    Ok(())
}
