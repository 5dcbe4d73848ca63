// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Index configuration.
//!
//! One explicit struct threaded through constructors instead of process-wide
//! globals. Defaults are the production constants; tests override the handful
//! they care about (usually `mount_prefix`, `n_shards` and the section caps).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::{IndexError, Result};

/// Shard files are spread over this many mount points (`shard_id % 8`).
pub const NUM_MOUNTS: u64 = 8;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Number of shards per index level. Term keys route as `key % n_shards`.
    pub n_shards: u64,

    /// Hash-table directory size (H). Slot = `key % H`. Zero means no
    /// directory: the whole shard is one page and readers binary-search the
    /// key vector. Fixed per shard at build time.
    pub hash_table_size: u64,

    /// Per-section posting cap (P).
    pub max_results_per_section: usize,

    /// Maximum number of sections (S). Posting lists are capped at S·P
    /// records after merge.
    pub max_sections: usize,

    /// Root under which the `{mount}/full_text/{db}/{shard}.*` tree lives.
    pub mount_prefix: PathBuf,

    /// Worker threads for the ingestion pool.
    pub ingest_threads: usize,

    /// Worker threads for the merge pool.
    pub merge_threads: usize,

    /// In-memory builder records before a shard's buffer is flushed to spill.
    pub builder_buffer_len: usize,

    /// Spill bytes above which the background merger picks up a shard.
    pub merge_spill_threshold: u64,

    /// Records per read buffer when streaming page payloads.
    pub merge_buffer_len: usize,

    /// Ceiling on `num_keys` in a page header; anything above is corruption.
    pub max_keys_per_page: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            n_shards: 1024,
            hash_table_size: 0,
            max_results_per_section: 1000,
            max_sections: 8,
            mount_prefix: PathBuf::from("/mnt"),
            ingest_threads: 24,
            merge_threads: 12,
            builder_buffer_len: 10_000,
            merge_spill_threshold: 300_000_000,
            merge_buffer_len: 100_000,
            max_keys_per_page: 10_000_000,
        }
    }
}

impl IndexConfig {
    /// Load from a TOML file. Missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Arc<Self>> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| IndexError::Config(format!("{}: {}", path.display(), e)))?;
        let cfg: IndexConfig = toml::from_str(&text)
            .map_err(|e| IndexError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Arc::new(cfg))
    }

    /// Maximum records a posting list may hold after merge (S·P).
    pub fn max_results(&self) -> usize {
        self.max_results_per_section * self.max_sections
    }
}
