// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Index levels.
//!
//! A level names one logical index (`domain`, `url`, `word_index`, the two
//! link indexes) and binds it to a record type. Each level owns its own
//! sharded builder and reader; the builder is behind an `Arc` so the
//! background merger can watch it while ingest workers write through it.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::index::sharded::{ShardedBuilder, ShardedIndex};
use crate::record::{CountedRecord, IndexRecord};
use crate::shard::shard_dir;

/// Score weights for TSV columns 1..=4.
pub const COLUMN_WEIGHTS: [f32; 4] = [10.0, 3.0, 2.0, 1.0];

/// A key must appear in at least this many domains to survive the
/// common-words filter applied to counted levels at optimize time.
pub const COMMON_WORDS_MIN_DOMAINS: u64 = 100;

pub struct Level<R: IndexRecord> {
    name: &'static str,
    pub builder: Arc<ShardedBuilder<R>>,
    pub reader: ShardedIndex<R>,
}

impl<R: IndexRecord> Level<R> {
    pub fn new(name: &'static str, cfg: Arc<IndexConfig>) -> Result<Self> {
        Ok(Level {
            name,
            builder: Arc::new(ShardedBuilder::new(name, Arc::clone(&cfg))?),
            reader: ShardedIndex::new(name, cfg),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Posting list for `key`, sorted ascending by value. Query paths never
    /// raise: read failures are logged and come back empty.
    pub fn find_sorted(&mut self, key: u64) -> Vec<R> {
        match self.reader.find(key) {
            Ok(mut records) => {
                // Truncated lists arrive section-ordered, not globally
                // ordered; the merge-joins downstream need one sorted run.
                records.sort_unstable();
                records
            }
            Err(e) => {
                warn!("find failed on level {}: {}", self.name, e);
                Vec::new()
            }
        }
    }
}

// ============================================================================
// WORD LEVEL (counted records + document sizes)
// ============================================================================

/// The `word_index` level: counted postings plus the per-domain document
/// size map used to turn raw counts into scores at optimize time.
pub struct WordLevel {
    pub level: Level<CountedRecord>,
    doc_sizes: Mutex<HashMap<u64, u64>>,
    sizes_path: PathBuf,
}

impl WordLevel {
    pub fn new(cfg: Arc<IndexConfig>) -> Result<Self> {
        let level = Level::new("word_index", Arc::clone(&cfg))?;
        let sizes_path = shard_dir(&cfg, "word_index", 0).join("document_sizes.bin");
        let doc_sizes = Mutex::new(load_doc_sizes(&sizes_path)?);
        Ok(WordLevel {
            level,
            doc_sizes,
            sizes_path,
        })
    }

    /// Record that `n` more tokens were seen for `domain_hash`.
    pub fn add_tokens(&self, domain_hash: u64, n: u64) {
        *self.doc_sizes.lock().entry(domain_hash).or_insert(0) += n;
    }

    pub fn document_size(&self, domain_hash: u64) -> u64 {
        self.doc_sizes
            .lock()
            .get(&domain_hash)
            .copied()
            .unwrap_or(0)
    }

    /// Persist the document-size map next to shard 0.
    pub fn save_doc_sizes(&self) -> Result<()> {
        let sizes = self.doc_sizes.lock();
        let file =
            File::create(&self.sizes_path).map_err(|e| IndexError::io(&self.sizes_path, e))?;
        let mut writer = BufWriter::new(file);
        for (domain, size) in sizes.iter() {
            writer
                .write_all(&domain.to_le_bytes())
                .and_then(|_| writer.write_all(&size.to_le_bytes()))
                .map_err(|e| IndexError::io(&self.sizes_path, e))?;
        }
        writer
            .flush()
            .map_err(|e| IndexError::io(&self.sizes_path, e))
    }

    /// Global score pass: re-merge every shard, keep only common words, and
    /// recompute each record's score as `count / document_size`, descending.
    pub fn optimize(&self, common_words: &HashSet<u64>) -> Result<()> {
        let sizes = self.doc_sizes.lock();
        let sizes: &HashMap<u64, u64> = &sizes;
        self.level.builder.merge_rescored(&|key, records| {
            if !common_words.contains(&key) {
                return false;
            }
            for record in records.iter_mut() {
                let size = sizes.get(&record.value).copied().unwrap_or(0).max(1);
                record.score = record.count as f32 / size as f32;
            }
            records.sort_unstable_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            true
        })
    }
}

fn load_doc_sizes(path: &PathBuf) -> Result<HashMap<u64, u64>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
        Err(e) => return Err(IndexError::io(path, e)),
    };
    let mut raw = Vec::new();
    file.read_to_end(&mut raw)
        .map_err(|e| IndexError::io(path, e))?;
    Ok(raw
        .chunks_exact(16)
        .map(|pair| {
            (
                u64::from_le_bytes(pair[0..8].try_into().unwrap()),
                u64::from_le_bytes(pair[8..16].try_into().unwrap()),
            )
        })
        .collect())
}
