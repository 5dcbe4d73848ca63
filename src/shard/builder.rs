// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Shard builder: the append-only write path.
//!
//! Writes move through three stages:
//!
//! 1. `add` pushes into two parallel in-memory vectors (amortized O(1));
//! 2. `append` flushes both vectors to the `.cache`/`.cache.keys` spill
//!    pair — raw records and raw keys, i-th elements corresponding;
//! 3. `merge` folds the current `.data` plus all spill into a fresh paged
//!    `.data`, rewrites the `.keys` directory and the `.meta` counter, and
//!    truncates the spill.
//!
//! Merge is where the posting-list invariants are established: per key the
//! records are sorted by value, runs of equal values are summed and
//! deduplicated, the pre-truncation count is recorded as `total_results`,
//! and oversized lists keep their `max_sections · max_results_per_section`
//! highest-scoring records re-partitioned into value-sorted sections. Pages
//! are emitted in sorted bucket order from a `BTreeMap`, which is what makes
//! a second merge with no intervening adds byte-identical.
//!
//! Failure containment: a corrupt `.data` is logged and rebuilt empty (the
//! shard self-heals on the next merge); a refused allocation is logged and
//! the merge aborts without touching any file.

use std::collections::{BTreeMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::hll::{HyperLogLog, NUM_REGISTERS};
use crate::record::IndexRecord;
use crate::shard::codec;
use crate::shard::directory::KeyDirectory;
use crate::shard::ShardFiles;

/// Hook applied to each normalized posting list during a rescoring merge.
/// Returns `false` to drop the key from the rebuilt shard entirely.
pub type RescoreFn<'a, R> = &'a (dyn Fn(u64, &mut Vec<R>) -> bool + Sync);

pub struct ShardBuilder<R: IndexRecord> {
    id: u64,
    cfg: Arc<IndexConfig>,
    hash_table_size: u64,
    files: ShardFiles,
    keys: Vec<u64>,
    records: Vec<R>,
}

impl<R: IndexRecord> ShardBuilder<R> {
    pub fn new(db_name: &str, id: u64, cfg: Arc<IndexConfig>) -> Self {
        let hash_table_size = cfg.hash_table_size;
        Self::with_hash_table_size(db_name, id, cfg, hash_table_size)
    }

    /// Build with an explicit directory size instead of the config default.
    /// `H` is baked into the shard's pages; changing it means a rebuild.
    pub fn with_hash_table_size(
        db_name: &str,
        id: u64,
        cfg: Arc<IndexConfig>,
        hash_table_size: u64,
    ) -> Self {
        let files = ShardFiles::new(&cfg, db_name, id);
        ShardBuilder {
            id,
            cfg,
            hash_table_size,
            files,
            keys: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn shard_id(&self) -> u64 {
        self.id
    }

    pub fn files(&self) -> &ShardFiles {
        &self.files
    }

    /// Append a record to the in-memory buffer.
    pub fn add(&mut self, key: u64, record: R) {
        self.keys.push(key);
        self.records.push(record);
    }

    pub fn buffer_len(&self) -> usize {
        self.keys.len()
    }

    pub fn buffer_full(&self) -> bool {
        self.keys.len() >= self.cfg.builder_buffer_len
    }

    /// Bytes currently sitting in the spill file.
    pub fn spill_size(&self) -> u64 {
        std::fs::metadata(&self.files.cache).map_or(0, |m| m.len())
    }

    /// Flush the in-memory buffer to the spill pair and clear it.
    pub fn append(&mut self) -> Result<()> {
        if self.keys.is_empty() {
            return Ok(());
        }

        let mut record_writer = BufWriter::new(open_append(&self.files.cache)?);
        let mut key_writer = BufWriter::new(open_append(&self.files.cache_keys)?);

        let mut buf = Vec::with_capacity(self.records.len() * R::SIZE);
        for record in &self.records {
            record.encode(&mut buf);
        }
        record_writer
            .write_all(&buf)
            .and_then(|_| record_writer.flush())
            .map_err(|e| IndexError::io(&self.files.cache, e))?;

        buf.clear();
        for key in &self.keys {
            buf.extend_from_slice(&key.to_le_bytes());
        }
        key_writer
            .write_all(&buf)
            .and_then(|_| key_writer.flush())
            .map_err(|e| IndexError::io(&self.files.cache_keys, e))?;

        self.records = Vec::new();
        self.keys = Vec::new();
        Ok(())
    }

    /// Rebuild `.data`, `.keys` and `.meta` from the current data file plus
    /// all spill, then truncate the spill.
    pub fn merge(&mut self) -> Result<()> {
        self.merge_impl(None)
    }

    /// Merge with a per-key transform applied after normalization. Used by
    /// the optimize pass to recompute counted scores and drop rare keys.
    pub fn merge_rescored(&mut self, rescore: RescoreFn<'_, R>) -> Result<()> {
        self.merge_impl(Some(rescore))
    }

    fn merge_impl(&mut self, rescore: Option<RescoreFn<'_, R>>) -> Result<()> {
        let mut cache: BTreeMap<u64, Vec<R>> = BTreeMap::new();
        let mut totals: BTreeMap<u64, u64> = BTreeMap::new();
        let mut hll = self.read_meta()?;

        match self.read_data(&mut cache, &mut totals) {
            Ok(true) => {
                self.read_spill(&mut cache)?;
            }
            Ok(false) => {
                // Data region ended before the header said it would. Rebuild
                // empty; the shard heals on the next cycle.
                info!("data stopped before end, ignoring shard {}", self.id);
                cache.clear();
                totals.clear();
            }
            Err(IndexError::CorruptShard { path, reason }) => {
                warn!(
                    "corrupt shard {} ({}): rebuilding empty",
                    path.display(),
                    reason
                );
                cache.clear();
                totals.clear();
            }
            Err(IndexError::Allocation { bytes }) => {
                // Nothing has been written yet; abort without mutating state.
                warn!(
                    "allocation of {} bytes failed while merging shard {}, leaving shard untouched",
                    bytes, self.id
                );
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        for records in cache.values() {
            for record in records {
                hll.insert(record.value());
            }
        }

        let p = self.cfg.max_results_per_section;
        let s = self.cfg.max_sections;
        cache.retain(|key, records| {
            let total = normalize_records(records, p, s);
            // A truncated list re-read from disk undercounts; the on-disk
            // total is the floor so re-merging never shrinks it.
            let previous = totals.get(key).copied().unwrap_or(0);
            totals.insert(*key, total.max(previous));
            match rescore {
                Some(f) => f(*key, records),
                None => true,
            }
        });

        self.save_data(&cache, &totals)?;
        self.save_meta(&hll)?;
        self.truncate_cache()
    }

    /// Delete all shard data: data file, directory, meta and spill.
    pub fn truncate(&mut self) -> Result<()> {
        self.keys.clear();
        self.records.clear();
        for path in [&self.files.data, &self.files.keys, &self.files.meta] {
            remove_if_present(path)?;
        }
        self.truncate_cache()
    }

    /// Reset the spill pair to empty files. In-memory buffers are untouched.
    pub fn truncate_cache(&mut self) -> Result<()> {
        for path in [&self.files.cache, &self.files.cache_keys] {
            File::create(path).map_err(|e| IndexError::io(path, e))?;
        }
        Ok(())
    }

    /// Unique record values ever merged into this shard, per the persisted
    /// HyperLogLog. Zero if the shard has never merged.
    pub fn unique_count(&self) -> Result<u64> {
        let mut file = match File::open(&self.files.meta) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(IndexError::io(&self.files.meta, e)),
        };
        let mut buf = [0u8; 8];
        match file.read_exact(&mut buf) {
            Ok(()) => Ok(u64::from_le_bytes(buf)),
            Err(_) => Ok(0),
        }
    }

    /// Collect keys whose `total_results` is at least `min_count`, scanning
    /// page headers and seeking past every payload block.
    pub fn get_keys_into(&self, min_count: u64, out: &mut HashSet<u64>) -> Result<()> {
        let file = match File::open(&self.files.data) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(IndexError::io(&self.files.data, e)),
        };
        let mut reader = BufReader::new(file);
        loop {
            let header = codec::read_page_header(&mut reader, self.cfg.max_keys_per_page)
                .map_err(|e| self.map_data_err(e))?;
            let header = match header {
                Some(h) => h,
                None => break,
            };
            for (key, total) in header.keys.iter().zip(&header.totals) {
                if *total >= min_count {
                    out.insert(*key);
                }
            }
            reader
                .seek_relative(header.data_size() as i64)
                .map_err(|e| IndexError::io(&self.files.data, e))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // merge internals
    // ------------------------------------------------------------------

    /// Load the paged data file. Returns `Ok(false)` on a short read in the
    /// data region (caller discards the cache).
    fn read_data(
        &self,
        cache: &mut BTreeMap<u64, Vec<R>>,
        totals: &mut BTreeMap<u64, u64>,
    ) -> Result<bool> {
        let file = match File::open(&self.files.data) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(IndexError::io(&self.files.data, e)),
        };
        if file.metadata().map_or(0, |m| m.len()) == 0 {
            return Ok(true);
        }

        let mut reader = BufReader::new(file);
        loop {
            let header = codec::read_page_header(&mut reader, self.cfg.max_keys_per_page)
                .map_err(|e| self.map_data_err(e))?;
            let header = match header {
                Some(h) => h,
                None => return Ok(true),
            };
            for (key, total) in header.keys.iter().zip(&header.totals) {
                totals.insert(*key, *total);
            }
            let keys = header.keys.clone();
            let complete = codec::stream_page_records::<_, R, _>(
                &mut reader,
                &header,
                self.cfg.merge_buffer_len,
                |idx, record| cache.entry(keys[idx]).or_default().push(record),
            )
            .map_err(|e| self.map_data_err(e))?;
            if !complete {
                return Ok(false);
            }
        }
    }

    /// Load the spill pair, pairing the i-th record with the i-th key.
    fn read_spill(&self, cache: &mut BTreeMap<u64, Vec<R>>) -> Result<()> {
        let records_file = match File::open(&self.files.cache) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(IndexError::io(&self.files.cache, e)),
        };
        let keys_file = match File::open(&self.files.cache_keys) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(IndexError::io(&self.files.cache_keys, e)),
        };

        let mut record_reader = BufReader::new(records_file);
        let mut key_reader = BufReader::new(keys_file);

        let buffer_records = self.cfg.merge_buffer_len.max(1);
        let mut record_buf = vec![0u8; buffer_records * R::SIZE];
        let mut key_buf = vec![0u8; buffer_records * 8];

        loop {
            let read = read_full(&mut record_reader, &mut record_buf)
                .map_err(|e| IndexError::io(&self.files.cache, e))?;
            if read == 0 {
                break;
            }
            let num_records = read / R::SIZE;
            let key_bytes = read_full(&mut key_reader, &mut key_buf[..num_records * 8])
                .map_err(|e| IndexError::io(&self.files.cache_keys, e))?;
            let num_pairs = num_records.min(key_bytes / 8);

            for i in 0..num_pairs {
                let key = u64::from_le_bytes(key_buf[i * 8..i * 8 + 8].try_into().unwrap());
                let record = R::decode(&record_buf[i * R::SIZE..(i + 1) * R::SIZE]);
                cache.entry(key).or_default().push(record);
            }
            if num_pairs < num_records {
                // Key stream ended first; the unmatched tail is unusable.
                warn!(
                    "spill key stream short for shard {}: dropping {} records",
                    self.id,
                    num_records - num_pairs
                );
                break;
            }
        }
        Ok(())
    }

    fn save_data(&self, cache: &BTreeMap<u64, Vec<R>>, totals: &BTreeMap<u64, u64>) -> Result<()> {
        let data_file =
            File::create(&self.files.data).map_err(|e| IndexError::io(&self.files.data, e))?;
        let mut writer = BufWriter::new(data_file);

        // Partition keys by directory bucket; bucket 0 holds everything when
        // there is no directory. BTreeMap iteration keeps pages and the keys
        // within them sorted, which keeps merge idempotent byte-for-byte.
        let mut pages: BTreeMap<u64, Vec<u64>> = BTreeMap::new();
        for &key in cache.keys() {
            let bucket = if self.hash_table_size > 0 {
                key % self.hash_table_size
            } else {
                0
            };
            pages.entry(bucket).or_default().push(key);
        }

        if self.hash_table_size > 0 {
            let keys_file =
                File::create(&self.files.keys).map_err(|e| IndexError::io(&self.files.keys, e))?;
            let mut key_writer = BufWriter::new(keys_file);
            let dir = KeyDirectory::new(&self.files.keys, self.hash_table_size);
            dir.reset(&mut key_writer)
                .map_err(|e| IndexError::io(&self.files.keys, e))?;

            for (bucket, keys) in &pages {
                let pos = codec::write_page(&mut writer, keys, cache, totals)
                    .map_err(|e| IndexError::io(&self.files.data, e))?;
                dir.write_slot(&mut key_writer, *bucket, pos)
                    .map_err(|e| IndexError::io(&self.files.keys, e))?;
            }
            key_writer
                .flush()
                .map_err(|e| IndexError::io(&self.files.keys, e))?;
        } else {
            for (_, keys) in &pages {
                codec::write_page(&mut writer, keys, cache, totals)
                    .map_err(|e| IndexError::io(&self.files.data, e))?;
            }
        }

        writer
            .flush()
            .map_err(|e| IndexError::io(&self.files.data, e))
    }

    fn read_meta(&self) -> Result<HyperLogLog> {
        let mut file = match File::open(&self.files.meta) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HyperLogLog::new()),
            Err(e) => return Err(IndexError::io(&self.files.meta, e)),
        };
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| IndexError::io(&self.files.meta, e))?;
        if buf.len() < 8 + NUM_REGISTERS {
            return Ok(HyperLogLog::new());
        }
        Ok(HyperLogLog::from_registers(&buf[8..8 + NUM_REGISTERS]).unwrap_or_default())
    }

    fn save_meta(&self, hll: &HyperLogLog) -> Result<()> {
        let file =
            File::create(&self.files.meta).map_err(|e| IndexError::io(&self.files.meta, e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&(hll.count() as u64).to_le_bytes())
            .and_then(|_| writer.write_all(hll.registers()))
            .and_then(|_| writer.flush())
            .map_err(|e| IndexError::io(&self.files.meta, e))
    }

    fn map_data_err(&self, e: io::Error) -> IndexError {
        match e.kind() {
            io::ErrorKind::InvalidData => IndexError::corrupt(&self.files.data, e.to_string()),
            io::ErrorKind::OutOfMemory => IndexError::Allocation {
                bytes: parse_alloc_size(&e),
            },
            _ => IndexError::io(&self.files.data, e),
        }
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| IndexError::io(path, e))
}

fn remove_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(IndexError::io(path, e)),
    }
}

/// Read as many bytes as the buffer holds, short only at end of stream.
fn read_full<Rd: Read>(r: &mut Rd, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn parse_alloc_size(e: &io::Error) -> usize {
    // Codec OutOfMemory messages start with the byte count.
    e.to_string()
        .split_whitespace()
        .next()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Establish the posting-list invariants for one key. Returns the
/// post-dedup, pre-truncation length (`total_results`).
pub fn normalize_records<R: IndexRecord>(records: &mut Vec<R>, p: usize, s: usize) -> u64 {
    records.sort_unstable();

    // Sum runs of equal values into the run head, then keep only heads.
    let mut head = 0;
    for i in 1..records.len() {
        if records[head] != records[i] {
            head = i;
        } else {
            let dup = records[i];
            records[head].combine(&dup);
        }
    }
    records.dedup();

    let total = records.len() as u64;

    if records.len() > p {
        // Score descending, value ascending on ties: a total order, so a
        // re-merge of an already-truncated list reproduces it exactly.
        records.sort_unstable_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.value().cmp(&b.value()))
        });
        records.truncate(p * s);
        // Re-partition into sections, each sorted by value so section-wise
        // merge intersection stays cheap.
        for section in records.chunks_mut(p) {
            section.sort_unstable();
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CountedRecord, DomainRecord};

    #[test]
    fn normalize_sums_and_dedups() {
        let mut records = vec![
            CountedRecord::new(7, 1, 1.0),
            CountedRecord::new(3, 1, 2.0),
            CountedRecord::new(7, 1, 1.0),
            CountedRecord::new(7, 1, 1.0),
        ];
        let total = normalize_records(&mut records, 100, 4);
        assert_eq!(total, 2);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, 3);
        assert_eq!(records[1].value, 7);
        assert_eq!(records[1].count, 3);
        assert!((records[1].score - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn normalize_caps_and_section_orders() {
        // Ten distinct values with score == value; P = 2, S = 2.
        let mut records: Vec<DomainRecord> =
            (1..=10).map(|v| DomainRecord::new(v, v as f32)).collect();
        let total = normalize_records(&mut records, 2, 2);
        assert_eq!(total, 10);
        assert_eq!(records.len(), 4);

        // The four highest-scoring values survive.
        let mut values: Vec<u64> = records.iter().map(|r| r.value).collect();
        values.sort_unstable();
        assert_eq!(values, vec![7, 8, 9, 10]);

        // Each section is internally sorted ascending by value.
        assert!(records[0].value < records[1].value);
        assert!(records[2].value < records[3].value);
    }

    #[test]
    fn normalize_below_cap_sorts_by_value_only() {
        let mut records = vec![
            DomainRecord::new(9, 1.0),
            DomainRecord::new(2, 50.0),
            DomainRecord::new(5, 10.0),
        ];
        let total = normalize_records(&mut records, 10, 2);
        assert_eq!(total, 3);
        let values: Vec<u64> = records.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![2, 5, 9]);
    }
}
