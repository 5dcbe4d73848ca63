// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Shard reader: the query-side of a shard. Never writes.
//!
//! The only state cached across `find` calls is key placement, loaded on
//! first use: the sorted key vector for a single-page shard, or the `.keys`
//! directory for a paged one. Everything else is read on demand — one file
//! open per `find`, payload streamed through a bounded buffer.
//!
//! A missing file, an empty file, or an absent key all yield an empty
//! posting list. Corrupt headers surface as [`IndexError::CorruptShard`];
//! the façade downgrades those to empty results so queries never raise.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::marker::PhantomData;
use std::sync::Arc;

use log::warn;

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::record::IndexRecord;
use crate::shard::codec::{self, PageHeader};
use crate::shard::directory::{KeyDirectory, EMPTY_SLOT};
use crate::shard::ShardFiles;

enum KeyState {
    /// No data file (or zero bytes). Every lookup is empty.
    Empty,
    /// `hash_table_size == 0`: one page, keys held sorted in memory.
    SinglePage {
        keys: Vec<u64>,
        pos_start: u64,
        len_start: u64,
        data_start: u64,
    },
    /// Directory mode: the `.keys` table, one slot per bucket.
    Directory { slots: Vec<u64> },
}

pub struct ShardReader<R: IndexRecord> {
    id: u64,
    cfg: Arc<IndexConfig>,
    hash_table_size: u64,
    files: ShardFiles,
    state: Option<KeyState>,
    _record: PhantomData<fn() -> R>,
}

impl<R: IndexRecord> ShardReader<R> {
    pub fn new(db_name: &str, id: u64, cfg: Arc<IndexConfig>) -> Self {
        let hash_table_size = cfg.hash_table_size;
        Self::with_hash_table_size(db_name, id, cfg, hash_table_size)
    }

    pub fn with_hash_table_size(
        db_name: &str,
        id: u64,
        cfg: Arc<IndexConfig>,
        hash_table_size: u64,
    ) -> Self {
        let files = ShardFiles::new(&cfg, db_name, id);
        ShardReader {
            id,
            cfg,
            hash_table_size,
            files,
            state: None,
            _record: PhantomData,
        }
    }

    pub fn shard_id(&self) -> u64 {
        self.id
    }

    /// Drop cached key state; the next `find` reloads from disk. Call after
    /// the builder has merged this shard.
    pub fn invalidate(&mut self) {
        self.state = None;
    }

    /// Posting list for `key`, empty if absent.
    pub fn find(&mut self, key: u64) -> Result<Vec<R>> {
        if self.state.is_none() {
            let state = self.load_state()?;
            self.state = Some(state);
        }

        match self.state.as_ref().unwrap_or(&KeyState::Empty) {
            KeyState::Empty => Ok(Vec::new()),
            KeyState::SinglePage {
                keys,
                pos_start,
                len_start,
                data_start,
            } => {
                let key_pos = match keys.binary_search(&key) {
                    Ok(i) => i as u64,
                    Err(_) => return Ok(Vec::new()),
                };
                let mut file = self.open_data()?;
                let pos = read_u64_at(&mut file, pos_start + key_pos * 8)
                    .map_err(|e| IndexError::io(&self.files.data, e))?;
                let len = read_u64_at(&mut file, len_start + key_pos * 8)
                    .map_err(|e| IndexError::io(&self.files.data, e))?;
                self.read_payload(&mut file, data_start + pos, len)
            }
            KeyState::Directory { slots } => {
                let slot = (key % self.hash_table_size) as usize;
                let page_pos = slots.get(slot).copied().unwrap_or(EMPTY_SLOT);
                if page_pos == EMPTY_SLOT {
                    return Ok(Vec::new());
                }
                let mut file = self.open_data()?;
                file.seek(SeekFrom::Start(page_pos))
                    .map_err(|e| IndexError::io(&self.files.data, e))?;
                let header = self.read_header(&mut file)?;
                let header = match header {
                    Some(h) => h,
                    None => return Ok(Vec::new()),
                };
                let idx = match header.find(key) {
                    Some(i) => i,
                    None => return Ok(Vec::new()),
                };
                let data_start = page_pos + PageHeader::byte_size(header.num_keys() as u64);
                self.read_payload(
                    &mut file,
                    data_start + header.positions[idx],
                    header.lengths[idx],
                )
            }
        }
    }

    // ------------------------------------------------------------------

    fn load_state(&self) -> Result<KeyState> {
        if self.hash_table_size > 0 {
            let dir = KeyDirectory::new(&self.files.keys, self.hash_table_size);
            return match dir
                .load()
                .map_err(|e| IndexError::io(&self.files.keys, e))?
            {
                Some(slots) => Ok(KeyState::Directory { slots }),
                None => Ok(KeyState::Empty),
            };
        }

        let file = match File::open(&self.files.data) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(KeyState::Empty),
            Err(e) => return Err(IndexError::io(&self.files.data, e)),
        };
        if file.metadata().map_or(0, |m| m.len()) == 0 {
            return Ok(KeyState::Empty);
        }

        let mut reader = BufReader::new(file);
        let header = self.read_header(&mut reader)?;
        match header {
            Some(h) => {
                let n = h.num_keys() as u64;
                let pos_start = 8 + n * 8;
                let len_start = pos_start + n * 8;
                let data_start = len_start + n * 8 + n * 8;
                Ok(KeyState::SinglePage {
                    keys: h.keys,
                    pos_start,
                    len_start,
                    data_start,
                })
            }
            None => Ok(KeyState::Empty),
        }
    }

    fn read_header<S: Read>(&self, r: &mut S) -> Result<Option<PageHeader>> {
        codec::read_page_header(r, self.cfg.max_keys_per_page).map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidData {
                IndexError::corrupt(&self.files.data, e.to_string())
            } else {
                IndexError::io(&self.files.data, e)
            }
        })
    }

    fn open_data(&self) -> Result<File> {
        File::open(&self.files.data).map_err(|e| IndexError::io(&self.files.data, e))
    }

    /// Stream exactly `len` payload bytes from `offset`, decoding records.
    /// A payload cut short by a torn file yields the records read so far.
    fn read_payload(&self, file: &mut File, offset: u64, len: u64) -> Result<Vec<R>> {
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| IndexError::io(&self.files.data, e))?;

        let mut out = Vec::with_capacity((len as usize / R::SIZE).min(self.cfg.merge_buffer_len));
        let cap = self.cfg.merge_buffer_len.max(1) * R::SIZE;
        let mut buf = vec![0u8; cap];
        let mut remaining = len;

        while remaining > 0 {
            let to_read = (cap as u64).min(remaining) as usize;
            if file.read_exact(&mut buf[..to_read]).is_err() {
                warn!(
                    "payload cut short in shard {} at {} bytes left",
                    self.id, remaining
                );
                break;
            }
            for chunk in buf[..to_read].chunks_exact(R::SIZE) {
                out.push(R::decode(chunk));
            }
            remaining -= to_read as u64;
        }

        Ok(out)
    }
}

fn read_u64_at(file: &mut File, offset: u64) -> io::Result<u64> {
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = [0u8; 8];
    file.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}
