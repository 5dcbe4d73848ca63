// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! URL → domain mapping.
//!
//! Ingestion records which domain owns every URL it sees; queries use the
//! map to translate URL-level link targets to the domain results they
//! boost. One mutex serializes both in-memory inserts and the file write
//! (this is the "url→domain writer mutex" of the pipeline).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::shard::shard_dir;

pub struct UrlToDomain {
    path: PathBuf,
    map: Mutex<HashMap<u64, u64>>,
}

impl UrlToDomain {
    /// Open (and load, if present) the mapping for `db_name`.
    pub fn open(db_name: &str, cfg: &Arc<IndexConfig>) -> Result<UrlToDomain> {
        let path = shard_dir(cfg, db_name, 0).join("url_to_domain.bin");
        let map = match File::open(&path) {
            Ok(mut file) => {
                let mut raw = Vec::new();
                file.read_to_end(&mut raw)
                    .map_err(|e| IndexError::io(&path, e))?;
                raw.chunks_exact(16)
                    .map(|pair| {
                        (
                            u64::from_le_bytes(pair[0..8].try_into().unwrap()),
                            u64::from_le_bytes(pair[8..16].try_into().unwrap()),
                        )
                    })
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(IndexError::io(&path, e)),
        };
        Ok(UrlToDomain {
            path,
            map: Mutex::new(map),
        })
    }

    pub fn insert(&self, url_hash: u64, domain_hash: u64) {
        self.map.lock().insert(url_hash, domain_hash);
    }

    pub fn get(&self, url_hash: u64) -> Option<u64> {
        self.map.lock().get(&url_hash).copied()
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    /// Rewrite the mapping file, key-sorted so external consumers can
    /// binary-search it. Holds the map lock for the duration so concurrent
    /// inserts cannot tear the snapshot.
    pub fn write(&self) -> Result<()> {
        let map = self.map.lock();
        let mut pairs: Vec<(u64, u64)> = map.iter().map(|(k, v)| (*k, *v)).collect();
        pairs.sort_unstable();

        let file = File::create(&self.path).map_err(|e| IndexError::io(&self.path, e))?;
        let mut writer = BufWriter::new(file);
        for (url, domain) in pairs {
            writer
                .write_all(&url.to_le_bytes())
                .and_then(|_| writer.write_all(&domain.to_le_bytes()))
                .map_err(|e| IndexError::io(&self.path, e))?;
        }
        writer.flush().map_err(|e| IndexError::io(&self.path, e))
    }
}
