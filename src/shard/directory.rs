// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Key directory: the `.keys` file.
//!
//! A fixed array of `H` little-endian u64 slots. Slot `key % H` holds the
//! byte offset of the `.data` page containing `key`, or [`EMPTY_SLOT`] if no
//! key hashes there. `H` is fixed per shard at build time (it comes from
//! config) and must never change without a rebuild — the slot assignment is
//! baked into every page.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Marker for a bucket with no page.
pub const EMPTY_SLOT: u64 = u64::MAX;

#[derive(Debug, Clone)]
pub struct KeyDirectory {
    path: PathBuf,
    size: u64,
}

impl KeyDirectory {
    pub fn new(path: &Path, size: u64) -> KeyDirectory {
        KeyDirectory {
            path: path.to_path_buf(),
            size,
        }
    }

    pub fn slot(&self, key: u64) -> u64 {
        key % self.size
    }

    /// Fill the whole table with [`EMPTY_SLOT`]. Written in chunks; a 100k
    /// slot directory is one syscall-friendly 800 KB of 0xFF.
    pub fn reset<W: Write>(&self, w: &mut W) -> io::Result<()> {
        const CHUNK_SLOTS: u64 = 8192;
        let chunk = vec![0xFFu8; (CHUNK_SLOTS * 8) as usize];
        let mut left = self.size;
        while left > 0 {
            let n = left.min(CHUNK_SLOTS);
            w.write_all(&chunk[..(n * 8) as usize])?;
            left -= n;
        }
        Ok(())
    }

    /// Record that the page for bucket `slot` starts at `page_pos`.
    pub fn write_slot<W: Write + Seek>(&self, w: &mut W, slot: u64, page_pos: u64) -> io::Result<()> {
        debug_assert!(slot < self.size);
        w.seek(SeekFrom::Start(slot * 8))?;
        w.write_all(&page_pos.to_le_bytes())
    }

    /// Load the whole table into memory. `None` when the file is missing or
    /// not the expected size (a half-written directory reads as absent; the
    /// next merge rewrites it).
    pub fn load(&self) -> io::Result<Option<Vec<u64>>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let expected = self.size * 8;
        if file.metadata()?.len() != expected {
            return Ok(None);
        }
        let mut raw = vec![0u8; expected as usize];
        file.read_exact(&mut raw)?;
        Ok(Some(
            raw.chunks_exact(8)
                .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reset_then_write_slot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0.keys");
        let kd = KeyDirectory::new(&path, 16);

        let mut file = File::create(&path).unwrap();
        kd.reset(&mut file).unwrap();
        kd.write_slot(&mut file, 5, 4096).unwrap();
        kd.write_slot(&mut file, 0, 72).unwrap();
        drop(file);

        let slots = kd.load().unwrap().unwrap();
        assert_eq!(slots.len(), 16);
        assert_eq!(slots[5], 4096);
        assert_eq!(slots[0], 72);
        assert_eq!(slots[1], EMPTY_SLOT);
    }

    #[test]
    fn missing_or_truncated_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.keys");
        let kd = KeyDirectory::new(&path, 16);
        assert!(kd.load().unwrap().is_none());

        std::fs::write(&path, [0u8; 24]).unwrap();
        assert!(kd.load().unwrap().is_none());
    }

    #[test]
    fn reset_handles_sizes_beyond_one_chunk() {
        let kd = KeyDirectory::new(Path::new("unused"), 10_000);
        let mut buf = Cursor::new(Vec::new());
        kd.reset(&mut buf).unwrap();
        assert_eq!(buf.get_ref().len(), 80_000);
        assert!(buf.get_ref().iter().all(|&b| b == 0xFF));
    }
}
