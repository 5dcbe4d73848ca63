// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Paged shard file codec.
//!
//! A `.data` file is a sequence of pages. Each page groups the keys that
//! share a directory bucket (`key % H`), or every key when there is no
//! directory:
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │ u64              num_keys                      │
//! │ u64 × num_keys   keys                          │
//! │ u64 × num_keys   payload offset in data block  │
//! │ u64 × num_keys   payload length in bytes       │
//! │ u64 × num_keys   total results (pre-truncation)│
//! ├────────────────────────────────────────────────┤
//! │ concatenated record payloads, key order        │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian `u64`, decoded explicitly — no pointer
//! punning, no alignment assumptions. Payloads are streamed through a
//! bounded buffer so a multi-gigabyte posting file never has to fit in
//! memory at once.
//!
//! Errors here are `std::io::Error`; the builder and reader wrap them into
//! `IndexError` with the shard path attached. Corruption (absurd key count,
//! header arrays cut short) surfaces as `InvalidData`; an allocation that
//! the header sizes force and the system refuses is `OutOfMemory`.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, Write};

use crate::record::IndexRecord;

/// Fixed width of every header entry.
const ENTRY_SIZE: u64 = 8;

/// Decoded page header: four parallel arrays of `num_keys` entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageHeader {
    pub keys: Vec<u64>,
    pub positions: Vec<u64>,
    pub lengths: Vec<u64>,
    pub totals: Vec<u64>,
}

impl PageHeader {
    pub fn num_keys(&self) -> usize {
        self.keys.len()
    }

    /// Total payload bytes following the header.
    pub fn data_size(&self) -> u64 {
        self.lengths.iter().sum()
    }

    /// Byte size of the serialized header itself.
    pub fn byte_size(num_keys: u64) -> u64 {
        ENTRY_SIZE + 4 * num_keys * ENTRY_SIZE
    }

    /// Position of `key` within the page, if present. Pages are small
    /// (one directory bucket), so a linear scan is the lookup.
    pub fn find(&self, key: u64) -> Option<usize> {
        self.keys.iter().position(|&k| k == key)
    }
}

fn corrupt(reason: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, reason)
}

/// Read one u64, distinguishing clean EOF (`None`) from a torn file.
fn try_read_u64<R: Read>(r: &mut R) -> io::Result<Option<u64>> {
    let mut buf = [0u8; 8];
    let mut filled = 0;
    while filled < 8 {
        let n = r.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(corrupt(format!(
                "page header cut short after {filled} bytes"
            )));
        }
        filled += n;
    }
    Ok(Some(u64::from_le_bytes(buf)))
}

fn read_u64_array<R: Read>(r: &mut R, count: usize, what: &str) -> io::Result<Vec<u64>> {
    let mut raw = Vec::new();
    raw.try_reserve_exact(count * ENTRY_SIZE as usize)
        .map_err(|_| {
            io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("{} bytes for page {what} array", count * 8),
            )
        })?;
    raw.resize(count * ENTRY_SIZE as usize, 0);
    r.read_exact(&mut raw)
        .map_err(|e| corrupt(format!("short read in page {what} array: {e}")))?;
    Ok(raw
        .chunks_exact(8)
        .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
        .collect())
}

/// Read the next page header, or `None` at a clean end of file.
///
/// `max_keys` is the corruption ceiling: a header claiming more keys than
/// that is rejected before any allocation is sized from it.
pub fn read_page_header<R: Read>(r: &mut R, max_keys: u64) -> io::Result<Option<PageHeader>> {
    let num_keys = match try_read_u64(r)? {
        Some(n) => n,
        None => return Ok(None),
    };
    if num_keys > max_keys {
        return Err(corrupt(format!(
            "page header declares {num_keys} keys (ceiling {max_keys})"
        )));
    }
    let count = num_keys as usize;
    Ok(Some(PageHeader {
        keys: read_u64_array(r, count, "key")?,
        positions: read_u64_array(r, count, "position")?,
        lengths: read_u64_array(r, count, "length")?,
        totals: read_u64_array(r, count, "total")?,
    }))
}

/// Stream a page's payload, emitting `(key_index, record)` pairs in order.
///
/// Reads through a buffer of `buffer_len` records, never more than the
/// declared payload size. Returns `Ok(false)` when the data region ends
/// before the header said it would — the caller decides whether that means
/// "discard the shard" (merge) or "hard error" (point lookup).
pub fn stream_page_records<S, R, F>(
    r: &mut S,
    header: &PageHeader,
    buffer_len: usize,
    mut emit: F,
) -> io::Result<bool>
where
    S: Read,
    R: IndexRecord,
    F: FnMut(usize, R),
{
    let data_size = header.data_size();
    if data_size == 0 {
        return Ok(true);
    }

    let cap = buffer_len.max(1) * R::SIZE;
    let mut buf = Vec::new();
    buf.try_reserve_exact(cap).map_err(|_| {
        io::Error::new(
            io::ErrorKind::OutOfMemory,
            format!("{cap} bytes for payload buffer"),
        )
    })?;
    buf.resize(cap, 0);

    let mut key_idx = 0usize;
    let mut left_for_key = header.lengths.first().copied().unwrap_or(0);
    let mut remaining = data_size;

    while remaining > 0 {
        let to_read = (cap as u64).min(remaining) as usize;
        if r.read_exact(&mut buf[..to_read]).is_err() {
            return Ok(false);
        }
        remaining -= to_read as u64;

        for chunk in buf[..to_read].chunks_exact(R::SIZE) {
            while left_for_key == 0 && key_idx + 1 < header.num_keys() {
                key_idx += 1;
                left_for_key = header.lengths[key_idx];
            }
            if left_for_key == 0 {
                // Trailing bytes beyond every declared length.
                return Ok(false);
            }
            emit(key_idx, R::decode(chunk));
            // saturating: a length that is not a record-size multiple must
            // not wrap this counter.
            left_for_key = left_for_key.saturating_sub(R::SIZE as u64);
        }
    }

    Ok(true)
}

/// Write one page for `keys` (which must be sorted and present in `lists`),
/// returning the byte offset of the page start.
pub fn write_page<W, R>(
    w: &mut W,
    keys: &[u64],
    lists: &BTreeMap<u64, Vec<R>>,
    totals: &BTreeMap<u64, u64>,
) -> io::Result<u64>
where
    W: Write + Seek,
    R: IndexRecord,
{
    let page_pos = w.stream_position()?;

    w.write_all(&(keys.len() as u64).to_le_bytes())?;
    for key in keys {
        w.write_all(&key.to_le_bytes())?;
    }

    let mut positions = Vec::with_capacity(keys.len());
    let mut lengths = Vec::with_capacity(keys.len());
    let mut pos = 0u64;
    for key in keys {
        let len = lists.get(key).map_or(0, |l| l.len() as u64) * R::SIZE as u64;
        positions.push(pos);
        lengths.push(len);
        pos += len;
    }

    for p in &positions {
        w.write_all(&p.to_le_bytes())?;
    }
    for l in &lengths {
        w.write_all(&l.to_le_bytes())?;
    }
    for key in keys {
        let total = totals
            .get(key)
            .copied()
            .unwrap_or_else(|| lists.get(key).map_or(0, |l| l.len() as u64));
        w.write_all(&total.to_le_bytes())?;
    }

    let mut payload = Vec::new();
    for key in keys {
        if let Some(list) = lists.get(key) {
            payload.clear();
            for record in list {
                record.encode(&mut payload);
            }
            w.write_all(&payload)?;
        }
    }

    Ok(page_pos)
}
