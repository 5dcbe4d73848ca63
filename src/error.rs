// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Crate-wide error type.
//!
//! Codec internals speak `std::io::Error`; everything that crosses a public
//! boundary is wrapped into [`IndexError`] with the shard path attached, so a
//! failure in a 2048-shard merge tells you *which* file went bad.

use std::io;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A shard file could not be opened, read, or written.
    #[error("shard io error at {path}: {source}")]
    ShardIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A shard file violated a header invariant (absurd key count, payload
    /// running past end of file). The shard is treated as empty for the
    /// current merge and rebuilds cleanly on the next one.
    #[error("corrupt shard {path}: {reason}")]
    CorruptShard { path: PathBuf, reason: String },

    /// An in-memory buffer could not be grown. The operation that hit this
    /// returns without mutating any on-disk state.
    #[error("allocation of {bytes} bytes failed")]
    Allocation { bytes: usize },

    /// Configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl IndexError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        IndexError::ShardIo {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        IndexError::CorruptShard {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
