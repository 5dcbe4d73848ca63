// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Sharded on-disk inverted-index search engine for large web crawls.
//!
//! Documents from crawl archives are tokenized, hashed to 64-bit term keys,
//! and stored as posting lists sharded across many files. Queries look a
//! term key up in its shard, intersect and score postings, and return
//! ranked domains.
//!
//! # Architecture
//!
//! ```text
//! TSV files ──▶ pipeline ──▶ ShardedBuilder ──▶ .cache/.cache.keys (spill)
//!                 │               │ merge
//!                 │               ▼
//!                 │           .data + .keys + .meta   (shard/codec,
//!                 │               │                    shard/directory)
//!              merger ───────────┘
//!                                 ▼
//! query ──▶ IndexManager ──▶ ShardedIndex ──▶ ShardReader ──▶ postings
//! ```
//!
//! A shard's `.data` file is paged: keys sharing a directory bucket
//! (`key % H`) land on one page, and the `.keys` file maps bucket → page
//! offset. The merge pass establishes the posting-list invariants: unique
//! by value, duplicate records summed, oversized lists truncated to their
//! `S·P` highest-scoring records and re-partitioned into value-sorted
//! sections.
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use crawldex::{IndexConfig, IndexManager};
//!
//! let cfg = Arc::new(IndexConfig::default());
//! let mut index = IndexManager::new(cfg).unwrap();
//! index.add_files(&[std::path::PathBuf::from("batch-00001.tsv")], 24).unwrap();
//! index.merge().unwrap();
//! for result in index.find("rust systems programming") {
//!     println!("{:#018x} {:.3}", result.value, result.score);
//! }
//! ```

pub mod centrality;
pub mod config;
pub mod crawl_url;
pub mod error;
pub mod hash;
pub mod hll;
pub mod index;
pub mod pipeline;
pub mod record;
pub mod shard;
pub mod text;

pub use centrality::{harmonic_centrality, HYPER_BALL_ROUNDS};
pub use config::{IndexConfig, NUM_MOUNTS};
pub use crawl_url::ParsedUrl;
pub use error::{IndexError, Result};
pub use hash::term_key;
pub use hll::HyperLogLog;
pub use index::{
    IndexManager, Level, MergeScan, ShardedBuilder, ShardedIndex, UrlToDomain, WordLevel,
    COLUMN_WEIGHTS, COMMON_WORDS_MIN_DOMAINS,
};
pub use record::{
    CountedRecord, DomainLinkRecord, DomainRecord, IndexRecord, LinkRecord, ReturnRecord,
    UrlRecord,
};
pub use shard::{ShardBuilder, ShardReader};
pub use text::{normalize, tokenize};
