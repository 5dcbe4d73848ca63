// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! Ingestion pipeline.
//!
//! A batch of local TSV files fans out over a thread pool; each worker
//! parses rows, hashes URLs and tokens, and pushes records through the
//! sharded builders (which take the per-shard lock and flush to spill when
//! a buffer fills). Per-file failures are logged and skipped — one bad
//! download never sinks a batch.
//!
//! File formats:
//!
//! - **text files** (`add_files`): `url \t col1 \t col2 \t col3 \t col4`,
//!   free text columns weighted `[10, 3, 2, 1]`.
//! - **link files** (`add_link_files`): `source_url \t target_url \t
//!   anchor_text [\t score]`, score defaulting to 1.
//! - **word files** (`add_word_files`): same shape as text files; every
//!   token occurrence becomes a counted record against the row's domain.

pub mod merger;

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{info, warn};
use rayon::prelude::*;

use crate::crawl_url::ParsedUrl;
use crate::error::{IndexError, Result};
use crate::hash::term_key;
use crate::index::{IndexManager, COLUMN_WEIGHTS};
use crate::record::{CountedRecord, DomainLinkRecord, DomainRecord, LinkRecord, UrlRecord};
use crate::text::tokenize;

/// Index text files into the domain and url levels, then flush spill and
/// persist the url→domain mapping.
pub fn ingest_text_files(
    mgr: &IndexManager,
    paths: &[PathBuf],
    n_threads: usize,
) -> Result<()> {
    run_pool(paths, n_threads, |path| index_text_file(mgr, path))?;
    mgr.domain.builder.flush()?;
    mgr.url.builder.flush()?;
    mgr.url_to_domain.write()
}

/// Index link files into the two link levels.
pub fn ingest_link_files(mgr: &IndexManager, paths: &[PathBuf], n_threads: usize) -> Result<()> {
    run_pool(paths, n_threads, |path| index_link_file(mgr, path))?;
    mgr.url_links.builder.flush()?;
    mgr.domain_links.builder.flush()?;
    mgr.url_to_domain.write()
}

/// Index word occurrences for terms in `common_words` into the counted
/// level, tracking per-domain document sizes for the later score pass.
pub fn ingest_word_files(
    mgr: &IndexManager,
    paths: &[PathBuf],
    n_threads: usize,
    common_words: &HashSet<u64>,
) -> Result<()> {
    run_pool(paths, n_threads, |path| {
        index_word_file(mgr, path, common_words)
    })?;
    mgr.word.level.builder.flush()?;
    mgr.word.save_doc_sizes()
}

/// Fan `paths` over a pool of `n_threads` workers in contiguous chunks.
/// Worker failures are per-file: logged, skipped, never fatal.
fn run_pool<F>(paths: &[PathBuf], n_threads: usize, worker: F) -> Result<()>
where
    F: Fn(&Path) -> Result<usize> + Sync,
{
    if paths.is_empty() {
        return Ok(());
    }
    let n_threads = n_threads.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build()
        .map_err(|e| IndexError::Config(format!("ingest pool: {e}")))?;

    let chunk_size = paths.len().div_ceil(n_threads);
    pool.install(|| {
        paths.par_chunks(chunk_size).for_each(|chunk| {
            for path in chunk {
                match worker(path) {
                    Ok(rows) => info!("indexed {} rows from {}", rows, path.display()),
                    Err(e) => warn!("skipping {}: {}", path.display(), e),
                }
            }
        });
    });
    Ok(())
}

fn open_lines(path: &Path) -> Result<std::io::Lines<BufReader<File>>> {
    let file = File::open(path).map_err(|e| IndexError::io(path, e))?;
    Ok(BufReader::new(file).lines())
}

fn index_text_file(mgr: &IndexManager, path: &Path) -> Result<usize> {
    let mut rows = 0;
    for line in open_lines(path)? {
        let line = line.map_err(|e| IndexError::io(path, e))?;
        let mut cols = line.split('\t');
        let url = match cols.next().and_then(ParsedUrl::parse) {
            Some(u) => u,
            None => continue,
        };
        mgr.url_to_domain.insert(url.hash, url.host_hash);

        for (col_idx, column) in cols.take(COLUMN_WEIGHTS.len()).enumerate() {
            let weight = COLUMN_WEIGHTS[col_idx];
            for word in tokenize(column) {
                let key = term_key(&word);
                mgr.domain
                    .builder
                    .add(key, DomainRecord::new(url.host_hash, weight))?;
                mgr.url.builder.add(key, UrlRecord::new(url.hash, weight))?;
            }
        }
        rows += 1;
    }
    Ok(rows)
}

fn index_link_file(mgr: &IndexManager, path: &Path) -> Result<usize> {
    let mut rows = 0;
    for line in open_lines(path)? {
        let line = line.map_err(|e| IndexError::io(path, e))?;
        let mut cols = line.split('\t');
        let source = cols.next().and_then(ParsedUrl::parse);
        let target = cols.next().and_then(ParsedUrl::parse);
        let (source, target) = match (source, target) {
            (Some(s), Some(t)) => (s, t),
            _ => continue,
        };
        let anchor = cols.next().unwrap_or("");
        let score = cols
            .next()
            .and_then(|s| s.trim().parse::<f32>().ok())
            .unwrap_or(1.0);

        // The query side needs to resolve the target URL to its domain.
        mgr.url_to_domain.insert(target.hash, target.host_hash);

        for word in tokenize(anchor) {
            let key = term_key(&word);
            mgr.url_links.builder.add(
                key,
                LinkRecord::new(target.hash, source.host_hash, score),
            )?;
            mgr.domain_links.builder.add(
                key,
                DomainLinkRecord::new(target.host_hash, source.host_hash, score),
            )?;
        }
        rows += 1;
    }
    Ok(rows)
}

fn index_word_file(mgr: &IndexManager, path: &Path, common_words: &HashSet<u64>) -> Result<usize> {
    let mut rows = 0;
    for line in open_lines(path)? {
        let line = line.map_err(|e| IndexError::io(path, e))?;
        let mut cols = line.split('\t');
        let url = match cols.next().and_then(ParsedUrl::parse) {
            Some(u) => u,
            None => continue,
        };

        let mut tokens_in_row = 0u64;
        for column in cols.take(COLUMN_WEIGHTS.len()) {
            for word in tokenize(column) {
                tokens_in_row += 1;
                let key = term_key(&word);
                if common_words.contains(&key) {
                    mgr.word
                        .level
                        .builder
                        .add(key, CountedRecord::new(url.host_hash, 1, 1.0))?;
                }
            }
        }
        // Document size counts every token, indexed or not; scores are
        // normalized by how much text the domain carries overall.
        mgr.word.add_tokens(url.host_hash, tokens_in_row);
        rows += 1;
    }
    Ok(rows)
}
