// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! The index façade.
//!
//! [`IndexManager`] composes the levels — `domain`, `url`, `word_index` and
//! the two link indexes — behind one handle. Queries go through
//! [`IndexManager::find`]: tokenize, hash, fetch domain postings per term,
//! intersect, then apply URL-link and domain-link score corrections before
//! ranking. Queries never raise; anything that goes wrong on the read path
//! is logged and degrades to fewer results.

pub mod level;
pub mod sharded;
pub mod url_to_domain;

use std::collections::HashSet;
use std::sync::Arc;

use log::info;

use crate::config::IndexConfig;
use crate::error::Result;
use crate::hash::term_key;
use crate::pipeline::merger::Merger;
use crate::record::{
    DomainLinkRecord, DomainRecord, IndexRecord, LinkRecord, ReturnRecord, UrlRecord,
};
use crate::text::tokenize;

pub use level::{Level, WordLevel, COLUMN_WEIGHTS, COMMON_WORDS_MIN_DOMAINS};
pub use sharded::{MergeScan, ShardedBuilder, ShardedIndex};
pub use url_to_domain::UrlToDomain;

pub struct IndexManager {
    cfg: Arc<IndexConfig>,
    pub domain: Level<DomainRecord>,
    pub url: Level<UrlRecord>,
    pub word: WordLevel,
    pub url_links: Level<LinkRecord>,
    pub domain_links: Level<DomainLinkRecord>,
    pub url_to_domain: UrlToDomain,
    merger: Option<Merger>,
}

impl IndexManager {
    pub fn new(cfg: Arc<IndexConfig>) -> Result<IndexManager> {
        let domain = Level::new("domain", Arc::clone(&cfg))?;
        let url = Level::new("url", Arc::clone(&cfg))?;
        let word = WordLevel::new(Arc::clone(&cfg))?;
        let url_links = Level::new("url_links", Arc::clone(&cfg))?;
        let domain_links = Level::new("domain_links", Arc::clone(&cfg))?;
        let url_to_domain = UrlToDomain::open("domain", &cfg)?;
        Ok(IndexManager {
            cfg,
            domain,
            url,
            word,
            url_links,
            domain_links,
            url_to_domain,
            merger: None,
        })
    }

    pub fn config(&self) -> &Arc<IndexConfig> {
        &self.cfg
    }

    // ------------------------------------------------------------------
    // ingestion
    // ------------------------------------------------------------------

    /// Index a batch of local TSV files into the domain and url levels.
    pub fn add_files(&self, paths: &[std::path::PathBuf], n_threads: usize) -> Result<()> {
        crate::pipeline::ingest_text_files(self, paths, n_threads)
    }

    /// Index link files (source, target, anchor text) into the link levels.
    pub fn add_link_files(&self, paths: &[std::path::PathBuf], n_threads: usize) -> Result<()> {
        crate::pipeline::ingest_link_files(self, paths, n_threads)
    }

    /// Index word occurrences into the counted `word_index` level. Only
    /// terms in `common_words` are indexed.
    pub fn add_word_files(
        &self,
        paths: &[std::path::PathBuf],
        n_threads: usize,
        common_words: &HashSet<u64>,
    ) -> Result<()> {
        crate::pipeline::ingest_word_files(self, paths, n_threads, common_words)
    }

    // ------------------------------------------------------------------
    // maintenance
    // ------------------------------------------------------------------

    /// Flush all in-memory buffers and merge every shard of every level.
    pub fn merge(&self) -> Result<()> {
        self.domain.builder.flush()?;
        self.domain.builder.merge()?;
        self.url.builder.flush()?;
        self.url.builder.merge()?;
        self.word.level.builder.flush()?;
        self.word.level.builder.merge()?;
        self.url_links.builder.flush()?;
        self.url_links.builder.merge()?;
        self.domain_links.builder.flush()?;
        self.domain_links.builder.merge()
    }

    /// Delete every level's data.
    pub fn truncate(&self) -> Result<()> {
        self.domain.builder.truncate()?;
        self.url.builder.truncate()?;
        self.word.level.builder.truncate()?;
        self.url_links.builder.truncate()?;
        self.domain_links.builder.truncate()
    }

    /// Global pass: re-merge everything, then recompute counted scores with
    /// the common-words filter from the domain level.
    pub fn optimize(&mut self) -> Result<()> {
        self.merge()?;
        let common = self.domain.builder.get_keys(COMMON_WORDS_MIN_DOMAINS);
        info!("optimize: {} common words", common.len());
        self.word.optimize(&common)?;
        self.invalidate_readers();
        Ok(())
    }

    /// Keys present in at least `min_count` domains.
    pub fn common_words(&self, min_count: u64) -> HashSet<u64> {
        self.domain.builder.get_keys(min_count)
    }

    /// Drop all cached reader state after a merge pass.
    pub fn invalidate_readers(&mut self) {
        self.domain.reader.invalidate();
        self.url.reader.invalidate();
        self.word.level.reader.invalidate();
        self.url_links.reader.invalidate();
        self.domain_links.reader.invalidate();
    }

    // ------------------------------------------------------------------
    // background merger
    // ------------------------------------------------------------------

    /// Start the background merger over every level's builder.
    pub fn start_merge_thread(&mut self) {
        if self.merger.is_some() {
            return;
        }
        let targets: Vec<Arc<dyn MergeScan>> = vec![
            Arc::clone(&self.domain.builder) as Arc<dyn MergeScan>,
            Arc::clone(&self.url.builder) as Arc<dyn MergeScan>,
            Arc::clone(&self.word.level.builder) as Arc<dyn MergeScan>,
            Arc::clone(&self.url_links.builder) as Arc<dyn MergeScan>,
            Arc::clone(&self.domain_links.builder) as Arc<dyn MergeScan>,
        ];
        self.merger = Some(Merger::start(targets, Arc::clone(&self.cfg)));
    }

    /// Suspend merging but keep appends flowing; returns once any in-flight
    /// shard mutation has drained.
    pub fn stop_merge_thread_only_append(&self) {
        if let Some(merger) = &self.merger {
            merger.stop_only_append();
        }
    }

    /// Stop and join the merger thread.
    pub fn stop_merge_thread(&mut self) {
        if let Some(merger) = self.merger.take() {
            merger.stop();
        }
    }

    // ------------------------------------------------------------------
    // queries
    // ------------------------------------------------------------------

    /// Ranked domain results for a free-text query.
    pub fn find(&mut self, query: &str) -> Vec<ReturnRecord> {
        let mut keys = Vec::new();
        let mut seen = HashSet::new();
        for word in tokenize(query) {
            let key = term_key(&word);
            if seen.insert(key) {
                keys.push(key);
            }
        }
        if keys.is_empty() {
            return Vec::new();
        }

        // Intersect per-term posting lists, summing scores across terms.
        let mut results: Option<Vec<ReturnRecord>> = None;
        for &key in &keys {
            let postings = self.domain.find_sorted(key);
            let next = match results.take() {
                None => postings
                    .iter()
                    .map(|r| ReturnRecord::new(r.value, r.score))
                    .collect(),
                Some(acc) => intersect_postings(&acc, &postings),
            };
            if next.is_empty() {
                return Vec::new();
            }
            results = Some(next);
        }
        let mut results = results.unwrap_or_default();

        // Link corrections. URL links point at URLs; translate each target
        // to its owning domain before the merge-join against domain results.
        let mut url_link_targets: Vec<(u64, u64, f32)> = Vec::new();
        let mut domain_link_targets: Vec<(u64, u64, f32)> = Vec::new();
        for &key in &keys {
            for link in self.url_links.find_sorted(key) {
                if let Some(domain) = self.url_to_domain.get(link.value) {
                    url_link_targets.push((domain, link.source_domain, link.score));
                }
            }
            for link in self.domain_links.find_sorted(key) {
                domain_link_targets.push((link.value, link.source_domain, link.score));
            }
        }
        url_link_targets.sort_unstable_by_key(|&(target, source, _)| (target, source));
        domain_link_targets.sort_unstable_by_key(|&(target, source, _)| (target, source));

        apply_link_boosts(&url_link_targets, &mut results, LinkKind::Url);
        apply_link_boosts(&domain_link_targets, &mut results, LinkKind::Domain);

        results.sort_unstable_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results
    }
}

/// Merge-join two value-sorted runs, keeping values present in both and
/// summing scores.
fn intersect_postings<R: IndexRecord>(acc: &[ReturnRecord], postings: &[R]) -> Vec<ReturnRecord> {
    let mut out = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < acc.len() && j < postings.len() {
        match acc[i].value.cmp(&postings[j].value()) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                let mut merged = acc[i];
                merged.score += postings[j].score();
                out.push(merged);
                i += 1;
                j += 1;
            }
        }
    }
    out
}

#[derive(Clone, Copy)]
enum LinkKind {
    Url,
    Domain,
}

/// Apply link boosts to value-sorted results. Each (source domain, target)
/// pair counts once no matter how many links carried it.
fn apply_link_boosts(
    links: &[(u64, u64, f32)],
    results: &mut [ReturnRecord],
    kind: LinkKind,
) -> usize {
    let mut applied = 0;
    let mut seen: HashSet<(u64, u64)> = HashSet::new();
    let (mut i, mut j) = (0, 0);
    while i < links.len() && j < results.len() {
        let (target, source, score) = links[i];
        match target.cmp(&results[j].value) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                if seen.insert((source, target)) {
                    results[j].score += (25.0f32 * score).exp_m1() / 50.0;
                    match kind {
                        LinkKind::Url => results[j].num_url_links += 1,
                        LinkKind::Domain => results[j].num_domain_links += 1,
                    }
                    applied += 1;
                }
                i += 1;
            }
        }
    }
    applied
}
