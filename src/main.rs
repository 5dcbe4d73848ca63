// Copyright 2025-present Harīṣh Tummalachērla
// SPDX-License-Identifier: Apache-2.0

//! crawldex CLI: ingest crawl batches, query, and maintain the index.
//!
//! ```bash
//! # Index a batch of TSV files
//! crawldex index batch/*.tsv --threads 24
//!
//! # Query ranked domains
//! crawldex search "rust systems programming"
//!
//! # Re-merge everything and recompute counted scores
//! crawldex optimize
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crawldex::{harmonic_centrality, IndexConfig, IndexManager};

#[derive(Parser)]
#[command(name = "crawldex", version, about = "Sharded inverted-index search engine")]
struct Cli {
    /// Path to a TOML config file; defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index text TSV files into the domain and url levels.
    Index {
        /// Local TSV files (already downloaded and decompressed).
        files: Vec<PathBuf>,
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Index link files (source, target, anchor text).
    IndexLinks {
        files: Vec<PathBuf>,
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Index word occurrences for common terms into the counted level.
    IndexWords {
        files: Vec<PathBuf>,
        #[arg(long)]
        threads: Option<usize>,
        /// Minimum domains a term must appear in to be indexed.
        #[arg(long, default_value_t = crawldex::COMMON_WORDS_MIN_DOMAINS)]
        min_domains: u64,
    },
    /// Query ranked domains.
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Merge every shard of every level.
    Merge,
    /// Re-merge everything and recompute counted-level scores.
    Optimize,
    /// Delete all index data.
    Truncate,
    /// Compute harmonic centrality from an edge-list file (`from \t to`).
    Harmonic {
        edges: PathBuf,
        #[arg(long, default_value_t = 12)]
        threads: usize,
    },
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => IndexConfig::from_file(path).unwrap_or_else(|e| {
            eprintln!("error: {e}");
            std::process::exit(1);
        }),
        None => Arc::new(IndexConfig::default()),
    };

    if let Err(e) = run(cli.command, cfg) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run(command: Commands, cfg: Arc<IndexConfig>) -> crawldex::Result<()> {
    match command {
        Commands::Index { files, threads } => {
            let threads = threads.unwrap_or(cfg.ingest_threads);
            let mut index = IndexManager::new(cfg)?;
            index.start_merge_thread();

            let spinner = ingest_spinner(format!("indexing {} files", files.len()));
            let started = Instant::now();
            index.add_files(&files, threads)?;
            index.stop_merge_thread();
            index.merge()?;
            spinner.finish_with_message(format!(
                "indexed {} files in {:.1}s",
                files.len(),
                started.elapsed().as_secs_f64()
            ));
            Ok(())
        }
        Commands::IndexLinks { files, threads } => {
            let threads = threads.unwrap_or(cfg.ingest_threads);
            let index = IndexManager::new(cfg)?;
            let spinner = ingest_spinner(format!("indexing {} link files", files.len()));
            index.add_link_files(&files, threads)?;
            index.url_links.builder.merge()?;
            index.domain_links.builder.merge()?;
            spinner.finish_with_message("link index merged");
            Ok(())
        }
        Commands::IndexWords {
            files,
            threads,
            min_domains,
        } => {
            let threads = threads.unwrap_or(cfg.ingest_threads);
            let mut index = IndexManager::new(cfg)?;
            let common: HashSet<u64> = index.common_words(min_domains);
            println!("{} common words", common.len());

            let spinner = ingest_spinner(format!("indexing {} word files", files.len()));
            index.add_word_files(&files, threads, &common)?;
            index.word.optimize(&common)?;
            index.invalidate_readers();
            spinner.finish_with_message("word index merged");
            Ok(())
        }
        Commands::Search { query, limit } => {
            let mut index = IndexManager::new(cfg)?;
            let started = Instant::now();
            let results = index.find(&query);
            let elapsed = started.elapsed();

            println!(
                "{:>18}  {:>10}  {:>9}  {:>9}",
                "domain", "score", "url_links", "dom_links"
            );
            for result in results.iter().take(limit) {
                println!(
                    "{:#018x}  {:>10.3}  {:>9}  {:>9}",
                    result.value, result.score, result.num_url_links, result.num_domain_links
                );
            }
            println!(
                "{} results in {:.2}ms",
                results.len(),
                elapsed.as_secs_f64() * 1000.0
            );
            Ok(())
        }
        Commands::Merge => {
            let index = IndexManager::new(cfg)?;
            index.merge()
        }
        Commands::Optimize => {
            let mut index = IndexManager::new(cfg)?;
            index.optimize()
        }
        Commands::Truncate => {
            let index = IndexManager::new(cfg)?;
            index.truncate()
        }
        Commands::Harmonic { edges, threads } => {
            let edge_map = read_edge_list(&edges)?;
            let harmonic = harmonic_centrality(&edge_map, threads);
            for (v, score) in harmonic.iter().enumerate() {
                println!("{v}\t{score:.6}");
            }
            Ok(())
        }
    }
}

fn ingest_spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner
}

/// Read `from \t to` vertex pairs into an in-neighbor adjacency map.
fn read_edge_list(path: &PathBuf) -> crawldex::Result<Vec<Vec<u32>>> {
    use std::io::BufRead;

    let file = std::fs::File::open(path).map_err(|e| crawldex::IndexError::io(path, e))?;
    let mut edges: Vec<(u32, u32)> = Vec::new();
    let mut max_vertex = 0u32;
    for line in std::io::BufReader::new(file).lines() {
        let line = line.map_err(|e| crawldex::IndexError::io(path, e))?;
        let mut cols = line.split('\t');
        let from = cols.next().and_then(|s| s.trim().parse().ok());
        let to = cols.next().and_then(|s| s.trim().parse().ok());
        if let (Some(from), Some(to)) = (from, to) {
            max_vertex = max_vertex.max(from).max(to);
            edges.push((from, to));
        }
    }

    let mut map = vec![Vec::new(); (max_vertex as usize) + usize::from(!edges.is_empty())];
    for (from, to) in edges {
        map[to as usize].push(from);
    }
    Ok(map)
}
