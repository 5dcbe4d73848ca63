//! End-to-end ingestion: TSV batches through the thread pool, merge, query,
//! link corrections, the counted word level, and merger thread control.

mod common;

use std::io::Write;
use std::path::PathBuf;

use common::small_config;
use crawldex::{term_key, IndexManager, ReturnRecord};

/// Write a TSV file under `dir` and return its path.
fn write_tsv(dir: &std::path::Path, name: &str, rows: &[&str]) -> PathBuf {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    for row in rows {
        writeln!(file, "{row}").unwrap();
    }
    path
}

fn domain_hash(host: &str) -> u64 {
    term_key(host)
}

fn result_for(results: &[ReturnRecord], value: u64) -> Option<ReturnRecord> {
    results.iter().find(|r| r.value == value).copied()
}

#[test]
fn index_and_search_text_batch() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    std::fs::create_dir_all(&input).unwrap();
    let cfg = small_config(&dir.path().join("index"));

    let batch = write_tsv(
        &input,
        "batch-0.tsv",
        &[
            "https://www.alpha.com/page\thello world\tgreetings page\talpha things\ttail text",
            "https://beta.org/post\thello rust\tsystems\tbeta things\tmore tail",
            "not a url\tskipped\trow\tshould\tsurvive",
        ],
    );

    let mut index = IndexManager::new(cfg).unwrap();
    index.add_files(&[batch], 2).unwrap();
    index.merge().unwrap();

    // "hello" appears in both domains, column 1, weight 10.
    let results = index.find("hello");
    assert_eq!(results.len(), 2);
    let alpha = result_for(&results, domain_hash("alpha.com")).unwrap();
    let beta = result_for(&results, domain_hash("beta.org")).unwrap();
    assert!((alpha.score - 10.0).abs() < 1e-5);
    assert!((beta.score - 10.0).abs() < 1e-5);

    // "world" only in alpha.
    let results = index.find("world");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].value, domain_hash("alpha.com"));

    // Multi-term queries intersect, summing per-term scores.
    let results = index.find("hello rust");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].value, domain_hash("beta.org"));
    assert!((results[0].score - 20.0).abs() < 1e-5);

    // Empty and unknown queries come back empty without error.
    assert!(index.find("").is_empty());
    assert!(index.find("zzz_unknown_term").is_empty());

    // The url level tracked per-URL postings too.
    let url_postings = index.url.find_sorted(term_key("hello"));
    assert_eq!(url_postings.len(), 2);

    // The url→domain store learned both URLs.
    assert_eq!(index.url_to_domain.len(), 2);
}

#[test]
fn link_files_boost_target_domains() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    std::fs::create_dir_all(&input).unwrap();
    let cfg = small_config(&dir.path().join("index"));

    let text = write_tsv(
        &input,
        "text.tsv",
        &[
            "https://alpha.com/page\tsearch engines\talpha\talpha\talpha",
            "https://beta.org/post\tsearch engines\tbeta\tbeta\tbeta",
        ],
    );
    // Two distinct source domains link to alpha's page with matching anchor
    // text; one of them repeats (the repeat must not double-count).
    let links = write_tsv(
        &input,
        "links.tsv",
        &[
            "https://gamma.net/a\thttps://alpha.com/page\tsearch\t0.2",
            "https://gamma.net/b\thttps://alpha.com/page\tsearch\t0.2",
            "https://delta.io/c\thttps://alpha.com/page\tsearch\t0.1",
        ],
    );

    let mut index = IndexManager::new(cfg).unwrap();
    index.add_files(&[text], 2).unwrap();
    index.add_link_files(&[links], 2).unwrap();
    index.merge().unwrap();

    let results = index.find("search");
    let alpha = result_for(&results, domain_hash("alpha.com")).unwrap();
    let beta = result_for(&results, domain_hash("beta.org")).unwrap();

    // Alpha got two unique url-link sources and two domain-link sources.
    assert_eq!(alpha.num_url_links, 2);
    assert_eq!(alpha.num_domain_links, 2);
    assert_eq!(beta.num_url_links, 0);
    assert!(alpha.score > beta.score);
    // Ranked output: alpha first.
    assert_eq!(results[0].value, domain_hash("alpha.com"));
}

#[test]
fn word_level_counts_and_optimize_scores() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    std::fs::create_dir_all(&input).unwrap();
    let cfg = small_config(&dir.path().join("index"));

    // "engine" appears 3 times for alpha (longer doc) and once for beta
    // (shorter doc): after normalization beta must outrank alpha.
    let text = write_tsv(
        &input,
        "text.tsv",
        &[
            "https://alpha.com/page\tengine engine engine pad pad pad pad pad pad pad\t\t\t",
            "https://beta.org/post\tengine pad\t\t\t",
        ],
    );

    let mut index = IndexManager::new(cfg).unwrap();
    index.add_files(&[text.clone()], 2).unwrap();
    index.merge().unwrap();

    // Every term in at least one domain is "common" for this test.
    let common = index.common_words(1);
    assert!(common.contains(&term_key("engine")));

    index.add_word_files(&[text], 2, &common).unwrap();
    index.word.level.builder.flush().unwrap();
    index.word.optimize(&common).unwrap();
    index.invalidate_readers();

    let postings = index.word.level.reader.find(term_key("engine")).unwrap();
    assert_eq!(postings.len(), 2);

    // Scores are count / document_size, sorted descending.
    let alpha_size = index.word.document_size(domain_hash("alpha.com"));
    let beta_size = index.word.document_size(domain_hash("beta.org"));
    assert_eq!(alpha_size, 10);
    assert_eq!(beta_size, 2);

    assert_eq!(postings[0].value, domain_hash("beta.org"));
    assert_eq!(postings[0].count, 1);
    assert!((postings[0].score - 0.5).abs() < 1e-5);
    assert_eq!(postings[1].value, domain_hash("alpha.com"));
    assert_eq!(postings[1].count, 3);
    assert!((postings[1].score - 0.3).abs() < 1e-5);
    assert!(postings[0].score >= postings[1].score);
}

#[test]
fn optimize_drops_terms_below_common_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    std::fs::create_dir_all(&input).unwrap();
    let cfg = small_config(&dir.path().join("index"));

    let text = write_tsv(
        &input,
        "text.tsv",
        &[
            "https://alpha.com/page\tshared rare\t\t\t",
            "https://beta.org/post\tshared other\t\t\t",
        ],
    );

    let mut index = IndexManager::new(cfg).unwrap();
    index.add_files(&[text.clone()], 2).unwrap();
    index.merge().unwrap();

    // Words in >= 2 domains: only "shared".
    let common = index.common_words(2);
    assert!(common.contains(&term_key("shared")));
    assert!(!common.contains(&term_key("rare")));

    index.add_word_files(&[text], 2, &common).unwrap();
    index.word.level.builder.flush().unwrap();
    index.word.optimize(&common).unwrap();
    index.invalidate_readers();

    assert_eq!(
        index
            .word
            .level
            .reader
            .find(term_key("shared"))
            .unwrap()
            .len(),
        2
    );
    assert!(index
        .word
        .level
        .reader
        .find(term_key("rare"))
        .unwrap()
        .is_empty());
}

#[test]
fn merger_thread_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    std::fs::create_dir_all(&input).unwrap();
    let cfg = small_config(&dir.path().join("index"));

    let batch = write_tsv(
        &input,
        "batch.tsv",
        &["https://alpha.com/page\thello merger thread\t\t\t"],
    );

    let mut index = IndexManager::new(cfg).unwrap();
    index.start_merge_thread();
    // Idempotent: a second start is a no-op.
    index.start_merge_thread();

    index.add_files(&[batch], 2).unwrap();

    // Suspend merging, keep appends legal, then stop for the query phase.
    index.stop_merge_thread_only_append();
    index.stop_merge_thread();
    index.merge().unwrap();

    let results = index.find("merger");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].value, domain_hash("alpha.com"));
}

#[test]
fn truncate_resets_the_whole_index() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input");
    std::fs::create_dir_all(&input).unwrap();
    let cfg = small_config(&dir.path().join("index"));

    let batch = write_tsv(
        &input,
        "batch.tsv",
        &["https://alpha.com/page\thello\t\t\t"],
    );

    let mut index = IndexManager::new(cfg).unwrap();
    index.add_files(&[batch], 2).unwrap();
    index.merge().unwrap();
    assert_eq!(index.find("hello").len(), 1);

    index.truncate().unwrap();
    index.invalidate_readers();
    assert!(index.find("hello").is_empty());
}
