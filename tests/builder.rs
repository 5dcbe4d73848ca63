//! Shard builder and reader scenarios: the add → append → merge → find
//! lifecycle, truncation, directory lookups, corruption self-healing.

mod common;

use std::collections::HashSet;
use std::io::{Seek, SeekFrom};

use common::{roomy_config, small_config, SplitMix64};
use crawldex::shard::codec::read_page_header;
use crawldex::shard::directory::{KeyDirectory, EMPTY_SLOT};
use crawldex::shard::{ShardBuilder, ShardFiles, ShardReader};
use crawldex::{term_key, CountedRecord, DomainRecord, ShardedBuilder, ShardedIndex};

#[test]
fn basic_add_find() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config(dir.path());
    crawldex::shard::create_directories(&cfg, "main").unwrap();

    let alpha = term_key("alpha");
    let beta = term_key("beta");

    let mut builder = ShardBuilder::new("main", 0, cfg.clone());
    builder.add(alpha, DomainRecord::new(1, 10.0));
    builder.add(alpha, DomainRecord::new(2, 3.0));
    builder.add(beta, DomainRecord::new(1, 2.0));
    builder.append().unwrap();
    builder.merge().unwrap();

    let mut reader = ShardReader::<DomainRecord>::new("main", 0, cfg);
    let found = reader.find(alpha).unwrap();
    assert_eq!(found.len(), 2);
    assert_eq!((found[0].value, found[0].score), (1, 10.0));
    assert_eq!((found[1].value, found[1].score), (2, 3.0));

    let found = reader.find(beta).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!((found[0].value, found[0].score), (1, 2.0));

    assert!(reader.find(term_key("missing")).unwrap().is_empty());
}

#[test]
fn coalesce_sums_counts_across_appends() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config(dir.path());
    crawldex::shard::create_directories(&cfg, "counted").unwrap();

    let key = term_key("k");
    let mut builder = ShardBuilder::new("counted", 0, cfg.clone());
    for _ in 0..5 {
        builder.add(key, CountedRecord::new(7, 1, 1.0));
        builder.append().unwrap();
    }
    builder.merge().unwrap();

    let mut reader = ShardReader::<CountedRecord>::new("counted", 0, cfg);
    let found = reader.find(key).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].value, 7);
    assert_eq!(found[0].count, 5);
    assert!((found[0].score - 5.0).abs() < f32::EPSILON);
}

#[test]
fn truncation_keeps_top_scores_in_value_sorted_sections() {
    // P = 2, S = 2: ten records collapse to the four highest-scoring.
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config(dir.path());
    crawldex::shard::create_directories(&cfg, "main").unwrap();

    let key = term_key("crowded");
    let mut builder = ShardBuilder::new("main", 0, cfg.clone());
    for v in 1..=10u64 {
        builder.add(key, DomainRecord::new(v, v as f32));
    }
    builder.append().unwrap();
    builder.merge().unwrap();

    let mut reader = ShardReader::<DomainRecord>::new("main", 0, cfg);
    let found = reader.find(key).unwrap();
    assert_eq!(found.len(), 4);

    let mut values: Vec<u64> = found.iter().map(|r| r.value).collect();
    values.sort_unstable();
    assert_eq!(values, vec![7, 8, 9, 10]);

    // Each section of P records is ascending by value.
    assert!(found[0].value < found[1].value);
    assert!(found[2].value < found[3].value);
}

#[test]
fn merge_is_idempotent_byte_for_byte() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config(dir.path());
    crawldex::shard::create_directories(&cfg, "main").unwrap();

    let mut builder = ShardBuilder::new("main", 0, cfg.clone());
    builder.add(term_key("alpha"), DomainRecord::new(1, 10.0));
    builder.add(term_key("alpha"), DomainRecord::new(2, 3.0));
    builder.add(term_key("beta"), DomainRecord::new(1, 2.0));
    builder.append().unwrap();
    builder.merge().unwrap();

    let files = ShardFiles::new(&cfg, "main", 0);
    let data_before = std::fs::read(&files.data).unwrap();
    let keys_before = std::fs::read(&files.keys).unwrap();
    let unique_before = builder.unique_count().unwrap();

    builder.merge().unwrap();

    assert_eq!(std::fs::read(&files.data).unwrap(), data_before);
    assert_eq!(std::fs::read(&files.keys).unwrap(), keys_before);
    assert_eq!(builder.unique_count().unwrap(), unique_before);
}

#[test]
fn directory_slots_point_to_pages_containing_their_keys() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config(dir.path());
    crawldex::shard::create_directories(&cfg, "main").unwrap();

    let keys: Vec<u64> = (0..50u64).map(|i| term_key(&format!("term-{i}"))).collect();
    let mut builder = ShardBuilder::new("main", 0, cfg.clone());
    for &key in &keys {
        builder.add(key, DomainRecord::new(key ^ 1, 1.0));
    }
    builder.append().unwrap();
    builder.merge().unwrap();

    let files = ShardFiles::new(&cfg, "main", 0);
    let directory = KeyDirectory::new(&files.keys, cfg.hash_table_size);
    let slots = directory.load().unwrap().unwrap();
    assert_eq!(slots.len(), cfg.hash_table_size as usize);

    let mut data = std::fs::File::open(&files.data).unwrap();
    for &key in &keys {
        let offset = slots[(key % cfg.hash_table_size) as usize];
        assert_ne!(offset, EMPTY_SLOT, "key {key:#x} has no page");
        data.seek(SeekFrom::Start(offset)).unwrap();
        let header = read_page_header(&mut data, cfg.max_keys_per_page)
            .unwrap()
            .unwrap();
        assert!(
            header.find(key).is_some(),
            "page at {offset} is missing key {key:#x}"
        );
    }
}

#[test]
fn shard_routing_is_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config(dir.path());

    let sharded = ShardedBuilder::<DomainRecord>::new("routing", cfg.clone()).unwrap();
    let mut rng = SplitMix64(0xC0FFEE);
    let keys: Vec<u64> = (0..1000).map(|_| rng.next()).collect();
    for &key in &keys {
        sharded.add(key, DomainRecord::new(rng.next(), 1.0)).unwrap();
    }
    sharded.flush().unwrap();
    sharded.merge().unwrap();

    let mut readers: Vec<ShardReader<DomainRecord>> = (0..cfg.n_shards)
        .map(|id| ShardReader::new("routing", id, cfg.clone()))
        .collect();

    for &key in keys.iter().take(100) {
        for (id, reader) in readers.iter_mut().enumerate() {
            let found = reader.find(key).unwrap();
            if id as u64 == key % cfg.n_shards {
                assert!(!found.is_empty(), "key {key:#x} missing from home shard");
            } else {
                assert!(found.is_empty(), "key {key:#x} leaked into shard {id}");
            }
        }
    }

    // The façade routes to the same shard.
    let mut index = ShardedIndex::<DomainRecord>::new("routing", cfg);
    for &key in keys.iter().take(100) {
        assert!(!index.find(key).unwrap().is_empty());
    }
}

#[test]
fn unique_count_is_monotone_over_supersets() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = roomy_config(dir.path());
    crawldex::shard::create_directories(&cfg, "subset").unwrap();
    crawldex::shard::create_directories(&cfg, "superset").unwrap();

    let key = term_key("w");
    let mut subset = ShardBuilder::new("subset", 0, cfg.clone());
    for v in 0..500u64 {
        subset.add(key, DomainRecord::new(v, 1.0));
    }
    subset.append().unwrap();
    subset.merge().unwrap();

    let mut superset = ShardBuilder::new("superset", 0, cfg.clone());
    for v in 0..1000u64 {
        superset.add(key, DomainRecord::new(v, 1.0));
    }
    superset.append().unwrap();
    superset.merge().unwrap();

    assert!(superset.unique_count().unwrap() >= subset.unique_count().unwrap());
}

#[test]
fn hll_survives_incremental_merges() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = roomy_config(dir.path());
    crawldex::shard::create_directories(&cfg, "inc").unwrap();

    let key = term_key("w");
    let mut builder = ShardBuilder::new("inc", 0, cfg.clone());
    for batch in 0..4u64 {
        for v in (batch * 250)..((batch + 1) * 250) {
            builder.add(key, DomainRecord::new(v, 1.0));
        }
        builder.append().unwrap();
        builder.merge().unwrap();
    }

    let count = builder.unique_count().unwrap() as f64;
    assert!(
        (count - 1000.0).abs() / 1000.0 < 0.05,
        "unique estimate {count} too far from 1000"
    );
}

#[test]
fn spill_files_stay_in_lockstep() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config(dir.path());
    crawldex::shard::create_directories(&cfg, "spill").unwrap();

    let mut builder = ShardBuilder::new("spill", 0, cfg.clone());
    for i in 0..37u64 {
        builder.add(i, DomainRecord::new(i, 1.0));
    }
    builder.append().unwrap();

    let files = ShardFiles::new(&cfg, "spill", 0);
    let record_bytes = std::fs::metadata(&files.cache).unwrap().len();
    let key_bytes = std::fs::metadata(&files.cache_keys).unwrap().len();
    assert_eq!(record_bytes, 37 * 12);
    assert_eq!(key_bytes, 37 * 8);
    assert_eq!(builder.spill_size(), record_bytes);
}

#[test]
fn corrupt_data_file_rebuilds_empty() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config(dir.path());
    crawldex::shard::create_directories(&cfg, "corrupt").unwrap();

    let files = ShardFiles::new(&cfg, "corrupt", 0);
    // A header claiming u64::MAX keys.
    std::fs::write(&files.data, u64::MAX.to_le_bytes()).unwrap();

    let mut builder = ShardBuilder::<DomainRecord>::new("corrupt", 0, cfg.clone());
    builder.add(1, DomainRecord::new(1, 1.0));
    builder.append().unwrap();
    builder.merge().unwrap();

    // The shard rebuilt empty and is usable again.
    let mut reader = ShardReader::<DomainRecord>::new("corrupt", 0, cfg);
    assert!(reader.find(1).unwrap().is_empty());

    builder.add(2, DomainRecord::new(2, 1.0));
    builder.append().unwrap();
    builder.merge().unwrap();
    reader.invalidate();
    assert_eq!(reader.find(2).unwrap().len(), 1);
}

#[test]
fn short_data_file_rebuilds_empty() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config(dir.path());
    crawldex::shard::create_directories(&cfg, "short").unwrap();

    let mut builder = ShardBuilder::new("short", 0, cfg.clone());
    builder.add(1, DomainRecord::new(1, 1.0));
    builder.add(1, DomainRecord::new(2, 1.0));
    builder.append().unwrap();
    builder.merge().unwrap();

    // Chop the tail off the payload region.
    let files = ShardFiles::new(&cfg, "short", 0);
    let data = std::fs::read(&files.data).unwrap();
    std::fs::write(&files.data, &data[..data.len() - 5]).unwrap();

    builder.merge().unwrap();
    let mut reader = ShardReader::<DomainRecord>::new("short", 0, cfg);
    assert!(reader.find(1).unwrap().is_empty());
}

#[test]
fn truncate_deletes_everything() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config(dir.path());
    crawldex::shard::create_directories(&cfg, "trunc").unwrap();

    let mut builder = ShardBuilder::new("trunc", 0, cfg.clone());
    builder.add(1, DomainRecord::new(1, 1.0));
    builder.append().unwrap();
    builder.merge().unwrap();

    let files = ShardFiles::new(&cfg, "trunc", 0);
    assert!(files.data.exists());

    builder.truncate().unwrap();
    assert!(!files.data.exists());
    assert!(!files.keys.exists());
    assert!(!files.meta.exists());
    assert_eq!(std::fs::metadata(&files.cache).unwrap().len(), 0);

    let mut reader = ShardReader::<DomainRecord>::new("trunc", 0, cfg);
    assert!(reader.find(1).unwrap().is_empty());
}

#[test]
fn truncate_cache_drops_spill_but_keeps_data() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config(dir.path());
    crawldex::shard::create_directories(&cfg, "tc").unwrap();

    let mut builder = ShardBuilder::new("tc", 0, cfg.clone());
    builder.add(1, DomainRecord::new(1, 1.0));
    builder.append().unwrap();
    builder.merge().unwrap();

    // New spill that then gets dropped before a merge.
    builder.add(2, DomainRecord::new(2, 9.0));
    builder.append().unwrap();
    builder.truncate_cache().unwrap();
    builder.merge().unwrap();

    let mut reader = ShardReader::<DomainRecord>::new("tc", 0, cfg);
    assert_eq!(reader.find(1).unwrap().len(), 1);
    assert!(reader.find(2).unwrap().is_empty());
}

#[test]
fn get_keys_filters_by_total_results() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = roomy_config(dir.path());

    let sharded = ShardedBuilder::<DomainRecord>::new("totals", cfg).unwrap();
    let common = term_key("common");
    let rare = term_key("rare");
    for v in 0..10u64 {
        sharded.add(common, DomainRecord::new(v, 1.0)).unwrap();
    }
    sharded.add(rare, DomainRecord::new(1, 1.0)).unwrap();
    sharded.flush().unwrap();
    sharded.merge().unwrap();

    let all: HashSet<u64> = sharded.get_keys(1);
    assert!(all.contains(&common));
    assert!(all.contains(&rare));

    let frequent: HashSet<u64> = sharded.get_keys(5);
    assert!(frequent.contains(&common));
    assert!(!frequent.contains(&rare));
}

#[test]
fn empty_and_missing_shards_read_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = small_config(dir.path());
    crawldex::shard::create_directories(&cfg, "empty").unwrap();

    // Missing files entirely.
    let mut reader = ShardReader::<DomainRecord>::new("empty", 0, cfg.clone());
    assert!(reader.find(42).unwrap().is_empty());

    // Zero-length data file, no directory.
    let files = ShardFiles::new(&cfg, "empty", 1);
    std::fs::write(&files.data, b"").unwrap();
    let mut reader = ShardReader::<DomainRecord>::new("empty", 1, cfg);
    assert!(reader.find(42).unwrap().is_empty());
}
