//! Property tests for the deduplication engine.

use proptest::prelude::*;

use tail_extract::config::DedupConfig;
use tail_extract::{CandidateRecord, Deduplicator, Fingerprint, Gender};

fn gender_strategy() -> impl Strategy<Value = Option<Gender>> {
    prop_oneof![
        Just(None),
        Just(Some(Gender::Male)),
        Just(Some(Gender::Female)),
        Just(Some(Gender::Unknown)),
    ]
}

/// Small vocabularies so collisions actually happen.
fn record_strategy() -> impl Strategy<Value = CandidateRecord> {
    (
        prop::option::of(prop::sample::select(vec!["たま", "ミケ", "ハチ"])),
        prop::option::of(prop::sample::select(vec!["茶白", "三毛", "黒"])),
        prop::option::of(prop::sample::select(vec!["2歳", "成猫", "生後3ヶ月"])),
        gender_strategy(),
        prop::collection::btree_set(0u8..4, 0..3),
        prop::sample::select(vec!["table", "card", "free_text", "aggressive"]),
        0u8..3,
    )
        .prop_map(|(name, color, age, gender, images, method, salt)| CandidateRecord {
            external_id: format!("{method}_{salt}"),
            name: name.map(str::to_string),
            breed: None,
            age_estimate: age.map(str::to_string),
            gender,
            color: color.map(str::to_string),
            size: None,
            health_status: None,
            personality: None,
            special_needs: None,
            images: images
                .into_iter()
                .map(|i| format!("https://city.example.jp/img/{i}.jpg"))
                .collect(),
            protection_date: None,
            deadline_date: None,
            status: "available".to_string(),
            source_url: "https://city.example.jp/cats/".to_string(),
            extraction_method: method.to_string(),
            speculative: false,
        })
}

fn dedup(seed: u64, min_identity_fields: usize) -> Deduplicator {
    Deduplicator::new(&DedupConfig {
        fallback_seed: seed,
        min_identity_fields,
    })
}

proptest! {
    #[test]
    fn prop_idempotent(pool in prop::collection::vec(record_strategy(), 0..24), seed in 0u64..4, min in 0usize..4) {
        let d = dedup(seed, min);
        let once = d.dedupe(&pool);
        let twice = d.dedupe(&once);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn prop_never_increases(pool in prop::collection::vec(record_strategy(), 0..24), min in 0usize..4) {
        let kept = dedup(0, min).dedupe(&pool);
        prop_assert!(kept.len() <= pool.len());
    }

    #[test]
    fn prop_kept_is_ordered_subsequence(pool in prop::collection::vec(record_strategy(), 0..24)) {
        let kept = dedup(0, 0).dedupe(&pool);
        let mut rest = pool.iter();
        for record in &kept {
            prop_assert!(rest.any(|r| r == record));
        }
    }

    #[test]
    fn prop_kept_fingerprints_and_images_distinct(pool in prop::collection::vec(record_strategy(), 0..24)) {
        let kept = dedup(7, 0).dedupe(&pool);
        let mut fingerprints = std::collections::HashSet::new();
        let mut images = std::collections::HashSet::new();
        for record in &kept {
            prop_assert!(fingerprints.insert(Fingerprint::of(record, 7)));
            for url in &record.images {
                prop_assert!(images.insert(url.clone()));
            }
        }
    }

    #[test]
    fn prop_deterministic(pool in prop::collection::vec(record_strategy(), 0..24), seed in 0u64..4) {
        prop_assert_eq!(dedup(seed, 0).dedupe(&pool), dedup(seed, 0).dedupe(&pool));
    }
}
