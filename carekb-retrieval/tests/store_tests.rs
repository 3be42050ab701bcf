//! Property tests for index store search ordering and rebuild behavior.

use std::collections::HashMap;

use carekb_retrieval::document::{Chunk, EmbeddingRecord, IndexEntry, Language};
use carekb_retrieval::index::IndexStore;
use proptest::prelude::*;

const DIM: usize = 16;
const MODEL: &str = "test-model/1";

/// Generate a non-zero L2-normalized embedding of the given dimension.
fn arb_normalized_embedding(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim).prop_filter_map(
        "non-zero embedding",
        |mut v| {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm < 1e-8 {
                return None;
            }
            for val in &mut v {
                *val /= norm;
            }
            Some(v)
        },
    )
}

/// Generate an index entry with a normalized embedding and real tokens.
fn arb_entry(dim: usize) -> impl Strategy<Value = IndexEntry> {
    ("[a-z]{3,8}", "[a-z]{3,8}( [a-z]{3,8}){1,4}", arb_normalized_embedding(dim)).prop_map(
        |(id, text, vector)| IndexEntry {
            chunk: Chunk {
                id,
                text: text.clone(),
                language: Language::En,
                heading_path: Vec::new(),
                ordinal: 0,
                overlap: 0,
                document_id: "doc".to_string(),
                category: "general".to_string(),
                source: "test".to_string(),
                last_updated: None,
            },
            embedding: EmbeddingRecord { vector, model_id: MODEL.to_string() },
            tokens: carekb_retrieval::lexical::tokenize(&text),
        },
    )
}

fn dedup_by_id(entries: &[IndexEntry]) -> Vec<IndexEntry> {
    let mut deduped: HashMap<String, IndexEntry> = HashMap::new();
    for entry in entries {
        deduped.entry(entry.chunk.id.clone()).or_insert_with(|| entry.clone());
    }
    deduped.into_values().collect()
}

/// For any stored entries, vector search returns results ordered by
/// descending score and bounded by both `top_k` and the store size.
mod prop_vector_search_ordering {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn results_ordered_descending_and_bounded_by_top_k(
            entries in proptest::collection::vec(arb_entry(DIM), 1..20),
            query in arb_normalized_embedding(DIM),
            top_k in 1usize..25,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (results, unique_count) = rt.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let store = IndexStore::open(dir.path().join("index.json"), MODEL, DIM)
                    .await
                    .unwrap();
                let unique = dedup_by_id(&entries);
                let count = unique.len();
                store.upsert(unique).await.unwrap();
                (store.vector_search(&query, top_k).await, count)
            });

            prop_assert!(results.len() <= top_k);
            prop_assert!(results.len() <= unique_count);
            for pair in results.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
            }
        }
    }
}

/// Resetting with any entry set leaves the store holding exactly the
/// unique entries of that set, regardless of what it held before.
mod prop_reset_rebuilds_exactly {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn count_matches_unique_ids_after_reset(
            before in proptest::collection::vec(arb_entry(DIM), 0..10),
            after in proptest::collection::vec(arb_entry(DIM), 0..10),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (count, expected) = rt.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let store = IndexStore::open(dir.path().join("index.json"), MODEL, DIM)
                    .await
                    .unwrap();
                store.upsert(dedup_by_id(&before)).await.unwrap();
                let unique_after = dedup_by_id(&after);
                let expected = unique_after.len();
                store.reset(unique_after).await.unwrap();
                (store.count().await, expected)
            });
            prop_assert_eq!(count, expected);
        }
    }
}

/// Upserting the same entries a second time changes nothing.
mod prop_upsert_idempotent {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn repeated_upsert_leaves_store_unchanged(
            entries in proptest::collection::vec(arb_entry(DIM), 1..10),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (once, twice) = rt.block_on(async {
                let dir = tempfile::tempdir().unwrap();
                let store = IndexStore::open(dir.path().join("index.json"), MODEL, DIM)
                    .await
                    .unwrap();
                let unique = dedup_by_id(&entries);
                store.upsert(unique.clone()).await.unwrap();
                let once = store.entries().await;
                store.upsert(unique).await.unwrap();
                (once, store.entries().await)
            });
            prop_assert_eq!(once, twice);
        }
    }
}
