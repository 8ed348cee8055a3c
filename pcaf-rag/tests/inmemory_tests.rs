//! Property tests for embeddings, filters and search ordering over the in-memory store.

use std::sync::Arc;

use pcaf_rag::{
    Document, DocumentMetadata, DocumentStore, EmbeddingProvider, HashEmbeddingProvider,
    InMemoryDocumentStore, MetadataFilter, SearchEngine, SearchOptions, cosine_similarity,
};
use proptest::prelude::*;
use serde_json::Value;

fn arb_vector(dim: usize) -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-1.0f32..1.0f32, dim)
}

mod prop_embedding_determinism {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn same_text_same_vector(text in "\\PC{0,200}") {
            let provider = HashEmbeddingProvider::new(128);
            let a = provider.embed_text(&text);
            let b = provider.embed_text(&text);
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(a.len(), 128);

            let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            prop_assert!(norm.is_finite());
            prop_assert!(norm == 0.0 || (norm - 1.0).abs() < 1e-4);
        }
    }
}

mod prop_cosine_bounds {
    use super::*;

    const DIM: usize = 12;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn similarity_is_bounded(a in arb_vector(DIM), b in arb_vector(DIM)) {
            let s = cosine_similarity(&a, &b);
            prop_assert!((-1.0..=1.0).contains(&s));
        }

        #[test]
        fn self_similarity_is_one(a in arb_vector(DIM)) {
            prop_assume!(a.iter().any(|x| x.abs() > 1e-3));
            prop_assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-4);
        }

        #[test]
        fn zero_vector_scores_zero(a in arb_vector(DIM)) {
            prop_assert_eq!(cosine_similarity(&a, &[0.0; DIM]), 0.0);
        }
    }
}

/// A document matches a multi-key filter iff it matches every key; adding a
/// failing key to a matching filter removes the match.
mod prop_filter_and_semantics {
    use super::*;

    fn arb_metadata() -> impl Strategy<Value = DocumentMetadata> {
        (1u8..=5, prop::sample::select(vec!["low", "medium", "high"]), 0.0f64..10.0).prop_map(
            |(quality, risk, intensity)| {
                DocumentMetadata::new("loan_analysis", "test")
                    .with_data_quality(f64::from(quality))
                    .with_field("riskLevel", risk)
                    .with_field("emissionIntensity", intensity)
            },
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn conjunction_of_matching_keys(meta in arb_metadata()) {
            let risk = meta.get("riskLevel").unwrap_or(Value::Null);
            let intensity = meta.extra["emissionIntensity"].as_f64().unwrap_or_default();
            let matching = MetadataFilter::new()
                .eq("type", "loan_analysis")
                .any_of("riskLevel", [risk])
                .range("emissionIntensity", Some(intensity), Some(intensity))
                .range("dataQuality", Some(1.0), Some(5.0));
            prop_assert!(matching.matches(&meta));

            let failing =
                matching.clone().range("dataQuality", Some(meta.data_quality + 0.5), None);
            prop_assert!(!failing.matches(&meta));

            let failing = matching.eq("source", "elsewhere");
            prop_assert!(!failing.matches(&meta));
        }
    }
}

mod prop_search_ordering {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn results_sorted_and_bounded(
            texts in proptest::collection::vec("[a-z]{2,6}( [a-z]{2,6}){0,6}", 1..15),
            qualities in proptest::collection::vec(1u8..=5, 15),
            query in "[a-z]{2,6}( [a-z]{2,6}){0,3}",
            limit in 1usize..12,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (results, stored) = rt.block_on(async {
                let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::new(64));
                let store = Arc::new(InMemoryDocumentStore::new(embedder.clone()));
                let docs: Vec<Document> = texts
                    .iter()
                    .enumerate()
                    .map(|(i, text)| {
                        let meta = DocumentMetadata::new("t", "s")
                            .with_data_quality(f64::from(qualities[i]))
                            .with_tags(text.split(' ').take(1));
                        Document::new(format!("d{i}"), text.clone(), meta)
                    })
                    .collect();
                let stored = docs.len();
                store.add_documents("c", docs).await.unwrap();

                let engine = SearchEngine::builder()
                    .embedding_provider(embedder)
                    .store(store)
                    .build()
                    .unwrap();
                let options =
                    SearchOptions::builder().limit(limit).min_similarity(0.0).build().unwrap();
                (engine.search(&query, &options).await.unwrap(), stored)
            });

            prop_assert!(results.len() <= limit);
            prop_assert!(results.len() <= stored);
            for window in results.windows(2) {
                prop_assert!(
                    window[0].relevance_score >= window[1].relevance_score,
                    "results not in descending order: {} < {}",
                    window[0].relevance_score,
                    window[1].relevance_score,
                );
            }
            for result in &results {
                prop_assert!(result.relevance_score <= 1.0);
                prop_assert!(result.similarity >= 0.0);
            }
        }
    }
}
