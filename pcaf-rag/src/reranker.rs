//! Reranker trait and the relevance reranker used by search.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::document::SearchResult;
use crate::error::Result;

/// A reranker that re-scores and reorders search results.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Rerank search results given the original query.
    ///
    /// Returns results in a new order with potentially updated scores.
    async fn rerank(&self, query: &str, results: Vec<SearchResult>) -> Result<Vec<SearchResult>>;
}

const QUALITY_WEIGHT: f32 = 0.1;
const RECENCY_WEIGHT: f32 = 0.1;
const RECENCY_WINDOW_DAYS: f32 = 30.0;
const TAG_MATCH_WEIGHT: f32 = 0.05;

/// Adds quality, recency and tag-overlap bonuses to the cosine similarity.
///
/// ```text
/// relevance = similarity
///           + (5 - dataQuality) * 0.1
///           + max(0, (30 - ageDays) / 30) * 0.1
///           + 0.05 * |query words found inside any tag|
/// ```
///
/// clamped to `[0, 1]`. Ordering is by relevance descending; ties keep their
/// incoming order.
#[derive(Debug, Clone, Copy, Default)]
pub struct RelevanceReranker {
    reference_time: Option<DateTime<Utc>>,
}

impl RelevanceReranker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Measure document age against a fixed instant instead of the wall clock.
    pub fn at(reference_time: DateTime<Utc>) -> Self {
        Self { reference_time: Some(reference_time) }
    }

    /// Relevance of one result for a lower-cased, tokenized query.
    pub fn score(&self, query_words: &[String], result: &SearchResult, now: DateTime<Utc>) -> f32 {
        let metadata = &result.document.metadata;

        let quality_bonus = (5.0 - metadata.data_quality as f32) * QUALITY_WEIGHT;

        let age_days = (now - metadata.timestamp).num_milliseconds() as f32 / 86_400_000.0;
        let freshness = ((RECENCY_WINDOW_DAYS - age_days) / RECENCY_WINDOW_DAYS).clamp(0.0, 1.0);
        let recency_bonus = freshness * RECENCY_WEIGHT;

        let tags: Vec<String> = metadata.tags.iter().map(|t| t.to_lowercase()).collect();
        let tag_matches = query_words
            .iter()
            .filter(|word| tags.iter().any(|tag| tag.contains(word.as_str())))
            .count();
        let tag_bonus = tag_matches as f32 * TAG_MATCH_WEIGHT;

        (result.similarity + quality_bonus + recency_bonus + tag_bonus).clamp(0.0, 1.0)
    }
}

#[async_trait]
impl Reranker for RelevanceReranker {
    async fn rerank(
        &self,
        query: &str,
        mut results: Vec<SearchResult>,
    ) -> Result<Vec<SearchResult>> {
        let now = self.reference_time.unwrap_or_else(Utc::now);
        let query_words: Vec<String> =
            query.to_lowercase().split_whitespace().map(str::to_string).collect();
        for result in &mut results {
            result.relevance_score = self.score(&query_words, result, now);
        }
        // Vec::sort_by is stable
        results.sort_by(|a, b| {
            b.relevance_score.partial_cmp(&a.relevance_score).unwrap_or(Ordering::Equal)
        });
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::document::{Document, DocumentMetadata};

    fn result(id: &str, similarity: f32, metadata: DocumentMetadata) -> SearchResult {
        SearchResult {
            collection: "c".into(),
            document: Document::new(id, "", metadata),
            similarity,
            relevance_score: similarity,
        }
    }

    #[tokio::test]
    async fn better_quality_recent_tagged_document_ranks_first() {
        let now = Utc::now();
        let stale = DocumentMetadata::new("t", "s")
            .with_data_quality(5.0)
            .with_timestamp(now - Duration::days(60));
        let fresh = DocumentMetadata::new("t", "s")
            .with_data_quality(1.0)
            .with_timestamp(now)
            .with_tags(["ev"]);
        let ranked = RelevanceReranker::at(now)
            .rerank("ev car", vec![result("stale", 0.5, stale), result("fresh", 0.5, fresh)])
            .await
            .unwrap();
        assert_eq!(ranked[0].document.id, "fresh");
        assert!(ranked[0].relevance_score > ranked[1].relevance_score);
        assert!((ranked[0].relevance_score - 1.0).abs() < 1e-6);
        assert!((ranked[1].relevance_score - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn ties_preserve_encounter_order() {
        let now = Utc::now();
        let meta = DocumentMetadata::new("t", "s")
            .with_data_quality(5.0)
            .with_timestamp(now - Duration::days(90));
        let results = vec![
            result("a", 0.4, meta.clone()),
            result("b", 0.4, meta.clone()),
            result("c", 0.4, meta),
        ];
        let ranked = RelevanceReranker::at(now).rerank("q", results).await.unwrap();
        let ids: Vec<_> = ranked.iter().map(|r| r.document.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[test]
    fn recency_decays_linearly_over_thirty_days() {
        let now = Utc::now();
        let reranker = RelevanceReranker::at(now);
        let meta = DocumentMetadata::new("t", "s")
            .with_data_quality(5.0)
            .with_timestamp(now - Duration::days(15));
        let score = reranker.score(&[], &result("a", 0.2, meta), now);
        assert!((score - 0.25).abs() < 1e-4);
    }

    #[test]
    fn each_matching_query_word_counts_once() {
        let now = Utc::now();
        let reranker = RelevanceReranker::at(now);
        let meta = DocumentMetadata::new("t", "s")
            .with_data_quality(5.0)
            .with_timestamp(now - Duration::days(40))
            .with_tags(["Electric", "vehicle", "loan"]);
        let words = vec!["elec".to_string(), "loan".to_string(), "mortgage".to_string()];
        let score = reranker.score(&words, &result("a", 0.3, meta), now);
        assert!((score - 0.4).abs() < 1e-5);
    }
}
