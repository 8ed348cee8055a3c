//! Configuration for search and for selecting a document store backend.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::filter::MetadataFilter;
use crate::inmemory::InMemoryDocumentStore;
use crate::vectorstore::DocumentStore;

/// Parameters for a single search call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    /// Restrict the search to one collection; all collections when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    /// Maximum number of results.
    pub limit: usize,
    /// Candidates below this cosine similarity are dropped before ranking.
    pub min_similarity: f32,
    /// Metadata predicates every result must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<MetadataFilter>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { collection: None, limit: 10, min_similarity: 0.3, filter: None }
    }
}

impl SearchOptions {
    pub fn builder() -> SearchOptionsBuilder {
        SearchOptionsBuilder::default()
    }
}

/// Builder for a validated [`SearchOptions`].
#[derive(Debug, Clone, Default)]
pub struct SearchOptionsBuilder {
    options: SearchOptions,
}

impl SearchOptionsBuilder {
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.options.collection = Some(name.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.options.limit = limit;
        self
    }

    pub fn min_similarity(mut self, threshold: f32) -> Self {
        self.options.min_similarity = threshold;
        self
    }

    pub fn filter(mut self, filter: MetadataFilter) -> Self {
        self.options.filter = Some(filter);
        self
    }

    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `limit == 0` or `min_similarity`
    /// lies outside `[-1, 1]`.
    pub fn build(self) -> Result<SearchOptions> {
        if self.options.limit == 0 {
            return Err(RagError::ConfigError("limit must be greater than zero".to_string()));
        }
        if !(-1.0..=1.0).contains(&self.options.min_similarity) {
            return Err(RagError::ConfigError(format!(
                "min_similarity ({}) must be within [-1, 1]",
                self.options.min_similarity
            )));
        }
        Ok(self.options)
    }
}

/// Connection settings for a Chroma-compatible vector store API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChromaConfig {
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(with = "duration_ms", default = "default_timeout")]
    pub timeout: Duration,
    #[serde(with = "duration_ms", default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: Duration,
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_heartbeat_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_key: None,
            timeout: default_timeout(),
            heartbeat_timeout: default_heartbeat_timeout(),
        }
    }
}

/// Which [`DocumentStore`] implementation to use.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    InMemory,
    Chroma(ChromaConfig),
}

impl StoreConfig {
    /// Read `PCAF_STORE`, `CHROMA_URL`, `CHROMA_API_KEY` and `CHROMA_TIMEOUT_MS`
    /// from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        match lookup("PCAF_STORE").as_deref().map(str::trim) {
            None | Some("") | Some("memory") | Some("in_memory") => Ok(Self::InMemory),
            Some("chroma") => {
                let mut config = ChromaConfig::default();
                if let Some(url) = lookup("CHROMA_URL") {
                    config.base_url = url;
                }
                config.api_key = lookup("CHROMA_API_KEY").filter(|k| !k.is_empty());
                if let Some(ms) = lookup("CHROMA_TIMEOUT_MS") {
                    let ms = ms.parse::<u64>().map_err(|e| {
                        RagError::ConfigError(format!("CHROMA_TIMEOUT_MS ({ms}) is invalid: {e}"))
                    })?;
                    config.timeout = Duration::from_millis(ms);
                }
                Ok(Self::Chroma(config))
            }
            Some(other) => Err(RagError::ConfigError(format!("unknown store backend '{other}'"))),
        }
    }

    /// Construct the configured backend.
    pub fn build(&self, embedder: Arc<dyn EmbeddingProvider>) -> Result<Arc<dyn DocumentStore>> {
        match self {
            Self::InMemory => Ok(Arc::new(InMemoryDocumentStore::new(embedder))),
            #[cfg(feature = "chroma")]
            Self::Chroma(config) => {
                Ok(Arc::new(crate::chroma::ChromaDocumentStore::new(config.clone(), embedder)?))
            }
            #[cfg(not(feature = "chroma"))]
            Self::Chroma(_) => Err(RagError::ConfigError(
                "the chroma backend requires the `chroma` feature".to_string(),
            )),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn search_defaults() {
        let options = SearchOptions::default();
        assert_eq!(options.limit, 10);
        assert!((options.min_similarity - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn builder_rejects_zero_limit_and_bad_threshold() {
        assert!(SearchOptions::builder().limit(0).build().is_err());
        assert!(SearchOptions::builder().min_similarity(1.5).build().is_err());
        let options = SearchOptions::builder().collection("loans").limit(3).build().unwrap();
        assert_eq!(options.collection.as_deref(), Some("loans"));
    }

    #[test]
    fn store_config_from_lookup() {
        assert_eq!(StoreConfig::from_lookup(lookup(&[])).unwrap(), StoreConfig::InMemory);
        let config = StoreConfig::from_lookup(lookup(&[
            ("PCAF_STORE", "chroma"),
            ("CHROMA_URL", "http://chroma:9000"),
            ("CHROMA_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();
        let StoreConfig::Chroma(chroma) = config else { panic!("expected chroma") };
        assert_eq!(chroma.base_url, "http://chroma:9000");
        assert_eq!(chroma.timeout, Duration::from_millis(1500));
        assert!(StoreConfig::from_lookup(lookup(&[("PCAF_STORE", "redis")])).is_err());
    }

    #[test]
    fn store_config_is_tagged() {
        let json = serde_json::json!({"type": "chroma", "base_url": "http://x"});
        let config: StoreConfig = serde_json::from_value(json).unwrap();
        let StoreConfig::Chroma(chroma) = config else { panic!("expected chroma") };
        assert_eq!(chroma.timeout, Duration::from_secs(30));
    }
}
