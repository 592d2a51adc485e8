use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OracConfig {
    /// Path to the SQLite database file (or `:memory:` for tests).
    pub db_path: String,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
}

/// How turn renderings are split into embeddable spans.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkingConfig {
    /// Maximum chunk width in characters. Spans are contiguous,
    /// non-overlapping, and together cover the full rendering.
    pub max_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    /// k for top-k chunk retrieval during context assembly.
    pub top_k: usize,
    /// Fraction of `max_context_tokens` usable under the `hybrid` policy,
    /// leaving headroom for the remote model's own bookkeeping.
    pub hybrid_headroom: f64,
}

/// Settings for the OpenAI-compatible embedding provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible `/v1/embeddings` endpoint.
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    /// Environment variable holding the API key (resolved at startup).
    pub api_key_env: String,
    /// Distance metric the produced vectors are comparable under.
    pub metric: String,
}

impl Default for OracConfig {
    fn default() -> Self {
        Self {
            db_path: "orac.db".into(),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_chars: 1200 }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 8,
            hybrid_headroom: 0.8,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".into(),
            model: "text-embedding-3-small".into(),
            dimensions: 1536,
            api_key_env: "OPENAI_API_KEY".into(),
            metric: "cosine".into(),
        }
    }
}
