//! Embedding index: turn renderings → chunked → embedded → similarity
//! search in SQLite.
//!
//! Vectors are only ever compared under the metric they were produced
//! for; chunks embedded under a different metric are excluded from
//! candidacy, never score-penalized.

pub mod chunker;
pub mod embeddings;
pub mod embeddings_openai;
pub mod indexer;
pub mod metric;
pub mod schema;
pub mod store;

pub use {
    chunker::{Chunker, FixedWidthChunker, render_content},
    embeddings::EmbeddingProvider,
    indexer::Indexer,
    metric::DistanceMetric,
    schema::EmbeddingChunk,
    store::{ChunkStore, SearchFilter, SearchHit, SqliteChunkStore},
};
