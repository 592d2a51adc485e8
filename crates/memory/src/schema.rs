//! Chunk record shape.

use crate::metric::DistanceMetric;

/// A contiguous span of one turn's lossless rendering, embedded
/// independently for retrieval. Immutable once created except audit
/// fields; deleted when the owning turn is deleted.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EmbeddingChunk {
    pub id: String,
    pub turn_id: String,
    /// 1-based, unique within a turn.
    pub chunk_index: i64,
    /// Character offsets into the turn's lossless rendering, enabling
    /// exact reconstruction of which part of the turn this chunk covers.
    pub span_start: i64,
    pub span_end: i64,
    /// The exact chunked text, independent of any lossy normalization
    /// applied before embedding.
    pub lossless_text: String,
    /// Denormalized copy of the owning turn's content at embedding time,
    /// for point-in-time reconstruction even if the turn is later edited.
    pub content_snapshot: Option<serde_json::Value>,
    #[serde(skip)]
    pub vector: Vec<f32>,
    pub embedding_model: String,
    pub embedding_provider: String,
    pub distance_metric: DistanceMetric,
    #[serde(flatten)]
    pub audit: orac_common::Audit,
}
