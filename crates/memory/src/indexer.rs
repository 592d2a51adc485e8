//! Write path of the embedding index: render → chunk → embed → replace.
//!
//! Indexing may run asynchronously relative to `append`; there is no
//! implicit synchronization between appending a turn and its chunks being
//! searchable. Callers that need fresh chunks await `index_turn`.

use std::sync::Arc;

use tracing::{debug, warn};

use {
    crate::{
        chunker::{Chunker, render_content},
        embeddings::EmbeddingProvider,
        schema::EmbeddingChunk,
        store::ChunkStore,
    },
    orac_common::{ActorId, Audit, EngineResult, new_id},
    orac_sessions::Turn,
};

pub struct Indexer {
    chunker: Box<dyn Chunker>,
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn ChunkStore>,
}

impl Indexer {
    pub fn new(
        chunker: Box<dyn Chunker>,
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn ChunkStore>,
    ) -> Self {
        Self {
            chunker,
            provider,
            store,
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    /// Index one turn. Idempotent: prior chunks are replaced wholesale, so
    /// re-indexing never accumulates duplicates. Embedding failures surface
    /// as `EmbeddingUnavailable`; the retry is the caller's.
    pub async fn index_turn(&self, turn: &Turn, actor: &ActorId) -> EngineResult<Vec<EmbeddingChunk>> {
        let rendered = render_content(&turn.content);
        let spans = self.chunker.chunk(&rendered);
        if spans.is_empty() {
            warn!(turn_id = %turn.id, "turn rendered to empty text, clearing chunks");
            self.store.delete_chunks_for_turn(&turn.id).await?;
            return Ok(Vec::new());
        }

        let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
        let vectors = self.provider.embed_batch(&texts).await?;

        let metric = self.provider.metric();
        let chunks: Vec<EmbeddingChunk> = spans
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (span, vector))| EmbeddingChunk {
                id: new_id(),
                turn_id: turn.id.clone(),
                chunk_index: i as i64 + 1,
                span_start: span.start as i64,
                span_end: span.end as i64,
                lossless_text: span.text,
                content_snapshot: Some(turn.content.clone()),
                vector,
                embedding_model: self.provider.model_name().to_string(),
                embedding_provider: self.provider.provider_key().to_string(),
                distance_metric: metric,
                audit: Audit::new(actor),
            })
            .collect();

        self.store.replace_chunks_for_turn(&turn.id, &chunks).await?;
        debug!(turn_id = %turn.id, chunks = chunks.len(), metric = metric.as_str(), "indexed turn");
        Ok(chunks)
    }

    /// Embed query text for retrieval, under the provider's metric.
    pub async fn embed_query(&self, text: &str) -> EngineResult<Vec<f32>> {
        self.provider.embed(text).await
    }
}
