/// Provider-agnostic embedding trait: the black-box text→vector
/// collaborator. The engine never computes embeddings itself.
use async_trait::async_trait;

use crate::metric::DistanceMetric;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, orac_common::EngineError>;

    /// Generate embeddings for a batch of texts.
    /// Default implementation calls `embed` sequentially.
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> Result<Vec<Vec<f32>>, orac_common::EngineError> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// The model name used by this provider (e.g. "text-embedding-3-small").
    fn model_name(&self) -> &str;

    /// A stable key identifying this provider configuration. Different
    /// providers, or the same provider with different settings, return
    /// different keys.
    fn provider_key(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// The metric this provider's vectors are comparable under. Vectors
    /// produced under different metrics are never compared to each other.
    fn metric(&self) -> DistanceMetric;
}
