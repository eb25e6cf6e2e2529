use crate::error::Result;
use crate::types::InferenceOutput;

/// A loaded sentence-embedding model.
///
/// Implementations are synchronous and CPU/GPU bound; async callers are
/// expected to drive them from a blocking thread.
pub trait Embedder: Send + Sync {
    /// Stable identifier of the underlying model.
    fn model_id(&self) -> &str;
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;
    /// Maximum token length fed to the model.
    fn max_len(&self) -> usize;
    /// Mean-pooled, L2-normalized embeddings for a batch of texts.
    fn infer(&self, texts: &[String]) -> Result<InferenceOutput>;
}
