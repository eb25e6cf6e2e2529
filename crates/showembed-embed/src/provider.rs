//! Lazily-initialized, shareable embedding provider.
//!
//! The provider owns at most one loaded [`Embedder`]. The first caller of
//! [`EmbeddingProvider::initialize`] (or `embed`) loads it on the blocking
//! pool; concurrent callers wait on the same load and later calls are no-ops.
//! Inference output is reconciled into one vector per input.
use std::sync::Arc;

use showembed_core::config::EmbeddingSettings;
use showembed_core::{Embedder, Error, InferenceOutput, Result};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

type Loader = Arc<dyn Fn() -> anyhow::Result<Box<dyn Embedder>> + Send + Sync>;

pub struct EmbeddingProvider {
    loader: Loader,
    model: OnceCell<Arc<dyn Embedder>>,
    model_name: String,
}

impl EmbeddingProvider {
    /// Provider for the configured model; nothing is loaded until first use.
    ///
    /// The reported model name is `fake` when the fake embedder is selected.
    pub fn new(settings: EmbeddingSettings) -> Self {
        let name = if crate::uses_fake_embeddings(&settings) { "fake".to_string() } else { settings.model_name().to_string() };
        Self::with_loader(name, move || crate::load_embedder(&settings))
    }

    pub fn with_loader<F>(model_name: impl Into<String>, loader: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn Embedder>> + Send + Sync + 'static,
    {
        Self { loader: Arc::new(loader), model: OnceCell::new(), model_name: model_name.into() }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn is_initialized(&self) -> bool {
        self.model.initialized()
    }

    /// Load the model once. Safe to call repeatedly and concurrently.
    pub async fn initialize(&self) -> Result<()> {
        self.model().await.map(|_| ())
    }

    async fn model(&self) -> Result<Arc<dyn Embedder>> {
        self.model
            .get_or_try_init(|| async {
                info!(model = %self.model_name, "Loading embedding model... This happens once.");
                let loader = Arc::clone(&self.loader);
                let loaded = tokio::task::spawn_blocking(move || loader())
                    .await
                    .map_err(|e| Error::ModelLoad(e.to_string()))?
                    .map_err(|e| Error::ModelLoad(format!("{e:#}")))?;
                info!(model = %self.model_name, dim = loaded.dim(), "Embedding model loaded");
                Ok::<_, Error>(Arc::from(loaded))
            })
            .await
            .cloned()
    }

    /// Embed `texts`, returning vectors in input order.
    pub async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(Error::InvalidInput("at least one text is required".into()));
        }
        let model = self.model().await?;
        let worker = Arc::clone(&model);
        let owned = texts.to_vec();
        let output = tokio::task::spawn_blocking(move || worker.infer(&owned))
            .await
            .map_err(|e| Error::Inference(e.to_string()))?;
        let vectors = output.and_then(|out| reconcile_output(out, texts.len(), model.dim()));
        if let Err(e) = &vectors {
            error!(inputs = texts.len(), "Error generating embeddings: {e}");
        }
        vectors
    }

    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(Error::ShapeMismatch { expected: 1, actual: 0 })
    }
}

/// Turn a raw inference result into one vector per input.
///
/// A per-input list whose length differs from `inputs` is logged and passed
/// through unchanged. A flattened buffer must hold exactly `inputs * dim`
/// values.
pub fn reconcile_output(output: InferenceOutput, inputs: usize, dim: usize) -> Result<Vec<Vec<f32>>> {
    match output {
        InferenceOutput::PerInput(vectors) => {
            if vectors.len() != inputs {
                warn!("Sent {} texts, but model returned {} embeddings", inputs, vectors.len());
            }
            Ok(vectors)
        }
        InferenceOutput::Flattened(buffer) => {
            let expected = inputs * dim;
            if dim == 0 || buffer.len() != expected {
                return Err(Error::ShapeMismatch { expected, actual: buffer.len() });
            }
            if inputs > 1 {
                debug!(inputs, dim, "Reshaping flattened output");
            }
            Ok(buffer.chunks_exact(dim).map(<[f32]>::to_vec).collect())
        }
    }
}
