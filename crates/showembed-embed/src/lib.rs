use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig};
use showembed_core::config::{expand_path, EmbeddingSettings};
use showembed_core::{Embedder, Error, InferenceOutput};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

pub mod device;
pub mod pool;
pub mod provider;
pub mod tokenize;

pub use pool::masked_mean_l2;
pub use provider::{reconcile_output, EmbeddingProvider};

/// all-MiniLM-L6-v2 sentence encoder running on candle.
pub struct MiniLmEmbedder { model: BertModel, tokenizer: Tokenizer, device: Device, model_id: String, dim: usize, max_len: usize }

impl MiniLmEmbedder {
    pub fn load(settings: &EmbeddingSettings) -> Result<Self> {
        let device = device::select_device();
        info!("🔄 Loading {} ...", settings.model_id);
        let files = resolve_model_files(settings)?;
        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", files.tokenizer.display(), e))?;
        let config: BertConfig = serde_json::from_str(&std::fs::read_to_string(&files.config)?)?;
        let vb = load_weights(&files.weights, &device)?;
        let model = BertModel::load(vb, &config)?;
        info!("✅ {} loaded", settings.model_id);
        Ok(Self { model, tokenizer, device, model_id: settings.model_id.clone(), dim: settings.dimension, max_len: settings.max_len })
    }

    fn forward_flat(&self, texts: &[String]) -> Result<Vec<f32>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize::tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(&input_ids, &token_type_ids, Some(&attention_mask))?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let flat = pooled.to_device(&Device::Cpu)?.flatten_all()?.to_vec1::<f32>()?;
        debug!(batch = texts.len(), elapsed_ms = start.elapsed().as_millis() as u64, "embedded batch");
        Ok(flat)
    }
}

impl Embedder for MiniLmEmbedder {
    fn model_id(&self) -> &str { &self.model_id }
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { self.max_len }
    fn infer(&self, texts: &[String]) -> showembed_core::Result<InferenceOutput> {
        self.forward_flat(texts).map(InferenceOutput::Flattened).map_err(|e| Error::Inference(format!("{e:#}")))
    }
}

/// Deterministic hashed bag-of-words vectors for tests and offline development.
pub struct FakeEmbedder { dim: usize }

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim } }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        use std::hash::{Hash, Hasher}; use twox_hash::XxHash64;
        let mut v = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() { let mut hasher = XxHash64::with_seed(0); token.hash(&mut hasher); let h = hasher.finish(); let idx = (h as usize) % self.dim; let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32); v[idx] += val + (i as f32 % 3.0) * 0.01; }
        if v.iter().all(|x| *x == 0.0) { v[0] = 1.0; }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6); for x in &mut v { *x /= norm; } v
    }
}

impl Embedder for FakeEmbedder {
    fn model_id(&self) -> &str { "fake" }
    fn dim(&self) -> usize { self.dim }
    fn max_len(&self) -> usize { usize::MAX }
    fn infer(&self, texts: &[String]) -> showembed_core::Result<InferenceOutput> {
        Ok(InferenceOutput::PerInput(texts.iter().map(|t| self.embed_text(t)).collect()))
    }
}

/// Whether the fake embedder is selected, by settings or `APP_USE_FAKE_EMBEDDINGS=1`.
pub fn uses_fake_embeddings(settings: &EmbeddingSettings) -> bool {
    settings.use_fake
        || std::env::var("APP_USE_FAKE_EMBEDDINGS").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Build the configured embedder.
pub fn load_embedder(settings: &EmbeddingSettings) -> Result<Box<dyn Embedder>> {
    if uses_fake_embeddings(settings) { info!("🧪 Using FakeEmbedder"); return Ok(Box::new(FakeEmbedder::new(settings.dimension))); }
    Ok(Box::new(MiniLmEmbedder::load(settings)?))
}

struct ModelFiles { config: PathBuf, tokenizer: PathBuf, weights: PathBuf }

impl ModelFiles {
    fn in_dir(dir: &Path) -> Option<Self> {
        let weights = ["model.safetensors", "pytorch_model.bin"].iter().map(|f| dir.join(f)).find(|p| p.exists())?;
        let files = Self { config: dir.join("config.json"), tokenizer: dir.join("tokenizer.json"), weights };
        (files.config.exists() && files.tokenizer.exists()).then_some(files)
    }
}

fn resolve_model_files(settings: &EmbeddingSettings) -> Result<ModelFiles> {
    let mut candidates: Vec<(&str, PathBuf)> = Vec::new();
    if let Some(dir) = &settings.model_dir { candidates.push(("embedding.model_dir", expand_path(dir))); }
    if let Ok(dir) = std::env::var("APP_MODEL_DIR") { candidates.push(("APP_MODEL_DIR", PathBuf::from(dir))); }
    if let Ok(dir) = std::env::var("MODEL_DIR") { candidates.push(("MODEL_DIR", PathBuf::from(dir))); }
    candidates.push(("default", PathBuf::from("models").join(settings.model_name())));
    for (source, dir) in candidates {
        if let Some(files) = ModelFiles::in_dir(&dir) { info!("📦 Using model dir ({}): {}", source, dir.display()); return Ok(files); }
        if source != "default" { warn!("Model dir from {} is incomplete: {}", source, dir.display()); }
    }
    info!("📥 Fetching {} from the Hugging Face hub", settings.model_id);
    let api = hf_hub::api::sync::Api::new()?;
    let repo = api.model(settings.model_id.clone());
    let weights = repo.get("model.safetensors").or_else(|_| repo.get("pytorch_model.bin"))?;
    Ok(ModelFiles { config: repo.get("config.json")?, tokenizer: repo.get("tokenizer.json")?, weights })
}

fn load_weights(path: &Path, device: &Device) -> Result<VarBuilder<'static>> {
    let dtype = DType::F32;
    if path.extension().and_then(|e| e.to_str()) == Some("safetensors") {
        // SAFETY: the weights file is not modified while the model is alive.
        return Ok(unsafe { VarBuilder::from_mmaped_safetensors(&[path.to_path_buf()], dtype, device)? });
    }
    let weights = candle_core::pickle::read_all(path)?;
    let weights_map: std::collections::HashMap<String, Tensor> = weights.into_iter().collect();
    Ok(VarBuilder::from_tensors(weights_map, dtype, device))
}
