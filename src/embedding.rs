//! # Sentence embeddings
//!
//! Turns normalized text into a fixed-size dense vector using the
//! `all-MiniLM-L6-v2` BERT model running on Candle (pure Rust, CPU).
//!
//! The [`Embedder`] trait is the seam the rest of the crate depends on; the
//! conversation handler only ever sees `Arc<dyn Embedder>`, so tests plug in
//! cheap fakes instead of the real model.
//!
//! ## Failure policy
//! [`Embedder::embed`] never fails. If tokenization or inference breaks, or the
//! model returns a vector of the wrong size, the error is logged and a zero
//! vector of [`EMBEDDING_DIM`] is returned so the pipeline keeps moving.
//!
//! ## Model files
//! [`SentenceEmbedder::load`] reads `config.json`, `tokenizer.json` and
//! `model.safetensors` either from a local directory or from the Hugging Face
//! hub cache (downloading on first use). Loading takes seconds; do it once.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use std::path::PathBuf;
use std::sync::Arc;
use tokenizers::Tokenizer;
use tracing::{error, info};

use crate::normalize::normalize;
use crate::{Error, Result};

/// Output size of all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Text → vector.
pub trait Embedder: Send + Sync {
    /// Raw model call on already-normalized text.
    fn encode(&self, text: &str) -> Result<Vec<f32>>;

    /// Normalize, encode, and fall back to a zero vector on any failure.
    fn embed(&self, text: &str) -> Vec<f32> {
        let cleaned = normalize(text);
        match self.encode(&cleaned) {
            Ok(vector) if vector.len() == EMBEDDING_DIM => vector,
            Ok(vector) => {
                error!(
                    "Embedding has {} dimensions, expected {EMBEDDING_DIM}; using zero vector",
                    vector.len()
                );
                vec![0.0; EMBEDDING_DIM]
            }
            Err(e) => {
                error!("Embedding failed: {e}; using zero vector");
                vec![0.0; EMBEDDING_DIM]
            }
        }
    }
}

/// Run [`Embedder::embed`] on the blocking pool so inference does not stall
/// the async executor.
pub async fn embed_blocking(embedder: Arc<dyn Embedder>, text: String) -> Vec<f32> {
    match tokio::task::spawn_blocking(move || embedder.embed(&text)).await {
        Ok(vector) => vector,
        Err(e) => {
            error!("Embedding task aborted: {e}; using zero vector");
            vec![0.0; EMBEDDING_DIM]
        }
    }
}

/// Where to find the model weights.
#[derive(Debug, Clone)]
pub enum ModelSource {
    /// A directory holding `config.json`, `tokenizer.json`, `model.safetensors`.
    Local(PathBuf),
    /// A Hugging Face hub repository.
    Hub { model_id: String, revision: String },
}

impl Default for ModelSource {
    fn default() -> Self {
        ModelSource::Hub {
            model_id: DEFAULT_MODEL_ID.to_string(),
            revision: "main".to_string(),
        }
    }
}

/// Sentence embeddings model using Candle.
pub struct SentenceEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl SentenceEmbedder {
    /// Load tokenizer, config and weights.
    ///
    /// Blocking: performs file and (for [`ModelSource::Hub`]) network I/O.
    pub fn load(source: &ModelSource) -> Result<Self> {
        let device = Device::Cpu;

        let (config_filename, tokenizer_filename, weights_filename) = match source {
            ModelSource::Local(dir) => (
                dir.join("config.json"),
                dir.join("tokenizer.json"),
                dir.join("model.safetensors"),
            ),
            ModelSource::Hub { model_id, revision } => {
                let repo = Repo::with_revision(model_id.clone(), RepoType::Model, revision.clone());
                let api = Api::new().map_err(|e| Error::Embedding(e.to_string()))?;
                let api_repo = api.repo(repo);
                let fetch = |name: &str| {
                    api_repo
                        .get(name)
                        .map_err(|e| Error::Embedding(format!("fetching {name}: {e}")))
                };
                (
                    fetch("config.json")?,
                    fetch("tokenizer.json")?,
                    fetch("model.safetensors")?,
                )
            }
        };

        let config = std::fs::read_to_string(&config_filename)?;
        let config: Config = serde_json::from_str(&config)?;

        let tokenizer = Tokenizer::from_file(&tokenizer_filename)?;

        // SAFETY: the weights file is not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device)? };
        let model = BertModel::load(vb, &config)?;

        info!("Embedding model loaded from {source:?}");

        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    /// Mean pooling over token embeddings, considering the attention mask.
    fn mean_pooling(&self, embeddings: &Tensor, attention_mask: &[u32]) -> Result<Tensor> {
        // embeddings: [1, seq_len, hidden]; mask reshaped to [1, seq_len, 1]
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        Ok(sum.broadcast_div(&count)?.squeeze(0)?)
    }

    fn l2_normalize(&self, tensor: &Tensor) -> Result<Tensor> {
        let norm = tensor.sqr()?.sum_all()?.sqrt()?;
        Ok(tensor.broadcast_div(&norm)?)
    }
}

impl Embedder for SentenceEmbedder {
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = self.tokenizer.encode(text, true)?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let output = self.model.forward(&token_ids, &token_type_ids, None)?;
        let pooled = self.mean_pooling(&output, tokens.get_attention_mask())?;
        let normalized = self.l2_normalize(&pooled)?;

        Ok(normalized.to_vec1::<f32>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    impl Embedder for Recording {
        fn encode(&self, text: &str) -> Result<Vec<f32>> {
            self.seen.lock().unwrap().push(text.to_string());
            Ok(vec![0.5; EMBEDDING_DIM])
        }
    }

    struct Broken;

    impl Embedder for Broken {
        fn encode(&self, _text: &str) -> Result<Vec<f32>> {
            Err(Error::Embedding("inference exploded".into()))
        }
    }

    struct WrongSize;

    impl Embedder for WrongSize {
        fn encode(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0; 17])
        }
    }

    #[test]
    fn test_embed_normalizes_before_encoding() {
        let embedder = Recording { seen: Mutex::new(Vec::new()) };
        let v = embedder.embed("  Встреча   С КОЛЛЕГАМИ 🎉 ");
        assert_eq!(v.len(), EMBEDDING_DIM);
        assert_eq!(embedder.seen.lock().unwrap().as_slice(), ["встреча с коллегами"]);
    }

    #[test]
    fn test_failure_yields_zero_vector() {
        let v = Broken.embed("anything");
        assert_eq!(v.len(), EMBEDDING_DIM);
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_wrong_dimension_yields_zero_vector() {
        let v = WrongSize.embed("anything");
        assert_eq!(v, vec![0.0; EMBEDDING_DIM]);
    }

    #[tokio::test]
    async fn test_embed_blocking_uses_shared_embedder() {
        let embedder: Arc<dyn Embedder> = Arc::new(Broken);
        let v = embed_blocking(embedder, "x".into()).await;
        assert_eq!(v.len(), EMBEDDING_DIM);
    }

    #[test]
    fn test_missing_local_model_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = SentenceEmbedder::load(&ModelSource::Local(dir.path().to_path_buf()));
        assert!(result.is_err());
    }

    #[test]
    #[ignore = "downloads all-MiniLM-L6-v2 from the Hugging Face hub"]
    fn test_sentence_embedder() -> Result<()> {
        let model = SentenceEmbedder::load(&ModelSource::default())?;

        let a = model.embed("Rust is cool.");
        let b = model.embed("Rust is cool.");
        let c = model.embed("I love programming.");
        assert_eq!(a.len(), EMBEDDING_DIM);
        assert_eq!(model.embed("").len(), EMBEDDING_DIM);

        let dot = |x: &[f32], y: &[f32]| x.iter().zip(y).map(|(p, q)| p * q).sum::<f32>();
        assert!((dot(&a, &b) - 1.0).abs() < 1e-4);
        assert!(dot(&a, &c) < 0.99);
        Ok(())
    }
}
