//! Text encoders that turn book descriptions into fixed-width vectors.
//!
//! - `Encoder`: the contract the rest of the crate depends on
//! - `EmbeddingModel`: fastembed-backed sentence embeddings
//! - `HashingEncoder`: model-free feature hashing, for offline use and tests
//!
//! Batch encoding always walks its input in fixed-size chunks so memory stays
//! bounded regardless of library size.

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::config::EmbeddingConfig;

/// Model name that selects the hashing encoder instead of a downloaded model.
pub const HASHING_MODEL: &str = "hashing";

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// Maps text to vectors of a fixed dimension.
///
/// Implementors provide `embed_chunk`; chunking, ordering and the single-text
/// form are derived from it so every backend batches the same way.
pub trait Encoder: Send + Sync {
    /// Model name, as configured.
    fn name(&self) -> &str;

    /// Output dimension D.
    fn dimensions(&self) -> usize;

    /// Number of texts handed to the backend per call.
    fn chunk_size(&self) -> usize;

    /// Encode one chunk of at most `chunk_size()` texts, in order.
    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Encode a single text.
    fn encode_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_chunk(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    /// Encode many texts, preserving input order.
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.encode_batch_with_progress(texts, &mut |_| {})
    }

    /// Same as `encode_batch`, reporting the number of texts finished after each chunk.
    fn encode_batch_with_progress(
        &self,
        texts: &[String],
        on_chunk: &mut dyn FnMut(usize),
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.chunk_size().max(1)) {
            let embedded = self.embed_chunk(chunk)?;
            if embedded.len() != chunk.len() {
                return Err(EmbeddingError::EmbeddingFailed(format!(
                    "Expected {} embeddings, model returned {}",
                    chunk.len(),
                    embedded.len()
                )));
            }
            if let Some(bad) = embedded.iter().find(|v| v.len() != self.dimensions()) {
                return Err(EmbeddingError::EmbeddingFailed(format!(
                    "Expected {} dimensions, model returned {}",
                    self.dimensions(),
                    bad.len()
                )));
            }
            vectors.extend(embedded);
            on_chunk(vectors.len());
        }

        Ok(vectors)
    }

    /// Identity stamped into persisted vector files.
    ///
    /// Covers the model name and the dimension, so vectors from another model
    /// (or another hashing width) are never mixed with this one's.
    fn model_id_hash(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.name().to_lowercase().as_bytes());
        hasher.update(b":");
        hasher.update((self.dimensions() as u64).to_le_bytes());
        hasher.finalize().into()
    }
}

/// Build the encoder selected by the configuration.
pub fn load_encoder(
    config: &EmbeddingConfig,
    cache_dir: PathBuf,
) -> Result<Arc<dyn Encoder>, EmbeddingError> {
    if config.model.eq_ignore_ascii_case(HASHING_MODEL) {
        log::info!(
            "Using hashing encoder ({} dimensions)",
            config.hashing_dimensions
        );
        return Ok(Arc::new(HashingEncoder::new(
            config.hashing_dimensions,
            config.batch_size,
        )));
    }

    log::info!("Loading embedding model '{}'", config.model);
    let model = EmbeddingModel::new(&config.model, cache_dir, config.batch_size)?;
    log::info!(
        "Embedding model '{}' ready ({} dimensions)",
        model.name(),
        model.dimensions()
    );
    Ok(Arc::new(model))
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
    batch_size: usize,
}

impl EmbeddingModel {
    /// Create a new embedding model with the given name.
    ///
    /// The model is downloaded on first use into `cache_dir/models`.
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        batch_size: usize,
    ) -> Result<Self, EmbeddingError> {
        let model_enum = Self::parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        let options = InitOptions::new(model_enum)
            .with_cache_dir(models_dir)
            .with_show_download_progress(true);

        let mut model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let dimensions = Self::detect_dimensions(&mut model)?;

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
            batch_size: batch_size.max(1),
        })
    }

    /// Parse model name string to fastembed enum.
    fn parse_model_name(name: &str) -> Result<fastembed::EmbeddingModel, EmbeddingError> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => {
                Ok(fastembed::EmbeddingModel::AllMiniLML6V2Q)
            }
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-small-en-v1.5-q" | "bgesmallenv15q" => {
                Ok(fastembed::EmbeddingModel::BGESmallENV15Q)
            }
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-base-en-v1.5-q" | "bgebaseenv15q" => {
                Ok(fastembed::EmbeddingModel::BGEBaseENV15Q)
            }
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5 (add -q suffix for quantized), or '{}'",
                name, HASHING_MODEL
            ))),
        }
    }

    /// Embed a sample text to determine embedding dimensions.
    fn detect_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to detect dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl Encoder for EmbeddingModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn chunk_size(&self) -> usize {
        self.batch_size
    }

    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        model
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }
}

/// Feature-hashing encoder.
///
/// Lowercased alphanumeric tokens are hashed into `dimensions` buckets and the
/// counts are L2-normalized. Texts sharing words score higher under cosine
/// similarity, which is all the ranking needs when no model is available.
pub struct HashingEncoder {
    dimensions: usize,
    batch_size: usize,
}

impl HashingEncoder {
    pub fn new(dimensions: usize, batch_size: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            batch_size: batch_size.max(1),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = fnv1a_64(token.to_lowercase().as_bytes()) % self.dimensions as u64;
            vector[bucket as usize] += 1.0;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Encoder for HashingEncoder {
    fn name(&self) -> &str {
        HASHING_MODEL
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn chunk_size(&self) -> usize {
        self.batch_size
    }

    fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
