//! Local transformer encoder (e.g. BGE-M3) running on candle.
//!
//! This module is only available when the `hf` feature is enabled. The model
//! directory must contain `config.json`, `tokenizer.json` and either
//! `model.safetensors` or `pytorch_model.bin`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::config::DevicePreference;
use crate::embedding::{EmbeddingProvider, l2_normalize};
use crate::error::{RagError, Result};

const PROVIDER: &str = "hf";

/// Longest token sequence fed to the encoder; longer inputs are truncated.
const MAX_TOKENS: usize = 512;

/// Pick a compute device, preferring CUDA, then Metal, then CPU.
///
/// Any failure to initialise an accelerator falls back to CPU with a warning
/// instead of failing the caller.
pub fn select_device(preference: DevicePreference) -> Device {
    let try_cuda = || {
        Device::new_cuda(0).map_err(|e| warn!(error = %e, "CUDA device unavailable, falling back")).ok()
    };
    let try_metal = || {
        Device::new_metal(0).map_err(|e| warn!(error = %e, "Metal device unavailable, falling back")).ok()
    };

    let device = match preference {
        DevicePreference::Cpu => None,
        DevicePreference::Cuda => try_cuda(),
        DevicePreference::Metal => try_metal(),
        DevicePreference::Auto => {
            let cuda = if candle_core::utils::cuda_is_available() { try_cuda() } else { None };
            cuda.or_else(|| {
                if candle_core::utils::metal_is_available() { try_metal() } else { None }
            })
        }
    };

    let device = device.unwrap_or(Device::Cpu);
    info!(device = ?device, "selected embedding device");
    device
}

struct Encoder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    normalize: bool,
}

impl Encoder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let encoding = self.tokenizer.encode(text, true).map_err(|e| map_err("tokenization", e))?;
        let mut ids = encoding.get_ids().to_vec();
        let mut mask = encoding.get_attention_mask().to_vec();
        ids.truncate(MAX_TOKENS);
        mask.truncate(MAX_TOKENS);
        let len = ids.len();

        let forward = || -> candle_core::Result<Vec<f32>> {
            let input_ids = Tensor::from_vec(ids, (1, len), &self.device)?;
            let attention_mask = Tensor::from_vec(mask, (1, len), &self.device)?;
            let token_type_ids = input_ids.zeros_like()?;
            let hidden = self.model.forward(
                &input_ids,
                &attention_mask,
                &token_type_ids,
                None,
                None,
                None,
            )?;
            // Dense BGE embeddings are the hidden state of the leading [CLS] token.
            hidden.i((0, 0))?.to_dtype(DType::F32)?.to_device(&Device::Cpu)?.to_vec1::<f32>()
        };

        let mut v = forward().map_err(|e| map_err("forward pass", e))?;
        if self.normalize {
            l2_normalize(&mut v);
        }
        Ok(v)
    }
}

/// An [`EmbeddingProvider`] backed by a local XLM-RoBERTa-family encoder.
///
/// Inference runs on the blocking thread pool so async callers are not
/// stalled by the forward pass.
pub struct CandleEmbeddingProvider {
    encoder: Arc<Encoder>,
    dimensions: usize,
}

impl CandleEmbeddingProvider {
    /// Load the encoder from `model_dir` onto the preferred device.
    pub fn load(model_dir: &Path, device: DevicePreference, normalize: bool) -> Result<Self> {
        if !model_dir.is_dir() {
            return Err(RagError::NotFound(format!(
                "embedding model directory {}",
                model_dir.display()
            )));
        }
        let device = select_device(device);

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer =
            Tokenizer::from_file(&tokenizer_path).map_err(|e| map_err("loading tokenizer", e))?;

        let config: Config =
            serde_json::from_str(&std::fs::read_to_string(model_dir.join("config.json"))?)?;
        let weights = load_weights(model_dir, &device)?;
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb).map_err(|e| map_err("building model", e))?;

        info!(model_dir = %model_dir.display(), dimensions = config.hidden_size, "loaded embedding model");
        Ok(Self {
            dimensions: config.hidden_size,
            encoder: Arc::new(Encoder { model, tokenizer, device, normalize }),
        })
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        debug!(path = %safetensors.display(), "loading safetensors weights");
        return candle_core::safetensors::load(&safetensors, device)
            .map_err(|e| map_err("reading safetensors", e));
    }

    let pickle: PathBuf = model_dir.join("pytorch_model.bin");
    if pickle.exists() {
        debug!(path = %pickle.display(), "loading pytorch weights");
        let tensors =
            candle_core::pickle::read_all(&pickle).map_err(|e| map_err("reading weights", e))?;
        return Ok(tensors.into_iter().collect());
    }

    Err(RagError::NotFound(format!("model weights in {}", model_dir.display())))
}

fn map_err(stage: &str, e: impl std::fmt::Display) -> RagError {
    RagError::EmbeddingError { provider: PROVIDER.into(), message: format!("{stage}: {e}") }
}

#[async_trait]
impl EmbeddingProvider for CandleEmbeddingProvider {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut batch = self.embed_batch(&[text]).await?;
        batch.pop().ok_or_else(|| map_err("embedding", "encoder returned no vector"))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let encoder = self.encoder.clone();
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        debug!(provider = PROVIDER, batch_size = owned.len(), "embedding batch");

        tokio::task::spawn_blocking(move || owned.iter().map(|t| encoder.embed(t)).collect())
            .await
            .map_err(|e| map_err("embedding task", e))?
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
