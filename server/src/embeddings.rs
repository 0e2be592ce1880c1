use std::fs;

use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use once_cell::sync::Lazy;
use regex::Regex;
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

use crate::error::{AppError, AppResult};

const MAX_BODY_CHARS: usize = 1000;
const MAX_TOKENS: usize = 512;
pub const ENCODE_BATCH_SIZE: usize = 32;

/// Encodes prepared email text into fixed-dimension unit vectors. Behind a
/// trait so the pipeline can be exercised without a model download.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn encode(&self, text: &str) -> AppResult<Vec<f32>>;
    fn encode_batch(&self, texts: &[String], batch_size: usize) -> AppResult<Vec<Vec<f32>>>;
}

/// The text blob fed to the encoder: sender and subject prefixed onto the
/// first kilochar of the body, interior whitespace collapsed.
pub fn prepare_email_text(subject: &str, body: &str, sender: &str) -> String {
    static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
    let body = RE_WHITESPACE.replace_all(body, " ");
    let body: String = body.trim().chars().take(MAX_BODY_CHARS).collect();
    format!("From: {sender}\nSubject: {subject}\n{body}")
}

/// Sentence-transformer BERT via candle: tokenize, forward, mean-pool over
/// the attention mask, L2-normalize. Loading pulls config/tokenizer/weights
/// through the HF hub cache; any failure is an `Embedding` error, fatal to
/// the sync run that needed it.
pub struct BertEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl BertEmbedder {
    pub fn load(model_id: &str, dimension: usize) -> AppResult<Self> {
        let device = Device::Cpu;
        let api = Api::new()
            .map_err(|e| AppError::Embedding(format!("hub api init failed: {e}")))?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

        let config_path = repo
            .get("config.json")
            .map_err(|e| AppError::Embedding(format!("fetch config.json: {e}")))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .map_err(|e| AppError::Embedding(format!("fetch tokenizer.json: {e}")))?;
        let weights_path = repo
            .get("model.safetensors")
            .map_err(|e| AppError::Embedding(format!("fetch model.safetensors: {e}")))?;

        let config_raw = fs::read_to_string(config_path)
            .map_err(|e| AppError::Embedding(format!("read config.json: {e}")))?;
        let config: Config = serde_json::from_str(&config_raw)
            .map_err(|e| AppError::Embedding(format!("parse config.json: {e}")))?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| AppError::Embedding(format!("load tokenizer: {e}")))?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..Default::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| AppError::Embedding(format!("configure truncation: {e}")))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .map_err(|e| AppError::Embedding(format!("load weights: {e}")))?
        };
        let model = BertModel::load(vb, &config)
            .map_err(|e| AppError::Embedding(format!("build model: {e}")))?;

        tracing::info!("Loaded embedding model {} ({}d)", model_id, dimension);
        Ok(Self {
            model,
            tokenizer,
            device,
            dimension,
        })
    }

    fn encode_chunk(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let err = |e: candle_core::Error| AppError::Embedding(e.to_string());

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| AppError::Embedding(format!("tokenize: {e}")))?;

        let ids: Vec<Tensor> = encodings
            .iter()
            .map(|enc| Tensor::new(enc.get_ids(), &self.device))
            .collect::<Result<_, _>>()
            .map_err(err)?;
        let masks: Vec<Tensor> = encodings
            .iter()
            .map(|enc| Tensor::new(enc.get_attention_mask(), &self.device))
            .collect::<Result<_, _>>()
            .map_err(err)?;

        let input_ids = Tensor::stack(&ids, 0).map_err(err)?;
        let attention_mask = Tensor::stack(&masks, 0).map_err(err)?;
        let token_type_ids = input_ids.zeros_like().map_err(err)?;

        let hidden = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))
            .map_err(err)?;

        // mean pooling over non-padding tokens, then L2 normalize
        let mask = attention_mask
            .to_dtype(DTYPE)
            .map_err(err)?
            .unsqueeze(2)
            .map_err(err)?;
        let summed = hidden
            .broadcast_mul(&mask)
            .map_err(err)?
            .sum(1)
            .map_err(err)?;
        let counts = mask.sum(1).map_err(err)?;
        let mean = summed.broadcast_div(&counts).map_err(err)?;
        let norm = mean
            .sqr()
            .map_err(err)?
            .sum_keepdim(1)
            .map_err(err)?
            .sqrt()
            .map_err(err)?;
        let normalized = mean.broadcast_div(&norm).map_err(err)?;

        let vectors = normalized.to_vec2::<f32>().map_err(err)?;
        for v in &vectors {
            if v.len() != self.dimension {
                return Err(AppError::Embedding(format!(
                    "model produced {}-dim vectors, expected {}",
                    v.len(),
                    self.dimension
                )));
            }
        }
        Ok(vectors)
    }
}

impl Embedder for BertEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, text: &str) -> AppResult<Vec<f32>> {
        let mut vectors = self.encode_chunk(&[text.to_string()])?;
        Ok(vectors.remove(0))
    }

    fn encode_batch(&self, texts: &[String], batch_size: usize) -> AppResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(batch_size.max(1)) {
            vectors.extend(self.encode_chunk(chunk)?);
        }
        Ok(vectors)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Deterministic unit vectors derived from text bytes; stands in for the
    /// BERT model so pipeline tests stay offline.
    pub struct StubEmbedder {
        pub dimension: usize,
    }

    impl StubEmbedder {
        pub fn new(dimension: usize) -> Self {
            Self { dimension }
        }
    }

    impl Embedder for StubEmbedder {
        fn dimension(&self) -> usize {
            self.dimension
        }

        fn encode(&self, text: &str) -> AppResult<Vec<f32>> {
            let mut v = vec![0f32; self.dimension];
            for (i, b) in text.bytes().enumerate() {
                v[i % self.dimension] += b as f32;
            }
            let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for x in &mut v {
                    *x /= norm;
                }
            } else {
                v[0] = 1.0;
            }
            Ok(v)
        }

        fn encode_batch(&self, texts: &[String], _batch_size: usize) -> AppResult<Vec<Vec<f32>>> {
            texts.iter().map(|t| self.encode(t)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::l2_norm;

    #[test]
    fn test_prepare_email_text() {
        let text = prepare_email_text("Hello", "line one\n\n  line\ttwo  ", "a@b.com");
        assert_eq!(text, "From: a@b.com\nSubject: Hello\nline one line two");
    }

    #[test]
    fn test_prepare_email_text_truncates_body() {
        let body = "x".repeat(5000);
        let text = prepare_email_text("s", &body, "a@b.com");
        let body_part = text.rsplit('\n').next().unwrap();
        assert_eq!(body_part.len(), 1000);
    }

    #[test]
    fn test_stub_embedder_is_unit_norm() {
        let stub = testing::StubEmbedder::new(16);
        let v = stub.encode("some text").unwrap();
        assert_eq!(v.len(), 16);
        assert!((l2_norm(&v) - 1.0).abs() < 1e-5);
    }
}
