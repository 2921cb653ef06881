//! ONNX-based cross-encoder relevance model.

use std::path::Path;
use std::sync::Mutex;

use ndarray::ArrayViewD;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

use mvr_core::{RelevanceModel, RerankConfig, Result, RetrievalError};

/// Cross-encoder (e.g. ms-marco-MiniLM) scoring (query, content) pairs.
///
/// Logits are squashed with a sigmoid so scores land in (0, 1), on the same
/// scale as the heuristic fallback.
pub struct OnnxCrossEncoder {
    /// ONNX inference session (wrapped in Mutex for interior mutability).
    session: Mutex<Session>,

    /// Pair tokenizer, truncating to `max_length`.
    tokenizer: Tokenizer,

    /// Whether the model takes a `token_type_ids` input.
    use_token_type_ids: bool,

    /// Model identifier for diagnostics.
    name: String,
}

impl OnnxCrossEncoder {
    /// Load a cross-encoder from model and tokenizer paths.
    pub fn new(
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        config: &RerankConfig,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let tokenizer_path = tokenizer_path.as_ref();

        info!("Loading cross-encoder from {:?}", model_path);

        let session = Session::builder()
            .map_err(|e| RetrievalError::relevance(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| RetrievalError::relevance(format!("Failed to set optimization level: {}", e)))?
            .with_intra_threads(config.num_threads)
            .map_err(|e| RetrievalError::relevance(format!("Failed to set thread count: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| RetrievalError::relevance(format!("Failed to load model: {}", e)))?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| RetrievalError::relevance(format!("Failed to load tokenizer: {}", e)))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_length,
                ..Default::default()
            }))
            .map_err(|e| RetrievalError::relevance(format!("Failed to set truncation: {}", e)))?;

        let name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cross_encoder".to_string());

        info!(
            "Cross-encoder initialized: {}, max_length={}",
            name, config.max_length
        );

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            use_token_type_ids: config.use_token_type_ids,
            name,
        })
    }
}

impl RelevanceModel for OnnxCrossEncoder {
    fn score_batch(&self, query: &str, contents: &[&str]) -> Result<Vec<f32>> {
        if contents.is_empty() {
            return Ok(Vec::new());
        }

        let pairs: Vec<(&str, &str)> = contents.iter().map(|c| (query, *c)).collect();
        let encodings = self
            .tokenizer
            .encode_batch(pairs, true)
            .map_err(|e| RetrievalError::relevance(format!("Tokenization failed: {}", e)))?;

        let batch_size = encodings.len();
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        debug!("Scoring batch: size={}, max_len={}", batch_size, max_len);

        // Right-pad every pair to the longest one in the batch
        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        let mut token_type_ids = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let types = encoding.get_type_ids();

            for j in 0..ids.len().min(max_len) {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
                token_type_ids[i * max_len + j] = types[j] as i64;
            }
        }

        let shape = vec![batch_size, max_len];
        let input_ids_tensor = Tensor::from_array((shape.clone(), input_ids))
            .map_err(|e| RetrievalError::relevance(format!("Failed to create input tensor: {}", e)))?;
        let attention_mask_tensor = Tensor::from_array((shape.clone(), attention_mask))
            .map_err(|e| RetrievalError::relevance(format!("Failed to create mask tensor: {}", e)))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| RetrievalError::relevance(format!("Failed to lock session: {}", e)))?;

        let outputs = if self.use_token_type_ids {
            let token_type_tensor = Tensor::from_array((shape, token_type_ids)).map_err(|e| {
                RetrievalError::relevance(format!("Failed to create token type tensor: {}", e))
            })?;
            session.run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_tensor
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor
            ])
        }
        .map_err(|e| RetrievalError::relevance(format!("Inference failed: {}", e)))?;

        let (_, output) = outputs
            .iter()
            .next()
            .ok_or_else(|| RetrievalError::relevance("No output tensor found"))?;

        let view = output
            .try_extract_array::<f32>()
            .map_err(|e| RetrievalError::relevance(format!("Failed to extract tensor: {}", e)))?;

        let logits = logits_from_view(&view, batch_size)?;

        Ok(logits.into_iter().map(sigmoid).collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Read one logit per pair from a `[batch, 1]` or `[batch]` output.
fn logits_from_view(view: &ArrayViewD<'_, f32>, batch_size: usize) -> Result<Vec<f32>> {
    let shape_dims: Vec<usize> = view.shape().to_vec();
    debug!("Logits shape: {:?}", shape_dims);

    match shape_dims.as_slice() {
        [b, 1] if *b == batch_size => Ok((0..batch_size).map(|i| view[[i, 0]]).collect()),
        [b] if *b == batch_size => Ok((0..batch_size).map(|i| view[[i]]).collect()),
        _ => Err(RetrievalError::relevance(format!(
            "Unexpected logits shape: {:?}",
            shape_dims
        ))),
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
