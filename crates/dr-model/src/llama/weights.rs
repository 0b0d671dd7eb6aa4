use crate::error::{ModelError, Result};
use crate::gguf::GgufFile;

use super::config::LlamaConfig;

/// Weight tensors for a single transformer block, row-major `[out, in]`.
pub struct LlamaLayer {
    pub attn_norm: Vec<f32>,
    /// `[n_heads * head_dim, n_embd]`
    pub wq: Vec<f32>,
    /// `[kv_width, n_embd]`
    pub wk: Vec<f32>,
    /// `[kv_width, n_embd]`
    pub wv: Vec<f32>,
    /// `[n_embd, n_heads * head_dim]`
    pub wo: Vec<f32>,
    pub ffn_norm: Vec<f32>,
    /// `[n_ff, n_embd]`
    pub ffn_gate: Vec<f32>,
    /// `[n_ff, n_embd]`
    pub ffn_up: Vec<f32>,
    /// `[n_embd, n_ff]`
    pub ffn_down: Vec<f32>,
}

pub struct LlamaWeights {
    /// `[n_vocab, n_embd]`
    pub token_embd: Vec<f32>,
    pub output_norm: Vec<f32>,
    /// `[n_vocab, n_embd]`; the embedding matrix when embeddings are tied.
    pub output: Vec<f32>,
    pub layers: Vec<LlamaLayer>,
}

impl LlamaWeights {
    /// Load all weights, checking every tensor's element count against
    /// the configuration.
    pub fn from_gguf(gguf: &GgufFile, config: &LlamaConfig) -> Result<LlamaWeights> {
        let n_embd = config.n_embd;
        let q_dim = config.n_heads * config.head_dim;
        let kv_dim = config.kv_width();
        let load = |name: &str, expected: usize| -> Result<Vec<f32>> {
            let data = gguf.tensor(name)?.into_f32()?;
            if data.len() != expected {
                return Err(ModelError::TensorSize {
                    name: name.to_string(),
                    expected,
                    got: data.len(),
                });
            }
            Ok(data)
        };

        let token_embd = load("token_embd.weight", config.n_vocab * n_embd)?;
        let output_norm = load("output_norm.weight", n_embd)?;
        let output = if gguf.tensor_info("output.weight").is_some() {
            load("output.weight", config.n_vocab * n_embd)?
        } else {
            tracing::debug!("output.weight absent, using tied embeddings");
            token_embd.clone()
        };

        let mut layers = Vec::with_capacity(config.n_layers);
        for i in 0..config.n_layers {
            let blk =
                |suffix: &str, expected: usize| load(&format!("blk.{}.{}", i, suffix), expected);
            layers.push(LlamaLayer {
                attn_norm: blk("attn_norm.weight", n_embd)?,
                wq: blk("attn_q.weight", q_dim * n_embd)?,
                wk: blk("attn_k.weight", kv_dim * n_embd)?,
                wv: blk("attn_v.weight", kv_dim * n_embd)?,
                wo: blk("attn_output.weight", n_embd * q_dim)?,
                ffn_norm: blk("ffn_norm.weight", n_embd)?,
                ffn_gate: blk("ffn_gate.weight", config.n_ff * n_embd)?,
                ffn_up: blk("ffn_up.weight", config.n_ff * n_embd)?,
                ffn_down: blk("ffn_down.weight", n_embd * config.n_ff)?,
            });
        }

        Ok(LlamaWeights {
            token_embd,
            output_norm,
            output,
            layers,
        })
    }
}
