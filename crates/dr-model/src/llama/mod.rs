pub mod config;
pub mod weights;

pub use config::LlamaConfig;
pub use weights::{LlamaLayer, LlamaWeights};

use std::sync::Arc;

use dr_tensor::{ComputeBackend, Shape, Tensor, TensorMap};

use crate::error::{ModelError, Result};
use crate::gguf::GgufFile;
use crate::stage::{names, Stage, StageKind};

/// The main network: a LLaMA decoder that takes the new token ids and the
/// cache accumulated so far, and returns next-token logits for the last
/// position plus the key/value rows of the positions it processed.
///
/// The stage itself is stateless; the caller owns the cache.
pub struct LlamaStage {
    config: LlamaConfig,
    weights: LlamaWeights,
    backend: Arc<dyn ComputeBackend>,
}

struct Forward {
    logits: Vec<f32>,
    new_k: Vec<f32>,
    new_v: Vec<f32>,
}

impl LlamaStage {
    pub fn from_gguf(gguf: &GgufFile, backend: Arc<dyn ComputeBackend>) -> Result<LlamaStage> {
        let config = LlamaConfig::from_gguf(&gguf.metadata)?;
        let weights = LlamaWeights::from_gguf(gguf, &config)?;
        tracing::debug!(
            layers = config.n_layers,
            embd = config.n_embd,
            vocab = config.n_vocab,
            shards = config.logit_shards,
            backend = backend.name(),
            "llama stage ready"
        );
        Ok(LlamaStage {
            config,
            weights,
            backend,
        })
    }

    pub fn config(&self) -> &LlamaConfig {
        &self.config
    }

    /// Run `tokens` at positions `past..past + tokens.len()`.
    ///
    /// `k_past`/`v_past` are `[n_layers, past, kv_width]`.
    fn forward(
        &self,
        tokens: &[u32],
        k_past: &[f32],
        v_past: &[f32],
        past: usize,
    ) -> Result<Forward> {
        let cfg = &self.config;
        let backend = self.backend.as_ref();
        let n_embd = cfg.n_embd;
        let q_dim = cfg.n_heads * cfg.head_dim;
        let kv_dim = cfg.kv_width();

        // Per-layer key/value rows for the new positions.
        let mut layer_k = vec![Vec::with_capacity(tokens.len() * kv_dim); cfg.n_layers];
        let mut layer_v = vec![Vec::with_capacity(tokens.len() * kv_dim); cfg.n_layers];
        let mut last_hidden = None;

        for (t, &token_id) in tokens.iter().enumerate() {
            let pos = past + t;
            let embd_offset = token_id as usize * n_embd;
            let mut hidden = self.weights.token_embd[embd_offset..embd_offset + n_embd].to_vec();

            for (l, layer) in self.weights.layers.iter().enumerate() {
                let normed =
                    backend.rms_norm(&hidden, &layer.attn_norm, cfg.norm_eps, n_embd)?;

                // GGUF weights are [out, in]; W @ x is a [out, 1] matmul.
                let q = backend.matmul(&layer.wq, &normed, q_dim, n_embd, 1)?;
                let k = backend.matmul(&layer.wk, &normed, kv_dim, n_embd, 1)?;
                let v = backend.matmul(&layer.wv, &normed, kv_dim, n_embd, 1)?;
                let (q, k) = backend.rope(
                    &q,
                    &k,
                    cfg.head_dim,
                    pos,
                    cfg.n_heads,
                    cfg.n_kv_heads,
                    cfg.rope_theta,
                )?;
                layer_k[l].extend_from_slice(&k);
                layer_v[l].extend_from_slice(&v);

                let layer_past = past * kv_dim;
                let attn = self.attend(
                    &q,
                    &k_past[l * layer_past..(l + 1) * layer_past],
                    &v_past[l * layer_past..(l + 1) * layer_past],
                    &layer_k[l],
                    &layer_v[l],
                )?;

                let attn_proj = backend.matmul(&layer.wo, &attn, n_embd, q_dim, 1)?;
                hidden = backend.add(&hidden, &attn_proj)?;

                // SwiGLU feed-forward.
                let normed =
                    backend.rms_norm(&hidden, &layer.ffn_norm, cfg.norm_eps, n_embd)?;
                let gate = backend.matmul(&layer.ffn_gate, &normed, cfg.n_ff, n_embd, 1)?;
                let up = backend.matmul(&layer.ffn_up, &normed, cfg.n_ff, n_embd, 1)?;
                let gate_up = backend.mul(&backend.silu(&gate)?, &up)?;
                let ffn_out =
                    backend.matmul(&layer.ffn_down, &gate_up, n_embd, cfg.n_ff, 1)?;
                hidden = backend.add(&hidden, &ffn_out)?;
            }
            last_hidden = Some(hidden);
        }

        // Only the last position's logits are needed for the next token.
        let hidden = last_hidden
            .ok_or_else(|| ModelError::InvalidInput("no tokens to process".to_string()))?;
        let normed = backend.rms_norm(&hidden, &self.weights.output_norm, cfg.norm_eps, n_embd)?;
        let logits = backend.matmul(&self.weights.output, &normed, cfg.n_vocab, n_embd, 1)?;

        Ok(Forward {
            logits,
            new_k: layer_k.concat(),
            new_v: layer_v.concat(),
        })
    }

    /// Grouped-query attention of one position against every earlier
    /// position (cached rows first, then the new rows). Causality holds
    /// because only rows up to the current position exist yet.
    fn attend(
        &self,
        q: &[f32],
        past_k: &[f32],
        past_v: &[f32],
        new_k: &[f32],
        new_v: &[f32],
    ) -> Result<Vec<f32>> {
        let cfg = &self.config;
        let head_dim = cfg.head_dim;
        let kv_dim = cfg.kv_width();
        let heads_per_kv = cfg.n_heads / cfg.n_kv_heads;
        let scale = 1.0 / (head_dim as f32).sqrt();
        let seq_len = (past_k.len() + new_k.len()) / kv_dim;

        let mut out = vec![0.0f32; cfg.n_heads * head_dim];
        for h in 0..cfg.n_heads {
            let kv_off = (h / heads_per_kv) * head_dim;
            let q_head = &q[h * head_dim..(h + 1) * head_dim];

            let scores: Vec<f32> = past_k
                .chunks_exact(kv_dim)
                .chain(new_k.chunks_exact(kv_dim))
                .map(|row| {
                    let k_head = &row[kv_off..kv_off + head_dim];
                    q_head.iter().zip(k_head).map(|(a, b)| a * b).sum::<f32>() * scale
                })
                .collect();
            let probs = self.backend.softmax(&scores, seq_len)?;

            let out_head = &mut out[h * head_dim..(h + 1) * head_dim];
            let values = past_v.chunks_exact(kv_dim).chain(new_v.chunks_exact(kv_dim));
            for (&p, row) in probs.iter().zip(values) {
                for (o, &v) in out_head.iter_mut().zip(&row[kv_off..kv_off + head_dim]) {
                    *o += p * v;
                }
            }
        }
        Ok(out)
    }

    /// A `[n_layers, past, kv_width]` cache input and its `past` length.
    fn cache_input<'a>(
        &self,
        inputs: &'a TensorMap,
        name: &str,
    ) -> Result<(&'a [f32], usize)> {
        let t = inputs.require(name)?;
        let dims = t.shape().dims();
        if dims.len() != 3
            || dims[0] != self.config.n_layers
            || dims[2] != self.config.kv_width()
        {
            return Err(ModelError::InvalidInput(format!(
                "{} has shape {}, expected [{}, past, {}]",
                name,
                t.shape(),
                self.config.n_layers,
                self.config.kv_width()
            )));
        }
        Ok((t.data_f32()?, dims[1]))
    }
}

impl Stage for LlamaStage {
    fn kind(&self) -> StageKind {
        StageKind::MainNetwork
    }

    fn predict(&self, inputs: &TensorMap) -> Result<TensorMap> {
        let cfg = &self.config;
        let tokens = inputs.require(names::INPUT_IDS)?.data_u32()?;
        if tokens.is_empty() {
            return Err(ModelError::InvalidInput("no tokens to process".to_string()));
        }
        if let Some(&bad) = tokens.iter().find(|&&id| id as usize >= cfg.n_vocab) {
            return Err(ModelError::InvalidInput(format!(
                "token id {} exceeds vocab size {}",
                bad, cfg.n_vocab
            )));
        }

        let (k_past, past) = self.cache_input(inputs, names::K_CACHE)?;
        let (v_past, v_len) = self.cache_input(inputs, names::V_CACHE)?;
        if v_len != past {
            return Err(ModelError::InvalidInput(format!(
                "key cache holds {} positions but value cache holds {}",
                past, v_len
            )));
        }
        let len = past + tokens.len();
        if len > cfg.max_seq_len {
            return Err(ModelError::ContextOverflow {
                len,
                max: cfg.max_seq_len,
            });
        }

        let fwd = self.forward(tokens, k_past, v_past, past)?;

        let n = tokens.len();
        let kv_shape = Shape::new(vec![cfg.n_layers, n, cfg.kv_width()]);
        let mut outputs = TensorMap::new()
            .with(names::NEW_K, Tensor::from_f32(fwd.new_k, kv_shape.clone())?)
            .with(names::NEW_V, Tensor::from_f32(fwd.new_v, kv_shape)?);

        let width = cfg.shard_width();
        if cfg.logit_shards == 1 {
            outputs.insert(
                names::LOGITS,
                Tensor::from_f32(fwd.logits, Shape::new(vec![1, width]))?,
            );
        } else {
            for (i, shard) in fwd.logits.chunks_exact(width).enumerate() {
                outputs.insert(
                    names::logits_shard(i),
                    Tensor::from_f32(shard.to_vec(), Shape::new(vec![1, width]))?,
                );
            }
        }
        Ok(outputs)
    }
}
