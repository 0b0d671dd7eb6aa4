use crate::error::{ModelError, Result};
use crate::gguf::GgufMetadata;
use crate::tokenizer::vocab::TOKENS_KEY;

pub const LOGIT_SHARDS_KEY: &str = "decode.logit_shards";

/// Configuration for a LLaMA main network, parsed from GGUF metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct LlamaConfig {
    /// Vocabulary size (number of token embeddings).
    pub n_vocab: usize,
    /// Embedding dimension / hidden size.
    pub n_embd: usize,
    /// Number of attention heads for queries.
    pub n_heads: usize,
    /// Number of attention heads for keys/values (GQA).
    pub n_kv_heads: usize,
    pub n_layers: usize,
    /// Feed-forward intermediate dimension.
    pub n_ff: usize,
    pub norm_eps: f32,
    /// Maximum sequence length / context window size.
    pub max_seq_len: usize,
    /// RoPE frequency base (theta).
    pub rope_theta: f32,
    pub head_dim: usize,
    /// Number of equal vocabulary slices the logits are emitted in.
    pub logit_shards: usize,
}

impl LlamaConfig {
    /// Parse from GGUF metadata.
    ///
    /// Reads the standard `llama.*` hyperparameter keys. The vocabulary size
    /// comes from `llama.vocab_size` when present, otherwise from the
    /// length of `tokenizer.ggml.tokens`. `llama.rope.freq_base` defaults
    /// to 10000 and `decode.logit_shards` to 1.
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<LlamaConfig> {
        let n_embd = metadata.get_usize("llama.embedding_length")?;
        let n_heads = metadata.get_usize("llama.attention.head_count")?;
        let n_kv_heads = if metadata.contains("llama.attention.head_count_kv") {
            metadata.get_usize("llama.attention.head_count_kv")?
        } else {
            n_heads
        };
        let n_layers = metadata.get_usize("llama.block_count")?;
        let n_ff = metadata.get_usize("llama.feed_forward_length")?;
        let norm_eps = metadata.get_f32("llama.attention.layer_norm_rms_epsilon")?;
        let max_seq_len = metadata.get_usize("llama.context_length")?;
        let rope_theta = if metadata.contains("llama.rope.freq_base") {
            metadata.get_f32("llama.rope.freq_base")?
        } else {
            10000.0
        };
        let n_vocab = if metadata.contains("llama.vocab_size") {
            metadata.get_usize("llama.vocab_size")?
        } else {
            metadata.get_string_array(TOKENS_KEY)?.len()
        };
        let logit_shards = if metadata.contains(LOGIT_SHARDS_KEY) {
            metadata.get_usize(LOGIT_SHARDS_KEY)?
        } else {
            1
        };

        if n_heads == 0 || n_embd % n_heads != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "embedding length {} is not divisible by {} heads",
                n_embd, n_heads
            )));
        }
        let config = LlamaConfig {
            n_vocab,
            n_embd,
            n_heads,
            n_kv_heads,
            n_layers,
            n_ff,
            norm_eps,
            max_seq_len,
            rope_theta,
            head_dim: n_embd / n_heads,
            logit_shards,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.n_kv_heads == 0 || self.n_heads % self.n_kv_heads != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "{} query heads cannot be grouped over {} kv heads",
                self.n_heads, self.n_kv_heads
            )));
        }
        if self.head_dim == 0 || self.head_dim % 2 != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "head dimension {} must be even and non-zero for rotary embeddings",
                self.head_dim
            )));
        }
        if self.n_vocab == 0 {
            return Err(ModelError::InvalidConfig("empty vocabulary".to_string()));
        }
        if self.logit_shards == 0 || self.n_vocab % self.logit_shards != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "vocabulary of {} cannot be split into {} logit shards",
                self.n_vocab, self.logit_shards
            )));
        }
        Ok(())
    }

    /// Width of one cached key (or value) row across all kv heads.
    pub fn kv_width(&self) -> usize {
        self.n_kv_heads * self.head_dim
    }

    pub fn shard_width(&self) -> usize {
        self.n_vocab / self.logit_shards
    }
}
