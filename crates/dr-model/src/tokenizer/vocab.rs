use std::collections::HashMap;

use crate::error::{ModelError, Result};
use crate::gguf::GgufMetadata;

pub const TOKENS_KEY: &str = "tokenizer.ggml.tokens";
pub const SCORES_KEY: &str = "tokenizer.ggml.scores";
pub const MERGES_KEY: &str = "tokenizer.ggml.merges";
pub const BOS_KEY: &str = "tokenizer.ggml.bos_token_id";
pub const EOS_KEY: &str = "tokenizer.ggml.eos_token_id";
pub const UNKNOWN_KEY: &str = "tokenizer.ggml.unknown_token_id";

/// Token vocabulary read from the `tokenizer.ggml.*` metadata keys.
#[derive(Debug, Clone)]
pub struct Vocab {
    pub tokens: Vec<String>,
    /// Per-token scores; all zero when the artifact carries none.
    pub scores: Vec<f32>,
    pub token_to_id: HashMap<String, u32>,
    pub bos_id: Option<u32>,
    pub eos_id: Option<u32>,
    pub unknown_id: u32,
}

impl Vocab {
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<Vocab> {
        let tokens = metadata.get_string_array(TOKENS_KEY)?;
        let scores = if metadata.contains(SCORES_KEY) {
            metadata.get_f32_array(SCORES_KEY)?
        } else {
            vec![0.0; tokens.len()]
        };
        let optional_id = |key: &str| {
            if metadata.contains(key) {
                metadata.get_u32(key).map(Some)
            } else {
                Ok(None)
            }
        };
        let bos_id = optional_id(BOS_KEY)?;
        let eos_id = optional_id(EOS_KEY)?;
        let unknown_id = optional_id(UNKNOWN_KEY)?.unwrap_or(0);
        Vocab::new(tokens, scores, bos_id, eos_id, unknown_id)
    }

    pub fn new(
        tokens: Vec<String>,
        scores: Vec<f32>,
        bos_id: Option<u32>,
        eos_id: Option<u32>,
        unknown_id: u32,
    ) -> Result<Vocab> {
        if tokens.len() != scores.len() {
            return Err(ModelError::TokenizerError(format!(
                "tokens length ({}) does not match scores length ({})",
                tokens.len(),
                scores.len()
            )));
        }
        for id in [bos_id, eos_id].into_iter().flatten() {
            if id as usize >= tokens.len() {
                return Err(ModelError::TokenizerError(format!(
                    "special token id {} outside vocabulary of {}",
                    id,
                    tokens.len()
                )));
            }
        }

        // First occurrence wins for duplicated strings.
        let mut token_to_id = HashMap::with_capacity(tokens.len());
        for (id, tok) in tokens.iter().enumerate() {
            token_to_id.entry(tok.clone()).or_insert(id as u32);
        }

        Ok(Vocab {
            tokens,
            scores,
            token_to_id,
            bos_id,
            eos_id,
            unknown_id,
        })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }

    pub fn score(&self, id: u32) -> f32 {
        self.scores.get(id as usize).copied().unwrap_or(f32::NEG_INFINITY)
    }

    pub fn is_special(&self, id: u32) -> bool {
        Some(id) == self.bos_id || Some(id) == self.eos_id
    }
}
