use dr_tensor::{Tensor, TensorMap};

use crate::error::{ModelError, Result};
use crate::gguf::{GgufFile, GgufMetadata};
use crate::stage::{names, Stage, StageKind};

pub const SHARD_COUNT_KEY: &str = "argmax.shard_count";
pub const VOCAB_SIZE_KEY: &str = "argmax.vocab_size";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgmaxConfig {
    pub shards: usize,
    pub vocab_size: usize,
}

impl ArgmaxConfig {
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<ArgmaxConfig> {
        let config = ArgmaxConfig {
            shards: metadata.get_usize(SHARD_COUNT_KEY)?,
            vocab_size: metadata.get_usize(VOCAB_SIZE_KEY)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// The vocabulary must split into `shards` equal, non-empty slices.
    pub fn validate(&self) -> Result<()> {
        if self.shards == 0 || self.vocab_size == 0 || self.vocab_size % self.shards != 0 {
            return Err(ModelError::InvalidConfig(format!(
                "vocabulary of {} cannot be split into {} shards",
                self.vocab_size, self.shards
            )));
        }
        Ok(())
    }
}

/// The logit processor: a row-wise arg-max over the vocabulary, which may
/// arrive split into `logits_{i}` slices.
///
/// Each input is `[n, vocab / shards]` (rank 1 is treated as one row). The
/// output `argmax` is `[n]` u32 holding the global vocabulary index of the
/// best entry per row; ties resolve to the lowest index.
#[derive(Debug, Clone)]
pub struct ArgmaxStage {
    config: ArgmaxConfig,
}

impl ArgmaxStage {
    pub fn new(config: ArgmaxConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn from_gguf(gguf: &GgufFile) -> Result<Self> {
        Self::new(ArgmaxConfig::from_gguf(&gguf.metadata)?)
    }

    /// The logit inputs in global vocabulary order.
    fn shards<'a>(&self, inputs: &'a TensorMap) -> Result<Vec<&'a Tensor>> {
        if self.config.shards == 1 {
            if let Some(t) = inputs.get(names::LOGITS) {
                return Ok(vec![t]);
            }
        }
        (0..self.config.shards)
            .map(|i| Ok(inputs.require(&names::logits_shard(i))?))
            .collect()
    }
}

impl Stage for ArgmaxStage {
    fn kind(&self) -> StageKind {
        StageKind::LogitProcessor
    }

    fn predict(&self, inputs: &TensorMap) -> Result<TensorMap> {
        let shards = self.shards(inputs)?;
        let width = self.config.vocab_size / self.config.shards;
        let rows = shards[0].n_rows();

        let mut selected = Vec::with_capacity(rows);
        for r in 0..rows {
            let mut best: Option<(f32, usize)> = None;
            for (s, shard) in shards.iter().enumerate() {
                let row = shard.row(r)?;
                if row.len() != width {
                    return Err(ModelError::InvalidInput(format!(
                        "logit shard {} has width {}, expected {}",
                        s,
                        row.len(),
                        width
                    )));
                }
                for (j, &x) in row.iter().enumerate() {
                    if best.map_or(true, |(b, _)| x > b) {
                        best = Some((x, s * width + j));
                    }
                }
            }
            let (_, index) = best.ok_or_else(|| {
                ModelError::InvalidInput("empty logits row".to_string())
            })?;
            selected.push(index as u32);
        }

        Ok(TensorMap::new().with(names::ARGMAX, Tensor::from_tokens(&selected)))
    }
}
