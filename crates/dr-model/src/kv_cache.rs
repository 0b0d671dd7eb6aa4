use dr_tensor::{Tensor, TensorMap};

use crate::error::{ModelError, Result};
use crate::gguf::{GgufFile, GgufMetadata};
use crate::stage::{names, Stage, StageKind};

pub const BLOCK_COUNT_KEY: &str = "kv-cache.block_count";
pub const KV_WIDTH_KEY: &str = "kv-cache.kv_width";
pub const CONTEXT_LENGTH_KEY: &str = "kv-cache.context_length";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KvCacheConfig {
    pub n_layers: usize,
    pub kv_width: usize,
    pub context_length: usize,
}

impl KvCacheConfig {
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<KvCacheConfig> {
        Ok(KvCacheConfig {
            n_layers: metadata.get_usize(BLOCK_COUNT_KEY)?,
            kv_width: metadata.get_usize(KV_WIDTH_KEY)?,
            context_length: metadata.get_usize(CONTEXT_LENGTH_KEY)?,
        })
    }
}

/// The cache processor: appends the main network's new key/value rows to
/// the running cache along the sequence axis.
///
/// Inputs `k_cache`/`v_cache` `[L, past, kv]` and `new_k`/`new_v`
/// `[L, n, kv]`; outputs `k_cache`/`v_cache` `[L, past + n, kv]`.
#[derive(Debug, Clone)]
pub struct KvCacheStage {
    config: KvCacheConfig,
}

impl KvCacheStage {
    pub fn new(config: KvCacheConfig) -> Self {
        Self { config }
    }

    pub fn from_gguf(gguf: &GgufFile) -> Result<Self> {
        Ok(Self::new(KvCacheConfig::from_gguf(&gguf.metadata)?))
    }

    fn append(&self, inputs: &TensorMap, cache: &str, new: &str) -> Result<Tensor> {
        let past = inputs.require(cache)?;
        let added = inputs.require(new)?;
        for (name, t) in [(cache, past), (new, added)] {
            let dims = t.shape().dims();
            if dims.len() != 3 || dims[0] != self.config.n_layers || dims[2] != self.config.kv_width
            {
                return Err(ModelError::InvalidInput(format!(
                    "{} has shape {}, expected [{}, _, {}]",
                    name,
                    t.shape(),
                    self.config.n_layers,
                    self.config.kv_width
                )));
            }
        }
        let len = past.shape().dim(1) + added.shape().dim(1);
        if len > self.config.context_length {
            return Err(ModelError::ContextOverflow {
                len,
                max: self.config.context_length,
            });
        }
        Ok(Tensor::concat(&[past, added], 1)?)
    }
}

impl Stage for KvCacheStage {
    fn kind(&self) -> StageKind {
        StageKind::CacheProcessor
    }

    fn predict(&self, inputs: &TensorMap) -> Result<TensorMap> {
        let k = self.append(inputs, names::K_CACHE, names::NEW_K)?;
        let v = self.append(inputs, names::V_CACHE, names::NEW_V)?;
        Ok(TensorMap::new()
            .with(names::K_CACHE, k)
            .with(names::V_CACHE, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_tensor::Shape;

    fn stage() -> KvCacheStage {
        KvCacheStage::new(KvCacheConfig {
            n_layers: 2,
            kv_width: 1,
            context_length: 3,
        })
    }

    fn t(data: Vec<f32>, len: usize) -> Tensor {
        Tensor::new(data, Shape::new(vec![2, len, 1]))
    }

    #[test]
    fn test_appends_per_layer() {
        let inputs = TensorMap::new()
            .with(names::K_CACHE, t(vec![1.0, 2.0], 1))
            .with(names::V_CACHE, t(vec![-1.0, -2.0], 1))
            .with(names::NEW_K, t(vec![10.0, 11.0, 20.0, 21.0], 2))
            .with(names::NEW_V, t(vec![-10.0, -11.0, -20.0, -21.0], 2));
        let out = stage().predict(&inputs).unwrap();
        let k = out.require(names::K_CACHE).unwrap();
        assert_eq!(k.shape().dims(), &[2, 3, 1]);
        assert_eq!(k.data_f32().unwrap(), &[1.0, 10.0, 11.0, 2.0, 20.0, 21.0]);
        assert_eq!(
            out.require(names::V_CACHE).unwrap().data_f32().unwrap(),
            &[-1.0, -10.0, -11.0, -2.0, -20.0, -21.0]
        );
    }

    #[test]
    fn test_empty_cache() {
        let inputs = TensorMap::new()
            .with(names::K_CACHE, t(vec![], 0))
            .with(names::V_CACHE, t(vec![], 0))
            .with(names::NEW_K, t(vec![1.0, 2.0], 1))
            .with(names::NEW_V, t(vec![3.0, 4.0], 1));
        let out = stage().predict(&inputs).unwrap();
        assert_eq!(out.require(names::V_CACHE).unwrap().data_f32().unwrap(), &[3.0, 4.0]);
    }

    #[test]
    fn test_overflow_and_shape_errors() {
        let inputs = TensorMap::new()
            .with(names::K_CACHE, t(vec![0.0; 4], 2))
            .with(names::V_CACHE, t(vec![0.0; 4], 2))
            .with(names::NEW_K, t(vec![0.0; 4], 2))
            .with(names::NEW_V, t(vec![0.0; 4], 2));
        assert!(matches!(
            stage().predict(&inputs),
            Err(ModelError::ContextOverflow { len: 4, max: 3 })
        ));

        let bad = TensorMap::new()
            .with(names::K_CACHE, Tensor::new(vec![0.0; 2], Shape::new(vec![1, 2, 1])))
            .with(names::NEW_K, t(vec![0.0; 2], 1));
        assert!(matches!(stage().predict(&bad), Err(ModelError::InvalidInput(_))));
    }
}
