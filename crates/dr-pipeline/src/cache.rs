use std::time::Duration;

use dr_model::{names, StageKind, StageLoader};
use dr_tensor::{Shape, Tensor, TensorMap};

use crate::deferred::{DeferredModel, LoadState};
use crate::error::{PipelineError, Result};

/// Cache dimensions shared by the main network and the cache processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLayout {
    pub n_layers: usize,
    pub kv_width: usize,
}

/// Keys and values for every processed position, each
/// `[n_layers, len, kv_width]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheState {
    keys: Tensor,
    values: Tensor,
}

impl CacheState {
    pub fn empty(layout: CacheLayout) -> Self {
        let shape = Shape::new(vec![layout.n_layers, 0, layout.kv_width]);
        Self {
            keys: Tensor::zeros(shape.clone()),
            values: Tensor::zeros(shape),
        }
    }

    /// Number of positions held.
    pub fn len(&self) -> usize {
        seq_len(&self.keys)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> &Tensor {
        &self.keys
    }

    pub fn values(&self) -> &Tensor {
        &self.values
    }

    pub(crate) fn from_parts(keys: Tensor, values: Tensor) -> Self {
        Self { keys, values }
    }

    pub(crate) fn into_parts(self) -> (Tensor, Tensor) {
        (self.keys, self.values)
    }
}

fn seq_len(t: &Tensor) -> usize {
    if t.shape().ndim() == 3 {
        t.shape().dim(1)
    } else {
        0
    }
}

/// Folds each step's new key/value rows into the running cache.
pub struct CacheProcessor {
    model: DeferredModel,
}

impl CacheProcessor {
    pub fn new(loader: Box<dyn StageLoader>) -> Self {
        Self {
            model: DeferredModel::new(loader),
        }
    }

    pub fn model(&self) -> &DeferredModel {
        &self.model
    }

    pub fn load(&self) -> Result<Option<Duration>> {
        self.model.load()
    }

    pub fn unload(&self) -> bool {
        self.model.unload()
    }

    pub fn state(&self) -> LoadState {
        self.model.state()
    }

    /// Append the `new_k`/`new_v` rows from the main network's outputs.
    ///
    /// The result must hold exactly `previous.len()` plus the number of
    /// new rows.
    pub fn update(&self, previous: CacheState, activations: &TensorMap) -> Result<CacheState> {
        let stage = StageKind::CacheProcessor;
        let activation = |name: &str| {
            activations.get(name).cloned().ok_or_else(|| {
                PipelineError::prediction(
                    StageKind::MainNetwork,
                    format!("no '{}' output", name),
                )
            })
        };
        let new_k = activation(names::NEW_K)?;
        let new_v = activation(names::NEW_V)?;
        let expected = previous.len() + seq_len(&new_k);

        let (keys, values) = previous.into_parts();
        let inputs = TensorMap::new()
            .with(names::K_CACHE, keys)
            .with(names::V_CACHE, values)
            .with(names::NEW_K, new_k)
            .with(names::NEW_V, new_v);
        let mut outputs = self.model.predict(&inputs)?;

        let mut output = |name: &str| {
            outputs
                .take(name)
                .map_err(|_| PipelineError::prediction(stage, format!("no '{}' output", name)))
        };
        let next = CacheState::from_parts(output(names::K_CACHE)?, output(names::V_CACHE)?);

        if next.len() != expected || seq_len(&next.values) != expected {
            return Err(PipelineError::prediction(
                stage,
                format!(
                    "cache holds {} keys and {} values, expected {}",
                    next.len(),
                    seq_len(&next.values),
                    expected
                ),
            ));
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_model::{KvCacheConfig, KvCacheStage, Stage};

    struct Loader(fn() -> Box<dyn Stage>);

    impl StageLoader for Loader {
        fn kind(&self) -> StageKind {
            StageKind::CacheProcessor
        }

        fn describe(&self) -> String {
            "memory://cache".to_string()
        }

        fn load(&self) -> dr_model::Result<Box<dyn Stage>> {
            Ok((self.0)())
        }
    }

    /// Drops the new rows instead of appending them.
    struct Forgetful;

    impl Stage for Forgetful {
        fn kind(&self) -> StageKind {
            StageKind::CacheProcessor
        }

        fn predict(&self, inputs: &TensorMap) -> dr_model::Result<TensorMap> {
            let mut out = TensorMap::new();
            for name in [names::K_CACHE, names::V_CACHE] {
                out.insert(name, inputs.require(name)?.clone());
            }
            Ok(out)
        }
    }

    const LAYOUT: CacheLayout = CacheLayout {
        n_layers: 2,
        kv_width: 3,
    };

    fn rows(n: usize) -> TensorMap {
        let shape = Shape::new(vec![LAYOUT.n_layers, n, LAYOUT.kv_width]);
        TensorMap::new()
            .with(names::NEW_K, Tensor::zeros(shape.clone()))
            .with(names::NEW_V, Tensor::zeros(shape))
    }

    fn kv_processor() -> CacheProcessor {
        let p = CacheProcessor::new(Box::new(Loader(|| {
            Box::new(KvCacheStage::new(KvCacheConfig {
                n_layers: LAYOUT.n_layers,
                kv_width: LAYOUT.kv_width,
                context_length: 16,
            }))
        })));
        p.load().unwrap();
        p
    }

    #[test]
    fn test_cache_grows_by_new_rows() {
        let p = kv_processor();
        let cache = CacheState::empty(LAYOUT);
        assert!(cache.is_empty());
        let cache = p.update(cache, &rows(4)).unwrap();
        assert_eq!(cache.len(), 4);
        let cache = p.update(cache, &rows(1)).unwrap();
        assert_eq!(cache.len(), 5);
        assert_eq!(cache.values().shape().dims(), &[2, 5, 3]);
    }

    #[test]
    fn test_missing_activations() {
        let p = kv_processor();
        let err = p.update(CacheState::empty(LAYOUT), &TensorMap::new()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::PredictionFailed {
                stage: StageKind::MainNetwork,
                ..
            }
        ));
    }

    #[test]
    fn test_length_invariant_enforced() {
        let p = CacheProcessor::new(Box::new(Loader(|| Box::new(Forgetful))));
        p.load().unwrap();
        let err = p.update(CacheState::empty(LAYOUT), &rows(2)).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::PredictionFailed {
                stage: StageKind::CacheProcessor,
                ..
            }
        ));
    }

    #[test]
    fn test_not_loaded() {
        let p = CacheProcessor::new(Box::new(Loader(|| Box::new(Forgetful))));
        assert_eq!(p.state(), LoadState::Unloaded);
        assert!(matches!(
            p.update(CacheState::empty(LAYOUT), &rows(1)),
            Err(PipelineError::NotLoaded { .. })
        ));
    }
}
