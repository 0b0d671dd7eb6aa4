use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dr_model::{names, StageKind, StageLoader};
use dr_sampler::SamplerChain;
use dr_tensor::{DType, Tensor, TensorMap};

use crate::deferred::{DeferredModel, LoadState};
use crate::error::{PipelineError, Result};

/// How the next token is chosen from the logits.
#[derive(Clone, Default)]
pub enum Selection {
    /// Arg-max through the logit processor stage.
    #[default]
    Greedy,
    /// Explicit sampling mode. The stage is bypassed and the chain sees the
    /// requested row of the concatenated shards.
    Sampled(Arc<SamplerChain>),
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::Greedy => f.write_str("Greedy"),
            Selection::Sampled(chain) => f.debug_tuple("Sampled").field(&chain.names()).finish(),
        }
    }
}

/// Maps the main network's logit tensors to one selected token.
pub struct LogitProcessor {
    model: DeferredModel,
    selection: Mutex<Selection>,
}

impl LogitProcessor {
    pub fn new(loader: Box<dyn StageLoader>) -> Self {
        Self {
            model: DeferredModel::new(loader),
            selection: Mutex::new(Selection::Greedy),
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

    pub fn set_selection(&self, selection: Selection) {
        tracing::debug!(?selection, "token selection changed");
        *self.selection.lock().unwrap_or_else(PoisonError::into_inner) = selection;
    }

    pub fn selection(&self) -> Selection {
        self.selection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Select the token at `position`, or at the last row when `None`.
    pub fn select_token(&self, logits: &[Tensor], position: Option<usize>) -> Result<u32> {
        self.select_token_in_context(logits, position, &[])
    }

    /// As `select_token`, giving the sampling mode the token history for its
    /// repetition penalty. Greedy selection ignores `history`.
    pub fn select_token_in_context(
        &self,
        logits: &[Tensor],
        position: Option<usize>,
        history: &[u32],
    ) -> Result<u32> {
        let first = logits
            .first()
            .ok_or_else(|| PipelineError::InvalidInput("no logits to select from".to_string()))?;
        let row = match position {
            Some(p) => p,
            None => first.n_rows().checked_sub(1).ok_or_else(|| {
                PipelineError::prediction(StageKind::LogitProcessor, "logits have no rows")
            })?,
        };

        match self.selection() {
            Selection::Greedy => self.argmax(logits, row),
            Selection::Sampled(chain) => {
                let mut scores = Vec::new();
                for shard in logits {
                    let values = shard
                        .row(row)
                        .map_err(|e| PipelineError::prediction(StageKind::LogitProcessor, e))?;
                    scores.extend_from_slice(values);
                }
                Ok(chain.sample(&scores, history))
            }
        }
    }

    fn argmax(&self, logits: &[Tensor], row: usize) -> Result<u32> {
        let stage = StageKind::LogitProcessor;
        let outputs = self.model.predict(&label_inputs(logits))?;
        let selected = outputs
            .get(names::ARGMAX)
            .ok_or_else(|| PipelineError::prediction(stage, "no 'argmax' output"))?;
        let missing = || PipelineError::prediction(stage, format!("no token at position {}", row));

        match selected.dtype() {
            DType::U32 => {
                let ids = selected
                    .data_u32()
                    .map_err(|e| PipelineError::prediction(stage, e))?;
                ids.get(row).copied().ok_or_else(missing)
            }
            _ => {
                let ids = selected
                    .data_f32()
                    .map_err(|e| PipelineError::prediction(stage, e))?;
                let v = ids.get(row).copied().ok_or_else(missing)?;
                if v.fract() != 0.0 || !(0.0..=u32::MAX as f32).contains(&v) {
                    return Err(PipelineError::prediction(
                        stage,
                        format!("{} is not a token id", v),
                    ));
                }
                Ok(v as u32)
            }
        }
    }
}

/// Name logit tensors the way the logit stage expects: a single tensor is
/// `logits`, several are `logits_0`, `logits_1`, ... in order.
pub fn label_inputs(logits: &[Tensor]) -> TensorMap {
    match logits {
        [single] => TensorMap::new().with(names::LOGITS, single.clone()),
        shards => shards
            .iter()
            .enumerate()
            .fold(TensorMap::new(), |map, (i, t)| {
                map.with(names::logits_shard(i), t.clone())
            }),
    }
}

/// Collect the logit tensors from the main network's outputs, shards in
/// index order.
pub fn logit_outputs(outputs: &TensorMap) -> Vec<Tensor> {
    if let Some(t) = outputs.get(names::LOGITS) {
        return vec![t.clone()];
    }
    let mut shards: Vec<(usize, &Tensor)> = outputs
        .iter()
        .filter_map(|(name, t)| names::shard_index(name).map(|i| (i, t)))
        .collect();
    shards.sort_by_key(|(i, _)| *i);
    shards.into_iter().map(|(_, t)| t.clone()).collect()
}
