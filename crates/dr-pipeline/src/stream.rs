use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use futures::stream::{self, Stream, StreamExt};
use tokio::sync::OwnedMutexGuard;

use dr_model::{names, StageKind};
use dr_tensor::{Tensor, TensorMap};

use crate::cache::CacheState;
use crate::error::{PipelineError, Result};
use crate::logits::logit_outputs;
use crate::observer::PipelineObserver;
use crate::pipeline::Stages;

/// One decode step's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    pub new_token: u32,
    /// Prompt plus every token generated so far, this one included.
    pub all_tokens: Vec<u32>,
    /// Forward pass, cache update and selection for this step.
    pub latency: Duration,
    /// Forward time of the step that consumed the prompt; `None` afterwards.
    pub prompt_latency: Option<Duration>,
}

/// Stops a `PredictionStream` before its next step. Cloneable and usable
/// from any thread.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Lazily produced predictions. A step only runs when the stream is polled,
/// and dropping the stream stops generation.
pub struct PredictionStream {
    inner: Pin<Box<dyn Stream<Item = Result<Prediction>> + Send>>,
    cancel: CancelHandle,
}

impl PredictionStream {
    pub(crate) fn new(state: DecodeState) -> Self {
        let cancel = state.cancel.clone();
        let inner = stream::unfold(Some(state), |state| async move {
            let mut state = state?;
            if state.cancel.is_cancelled() || state.step >= state.max_new_tokens {
                return None;
            }
            let joined = tokio::task::spawn_blocking(move || {
                let result = state.step();
                (state, result)
            })
            .await;
            match joined {
                Ok((state, Ok(prediction))) => {
                    state.observer.step_completed(state.step, &prediction);
                    Some((Ok(prediction), Some(state)))
                }
                Ok((state, Err(e))) => {
                    state.observer.generation_failed(state.step, &e);
                    Some((Err(e), None))
                }
                Err(e) => Some((Err(PipelineError::from(e)), None)),
            }
        });
        Self {
            inner: Box::pin(inner),
            cancel,
        }
    }

    /// A stream that yields nothing.
    pub fn empty() -> Self {
        Self {
            inner: Box::pin(stream::empty()),
            cancel: CancelHandle::new(),
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

impl Stream for PredictionStream {
    type Item = Result<Prediction>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for PredictionStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictionStream")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Everything one generation carries between steps.
pub(crate) struct DecodeState {
    pub stages: Arc<Stages>,
    pub tokens: Vec<u32>,
    pub cache: Option<CacheState>,
    /// Steps completed.
    pub step: usize,
    pub max_new_tokens: usize,
    pub cancel: CancelHandle,
    pub observer: Arc<dyn PipelineObserver>,
    /// Held for the life of the generation.
    pub _permit: OwnedMutexGuard<()>,
}

impl DecodeState {
    fn step(&mut self) -> Result<Prediction> {
        let start = Instant::now();
        let main = StageKind::MainNetwork;
        let first = self.step == 0;

        let cache = self.cache.take().ok_or_else(|| {
            PipelineError::prediction(StageKind::CacheProcessor, "no cache state to extend")
        })?;
        let ids = if first {
            &self.tokens[..]
        } else {
            &self.tokens[self.tokens.len() - 1..]
        };
        let (keys, values) = cache.into_parts();
        let mut inputs = TensorMap::new()
            .with(names::INPUT_IDS, Tensor::from_tokens(ids))
            .with(names::K_CACHE, keys)
            .with(names::V_CACHE, values);

        let forward_start = Instant::now();
        let outputs = self.stages.main.predict(&inputs)?;
        let forward = forward_start.elapsed();

        let mut take = |name: &str| {
            inputs
                .take(name)
                .map_err(|e| PipelineError::prediction(main, e))
        };
        let previous = CacheState::from_parts(take(names::K_CACHE)?, take(names::V_CACHE)?);
        let cache = self.stages.cache.update(previous, &outputs)?;

        let logits = logit_outputs(&outputs);
        if logits.is_empty() {
            return Err(PipelineError::prediction(main, "no logits output"));
        }
        let token = self
            .stages
            .logits
            .select_token_in_context(&logits, None, &self.tokens)?;

        self.tokens.push(token);
        self.cache = Some(cache);
        self.step += 1;
        Ok(Prediction {
            new_token: token,
            all_tokens: self.tokens.clone(),
            latency: start.elapsed(),
            prompt_latency: first.then_some(forward),
        })
    }
}

impl Drop for DecodeState {
    fn drop(&mut self) {
        self.observer.generation_finished(self.step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_handle_is_shared() {
        let a = CancelHandle::new();
        let b = a.clone();
        assert!(!b.is_cancelled());
        a.cancel();
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let mut s = PredictionStream::empty();
        assert!(s.next().await.is_none());
        assert!(!s.cancel_handle().is_cancelled());
    }
}
