//! `dr-pipeline` - Drives the staged decode loop.
//!
//! A `ModelPipeline` owns three lazily loaded stages (main network, cache
//! processor, logit processor) and turns a prompt into a `PredictionStream`:
//! one `Prediction` per decode step, computed only when polled. A
//! `Generator` layers tokenization, stop tokens and incremental text on top.

pub mod cache;
pub mod config;
pub mod deferred;
pub mod delta;
pub mod error;
pub mod generation;
pub mod logits;
pub mod observer;
pub mod pipeline;
pub mod stats;
pub mod stream;

pub use cache::{CacheLayout, CacheProcessor, CacheState};
pub use config::{artifact_path, ArtifactNames, GenerationConfig, PipelineConfig};
pub use deferred::{DeferredModel, LoadState, ResidentGuard};
pub use delta::TextDelta;
pub use error::{PipelineError, Result};
pub use generation::{FinishReason, Generation, Generator, TextStream};
pub use logits::{LogitProcessor, Selection};
pub use observer::{NoopObserver, PipelineObserver, TracingObserver};
pub use pipeline::{artifact_tokenizer, ModelPipeline, PipelineState};
pub use stats::{LatencyRecorder, LatencyStats};
pub use stream::{CancelHandle, Prediction, PredictionStream};
