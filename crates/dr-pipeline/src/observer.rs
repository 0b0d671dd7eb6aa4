use std::time::Duration;

use dr_model::StageKind;

use crate::error::PipelineError;
use crate::stream::Prediction;

/// Hooks into pipeline activity. Every method defaults to doing nothing.
pub trait PipelineObserver: Send + Sync {
    fn stage_loaded(&self, _stage: StageKind, _elapsed: Duration) {}

    fn stage_unloaded(&self, _stage: StageKind) {}

    fn generation_started(&self, _prompt_len: usize, _max_new_tokens: usize) {}

    fn step_completed(&self, _step: usize, _prediction: &Prediction) {}

    /// Called once per stream, however it ended.
    fn generation_finished(&self, _steps: usize) {}

    fn generation_failed(&self, _step: usize, _error: &PipelineError) {}
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Reports pipeline activity as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn stage_loaded(&self, stage: StageKind, elapsed: Duration) {
        tracing::info!(
            %stage,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "pipeline stage ready"
        );
    }

    fn stage_unloaded(&self, stage: StageKind) {
        tracing::info!(%stage, "pipeline stage released");
    }

    fn generation_started(&self, prompt_len: usize, max_new_tokens: usize) {
        tracing::info!(prompt_len, max_new_tokens, "generation started");
    }

    fn step_completed(&self, step: usize, prediction: &Prediction) {
        tracing::debug!(
            step,
            token = prediction.new_token,
            latency_ms = prediction.latency.as_secs_f64() * 1000.0,
            prompt_ms = prediction.prompt_latency.map(|d| d.as_secs_f64() * 1000.0),
            "decode step"
        );
    }

    fn generation_finished(&self, steps: usize) {
        tracing::info!(steps, "generation finished");
    }

    fn generation_failed(&self, step: usize, error: &PipelineError) {
        tracing::warn!(step, %error, "generation failed");
    }
}
