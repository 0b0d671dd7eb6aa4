use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::{Stream, StreamExt};
use serde::Serialize;

use dr_model::Tokenizer;

use crate::config::GenerationConfig;
use crate::delta::TextDelta;
use crate::error::{PipelineError, Result};
use crate::pipeline::ModelPipeline;
use crate::stats::{LatencyRecorder, LatencyStats};
use crate::stream::{CancelHandle, PredictionStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// A stop token was produced.
    Stop,
    /// `max_new_tokens` were generated.
    Length,
    Cancelled,
}

/// A finished generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Generation {
    pub text: String,
    /// Generated tokens, without the prompt or the stop token.
    pub tokens: Vec<u32>,
    pub finish_reason: FinishReason,
    pub stats: LatencyStats,
}

/// Turns prediction streams into text.
#[derive(Clone)]
pub struct Generator {
    pipeline: Arc<ModelPipeline>,
    tokenizer: Arc<dyn Tokenizer>,
}

impl Generator {
    pub fn new(pipeline: Arc<ModelPipeline>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        Self {
            pipeline,
            tokenizer,
        }
    }

    pub fn pipeline(&self) -> &Arc<ModelPipeline> {
        &self.pipeline
    }

    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    /// Stream text chunks generated after `tokens`.
    ///
    /// The stream ends after a stop token (which is not decoded) or after
    /// `max_new_tokens` predictions. A stage failure is yielded after the
    /// chunks already produced, and ends the stream.
    pub async fn stream_text(
        &self,
        tokens: &[u32],
        max_new_tokens: usize,
        stop_tokens: &[u32],
    ) -> Result<TextStream> {
        self.pipeline.load().await?;
        let predictions = self.pipeline.predict(tokens, max_new_tokens).await?;
        Ok(TextStream {
            cancel: predictions.cancel_handle(),
            predictions,
            tokenizer: self.tokenizer.clone(),
            prompt_len: tokens.len(),
            stop_tokens: stop_tokens.iter().copied().collect(),
            delta: TextDelta::new(),
            recorder: LatencyRecorder::new(),
            generated: Vec::new(),
            text: String::new(),
            finish_reason: None,
            done: false,
        })
    }

    /// Generate to completion. Either the whole generation or an error is
    /// returned, never a partial text.
    pub async fn generate_text(
        &self,
        tokens: &[u32],
        max_new_tokens: usize,
        stop_tokens: &[u32],
    ) -> Result<Generation> {
        let mut stream = self.stream_text(tokens, max_new_tokens, stop_tokens).await?;
        while let Some(chunk) = stream.next().await {
            chunk?;
        }
        let generation = stream.into_generation();
        tracing::info!(
            tokens = generation.tokens.len(),
            finish_reason = ?generation.finish_reason,
            mean_ms = generation.stats.mean_ms,
            tokens_per_sec = generation.stats.tokens_per_sec,
            "generation complete"
        );
        Ok(generation)
    }

    /// Encode `prompt` and stream its continuation.
    pub async fn stream(&self, prompt: &str, config: &GenerationConfig) -> Result<TextStream> {
        let tokens = self.encode(prompt)?;
        self.stream_text(&tokens, config.max_new_tokens, &config.stop_tokens)
            .await
    }

    /// Encode `prompt` and generate its continuation.
    pub async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<Generation> {
        let tokens = self.encode(prompt)?;
        self.generate_text(&tokens, config.max_new_tokens, &config.stop_tokens)
            .await
    }

    fn encode(&self, prompt: &str) -> Result<Vec<u32>> {
        self.tokenizer.encode(prompt).map_err(PipelineError::Tokenizer)
    }
}

/// Text chunks of one generation. Each chunk extends the text; nothing is
/// emitted twice.
pub struct TextStream {
    predictions: PredictionStream,
    cancel: CancelHandle,
    tokenizer: Arc<dyn Tokenizer>,
    prompt_len: usize,
    stop_tokens: HashSet<u32>,
    delta: TextDelta,
    recorder: LatencyRecorder,
    generated: Vec<u32>,
    text: String,
    finish_reason: Option<FinishReason>,
    done: bool,
}

impl TextStream {
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Why the stream ended, once it has.
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.finish_reason
    }

    /// Text yielded so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn stats(&self) -> LatencyStats {
        self.recorder.stats()
    }

    /// The generation as streamed so far. A stream that has not ended
    /// reports `Cancelled`.
    pub fn into_generation(self) -> Generation {
        Generation {
            finish_reason: self.finish_reason.unwrap_or(FinishReason::Cancelled),
            stats: self.recorder.stats(),
            text: self.text,
            tokens: self.generated,
        }
    }

    fn end(&mut self, reason: FinishReason) -> Option<String> {
        self.done = true;
        self.finish_reason = Some(reason);
        // Releases the pipeline for the next generation.
        self.predictions = PredictionStream::empty();
        self.delta.finish()
    }

    fn emit(&mut self, chunk: String) -> Poll<Option<Result<String>>> {
        self.text.push_str(&chunk);
        Poll::Ready(Some(Ok(chunk)))
    }
}

impl Stream for TextStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            if this.done {
                return Poll::Ready(None);
            }
            let prediction = match ready!(this.predictions.poll_next_unpin(cx)) {
                Some(Ok(p)) => p,
                Some(Err(e)) => {
                    this.done = true;
                    this.predictions = PredictionStream::empty();
                    return Poll::Ready(Some(Err(e)));
                }
                None => {
                    let reason = if this.cancel.is_cancelled() {
                        FinishReason::Cancelled
                    } else {
                        FinishReason::Length
                    };
                    return match this.end(reason) {
                        Some(rest) => this.emit(rest),
                        None => Poll::Ready(None),
                    };
                }
            };

            if this.stop_tokens.contains(&prediction.new_token)
                && prediction.all_tokens.len() > this.prompt_len
            {
                tracing::debug!(token = prediction.new_token, "stop token");
                return match this.end(FinishReason::Stop) {
                    Some(rest) => this.emit(rest),
                    None => Poll::Ready(None),
                };
            }

            this.recorder.record(&prediction);
            this.generated = prediction.all_tokens[this.prompt_len..].to_vec();
            let decoded = match this.tokenizer.decode(&this.generated) {
                Ok(text) => text,
                Err(e) => {
                    this.done = true;
                    this.predictions = PredictionStream::empty();
                    return Poll::Ready(Some(Err(PipelineError::Tokenizer(e))));
                }
            };
            if let Some(chunk) = this.delta.push(decoded) {
                return this.emit(chunk);
            }
        }
    }
}
