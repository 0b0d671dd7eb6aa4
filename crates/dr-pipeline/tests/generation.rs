mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, StreamExt};

use common::{stub_pipeline, stub_pipeline_with, MapTokenizer};
use dr_model::StageKind;
use dr_pipeline::{
    FinishReason, GenerationConfig, Generator, PipelineConfig, PipelineError, PipelineObserver,
    PipelineState, Prediction,
};

fn tokenizer() -> Arc<MapTokenizer> {
    Arc::new(MapTokenizer::new(&[
        (10, "the "),
        (20, "cat "),
        (30, "sat "),
        (40, "on "),
        (41, "a "),
        (42, "mat "),
        (50, "down "),
        (99, "<stop>"),
    ]))
}

#[tokio::test]
async fn test_stop_token_ends_generation() {
    let (pipeline, probe) = stub_pipeline(&[40, 99, 50]);
    let generator = Generator::new(Arc::new(pipeline), tokenizer());

    let generation = generator
        .generate_text(&[10, 20, 30], 3, &[99])
        .await
        .unwrap();
    assert_eq!(generation.text, "on ");
    assert_eq!(generation.tokens, vec![40]);
    assert_eq!(generation.finish_reason, FinishReason::Stop);
    assert_eq!(generation.stats.count, 1);
    // The stop token's step ran; nothing after it did.
    assert_eq!(probe.calls(), 2);
}

#[tokio::test]
async fn test_zero_new_tokens() {
    let (pipeline, probe) = stub_pipeline(&[40]);
    let pipeline = Arc::new(pipeline);

    let mut predictions = pipeline.predict(&[10, 20, 30], 0).await.unwrap();
    assert!(predictions.next().await.is_none());

    let generator = Generator::new(pipeline, tokenizer());
    let generation = generator.generate_text(&[10, 20, 30], 0, &[]).await.unwrap();
    assert_eq!(generation.text, "");
    assert!(generation.tokens.is_empty());
    assert_eq!(generation.finish_reason, FinishReason::Length);
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn test_length_limit() {
    let (pipeline, probe) = stub_pipeline(&[40, 41, 42, 50]);
    let generator = Generator::new(Arc::new(pipeline), tokenizer());

    let generation = generator
        .generate(
            "the cat",
            &GenerationConfig::default()
                .with_max_new_tokens(3)
                .with_stop_tokens([99]),
        )
        .await
        .unwrap();
    assert_eq!(generation.text, "on a mat ");
    assert_eq!(generation.tokens, vec![40, 41, 42]);
    assert_eq!(generation.finish_reason, FinishReason::Length);
    assert_eq!(probe.calls(), 3);
}

#[tokio::test]
async fn test_stop_token_in_prompt_is_ignored() {
    let (pipeline, _) = stub_pipeline(&[40, 41]);
    let generator = Generator::new(Arc::new(pipeline), tokenizer());

    let generation = generator
        .generate_text(&[10, 99, 30], 2, &[99])
        .await
        .unwrap();
    assert_eq!(generation.tokens, vec![40, 41]);
    assert_eq!(generation.text, "on a ");
}

#[tokio::test]
async fn test_cancel_stops_stage_invocations() {
    let (pipeline, probe) = stub_pipeline(&[40, 41, 42, 50]);
    let generator = Generator::new(Arc::new(pipeline), tokenizer());

    let mut stream = generator.stream_text(&[10, 20, 30], 4, &[]).await.unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap(), "on ");
    stream.cancel_handle().cancel();
    assert!(stream.next().await.is_none());
    assert_eq!(probe.calls(), 1);

    assert_eq!(stream.text(), "on ");
    let generation = stream.into_generation();
    assert_eq!(generation.finish_reason, FinishReason::Cancelled);
    assert_eq!(generation.tokens, vec![40]);
}

#[tokio::test]
async fn test_dropping_the_stream_stops_generation() {
    let (pipeline, probe) = stub_pipeline(&[40, 41, 42]);
    let pipeline = Arc::new(pipeline);

    let mut predictions = pipeline.predict(&[10], 3).await.unwrap();
    predictions.next().await.unwrap().unwrap();
    drop(predictions);
    assert_eq!(probe.calls(), 1);

    // The generation lock was released with the stream.
    let mut again = pipeline.predict(&[10], 1).await.unwrap();
    assert!(again.next().await.unwrap().is_ok());
}

#[tokio::test]
async fn test_predictions_grow_by_one_token() {
    let (pipeline, _) = stub_pipeline(&[40, 41, 42]);
    let prompt = [10, 20, 30];

    let predictions: Vec<_> = pipeline
        .predict(&prompt, 3)
        .await
        .unwrap()
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(predictions.len(), 3);

    let mut previous = prompt.to_vec();
    for (i, p) in predictions.iter().enumerate() {
        assert_eq!(p.all_tokens.len(), prompt.len() + i + 1);
        assert_eq!(&p.all_tokens[..previous.len()], previous.as_slice());
        assert_eq!(*p.all_tokens.last().unwrap(), p.new_token);
        assert_eq!(p.prompt_latency.is_some(), i == 0);
        assert!(p.latency >= p.prompt_latency.unwrap_or_default());
        previous = p.all_tokens.clone();
    }
    assert_eq!(previous, vec![10, 20, 30, 40, 41, 42]);
}

#[tokio::test]
async fn test_stage_failure_ends_stream_after_partial_text() {
    let (pipeline, _) = stub_pipeline_with(&[40, 41, 42], Some(1), PipelineConfig::default());
    let generator = Generator::new(Arc::new(pipeline), tokenizer());

    let chunks: Vec<_> = generator
        .stream_text(&[10], 3, &[])
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].as_deref().unwrap(), "on ");
    assert!(matches!(
        chunks[1],
        Err(PipelineError::PredictionFailed {
            stage: StageKind::MainNetwork,
            ..
        })
    ));
}

#[tokio::test]
async fn test_generate_text_reports_failure_not_partial_text() {
    let (pipeline, _) = stub_pipeline_with(&[40, 41, 42], Some(2), PipelineConfig::default());
    let generator = Generator::new(Arc::new(pipeline), tokenizer());
    assert!(generator.generate_text(&[10], 3, &[]).await.is_err());
}

#[tokio::test]
async fn test_invalid_requests() {
    let config = PipelineConfig::default().with_max_context(4);
    let (pipeline, probe) = stub_pipeline_with(&[40], None, config);

    assert!(matches!(
        pipeline.predict(&[], 1).await,
        Err(PipelineError::InvalidInput(_))
    ));
    assert!(matches!(
        pipeline.predict(&[10, 20, 30], 2).await,
        Err(PipelineError::InvalidInput(_))
    ));
    assert!(matches!(
        pipeline.predict(&[10, 20], usize::MAX).await,
        Err(PipelineError::InvalidInput(_))
    ));
    assert!(pipeline.predict(&[10, 20, 30], 1).await.is_ok());
    assert_eq!(probe.calls(), 0);
}

#[tokio::test]
async fn test_load_and_unload() {
    let config = PipelineConfig::default().with_eager_load(false);
    let (pipeline, probe) = stub_pipeline_with(&[40, 41], None, config);
    assert_eq!(pipeline.state(), PipelineState::Unloaded);

    // Predicting before loading surfaces NotLoaded as the only element.
    let results: Vec<_> = pipeline.predict(&[10], 2).await.unwrap().collect().await;
    assert_eq!(results.len(), 1);
    assert!(matches!(
        results[0],
        Err(PipelineError::NotLoaded {
            stage: StageKind::MainNetwork
        })
    ));

    pipeline.load().await.unwrap();
    pipeline.load().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Ready);
    assert_eq!(probe.loads(), [1, 1, 1]);

    pipeline.unload().await.unwrap();
    assert_eq!(pipeline.state(), PipelineState::Unloaded);
    pipeline.unload().await.unwrap();

    pipeline.load().await.unwrap();
    assert_eq!(probe.loads(), [2, 2, 2]);
    let mut predictions = pipeline.predict(&[10], 1).await.unwrap();
    assert_eq!(predictions.next().await.unwrap().unwrap().new_token, 40);
}

#[tokio::test]
async fn test_generator_loads_on_demand() {
    let config = PipelineConfig::default().with_eager_load(false);
    let (pipeline, probe) = stub_pipeline_with(&[40], None, config);
    let generator = Generator::new(Arc::new(pipeline), tokenizer());

    let generation = generator.generate_text(&[10], 1, &[]).await.unwrap();
    assert_eq!(generation.text, "on ");
    assert_eq!(generator.pipeline().state(), PipelineState::Ready);
    assert_eq!(probe.loads(), [1, 1, 1]);
}

#[tokio::test]
async fn test_one_generation_at_a_time() {
    let (pipeline, _) = stub_pipeline(&[40, 41]);

    let first = pipeline.predict(&[10], 2).await.unwrap();
    assert!(pipeline.predict(&[10], 2).now_or_never().is_none());
    drop(first);
    assert!(pipeline.predict(&[10], 2).now_or_never().is_some());
}

#[tokio::test]
async fn test_unknown_prompt_word() {
    let (pipeline, probe) = stub_pipeline(&[40]);
    let generator = Generator::new(Arc::new(pipeline), tokenizer());
    let err = generator
        .generate("the dog", &GenerationConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Tokenizer(_)));
    assert_eq!(probe.calls(), 0);
}

#[derive(Default)]
struct Recorder(std::sync::Mutex<Vec<String>>);

impl Recorder {
    fn push(&self, event: String) {
        self.0.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl PipelineObserver for Recorder {
    fn stage_loaded(&self, stage: StageKind, _elapsed: Duration) {
        self.push(format!("loaded {}", stage));
    }

    fn stage_unloaded(&self, stage: StageKind) {
        self.push(format!("unloaded {}", stage));
    }

    fn generation_started(&self, prompt_len: usize, max_new_tokens: usize) {
        self.push(format!("started {} {}", prompt_len, max_new_tokens));
    }

    fn step_completed(&self, step: usize, prediction: &Prediction) {
        self.push(format!("step {} {}", step, prediction.new_token));
    }

    fn generation_finished(&self, steps: usize) {
        self.push(format!("finished {}", steps));
    }
}

#[tokio::test]
async fn test_observer_sees_pipeline_events() {
    let config = PipelineConfig::default().with_eager_load(false);
    let (pipeline, _) = stub_pipeline_with(&[40, 41], None, config);
    let recorder = Arc::new(Recorder::default());
    let pipeline = pipeline.with_observer(recorder.clone());

    pipeline.load().await.unwrap();
    let predictions: Vec<_> = pipeline.predict(&[10, 20], 2).await.unwrap().collect().await;
    assert_eq!(predictions.len(), 2);
    pipeline.unload().await.unwrap();

    assert_eq!(
        recorder.events(),
        vec![
            "loaded main network",
            "loaded cache processor",
            "loaded logit processor",
            "started 2 2",
            "step 1 40",
            "step 2 41",
            "finished 2",
            "unloaded main network",
            "unloaded cache processor",
            "unloaded logit processor",
        ]
    );
}
