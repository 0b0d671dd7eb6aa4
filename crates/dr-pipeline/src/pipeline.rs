use std::path::Path;
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use dr_model::{BpeTokenizer, GgufFile, GgufStageLoader, StageKind, StageLoader, StageSignature};

use crate::cache::{CacheLayout, CacheProcessor, CacheState};
use crate::config::{artifact_path, ArtifactNames, PipelineConfig};
use crate::deferred::{DeferredModel, LoadState};
use crate::error::{PipelineError, Result};
use crate::logits::{LogitProcessor, Selection};
use crate::observer::{PipelineObserver, TracingObserver};
use crate::stream::{CancelHandle, DecodeState, PredictionStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Unloaded,
    Loading,
    Ready,
}

/// The three cooperating stages, shared with in-flight generations.
pub(crate) struct Stages {
    pub main: DeferredModel,
    pub cache: CacheProcessor,
    pub logits: LogitProcessor,
}

impl Stages {
    fn handles(&self) -> [&DeferredModel; 3] {
        [&self.main, self.cache.model(), self.logits.model()]
    }
}

/// Drives the main network, cache processor and logit processor through
/// the decode loop.
///
/// Stages load lazily (or at construction with `eager_load`) and can be
/// released with `unload` and brought back with `load`. One generation runs
/// at a time; a second `predict` waits for the first stream to end or be
/// dropped.
pub struct ModelPipeline {
    stages: Arc<Stages>,
    layout: CacheLayout,
    config: PipelineConfig,
    observer: Arc<dyn PipelineObserver>,
    generation: Arc<AsyncMutex<()>>,
}

impl ModelPipeline {
    /// Build from arbitrary stage loaders. `layout` describes the cache the
    /// main network reads and writes.
    pub fn new(
        main: Box<dyn StageLoader>,
        cache: Box<dyn StageLoader>,
        logits: Box<dyn StageLoader>,
        layout: CacheLayout,
        config: PipelineConfig,
    ) -> Result<Self> {
        for (loader, role) in [
            (&main, StageKind::MainNetwork),
            (&cache, StageKind::CacheProcessor),
            (&logits, StageKind::LogitProcessor),
        ] {
            if loader.kind() != role {
                return Err(PipelineError::PipelineConstructionFailed(format!(
                    "{} loader given as the {}",
                    loader.kind(),
                    role
                )));
            }
        }

        let pipeline = Self {
            stages: Arc::new(Stages {
                main: DeferredModel::new(main),
                cache: CacheProcessor::new(cache),
                logits: LogitProcessor::new(logits),
            }),
            layout,
            config,
            observer: Arc::new(TracingObserver),
            generation: Arc::new(AsyncMutex::new(())),
        };
        if pipeline.config.eager_load {
            pipeline.load_blocking()?;
        }
        Ok(pipeline)
    }

    /// Build from `<dir>/<prefix><name>.gguf` artifacts.
    ///
    /// Every artifact must exist, declare the right stage and agree with the
    /// main network on layers, cache width and vocabulary split. An unset
    /// `max_context` is taken from the artifacts.
    pub fn from_artifacts(
        dir: &Path,
        prefix: &str,
        artifacts: &ArtifactNames,
        mut config: PipelineConfig,
    ) -> Result<Self> {
        let main = resolve(dir, prefix, StageKind::MainNetwork, &artifacts.main_network)?;
        let cache = resolve(dir, prefix, StageKind::CacheProcessor, &artifacts.cache_processor)?;
        let logits = resolve(dir, prefix, StageKind::LogitProcessor, &artifacts.logit_processor)?;

        let (layout, context_length) =
            check_compatible(&signature(&main)?, &signature(&cache)?, &signature(&logits)?)
                .map_err(PipelineError::PipelineConstructionFailed)?;
        let limit = config.max_context.map_or(context_length, |m| m.min(context_length));
        config.max_context = Some(limit);

        tracing::info!(
            dir = %dir.display(),
            prefix,
            n_layers = layout.n_layers,
            kv_width = layout.kv_width,
            context_length,
            "pipeline artifacts resolved"
        );
        Self::new(Box::new(main), Box::new(cache), Box::new(logits), layout, config)
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn layout(&self) -> CacheLayout {
        self.layout
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn set_selection(&self, selection: Selection) {
        self.stages.logits.set_selection(selection);
    }

    pub fn stage_state(&self, stage: StageKind) -> LoadState {
        match stage {
            StageKind::MainNetwork => self.stages.main.state(),
            StageKind::CacheProcessor => self.stages.cache.state(),
            StageKind::LogitProcessor => self.stages.logits.state(),
        }
    }

    pub fn state(&self) -> PipelineState {
        let states = self.stages.handles().map(DeferredModel::state);
        if states.iter().all(|s| *s == LoadState::Loaded) {
            PipelineState::Ready
        } else if states.iter().all(|s| *s == LoadState::Unloaded) {
            PipelineState::Unloaded
        } else {
            PipelineState::Loading
        }
    }

    /// Load every stage on the calling thread. Already loaded stages are
    /// left alone.
    pub fn load_blocking(&self) -> Result<()> {
        load_stages(&self.stages, self.observer.as_ref())
    }

    pub fn unload_blocking(&self) {
        unload_stages(&self.stages, self.observer.as_ref())
    }

    /// Load every stage on the blocking pool.
    pub async fn load(&self) -> Result<()> {
        let stages = self.stages.clone();
        let observer = self.observer.clone();
        tokio::task::spawn_blocking(move || load_stages(&stages, observer.as_ref())).await?
    }

    /// Release every stage. A generation still running fails at its next
    /// step with `NotLoaded`.
    pub async fn unload(&self) -> Result<()> {
        let stages = self.stages.clone();
        let observer = self.observer.clone();
        tokio::task::spawn_blocking(move || unload_stages(&stages, observer.as_ref())).await?;
        Ok(())
    }

    /// Start generating up to `max_new_tokens` tokens after `tokens`.
    ///
    /// Nothing runs until the returned stream is polled.
    pub async fn predict(&self, tokens: &[u32], max_new_tokens: usize) -> Result<PredictionStream> {
        if tokens.is_empty() {
            return Err(PipelineError::InvalidInput("empty prompt".to_string()));
        }
        if let Some(max) = self.config.max_context {
            if tokens.len().checked_add(max_new_tokens).map_or(true, |n| n > max) {
                return Err(PipelineError::InvalidInput(format!(
                    "prompt of {} plus {} new tokens exceeds the context of {}",
                    tokens.len(),
                    max_new_tokens,
                    max
                )));
            }
        }
        if max_new_tokens == 0 {
            return Ok(PredictionStream::empty());
        }

        let permit = self.generation.clone().lock_owned().await;
        self.observer.generation_started(tokens.len(), max_new_tokens);
        Ok(PredictionStream::new(DecodeState {
            stages: self.stages.clone(),
            tokens: tokens.to_vec(),
            cache: Some(CacheState::empty(self.layout)),
            step: 0,
            max_new_tokens,
            cancel: CancelHandle::new(),
            observer: self.observer.clone(),
            _permit: permit,
        }))
    }
}

fn load_stages(stages: &Stages, observer: &dyn PipelineObserver) -> Result<()> {
    for handle in stages.handles() {
        if let Some(elapsed) = handle.load()? {
            observer.stage_loaded(handle.kind(), elapsed);
        }
    }
    Ok(())
}

fn unload_stages(stages: &Stages, observer: &dyn PipelineObserver) {
    for handle in stages.handles() {
        if handle.unload() {
            observer.stage_unloaded(handle.kind());
        }
    }
}

fn resolve(dir: &Path, prefix: &str, kind: StageKind, name: &str) -> Result<GgufStageLoader> {
    let path = artifact_path(dir, prefix, name);
    if !path.is_file() {
        return Err(PipelineError::PipelineConstructionFailed(format!(
            "{} artifact {} not found",
            kind,
            path.display()
        )));
    }
    Ok(GgufStageLoader::new(kind, path))
}

fn signature(loader: &GgufStageLoader) -> Result<StageSignature> {
    loader.signature().map_err(|e| {
        PipelineError::PipelineConstructionFailed(format!(
            "{} artifact {}: {}",
            loader.kind(),
            loader.path().display(),
            e
        ))
    })
}

/// The shared cache layout and usable context length, or why the three
/// artifacts cannot work together.
fn check_compatible(
    main: &StageSignature,
    cache: &StageSignature,
    logits: &StageSignature,
) -> std::result::Result<(CacheLayout, usize), String> {
    let (
        &StageSignature::MainNetwork {
            n_layers,
            kv_width,
            vocab_size,
            logit_shards,
            context_length,
        },
        &StageSignature::CacheProcessor {
            n_layers: cache_layers,
            kv_width: cache_width,
            context_length: cache_context,
        },
        &StageSignature::LogitProcessor {
            shards,
            vocab_size: logit_vocab,
        },
    ) = (main, cache, logits)
    else {
        return Err("artifacts are not a main network, cache processor and logit processor".into());
    };

    if (cache_layers, cache_width) != (n_layers, kv_width) {
        return Err(format!(
            "cache processor holds {} layers of width {}, main network has {} of width {}",
            cache_layers, cache_width, n_layers, kv_width
        ));
    }
    if shards != logit_shards {
        return Err(format!(
            "logit processor expects {} shards, main network emits {}",
            shards, logit_shards
        ));
    }
    if logit_vocab != vocab_size {
        return Err(format!(
            "logit processor vocabulary {} does not match main network vocabulary {}",
            logit_vocab, vocab_size
        ));
    }
    Ok((CacheLayout { n_layers, kv_width }, context_length.min(cache_context)))
}

/// The tokenizer embedded in the main network artifact.
pub fn artifact_tokenizer(
    dir: &Path,
    prefix: &str,
    artifacts: &ArtifactNames,
) -> Result<BpeTokenizer> {
    let path = artifact_path(dir, prefix, &artifacts.main_network);
    GgufFile::open(&path)
        .and_then(|gguf| BpeTokenizer::from_gguf(&gguf.metadata))
        .map_err(|e| {
            PipelineError::PipelineConstructionFailed(format!(
                "tokenizer in {}: {}",
                path.display(),
                e
            ))
        })
}
