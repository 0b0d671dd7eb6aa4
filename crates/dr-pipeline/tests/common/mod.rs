#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dr_model::{
    names, ArgmaxConfig, ArgmaxStage, KvCacheConfig, KvCacheStage, ModelError, Stage, StageKind,
    StageLoader, Tokenizer,
};
use dr_pipeline::{CacheLayout, ModelPipeline, PipelineConfig};
use dr_tensor::{Shape, Tensor, TensorMap};

pub const VOCAB: usize = 128;
pub const LAYOUT: CacheLayout = CacheLayout {
    n_layers: 2,
    kv_width: 4,
};

/// A main network that "predicts" a fixed token sequence, one per call.
pub struct ScriptedMain {
    script: Vec<u32>,
    calls: Arc<AtomicUsize>,
    fail_at: Option<usize>,
}

impl Stage for ScriptedMain {
    fn kind(&self) -> StageKind {
        StageKind::MainNetwork
    }

    fn predict(&self, inputs: &TensorMap) -> dr_model::Result<TensorMap> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_at == Some(call) {
            return Err(ModelError::Other("scripted failure".into()));
        }
        let n = inputs.require(names::INPUT_IDS)?.shape().numel();
        let past = inputs.require(names::K_CACHE)?.shape().dim(1);
        if call == 0 && past != 0 {
            return Err(ModelError::InvalidInput("first step saw a cache".into()));
        }

        let token = self.script[call.min(self.script.len() - 1)] as usize;
        let mut logits = vec![0.0; VOCAB];
        logits[token] = 1.0;
        let rows = Shape::new(vec![LAYOUT.n_layers, n, LAYOUT.kv_width]);
        Ok(TensorMap::new()
            .with(names::NEW_K, Tensor::zeros(rows.clone()))
            .with(names::NEW_V, Tensor::zeros(rows))
            .with(names::LOGITS, Tensor::new(logits, Shape::new(vec![1, VOCAB]))))
    }
}

pub fn boxed(stage: impl Stage + 'static) -> dr_model::Result<Box<dyn Stage>> {
    Ok(Box::new(stage))
}

type Factory = Box<dyn Fn() -> dr_model::Result<Box<dyn Stage>> + Send + Sync>;

/// Builds a stage from a closure and counts how often it was asked to.
pub struct MemoryLoader {
    kind: StageKind,
    make: Factory,
    loads: Arc<AtomicUsize>,
}

impl MemoryLoader {
    pub fn new(
        kind: StageKind,
        make: impl Fn() -> dr_model::Result<Box<dyn Stage>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            make: Box::new(make),
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn loads(&self) -> Arc<AtomicUsize> {
        self.loads.clone()
    }
}

impl StageLoader for MemoryLoader {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn describe(&self) -> String {
        format!("memory://{}", self.kind.architecture())
    }

    fn load(&self) -> dr_model::Result<Box<dyn Stage>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        (self.make)()
    }
}

/// Handles onto a stub pipeline's internals.
pub struct Probe {
    /// Main network forward passes.
    pub calls: Arc<AtomicUsize>,
    /// Loads per stage: main, cache, logits.
    pub loads: [Arc<AtomicUsize>; 3],
}

impl Probe {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> [usize; 3] {
        [0, 1, 2].map(|i| self.loads[i].load(Ordering::SeqCst))
    }
}

pub fn stub_pipeline(script: &[u32]) -> (ModelPipeline, Probe) {
    stub_pipeline_with(script, None, PipelineConfig::default())
}

/// A pipeline whose main network emits `script`, failing on call
/// `fail_at`, backed by the real cache and arg-max stages.
pub fn stub_pipeline_with(
    script: &[u32],
    fail_at: Option<usize>,
    config: PipelineConfig,
) -> (ModelPipeline, Probe) {
    let calls = Arc::new(AtomicUsize::new(0));
    let main = {
        let script = script.to_vec();
        let calls = calls.clone();
        MemoryLoader::new(StageKind::MainNetwork, move || {
            boxed(ScriptedMain {
                script: script.clone(),
                calls: calls.clone(),
                fail_at,
            })
        })
    };
    let cache = MemoryLoader::new(StageKind::CacheProcessor, || {
        boxed(KvCacheStage::new(KvCacheConfig {
            n_layers: LAYOUT.n_layers,
            kv_width: LAYOUT.kv_width,
            context_length: 64,
        }))
    });
    let logits = MemoryLoader::new(StageKind::LogitProcessor, || {
        ArgmaxStage::new(ArgmaxConfig {
            shards: 1,
            vocab_size: VOCAB,
        })
        .map(|stage| Box::new(stage) as Box<dyn Stage>)
    });
    let probe = Probe {
        calls,
        loads: [main.loads(), cache.loads(), logits.loads()],
    };
    let pipeline = ModelPipeline::new(
        Box::new(main),
        Box::new(cache),
        Box::new(logits),
        LAYOUT,
        config,
    )
    .unwrap();
    (pipeline, probe)
}

/// Decodes each known id to a fixed string; unknown ids decode to nothing.
pub struct MapTokenizer {
    words: HashMap<u32, String>,
    eos: Option<u32>,
}

impl MapTokenizer {
    pub fn new(words: &[(u32, &str)]) -> Self {
        Self {
            words: words.iter().map(|&(id, w)| (id, w.to_string())).collect(),
            eos: None,
        }
    }
}

impl Tokenizer for MapTokenizer {
    /// Whitespace separated words.
    fn encode(&self, text: &str) -> dr_model::Result<Vec<u32>> {
        text.split_whitespace()
            .map(|word| {
                self.words
                    .iter()
                    .find(|(_, w)| w.trim() == word)
                    .map(|(&id, _)| id)
                    .ok_or_else(|| ModelError::TokenizerError(format!("unknown word {:?}", word)))
            })
            .collect()
    }

    fn decode(&self, tokens: &[u32]) -> dr_model::Result<String> {
        Ok(tokens
            .iter()
            .filter_map(|id| self.words.get(id).map(String::as_str))
            .collect())
    }

    fn eos_id(&self) -> Option<u32> {
        self.eos
    }
}
