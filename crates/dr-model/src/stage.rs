use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dr_tensor::{ComputeBackend, CpuBackend, TensorMap};

use crate::argmax::{ArgmaxConfig, ArgmaxStage};
use crate::error::{ModelError, Result};
use crate::gguf::GgufFile;
use crate::kv_cache::{KvCacheConfig, KvCacheStage};
use crate::llama::{LlamaConfig, LlamaStage};

pub const ARCHITECTURE_KEY: &str = "general.architecture";

/// Tensor names exchanged between stages.
pub mod names {
    /// `[n]` u32 token ids fed to the main network.
    pub const INPUT_IDS: &str = "input_ids";
    /// `[L, past, kv]` cached keys fed to the main network.
    pub const K_CACHE: &str = "k_cache";
    pub const V_CACHE: &str = "v_cache";
    /// `[L, n, kv]` activations for the positions just processed.
    pub const NEW_K: &str = "new_k";
    pub const NEW_V: &str = "new_v";
    /// Unsharded logits.
    pub const LOGITS: &str = "logits";
    /// `[n]` u32 selected token ids.
    pub const ARGMAX: &str = "argmax";

    const SHARD_PREFIX: &str = "logits_";

    pub fn logits_shard(index: usize) -> String {
        format!("{}{}", SHARD_PREFIX, index)
    }

    /// The shard index of a `logits_{i}` name.
    pub fn shard_index(name: &str) -> Option<usize> {
        name.strip_prefix(SHARD_PREFIX)?.parse().ok()
    }
}

/// The three roles an artifact can play in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    MainNetwork,
    CacheProcessor,
    LogitProcessor,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [
        StageKind::MainNetwork,
        StageKind::CacheProcessor,
        StageKind::LogitProcessor,
    ];

    /// The `general.architecture` value an artifact of this kind declares.
    pub fn architecture(&self) -> &'static str {
        match self {
            StageKind::MainNetwork => "llama",
            StageKind::CacheProcessor => "kv-cache",
            StageKind::LogitProcessor => "argmax",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::MainNetwork => "main network",
            StageKind::CacheProcessor => "cache processor",
            StageKind::LogitProcessor => "logit processor",
        };
        f.write_str(name)
    }
}

/// A loaded, ready-to-run stage: named tensors in, named tensors out.
pub trait Stage: Send + Sync {
    fn kind(&self) -> StageKind;

    fn predict(&self, inputs: &TensorMap) -> Result<TensorMap>;
}

/// Produces a `Stage` on demand. Loading may be slow, so callers decide
/// when it happens.
pub trait StageLoader: Send + Sync {
    fn kind(&self) -> StageKind;

    /// Where the stage comes from, for logs and errors.
    fn describe(&self) -> String;

    fn load(&self) -> Result<Box<dyn Stage>>;
}

/// Shape information readable from an artifact without loading weights.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageSignature {
    MainNetwork {
        n_layers: usize,
        kv_width: usize,
        vocab_size: usize,
        logit_shards: usize,
        context_length: usize,
    },
    CacheProcessor {
        n_layers: usize,
        kv_width: usize,
        context_length: usize,
    },
    LogitProcessor {
        shards: usize,
        vocab_size: usize,
    },
}

impl StageSignature {
    pub fn kind(&self) -> StageKind {
        match self {
            StageSignature::MainNetwork { .. } => StageKind::MainNetwork,
            StageSignature::CacheProcessor { .. } => StageKind::CacheProcessor,
            StageSignature::LogitProcessor { .. } => StageKind::LogitProcessor,
        }
    }
}

/// Loads a stage from a GGUF artifact on disk.
#[derive(Debug, Clone)]
pub struct GgufStageLoader {
    kind: StageKind,
    path: PathBuf,
    backend: Arc<dyn ComputeBackend>,
}

impl GgufStageLoader {
    pub fn new(kind: StageKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            backend: Arc::new(CpuBackend::new()),
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn ComputeBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the artifact's metadata only.
    pub fn signature(&self) -> Result<StageSignature> {
        let gguf = self.open()?;
        let metadata = &gguf.metadata;
        Ok(match self.kind {
            StageKind::MainNetwork => {
                let c = LlamaConfig::from_gguf(metadata)?;
                StageSignature::MainNetwork {
                    n_layers: c.n_layers,
                    kv_width: c.kv_width(),
                    vocab_size: c.n_vocab,
                    logit_shards: c.logit_shards,
                    context_length: c.max_seq_len,
                }
            }
            StageKind::CacheProcessor => {
                let c = KvCacheConfig::from_gguf(metadata)?;
                StageSignature::CacheProcessor {
                    n_layers: c.n_layers,
                    kv_width: c.kv_width,
                    context_length: c.context_length,
                }
            }
            StageKind::LogitProcessor => {
                let c = ArgmaxConfig::from_gguf(metadata)?;
                StageSignature::LogitProcessor {
                    shards: c.shards,
                    vocab_size: c.vocab_size,
                }
            }
        })
    }

    fn open(&self) -> Result<GgufFile> {
        let gguf = GgufFile::open(&self.path)?;
        let found = gguf.architecture()?;
        if found != self.kind.architecture() {
            return Err(ModelError::WrongStage {
                expected: self.kind,
                found: found.to_string(),
            });
        }
        Ok(gguf)
    }
}

impl StageLoader for GgufStageLoader {
    fn kind(&self) -> StageKind {
        self.kind
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn load(&self) -> Result<Box<dyn Stage>> {
        let gguf = self.open()?;
        let stage: Box<dyn Stage> = match self.kind {
            StageKind::MainNetwork => {
                Box::new(LlamaStage::from_gguf(&gguf, self.backend.clone())?)
            }
            StageKind::CacheProcessor => Box::new(KvCacheStage::from_gguf(&gguf)?),
            StageKind::LogitProcessor => Box::new(ArgmaxStage::from_gguf(&gguf)?),
        };
        Ok(stage)
    }
}
