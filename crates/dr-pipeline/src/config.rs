use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// File-name stems of the three stage artifacts inside a model directory.
///
/// Each resolves to `<dir>/<prefix><name>.gguf`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactNames {
    pub main_network: String,
    pub cache_processor: String,
    pub logit_processor: String,
}

impl Default for ArtifactNames {
    fn default() -> Self {
        Self {
            main_network: "main".to_string(),
            cache_processor: "cache".to_string(),
            logit_processor: "logits".to_string(),
        }
    }
}

pub const ARTIFACT_EXTENSION: &str = "gguf";

pub fn artifact_path(dir: &Path, prefix: &str, name: &str) -> PathBuf {
    dir.join(format!("{}{}.{}", prefix, name, ARTIFACT_EXTENSION))
}

/// Pipeline construction options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Load every stage while constructing the pipeline.
    pub eager_load: bool,
    /// Upper bound on prompt + generated tokens. Filled from the artifacts'
    /// context length when built with `from_artifacts` and left unset.
    pub max_context: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            eager_load: true,
            max_context: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_eager_load(mut self, eager_load: bool) -> Self {
        self.eager_load = eager_load;
        self
    }

    pub fn with_max_context(mut self, max_context: usize) -> Self {
        self.max_context = Some(max_context);
        self
    }
}

/// Per-request generation options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_new_tokens: usize,
    /// Tokens that end generation when produced after the prompt.
    pub stop_tokens: Vec<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 256,
            stop_tokens: Vec::new(),
        }
    }
}

impl GenerationConfig {
    pub fn with_max_new_tokens(mut self, max_new_tokens: usize) -> Self {
        self.max_new_tokens = max_new_tokens;
        self
    }

    pub fn with_stop_tokens(mut self, stop_tokens: impl IntoIterator<Item = u32>) -> Self {
        self.stop_tokens = stop_tokens.into_iter().collect();
        self
    }
}
