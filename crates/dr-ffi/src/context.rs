use std::path::Path;
use std::sync::Arc;

use tokio::runtime::Runtime;

use dr_model::{BpeTokenizer, Tokenizer};
use dr_pipeline::{
    artifact_tokenizer, ArtifactNames, Generator, ModelPipeline, PipelineConfig, PipelineError,
};

/// Opaque context handle that owns the runtime, pipeline and tokenizer.
pub struct DRContext {
    pub runtime: Runtime,
    pub generator: Generator,
    pub tokenizer: Arc<BpeTokenizer>,
}

impl DRContext {
    /// Resolve the three artifacts without loading them.
    pub fn open(
        dir: &Path,
        prefix: &str,
        artifacts: &ArtifactNames,
    ) -> Result<Self, PipelineError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("dr-runtime")
            .build()
            .map_err(|e| {
                PipelineError::PipelineConstructionFailed(format!("tokio runtime: {}", e))
            })?;
        let config = PipelineConfig::default().with_eager_load(false);
        let pipeline = ModelPipeline::from_artifacts(dir, prefix, artifacts, config)?;
        let tokenizer = Arc::new(artifact_tokenizer(dir, prefix, artifacts)?);
        let generator = Generator::new(Arc::new(pipeline), tokenizer.clone());
        Ok(Self {
            runtime,
            generator,
            tokenizer,
        })
    }

    pub fn pipeline(&self) -> &ModelPipeline {
        self.generator.pipeline()
    }

    /// The caller's stop tokens, or end-of-sequence when none were given.
    pub fn stop_tokens(&self, given: &[u32]) -> Vec<u32> {
        if given.is_empty() {
            self.tokenizer.eos_id().into_iter().collect()
        } else {
            given.to_vec()
        }
    }
}
