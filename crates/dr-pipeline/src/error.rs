use thiserror::Error;

use dr_model::{ModelError, StageKind};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{stage} is not loaded")]
    NotLoaded { stage: StageKind },
    #[error("pipeline construction failed: {0}")]
    PipelineConstructionFailed(String),
    #[error("{stage} prediction failed: {reason}")]
    PredictionFailed { stage: StageKind, reason: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to load {stage}")]
    LoadFailed {
        stage: StageKind,
        #[source]
        source: ModelError,
    },
    #[error("tokenizer failed")]
    Tokenizer(#[source] ModelError),
    #[error("blocking task failed: {0}")]
    Join(String),
}

impl PipelineError {
    pub(crate) fn prediction(stage: StageKind, reason: impl ToString) -> Self {
        PipelineError::PredictionFailed {
            stage,
            reason: reason.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(e: tokio::task::JoinError) -> Self {
        PipelineError::Join(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
