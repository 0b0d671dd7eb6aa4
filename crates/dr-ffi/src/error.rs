use std::cell::RefCell;
use std::error::Error;
use std::ffi::CString;

use dr_pipeline::PipelineError;

use crate::types::DRStatus;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store an error message for later retrieval via `dr_last_error`.
pub fn set_last_error(msg: String) {
    tracing::debug!(error = %msg, "ffi call failed");
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Take the last error message, leaving `None` in its place.
pub fn take_last_error() -> Option<CString> {
    LAST_ERROR.with(|e| e.borrow_mut().take())
}

pub fn status_for(err: &PipelineError) -> DRStatus {
    match err {
        PipelineError::NotLoaded { .. } => DRStatus::ErrorNotLoaded,
        PipelineError::PipelineConstructionFailed(_) | PipelineError::LoadFailed { .. } => {
            DRStatus::ErrorModelLoad
        }
        PipelineError::InvalidInput(_) | PipelineError::Tokenizer(_) => {
            DRStatus::ErrorInvalidArgument
        }
        PipelineError::PredictionFailed { .. } => DRStatus::ErrorGenerate,
        PipelineError::Join(_) => DRStatus::ErrorInternal,
    }
}

/// Record `err` with its causes and return the matching status.
pub fn fail(err: PipelineError) -> DRStatus {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    set_last_error(msg);
    status_for(&err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_model::{ModelError, StageKind};

    #[test]
    fn test_message_includes_causes() {
        let status = fail(PipelineError::LoadFailed {
            stage: StageKind::CacheProcessor,
            source: ModelError::MissingKey("kv-cache.kv_width".into()),
        });
        assert_eq!(status, DRStatus::ErrorModelLoad);
        let msg = take_last_error().unwrap().into_string().unwrap();
        assert!(msg.starts_with("failed to load cache processor: "));
        assert!(msg.contains("kv-cache.kv_width"));
        assert!(take_last_error().is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&PipelineError::NotLoaded {
                stage: StageKind::MainNetwork
            }),
            DRStatus::ErrorNotLoaded
        );
        assert_eq!(
            status_for(&PipelineError::InvalidInput("empty".into())),
            DRStatus::ErrorInvalidArgument
        );
        assert_eq!(
            status_for(&PipelineError::PredictionFailed {
                stage: StageKind::LogitProcessor,
                reason: "no output".into()
            }),
            DRStatus::ErrorGenerate
        );
    }
}
