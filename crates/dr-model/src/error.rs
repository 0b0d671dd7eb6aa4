use thiserror::Error;

use crate::stage::StageKind;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid GGUF magic: expected 'GGUF', got {0:?}")]
    InvalidMagic([u8; 4]),
    #[error("unsupported GGUF version: {0}")]
    UnsupportedVersion(u32),
    #[error("GGUF file truncated at byte {offset} (needed {needed} more bytes)")]
    Truncated { offset: usize, needed: usize },
    #[error("missing metadata key: {0}")]
    MissingKey(String),
    #[error("type mismatch for key '{key}': expected {expected}, got {got}")]
    TypeMismatch {
        key: String,
        expected: String,
        got: String,
    },
    #[error("unsupported GGUF type ID: {0}")]
    UnsupportedGgufType(u32),
    #[error("tensor not found: {0}")]
    TensorNotFound(String),
    #[error("tensor '{name}' has {got} elements, expected {expected}")]
    TensorSize {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("artifact is a '{found}' stage, expected {expected}")]
    WrongStage { expected: StageKind, found: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("invalid stage input: {0}")]
    InvalidInput(String),
    #[error("context overflow: {len} positions exceed the limit of {max}")]
    ContextOverflow { len: usize, max: usize },
    #[error("tokenizer error: {0}")]
    TokenizerError(String),
    #[error("tensor error: {0}")]
    TensorError(#[from] dr_tensor::TensorError),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
