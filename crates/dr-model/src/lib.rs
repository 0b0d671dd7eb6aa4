//! `dr-model` - Stage artifacts and stage implementations.
//!
//! Every stage is a GGUF file whose `general.architecture` names its role:
//! - `llama`: the main network (token ids + cache in, logits + new rows out)
//! - `kv-cache`: the cache processor (appends new rows to the cache)
//! - `argmax`: the logit processor (picks the best token per row)
//!
//! Also hosts the `Tokenizer` trait and a BPE implementation that reads its
//! vocabulary from the main network's metadata.

pub mod argmax;
pub mod error;
pub mod gguf;
pub mod kv_cache;
pub mod llama;
pub mod stage;
pub mod tokenizer;

pub use argmax::{ArgmaxConfig, ArgmaxStage};
pub use error::{ModelError, Result};
pub use gguf::{GgufFile, GgufWriter};
pub use kv_cache::{KvCacheConfig, KvCacheStage};
pub use llama::{LlamaConfig, LlamaStage};
pub use stage::{names, GgufStageLoader, Stage, StageKind, StageLoader, StageSignature};
pub use tokenizer::{BpeTokenizer, Tokenizer};
