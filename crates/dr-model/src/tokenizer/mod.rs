pub mod bpe;
pub mod vocab;

pub use bpe::BpeTokenizer;
pub use vocab::Vocab;

use crate::error::Result;

/// Text <-> token id conversion used around the pipeline.
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    fn decode(&self, tokens: &[u32]) -> Result<String>;

    /// End-of-sequence id, used as the default stop token.
    fn eos_id(&self) -> Option<u32>;
}
