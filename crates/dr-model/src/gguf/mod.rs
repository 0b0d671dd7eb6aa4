//! GGUF v3 container format, used for every stage artifact.

mod cursor;
pub mod reader;
pub mod value;
pub mod writer;

pub use reader::{GgufFile, GgufTensorInfo};
pub use value::{GgufMetadata, GgufValue};
pub use writer::GgufWriter;

pub const GGUF_MAGIC: [u8; 4] = *b"GGUF";
pub const GGUF_VERSION: u32 = 3;
pub const DEFAULT_ALIGNMENT: usize = 32;
pub const ALIGNMENT_KEY: &str = "general.alignment";
