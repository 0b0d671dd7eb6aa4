use std::fmt;

/// Element types understood by the runtime.
///
/// `F16` only exists on disk: artifacts stored as half precision are widened
/// to `F32` when they are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32-bit floating point.
    F32,
    /// 16-bit floating point (IEEE 754 half-precision).
    F16,
    /// Unsigned 32-bit integers, used for token ids and selected indices.
    U32,
}

impl DType {
    /// Size in bytes of a single element.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F32 | DType::U32 => 4,
            DType::F16 => 2,
        }
    }

    /// Maps a GGUF tensor type id to a `DType`.
    ///
    /// Only the unquantized float formats are accepted: 0 => F32, 1 => F16.
    pub fn from_gguf_type(id: u32) -> Option<DType> {
        match id {
            0 => Some(DType::F32),
            1 => Some(DType::F16),
            _ => None,
        }
    }

    /// The GGUF tensor type id, if this dtype can be stored in a GGUF file.
    pub fn to_gguf_type(&self) -> Option<u32> {
        match self {
            DType::F32 => Some(0),
            DType::F16 => Some(1),
            DType::U32 => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::U32 => "u32",
        };
        f.write_str(name)
    }
}
