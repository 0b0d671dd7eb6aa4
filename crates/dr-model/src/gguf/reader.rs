use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use dr_tensor::{DType, Shape, Tensor};

use crate::error::{ModelError, Result};

use super::cursor::ByteCursor;
use super::value::GgufMetadata;
use super::{ALIGNMENT_KEY, DEFAULT_ALIGNMENT, GGUF_MAGIC, GGUF_VERSION};

/// Metadata describing one tensor stored in a GGUF file.
#[derive(Debug, Clone, PartialEq)]
pub struct GgufTensorInfo {
    pub name: String,
    /// Dimensions as stored on disk, innermost first.
    pub dims: Vec<u64>,
    pub dtype: DType,
    /// Byte offset relative to the start of the data section.
    pub offset: u64,
}

impl GgufTensorInfo {
    pub fn numel(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product()
    }

    pub fn byte_len(&self) -> usize {
        self.numel() * self.dtype.size_in_bytes()
    }

    /// Row-major shape, outermost dimension first.
    pub fn shape(&self) -> Shape {
        Shape::new(self.dims.iter().rev().map(|&d| d as usize).collect())
    }
}

/// A parsed GGUF file backed by a memory map.
///
/// The header, metadata and tensor table are parsed eagerly; tensor data
/// stays in the mapping until `tensor` decodes it.
pub struct GgufFile {
    pub version: u32,
    pub metadata: GgufMetadata,
    pub tensors: Vec<GgufTensorInfo>,
    mmap: Mmap,
    data_offset: usize,
}

impl GgufFile {
    pub fn open(path: &Path) -> Result<GgufFile> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only and artifacts are not modified
        // while a stage holds them open.
        let mmap = unsafe { Mmap::map(&file)? };
        let header = parse(&mmap)?;

        tracing::debug!(
            path = %path.display(),
            version = header.version,
            tensors = header.tensors.len(),
            kv = header.metadata.len(),
            "parsed GGUF"
        );

        Ok(GgufFile {
            version: header.version,
            metadata: header.metadata,
            tensors: header.tensors,
            mmap,
            data_offset: header.data_offset,
        })
    }

    /// The `general.architecture` string.
    pub fn architecture(&self) -> Result<&str> {
        self.metadata.get_str(crate::stage::ARCHITECTURE_KEY)
    }

    pub fn tensor_info(&self, name: &str) -> Option<&GgufTensorInfo> {
        self.tensors.iter().find(|t| t.name == name)
    }

    /// Decode a tensor by name into an f32 tensor.
    pub fn tensor(&self, name: &str) -> Result<Tensor> {
        let info = self
            .tensor_info(name)
            .ok_or_else(|| ModelError::TensorNotFound(name.to_string()))?;

        let start = self.data_offset + info.offset as usize;
        let len = info.byte_len();
        let raw = self
            .mmap
            .get(start..start + len)
            .ok_or(ModelError::Truncated {
                offset: start,
                needed: (start + len).saturating_sub(self.mmap.len()),
            })?;

        let data = match info.dtype {
            DType::F32 => raw
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            DType::F16 => raw
                .chunks_exact(2)
                .map(|b| half::f16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect(),
            DType::U32 => {
                return Err(ModelError::Other(format!(
                    "tensor '{}' is not a floating-point weight",
                    name
                )))
            }
        };
        Ok(Tensor::from_f32(data, info.shape())?)
    }
}

struct Header {
    version: u32,
    metadata: GgufMetadata,
    tensors: Vec<GgufTensorInfo>,
    data_offset: usize,
}

fn parse(bytes: &[u8]) -> Result<Header> {
    let mut c = ByteCursor::new(bytes);

    let mut magic = [0u8; 4];
    magic.copy_from_slice(c.take(4)?);
    if magic != GGUF_MAGIC {
        return Err(ModelError::InvalidMagic(magic));
    }
    let version = c.u32()?;
    if version != GGUF_VERSION {
        return Err(ModelError::UnsupportedVersion(version));
    }
    let n_tensors = c.count()?;
    let n_kv = c.count()?;

    let mut metadata = GgufMetadata::new();
    for _ in 0..n_kv {
        let key = c.string()?;
        let type_id = c.u32()?;
        let value = c.value(type_id)?;
        metadata.insert(key, value);
    }

    let mut tensors = Vec::with_capacity(n_tensors.min(bytes.len()));
    for _ in 0..n_tensors {
        let name = c.string()?;
        let n_dims = c.u32()?;
        let mut dims = Vec::with_capacity(n_dims as usize);
        for _ in 0..n_dims {
            dims.push(c.u64()?);
        }
        let type_id = c.u32()?;
        let dtype =
            DType::from_gguf_type(type_id).ok_or(ModelError::UnsupportedGgufType(type_id))?;
        let offset = c.u64()?;
        tensors.push(GgufTensorInfo {
            name,
            dims,
            dtype,
            offset,
        });
    }

    let alignment = if metadata.contains(ALIGNMENT_KEY) {
        metadata.get_usize(ALIGNMENT_KEY)?
    } else {
        DEFAULT_ALIGNMENT
    };
    if alignment == 0 || !alignment.is_power_of_two() {
        return Err(ModelError::InvalidConfig(format!(
            "alignment {} is not a power of two",
            alignment
        )));
    }
    let data_offset = align_to(c.position(), alignment);

    Ok(Header {
        version,
        metadata,
        tensors,
        data_offset,
    })
}

pub(crate) fn align_to(pos: usize, alignment: usize) -> usize {
    (pos + alignment - 1) & !(alignment - 1)
}
