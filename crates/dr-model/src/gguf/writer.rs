use std::path::Path;

use dr_tensor::{DType, Tensor};

use crate::error::{ModelError, Result};

use super::reader::align_to;
use super::value::GgufValue;
use super::{DEFAULT_ALIGNMENT, GGUF_MAGIC, GGUF_VERSION};

struct PendingTensor {
    name: String,
    /// Row-major dimensions.
    dims: Vec<usize>,
    dtype: DType,
    data: Vec<u8>,
}

/// Serializes metadata and f32 tensors into a GGUF v3 file.
///
/// Used to produce stage artifacts (the cache and logit stages carry no
/// weights, only metadata) and small fixtures in tests.
#[derive(Default)]
pub struct GgufWriter {
    metadata: Vec<(String, GgufValue)>,
    tensors: Vec<PendingTensor>,
}

impl GgufWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_metadata(
        &mut self,
        key: impl Into<String>,
        value: impl Into<GgufValue>,
    ) -> &mut Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Add an f32 tensor, stored on disk as `dtype` (F32 or F16).
    pub fn add_tensor(
        &mut self,
        name: impl Into<String>,
        tensor: &Tensor,
        dtype: DType,
    ) -> Result<&mut Self> {
        let values = tensor.data_f32()?;
        let data = match dtype {
            DType::F32 => values.iter().flat_map(|v| v.to_le_bytes()).collect(),
            DType::F16 => values
                .iter()
                .flat_map(|&v| half::f16::from_f32(v).to_le_bytes())
                .collect(),
            DType::U32 => {
                return Err(ModelError::Other(format!(
                    "cannot store u32 tensor '{}' in GGUF",
                    name.into()
                )))
            }
        };
        self.tensors.push(PendingTensor {
            name: name.into(),
            dims: tensor.shape().dims().to_vec(),
            dtype,
            data,
        });
        Ok(self)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&GGUF_MAGIC);
        out.extend_from_slice(&GGUF_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.tensors.len() as u64).to_le_bytes());
        out.extend_from_slice(&(self.metadata.len() as u64).to_le_bytes());

        for (key, value) in &self.metadata {
            write_string(&mut out, key);
            out.extend_from_slice(&value.type_id().to_le_bytes());
            write_value(&mut out, value);
        }

        let mut offsets = Vec::with_capacity(self.tensors.len());
        let mut cursor = 0usize;
        for t in &self.tensors {
            let offset = align_to(cursor, DEFAULT_ALIGNMENT);
            offsets.push(offset);
            cursor = offset + t.data.len();
        }

        for (t, &offset) in self.tensors.iter().zip(&offsets) {
            write_string(&mut out, &t.name);
            out.extend_from_slice(&(t.dims.len() as u32).to_le_bytes());
            for &d in t.dims.iter().rev() {
                out.extend_from_slice(&(d as u64).to_le_bytes());
            }
            let type_id = t.dtype.to_gguf_type().unwrap_or(0);
            out.extend_from_slice(&type_id.to_le_bytes());
            out.extend_from_slice(&(offset as u64).to_le_bytes());
        }

        let data_start = align_to(out.len(), DEFAULT_ALIGNMENT);
        out.resize(data_start, 0);
        for (t, &offset) in self.tensors.iter().zip(&offsets) {
            out.resize(data_start + offset, 0);
            out.extend_from_slice(&t.data);
        }
        out
    }

    pub fn write_to_path(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes())?;
        Ok(())
    }
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u64).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn write_value(out: &mut Vec<u8>, value: &GgufValue) {
    match value {
        GgufValue::U8(v) => out.push(*v),
        GgufValue::I8(v) => out.push(*v as u8),
        GgufValue::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
        GgufValue::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
        GgufValue::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
        GgufValue::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
        GgufValue::F32(v) => out.extend_from_slice(&v.to_le_bytes()),
        GgufValue::Bool(v) => out.push(*v as u8),
        GgufValue::String(s) => write_string(out, s),
        GgufValue::Array(items) => {
            // Arrays are homogeneous; an empty array is written as strings.
            let elem_type = items.first().map_or(8, GgufValue::type_id);
            out.extend_from_slice(&elem_type.to_le_bytes());
            out.extend_from_slice(&(items.len() as u64).to_le_bytes());
            for item in items {
                write_value(out, item);
            }
        }
        GgufValue::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
        GgufValue::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
        GgufValue::F64(v) => out.extend_from_slice(&v.to_le_bytes()),
    }
}
