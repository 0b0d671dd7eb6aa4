use std::collections::HashMap;

use crate::error::{ModelError, Result};

/// A single GGUF metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum GgufValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    F32(f32),
    Bool(bool),
    String(String),
    Array(Vec<GgufValue>),
    U64(u64),
    I64(i64),
    F64(f64),
}

impl GgufValue {
    /// The on-disk GGUF value type id.
    pub fn type_id(&self) -> u32 {
        match self {
            GgufValue::U8(_) => 0,
            GgufValue::I8(_) => 1,
            GgufValue::U16(_) => 2,
            GgufValue::I16(_) => 3,
            GgufValue::U32(_) => 4,
            GgufValue::I32(_) => 5,
            GgufValue::F32(_) => 6,
            GgufValue::Bool(_) => 7,
            GgufValue::String(_) => 8,
            GgufValue::Array(_) => 9,
            GgufValue::U64(_) => 10,
            GgufValue::I64(_) => 11,
            GgufValue::F64(_) => 12,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            GgufValue::U8(_) => "U8",
            GgufValue::I8(_) => "I8",
            GgufValue::U16(_) => "U16",
            GgufValue::I16(_) => "I16",
            GgufValue::U32(_) => "U32",
            GgufValue::I32(_) => "I32",
            GgufValue::F32(_) => "F32",
            GgufValue::Bool(_) => "Bool",
            GgufValue::String(_) => "String",
            GgufValue::Array(_) => "Array",
            GgufValue::U64(_) => "U64",
            GgufValue::I64(_) => "I64",
            GgufValue::F64(_) => "F64",
        }
    }

    /// Any non-negative integer value, widened.
    fn as_u64(&self) -> Option<u64> {
        match *self {
            GgufValue::U8(v) => Some(v as u64),
            GgufValue::U16(v) => Some(v as u64),
            GgufValue::U32(v) => Some(v as u64),
            GgufValue::U64(v) => Some(v),
            GgufValue::I8(v) => u64::try_from(v).ok(),
            GgufValue::I16(v) => u64::try_from(v).ok(),
            GgufValue::I32(v) => u64::try_from(v).ok(),
            GgufValue::I64(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    fn as_f32(&self) -> Option<f32> {
        match *self {
            GgufValue::F32(v) => Some(v),
            GgufValue::F64(v) => Some(v as f32),
            _ => None,
        }
    }
}

impl From<u32> for GgufValue {
    fn from(v: u32) -> Self {
        GgufValue::U32(v)
    }
}

impl From<u64> for GgufValue {
    fn from(v: u64) -> Self {
        GgufValue::U64(v)
    }
}

impl From<f32> for GgufValue {
    fn from(v: f32) -> Self {
        GgufValue::F32(v)
    }
}

impl From<bool> for GgufValue {
    fn from(v: bool) -> Self {
        GgufValue::Bool(v)
    }
}

impl From<&str> for GgufValue {
    fn from(v: &str) -> Self {
        GgufValue::String(v.to_string())
    }
}

impl From<String> for GgufValue {
    fn from(v: String) -> Self {
        GgufValue::String(v)
    }
}

impl From<Vec<String>> for GgufValue {
    fn from(v: Vec<String>) -> Self {
        GgufValue::Array(v.into_iter().map(GgufValue::String).collect())
    }
}

impl From<Vec<f32>> for GgufValue {
    fn from(v: Vec<f32>) -> Self {
        GgufValue::Array(v.into_iter().map(GgufValue::F32).collect())
    }
}

/// GGUF metadata key-value pairs.
#[derive(Debug, Clone, Default)]
pub struct GgufMetadata {
    entries: HashMap<String, GgufValue>,
}

impl GgufMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: GgufValue) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&GgufValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Any integer value that fits in a u32.
    pub fn get_u32(&self, key: &str) -> Result<u32> {
        self.typed(key, "U32", |v| v.as_u64().and_then(|n| u32::try_from(n).ok()))
    }

    /// Any integer value that fits in a usize.
    pub fn get_usize(&self, key: &str) -> Result<usize> {
        self.typed(key, "unsigned integer", |v| {
            v.as_u64().and_then(|n| usize::try_from(n).ok())
        })
    }

    /// An F32 (or narrowed F64) value.
    pub fn get_f32(&self, key: &str) -> Result<f32> {
        self.typed(key, "F32", GgufValue::as_f32)
    }

    pub fn get_str(&self, key: &str) -> Result<&str> {
        self.typed(key, "String", |v| match v {
            GgufValue::String(s) => Some(s.as_str()),
            _ => None,
        })
    }

    pub fn get_string_array(&self, key: &str) -> Result<Vec<String>> {
        self.array_of(key, "String", |v| match v {
            GgufValue::String(s) => Some(s.clone()),
            _ => None,
        })
    }

    pub fn get_f32_array(&self, key: &str) -> Result<Vec<f32>> {
        self.array_of(key, "F32", GgufValue::as_f32)
    }

    fn typed<'a, T>(
        &'a self,
        key: &str,
        expected: &str,
        convert: impl Fn(&'a GgufValue) -> Option<T>,
    ) -> Result<T> {
        let value = self
            .entries
            .get(key)
            .ok_or_else(|| ModelError::MissingKey(key.to_string()))?;
        convert(value).ok_or_else(|| ModelError::TypeMismatch {
            key: key.to_string(),
            expected: expected.to_string(),
            got: value.type_name().to_string(),
        })
    }

    fn array_of<T>(
        &self,
        key: &str,
        expected: &str,
        convert: impl Fn(&GgufValue) -> Option<T>,
    ) -> Result<Vec<T>> {
        let items = self.typed(key, "Array", |v| match v {
            GgufValue::Array(items) => Some(items),
            _ => None,
        })?;
        items
            .iter()
            .enumerate()
            .map(|(i, v)| {
                convert(v).ok_or_else(|| ModelError::TypeMismatch {
                    key: format!("{}[{}]", key, i),
                    expected: expected.to_string(),
                    got: v.type_name().to_string(),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> GgufMetadata {
        let mut m = GgufMetadata::new();
        m.insert("count", GgufValue::U32(7));
        m.insert("wide", GgufValue::U64(1 << 40));
        m.insert("signed", GgufValue::I32(-1));
        m.insert("eps", GgufValue::F32(1e-5));
        m.insert("name", GgufValue::from("llama"));
        m.insert("tokens", GgufValue::from(vec!["a".to_string(), "b".to_string()]));
        m.insert("scores", GgufValue::from(vec![0.5f32, 1.5]));
        m
    }

    #[test]
    fn test_integer_widening() {
        let m = metadata();
        assert_eq!(m.get_u32("count").unwrap(), 7);
        assert_eq!(m.get_usize("count").unwrap(), 7);
        // Too large for u32, negative values are never unsigned.
        assert!(matches!(m.get_u32("wide"), Err(ModelError::TypeMismatch { .. })));
        assert!(m.get_usize("signed").is_err());
    }

    #[test]
    fn test_typed_getters() {
        let m = metadata();
        assert_eq!(m.get_str("name").unwrap(), "llama");
        assert!((m.get_f32("eps").unwrap() - 1e-5).abs() < 1e-12);
        assert_eq!(m.get_string_array("tokens").unwrap(), vec!["a", "b"]);
        assert_eq!(m.get_f32_array("scores").unwrap(), vec![0.5, 1.5]);
        assert!(matches!(m.get_str("missing"), Err(ModelError::MissingKey(_))));
        assert!(matches!(
            m.get_f32_array("tokens"),
            Err(ModelError::TypeMismatch { key, .. }) if key == "tokens[0]"
        ));
    }
}
