use crate::error::{ModelError, Result};

use super::value::GgufValue;

/// Little-endian reader over an in-memory GGUF buffer.
///
/// Every read is bounds-checked so a truncated or corrupt file surfaces as
/// `ModelError::Truncated` instead of a panic.
pub(crate) struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(ModelError::Truncated {
                offset: self.pos,
                needed: n - self.remaining(),
            });
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// A u64 length or count that must also fit in memory.
    pub fn count(&mut self) -> Result<usize> {
        let offset = self.pos;
        let n = self.u64()?;
        usize::try_from(n).map_err(|_| ModelError::Truncated {
            offset,
            needed: usize::MAX,
        })
    }

    /// Length-prefixed UTF-8 string.
    pub fn string(&mut self) -> Result<String> {
        let len = self.count()?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ModelError::Other(format!("invalid UTF-8 in GGUF string: {}", e)))
    }

    /// A metadata value of the given on-disk type.
    pub fn value(&mut self, type_id: u32) -> Result<GgufValue> {
        Ok(match type_id {
            0 => GgufValue::U8(self.u8()?),
            1 => GgufValue::I8(self.u8()? as i8),
            2 => GgufValue::U16(self.u16()?),
            3 => GgufValue::I16(self.u16()? as i16),
            4 => GgufValue::U32(self.u32()?),
            5 => GgufValue::I32(self.u32()? as i32),
            6 => GgufValue::F32(f32::from_le_bytes(self.array()?)),
            7 => GgufValue::Bool(self.u8()? != 0),
            8 => GgufValue::String(self.string()?),
            9 => {
                let elem_type = self.u32()?;
                let count = self.count()?;
                // Each element takes at least one byte; cap the reservation so
                // a corrupt count cannot allocate more than the file holds.
                let mut items = Vec::with_capacity(count.min(self.remaining()));
                for _ in 0..count {
                    items.push(self.value(elem_type)?);
                }
                GgufValue::Array(items)
            }
            10 => GgufValue::U64(self.u64()?),
            11 => GgufValue::I64(self.u64()? as i64),
            12 => GgufValue::F64(f64::from_le_bytes(self.array()?)),
            other => return Err(ModelError::UnsupportedGgufType(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalars_and_strings() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(&5u64.to_le_bytes());
        buf.extend_from_slice(b"hello");
        let mut c = ByteCursor::new(&buf);
        assert_eq!(c.u32().unwrap(), 7);
        assert_eq!(c.string().unwrap(), "hello");
        assert_eq!(c.position(), buf.len());
    }

    #[test]
    fn test_truncated() {
        let buf = [1u8, 2];
        let mut c = ByteCursor::new(&buf);
        assert!(matches!(
            c.u32(),
            Err(ModelError::Truncated { offset: 0, needed: 2 })
        ));
    }

    #[test]
    fn test_nested_array() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&4u32.to_le_bytes()); // element type U32
        buf.extend_from_slice(&2u64.to_le_bytes());
        buf.extend_from_slice(&10u32.to_le_bytes());
        buf.extend_from_slice(&20u32.to_le_bytes());
        let mut c = ByteCursor::new(&buf);
        assert_eq!(
            c.value(9).unwrap(),
            GgufValue::Array(vec![GgufValue::U32(10), GgufValue::U32(20)])
        );
    }

    #[test]
    fn test_unknown_type() {
        let mut c = ByteCursor::new(&[]);
        assert!(matches!(c.value(42), Err(ModelError::UnsupportedGgufType(42))));
    }
}
