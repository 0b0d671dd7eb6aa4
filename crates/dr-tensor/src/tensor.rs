use crate::dtype::DType;
use crate::error::{Result, TensorError};
use crate::shape::Shape;
use crate::storage::CpuStorage;

/// A dense, row-major tensor backed by CPU storage.
///
/// Stages exchange tensors by value inside a `TensorMap`. Float tensors carry
/// activations, logits and cache entries; `U32` tensors carry token ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    storage: CpuStorage,
    shape: Shape,
}

impl Tensor {
    /// Create a new f32 tensor from data and a shape.
    ///
    /// # Panics
    /// Panics if `data.len() != shape.numel()`. Use [`Tensor::from_f32`] for
    /// data that has not already been validated.
    pub fn new(data: Vec<f32>, shape: Shape) -> Self {
        assert_eq!(
            data.len(),
            shape.numel(),
            "data length {} does not match shape {} (numel={})",
            data.len(),
            shape,
            shape.numel()
        );
        Tensor {
            storage: CpuStorage::F32(data),
            shape,
        }
    }

    /// Checked constructor for f32 data.
    pub fn from_f32(data: Vec<f32>, shape: Shape) -> Result<Self> {
        check_len(data.len(), &shape)?;
        Ok(Tensor {
            storage: CpuStorage::F32(data),
            shape,
        })
    }

    /// Checked constructor for u32 data.
    pub fn from_u32(data: Vec<u32>, shape: Shape) -> Result<Self> {
        check_len(data.len(), &shape)?;
        Ok(Tensor {
            storage: CpuStorage::U32(data),
            shape,
        })
    }

    /// A rank-1 `U32` tensor holding the given token ids.
    pub fn from_tokens(tokens: &[u32]) -> Self {
        Tensor {
            storage: CpuStorage::U32(tokens.to_vec()),
            shape: Shape::new(vec![tokens.len()]),
        }
    }

    /// Create a zero-filled f32 tensor with the given shape.
    pub fn zeros(shape: Shape) -> Self {
        let n = shape.numel();
        Tensor {
            storage: CpuStorage::F32(vec![0.0; n]),
            shape,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn storage(&self) -> &CpuStorage {
        &self.storage
    }

    pub fn data_f32(&self) -> Result<&[f32]> {
        self.storage.as_f32_slice()
    }

    pub fn data_u32(&self) -> Result<&[u32]> {
        self.storage.as_u32_slice()
    }

    /// Consume the tensor, returning its f32 data.
    pub fn into_f32(self) -> Result<Vec<f32>> {
        match self.storage {
            CpuStorage::F32(v) => Ok(v),
            other => Err(TensorError::DTypeMismatch {
                expected: DType::F32.to_string(),
                got: other.dtype().to_string(),
            }),
        }
    }

    /// Number of rows as seen by [`Tensor::row`].
    pub fn n_rows(&self) -> usize {
        match self.shape.ndim() {
            0 => 0,
            1 => 1,
            _ => self.shape.dim(0),
        }
    }

    /// The f32 elements of row `index` along the leading axis.
    ///
    /// A rank-1 tensor is treated as a single row.
    pub fn row(&self, index: usize) -> Result<&[f32]> {
        let data = self.data_f32()?;
        let (rows, width) = match self.shape.ndim() {
            0 => return Err(TensorError::InvalidAxis { axis: 0, ndim: 0 }),
            1 => (1, self.shape.dim(0)),
            _ => (self.shape.dim(0), self.shape.numel() / self.shape.dim(0).max(1)),
        };
        if index >= rows {
            return Err(TensorError::IndexOutOfRange { index, len: rows });
        }
        Ok(&data[index * width..(index + 1) * width])
    }

    /// Concatenate f32 tensors along `axis`.
    ///
    /// All inputs must have the same rank and agree on every other dimension.
    pub fn concat(tensors: &[&Tensor], axis: usize) -> Result<Tensor> {
        let first = tensors
            .first()
            .ok_or_else(|| TensorError::Other("concat of zero tensors".to_string()))?;
        let ndim = first.shape.ndim();
        if axis >= ndim {
            return Err(TensorError::InvalidAxis { axis, ndim });
        }

        let mut axis_len = 0;
        for t in tensors {
            let dims = t.shape.dims();
            let compatible = dims.len() == ndim
                && dims
                    .iter()
                    .zip(first.shape.dims())
                    .enumerate()
                    .all(|(i, (a, b))| i == axis || a == b);
            if !compatible {
                return Err(TensorError::ShapeMismatch {
                    expected: first.shape.dims().to_vec(),
                    got: dims.to_vec(),
                });
            }
            axis_len += dims[axis];
        }

        // Every tensor contributes a contiguous chunk per outer index.
        let outer: usize = first.shape.dims()[..axis].iter().product();
        let out_shape = first.shape.with_dim(axis, axis_len);
        let mut out = Vec::with_capacity(out_shape.numel());
        for o in 0..outer {
            for t in tensors {
                let data = t.data_f32()?;
                let chunk = t.shape.dims()[axis..].iter().product::<usize>();
                out.extend_from_slice(&data[o * chunk..(o + 1) * chunk]);
            }
        }
        Tensor::from_f32(out, out_shape)
    }
}

fn check_len(len: usize, shape: &Shape) -> Result<()> {
    if len != shape.numel() {
        return Err(TensorError::ShapeMismatch {
            expected: shape.dims().to_vec(),
            got: vec![len],
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tensor() {
        let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Shape::new(vec![2, 3]));
        assert_eq!(t.shape().dims(), &[2, 3]);
        assert_eq!(t.dtype(), DType::F32);
        assert_eq!(t.data_f32().unwrap(), &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    #[should_panic]
    fn test_new_shape_mismatch_panics() {
        let _t = Tensor::new(vec![1.0, 2.0], Shape::new(vec![3]));
    }

    #[test]
    fn test_checked_constructors() {
        assert!(Tensor::from_f32(vec![1.0], Shape::new(vec![2])).is_err());
        assert!(Tensor::from_u32(vec![1, 2], Shape::new(vec![2])).is_ok());
    }

    #[test]
    fn test_tokens() {
        let t = Tensor::from_tokens(&[10, 20, 30]);
        assert_eq!(t.dtype(), DType::U32);
        assert_eq!(t.shape().dims(), &[3]);
        assert_eq!(t.data_u32().unwrap(), &[10, 20, 30]);
        assert!(t.data_f32().is_err());
    }

    #[test]
    fn test_row() {
        let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], Shape::new(vec![3, 2]));
        assert_eq!(t.row(1).unwrap(), &[3.0, 4.0]);
        assert!(t.row(3).is_err());

        assert_eq!(t.n_rows(), 3);

        let flat = Tensor::new(vec![1.0, 2.0], Shape::new(vec![2]));
        assert_eq!(flat.row(0).unwrap(), &[1.0, 2.0]);
        assert_eq!(flat.n_rows(), 1);
    }

    #[test]
    fn test_concat_sequence_axis() {
        // [layers=2, seq=1, width=2] ++ [2, 2, 2] along the sequence axis.
        let a = Tensor::new(vec![1.0, 2.0, 10.0, 20.0], Shape::new(vec![2, 1, 2]));
        let b = Tensor::new(
            vec![3.0, 4.0, 5.0, 6.0, 30.0, 40.0, 50.0, 60.0],
            Shape::new(vec![2, 2, 2]),
        );
        let c = Tensor::concat(&[&a, &b], 1).unwrap();
        assert_eq!(c.shape().dims(), &[2, 3, 2]);
        assert_eq!(
            c.data_f32().unwrap(),
            &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0]
        );
    }

    #[test]
    fn test_concat_onto_empty() {
        let empty = Tensor::zeros(Shape::new(vec![2, 0, 3]));
        let step = Tensor::new(vec![1.0; 6], Shape::new(vec![2, 1, 3]));
        let c = Tensor::concat(&[&empty, &step], 1).unwrap();
        assert_eq!(c.shape().dims(), &[2, 1, 3]);
    }

    #[test]
    fn test_concat_mismatch() {
        let a = Tensor::zeros(Shape::new(vec![2, 1, 3]));
        let b = Tensor::zeros(Shape::new(vec![3, 1, 3]));
        assert!(Tensor::concat(&[&a, &b], 1).is_err());
        assert!(Tensor::concat(&[&a], 3).is_err());
        assert!(Tensor::concat(&[], 0).is_err());
    }
}
