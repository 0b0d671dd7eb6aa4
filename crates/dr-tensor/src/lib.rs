//! `dr-tensor` - Tensor types shared by the decode-runtime stages.
//!
//! This crate provides:
//! - A `Tensor` type backed by CPU storage (f32 activations or u32 token ids)
//! - `TensorMap`, the named-tensor bundle stages consume and produce
//! - A `ComputeBackend` trait and the reference `CpuBackend`
//! - Shape utilities and data type definitions

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod error;
pub mod named;
pub mod shape;
pub mod storage;
pub mod tensor;

pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use dtype::DType;
pub use error::{Result, TensorError};
pub use named::TensorMap;
pub use shape::Shape;
pub use storage::CpuStorage;
pub use tensor::Tensor;
