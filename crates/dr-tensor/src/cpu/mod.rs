pub mod matmul;
pub mod rope;
pub mod unary;

use crate::backend::ComputeBackend;
use crate::error::Result;

/// Pure-Rust CPU compute backend.
///
/// Straightforward loops, correctness over peak performance.
#[derive(Debug, Clone, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
        matmul::matmul(a, b, m, k, n)
    }

    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        unary::zip_with(a, b, |x, y| x + y)
    }

    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        unary::zip_with(a, b, |x, y| x * y)
    }

    fn rms_norm(
        &self,
        x: &[f32],
        weight: &[f32],
        eps: f32,
        hidden_size: usize,
    ) -> Result<Vec<f32>> {
        unary::rms_norm(x, weight, eps, hidden_size)
    }

    fn softmax(&self, x: &[f32], width: usize) -> Result<Vec<f32>> {
        unary::softmax(x, width)
    }

    fn rope(
        &self,
        q: &[f32],
        k: &[f32],
        head_dim: usize,
        pos: usize,
        n_heads_q: usize,
        n_heads_k: usize,
        theta: f32,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        Ok((
            rope::rope(q, n_heads_q, head_dim, pos, theta)?,
            rope::rope(k, n_heads_k, head_dim, pos, theta)?,
        ))
    }

    fn silu(&self, x: &[f32]) -> Result<Vec<f32>> {
        Ok(unary::silu(x))
    }
}
