use std::fmt::Debug;

use crate::error::Result;

/// Trait for pluggable compute backends.
///
/// All operations work on f32 slices and return owned vectors, so stage
/// implementations can run unchanged on any backend.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu").
    fn name(&self) -> &str;

    /// Matrix multiplication: C = A @ B.
    ///
    /// - `a`: row-major data of shape [m, k]
    /// - `b`: row-major data of shape [k, n]
    /// - Returns: row-major data of shape [m, n]
    fn matmul(&self, a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>>;

    /// Element-wise addition.
    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// Element-wise multiplication.
    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// RMS normalization over rows of `hidden_size` elements:
    /// `x[i] * weight[i] / sqrt(mean(x^2) + eps)`.
    fn rms_norm(&self, x: &[f32], weight: &[f32], eps: f32, hidden_size: usize)
        -> Result<Vec<f32>>;

    /// Softmax over consecutive chunks of `width` elements.
    fn softmax(&self, x: &[f32], width: usize) -> Result<Vec<f32>>;

    /// Rotary position embedding applied to query and key heads.
    ///
    /// - `q`: shape [n_heads_q, head_dim]
    /// - `k`: shape [n_heads_k, head_dim]
    /// - `pos`: absolute position of the token
    /// - `theta`: frequency base
    ///
    /// Returns (rotated_q, rotated_k).
    #[allow(clippy::too_many_arguments)]
    fn rope(
        &self,
        q: &[f32],
        k: &[f32],
        head_dim: usize,
        pos: usize,
        n_heads_q: usize,
        n_heads_k: usize,
        theta: f32,
    ) -> Result<(Vec<f32>, Vec<f32>)>;

    /// SiLU activation: `x * sigmoid(x)`.
    fn silu(&self, x: &[f32]) -> Result<Vec<f32>>;
}
