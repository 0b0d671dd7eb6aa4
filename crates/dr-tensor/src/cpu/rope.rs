use crate::error::{Result, TensorError};

/// Rotates adjacent element pairs of every head by `pos * theta^(-2i/head_dim)`.
pub fn rope(
    heads: &[f32],
    n_heads: usize,
    head_dim: usize,
    pos: usize,
    theta: f32,
) -> Result<Vec<f32>> {
    if heads.len() != n_heads * head_dim {
        return Err(TensorError::Other(format!(
            "rope: got {} values for {} heads of dim {}",
            heads.len(),
            n_heads,
            head_dim
        )));
    }

    let mut out = heads.to_vec();
    for head in out.chunks_exact_mut(head_dim) {
        for i in 0..head_dim / 2 {
            let freq = theta.powf(-2.0 * i as f32 / head_dim as f32);
            let (sin, cos) = (pos as f32 * freq).sin_cos();
            let x0 = head[2 * i];
            let x1 = head[2 * i + 1];
            head[2 * i] = x0 * cos - x1 * sin;
            head[2 * i + 1] = x0 * sin + x1 * cos;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_position_zero_is_identity() {
        let q = vec![1.0, 0.0, 0.0, 1.0];
        assert_eq!(rope(&q, 1, 4, 0, 10000.0).unwrap(), q);
    }

    #[test]
    fn test_preserves_pair_norm() {
        let q = vec![3.0, 4.0];
        let r = rope(&q, 1, 2, 7, 10000.0).unwrap();
        assert_relative_eq!((r[0] * r[0] + r[1] * r[1]).sqrt(), 5.0, epsilon = 1e-5);
    }

    #[test]
    fn test_length_check() {
        assert!(rope(&[1.0, 2.0, 3.0], 1, 4, 0, 10000.0).is_err());
    }
}
