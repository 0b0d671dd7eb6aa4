use crate::error::{Result, TensorError};

/// Row-major `[m, k] @ [k, n]`.
///
/// The inner loop walks `b` row by row so both operands are read
/// sequentially; for the `n == 1` matrix-vector case this is a plain dot
/// product per output row.
pub fn matmul(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Result<Vec<f32>> {
    if a.len() != m * k || b.len() != k * n {
        return Err(TensorError::MatmulMismatch {
            m,
            k,
            k2: if n == 0 { 0 } else { b.len() / n },
            n,
        });
    }

    let mut c = vec![0.0f32; m * n];
    for i in 0..m {
        let a_row = &a[i * k..(i + 1) * k];
        let c_row = &mut c[i * n..(i + 1) * n];
        for (p, &a_ip) in a_row.iter().enumerate() {
            let b_row = &b[p * n..(p + 1) * n];
            for (c_ij, &b_pj) in c_row.iter_mut().zip(b_row) {
                *c_ij += a_ip * b_pj;
            }
        }
    }
    Ok(c)
}
