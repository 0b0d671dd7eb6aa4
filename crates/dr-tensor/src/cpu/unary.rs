use crate::error::{Result, TensorError};

pub fn zip_with(a: &[f32], b: &[f32], f: impl Fn(f32, f32) -> f32) -> Result<Vec<f32>> {
    if a.len() != b.len() {
        return Err(TensorError::ShapeMismatch {
            expected: vec![a.len()],
            got: vec![b.len()],
        });
    }
    Ok(a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect())
}

pub fn rms_norm(x: &[f32], weight: &[f32], eps: f32, hidden_size: usize) -> Result<Vec<f32>> {
    if hidden_size == 0 || weight.len() != hidden_size || x.len() % hidden_size != 0 {
        return Err(TensorError::Other(format!(
            "rms_norm: x.len()={} weight.len()={} hidden_size={}",
            x.len(),
            weight.len(),
            hidden_size
        )));
    }

    let mut out = Vec::with_capacity(x.len());
    for row in x.chunks_exact(hidden_size) {
        let mean_sq = row.iter().map(|v| v * v).sum::<f32>() / hidden_size as f32;
        let inv_rms = 1.0 / (mean_sq + eps).sqrt();
        out.extend(row.iter().zip(weight).map(|(v, w)| v * w * inv_rms));
    }
    Ok(out)
}

pub fn softmax(x: &[f32], width: usize) -> Result<Vec<f32>> {
    if width == 0 || x.len() % width != 0 {
        return Err(TensorError::Other(format!(
            "softmax: x.len()={} is not a multiple of width={}",
            x.len(),
            width
        )));
    }

    let mut out = Vec::with_capacity(x.len());
    for chunk in x.chunks_exact(width) {
        let max = chunk.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let start = out.len();
        out.extend(chunk.iter().map(|v| (v - max).exp()));
        let sum: f32 = out[start..].iter().sum();
        for v in &mut out[start..] {
            *v /= sum;
        }
    }
    Ok(out)
}

pub fn silu(x: &[f32]) -> Vec<f32> {
    x.iter().map(|&v| v / (1.0 + (-v).exp())).collect()
}
