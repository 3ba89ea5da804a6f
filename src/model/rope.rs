//! Rotary position embeddings.
//!
//! Reference: <https://arxiv.org/abs/2104.09864>

use candle_core::{DType, Device, Result, Tensor, D};

/// Precomputed cos/sin tables for rotary embeddings.
///
/// Built once per model and shared by every attention layer (cloning only
/// bumps the reference count of the tables).
#[derive(Debug, Clone)]
pub struct RotaryEmbedding {
    /// Cosine table [max_seq_len, head_dim].
    cos: Tensor,
    /// Sine table [max_seq_len, head_dim].
    sin: Tensor,
    dim: usize,
}

impl RotaryEmbedding {
    /// Builds the tables.
    ///
    /// # Arguments
    ///
    /// * `dim` - Head dimension (must be even)
    /// * `max_seq_len` - Number of positions to precompute
    /// * `theta` - Base frequency (1e6 for Qwen3)
    /// * `dtype` - Dtype of the tables (matches the model)
    /// * `device` - Device of the tables
    pub fn new(
        dim: usize,
        max_seq_len: usize,
        theta: f64,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        if dim % 2 != 0 {
            candle_core::bail!("rotary dimension must be even, got {dim}");
        }

        let inv_freq: Vec<f32> = (0..dim / 2)
            .map(|i| 1.0 / theta.powf(2.0 * i as f64 / dim as f64) as f32)
            .collect();
        let inv_freq = Tensor::new(inv_freq.as_slice(), device)?;
        let positions = Tensor::arange(0u32, max_seq_len as u32, device)?
            .to_dtype(DType::F32)?
            .reshape((max_seq_len, 1))?;

        // [max_seq_len, dim/2] -> [max_seq_len, dim] (half-split layout)
        let freqs = positions.broadcast_mul(&inv_freq)?;
        let freqs = Tensor::cat(&[&freqs, &freqs], 1)?;

        Ok(Self {
            cos: freqs.cos()?.to_dtype(dtype)?,
            sin: freqs.sin()?.to_dtype(dtype)?,
            dim,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn max_seq_len(&self) -> usize {
        self.cos.dims()[0]
    }

    /// Rotates queries and keys laid out as [batch, heads, seq_len, head_dim].
    pub fn apply(&self, q: &Tensor, k: &Tensor, start_pos: usize) -> Result<(Tensor, Tensor)> {
        let seq_len = q.dim(2)?;
        if start_pos + seq_len > self.max_seq_len() {
            candle_core::bail!(
                "position {} exceeds rotary table of {} positions",
                start_pos + seq_len,
                self.max_seq_len()
            );
        }
        let cos = self.cos.narrow(0, start_pos, seq_len)?;
        let sin = self.sin.narrow(0, start_pos, seq_len)?;
        Ok((rotate(q, &cos, &sin)?, rotate(k, &cos, &sin)?))
    }
}

/// `x * cos + rotate_half(x) * sin`, where `rotate_half([a, b]) = [-b, a]`.
fn rotate(x: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
    let half = x.dim(D::Minus1)? / 2;
    let x1 = x.narrow(D::Minus1, 0, half)?;
    let x2 = x.narrow(D::Minus1, half, half)?;
    let rotated = Tensor::cat(&[&x2.neg()?, &x1], D::Minus1)?;
    x.broadcast_mul(cos)? + rotated.broadcast_mul(sin)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odd_dim_rejected() {
        assert!(RotaryEmbedding::new(7, 16, 10000.0, DType::F32, &Device::Cpu).is_err());
    }

    #[test]
    fn test_position_zero_is_identity() {
        let device = Device::Cpu;
        let rope = RotaryEmbedding::new(8, 16, 10000.0, DType::F32, &device).unwrap();
        let q = Tensor::randn(0f32, 1.0, (1, 2, 1, 8), &device).unwrap();

        let (q_rot, _) = rope.apply(&q, &q, 0).unwrap();
        let diff = (q_rot - &q).unwrap().abs().unwrap().max_all().unwrap();
        assert!(diff.to_scalar::<f32>().unwrap() < 1e-6);
    }

    #[test]
    fn test_past_table_end_errors() {
        let device = Device::Cpu;
        let rope = RotaryEmbedding::new(8, 4, 10000.0, DType::F32, &device).unwrap();
        let q = Tensor::zeros((1, 1, 2, 8), DType::F32, &device).unwrap();

        assert!(rope.apply(&q, &q, 3).is_err());
    }
}
