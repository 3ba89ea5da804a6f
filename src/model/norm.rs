//! RMS normalization.
//!
//! Reference: <https://arxiv.org/abs/1910.07467>

use candle_core::{DType, Result, Tensor, D};
use candle_nn::{Init, VarBuilder};

/// Root-mean-square layer norm: `x / sqrt(mean(x^2) + eps) * weight`.
///
/// Statistics are computed in f32 whatever the input dtype.
#[derive(Debug, Clone)]
pub struct RmsNorm {
    /// Scale [hidden_size].
    weight: Tensor,
    eps: f64,
}

impl RmsNorm {
    pub fn new(weight: Tensor, eps: f64) -> Self {
        Self { weight, eps }
    }

    /// Loads `weight` from `vb`; fresh variables start at one.
    pub fn load(size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(size, "weight", Init::Const(1.0))?;
        Ok(Self { weight, eps })
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn eps(&self) -> f64 {
        self.eps
    }

    /// Normalizes over the last dimension of `x` [..., hidden_size].
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let dtype = x.dtype();
        let x = x.to_dtype(DType::F32)?;
        let rms = (x.sqr()?.mean_keepdim(D::Minus1)? + self.eps)?.sqrt()?;
        x.broadcast_div(&rms)?
            .to_dtype(dtype)?
            .broadcast_mul(&self.weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_load_initializes_ones() {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let norm = RmsNorm::load(8, 1e-6, vb.pp("norm")).unwrap();

        assert_eq!(norm.weight().to_vec1::<f32>().unwrap(), vec![1.0; 8]);
        assert_eq!(varmap.all_vars().len(), 1);
    }

    #[test]
    fn test_forward_keeps_dtype() {
        let device = Device::Cpu;
        let weight = Tensor::ones(4, DType::BF16, &device).unwrap();
        let norm = RmsNorm::new(weight, 1e-6);
        let x = Tensor::new(&[[1.0f32, 2.0, 3.0, 4.0]], &device)
            .unwrap()
            .to_dtype(DType::BF16)
            .unwrap();

        let out = norm.forward(&x).unwrap();
        assert_eq!(out.dtype(), DType::BF16);
        assert_eq!(out.dims(), &[1, 4]);
    }
}
