//! Region aggregation by cross-attention.
//!
//! k learned query vectors attend over a variable-length region of
//! embeddings, producing exactly k output vectors regardless of the region
//! length:
//!
//! ```text
//! queries  [k, H] ──q_proj──┐
//!                           ├─► softmax(QKᵀ/√d) V ──out_proj──► [k, H]
//! region   [L, H] ──k_proj──┤
//!                 └─v_proj──┘
//! ```

use candle_core::{Module, Tensor, D};
use candle_nn::{linear, Init, Linear, VarBuilder};

use crate::error::{Error, Result};

/// The k learned implicit summary vectors.
///
/// Owned by the aggregator for the whole training run and shared by every
/// example and batch.
#[derive(Debug, Clone)]
pub struct ImplicitTokens {
    /// Learned vectors [k, hidden_size].
    tokens: Tensor,
}

impl ImplicitTokens {
    /// Creates (or loads) the vectors under `implicit_tokens`, initialised N(0, 1).
    pub fn new(k: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        if k == 0 {
            return Err(Error::Config("number of implicit tokens must be positive".into()));
        }
        let tokens = vb.get_with_hints(
            (k, hidden_size),
            "implicit_tokens",
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        )?;
        Ok(Self { tokens })
    }

    /// Wraps an existing [k, hidden_size] tensor.
    pub fn from_tensor(tokens: Tensor) -> Result<Self> {
        let (k, _) = tokens.dims2()?;
        if k == 0 {
            return Err(Error::Config("number of implicit tokens must be positive".into()));
        }
        Ok(Self { tokens })
    }

    /// Number of vectors (k).
    pub fn k(&self) -> usize {
        self.tokens.dims()[0]
    }

    /// Dimension of each vector.
    pub fn hidden_size(&self) -> usize {
        self.tokens.dims()[1]
    }

    pub fn tensor(&self) -> &Tensor {
        &self.tokens
    }
}

/// Multi-head cross-attention from the implicit tokens onto a region.
#[derive(Debug, Clone)]
pub struct RegionAggregator {
    /// Learned queries.
    queries: ImplicitTokens,
    /// Query projection [H] -> [H].
    q_proj: Linear,
    /// Key projection [H] -> [H].
    k_proj: Linear,
    /// Value projection [H] -> [H].
    v_proj: Linear,
    /// Output projection [H] -> [H].
    out_proj: Linear,
    /// Number of attention heads.
    num_heads: usize,
    /// Dimension per head.
    head_dim: usize,
    /// Scaling factor for attention scores.
    scale: f64,
}

impl RegionAggregator {
    /// Creates the aggregator around an existing set of implicit tokens.
    ///
    /// # Arguments
    ///
    /// * `queries` - The learned implicit tokens
    /// * `num_heads` - Number of heads; must divide the hidden size
    /// * `vb` - VarBuilder for the projection weights
    pub fn new(queries: ImplicitTokens, num_heads: usize, vb: VarBuilder) -> Result<Self> {
        let hidden_size = queries.hidden_size();
        if num_heads == 0 || hidden_size % num_heads != 0 {
            return Err(Error::Config(format!(
                "num_heads ({num_heads}) must evenly divide hidden_size ({hidden_size})"
            )));
        }
        let head_dim = hidden_size / num_heads;

        let q_proj = linear(hidden_size, hidden_size, vb.pp("q_proj"))?;
        let k_proj = linear(hidden_size, hidden_size, vb.pp("k_proj"))?;
        let v_proj = linear(hidden_size, hidden_size, vb.pp("v_proj"))?;
        let out_proj = linear(hidden_size, hidden_size, vb.pp("out_proj"))?;

        Ok(Self {
            queries,
            q_proj,
            k_proj,
            v_proj,
            out_proj,
            num_heads,
            head_dim,
            scale: 1.0 / (head_dim as f64).sqrt(),
        })
    }

    /// Number of output vectors (k).
    pub fn k(&self) -> usize {
        self.queries.k()
    }

    pub fn hidden_size(&self) -> usize {
        self.queries.hidden_size()
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn queries(&self) -> &ImplicitTokens {
        &self.queries
    }

    /// Compresses a region [L, H] (L ≥ 1) into [k, H].
    pub fn aggregate(&self, region: &Tensor) -> Result<Tensor> {
        let (region_len, hidden_size) = region.dims2()?;
        if region_len == 0 {
            return Err(Error::Config("cannot aggregate an empty region".into()));
        }
        if hidden_size != self.hidden_size() {
            return Err(Error::Config(format!(
                "region hidden size {hidden_size} does not match aggregator hidden size {}",
                self.hidden_size()
            )));
        }
        let k = self.k();

        let q = self.q_proj.forward(self.queries.tensor())?; // [k, H]
        let key = self.k_proj.forward(region)?; // [L, H]
        let value = self.v_proj.forward(region)?; // [L, H]

        // [n, H] -> [num_heads, n, head_dim]
        let q = self.split_heads(&q, k)?;
        let key = self.split_heads(&key, region_len)?;
        let value = self.split_heads(&value, region_len)?;

        let scores = (q.matmul(&key.transpose(D::Minus2, D::Minus1)?)? * self.scale)?;
        // scores: [num_heads, k, L]
        let weights = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let attended = weights.matmul(&value)?; // [num_heads, k, head_dim]

        let merged = attended
            .transpose(0, 1)?
            .contiguous()?
            .reshape((k, self.num_heads * self.head_dim))?;
        Ok(self.out_proj.forward(&merged)?)
    }

    fn split_heads(&self, x: &Tensor, len: usize) -> candle_core::Result<Tensor> {
        x.reshape((len, self.num_heads, self.head_dim))?
            .transpose(0, 1)?
            .contiguous()
    }
}

#[cfg(test)]
mod tests {
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    use super::*;

    fn build(k: usize, hidden: usize, heads: usize, varmap: &VarMap) -> Result<RegionAggregator> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu);
        let queries = ImplicitTokens::new(k, hidden, vb.clone())?;
        RegionAggregator::new(queries, heads, vb.pp("aggregator"))
    }

    #[test]
    fn test_output_shape_independent_of_region_length() {
        let varmap = VarMap::new();
        let aggregator = build(4, 32, 4, &varmap).unwrap();

        for len in [1, 3, 17] {
            let region = Tensor::randn(0.0f32, 1.0, (len, 32), &Device::Cpu).unwrap();
            let out = aggregator.aggregate(&region).unwrap();
            assert_eq!(out.dims(), &[4, 32]);
        }
    }

    #[test]
    fn test_heads_must_divide_hidden() {
        let varmap = VarMap::new();
        let result = build(2, 30, 4, &varmap);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_empty_region_rejected() {
        let varmap = VarMap::new();
        let aggregator = build(2, 16, 2, &varmap).unwrap();
        let region = Tensor::zeros((0, 16), DType::F32, &Device::Cpu).unwrap();

        assert!(aggregator.aggregate(&region).is_err());
    }

    #[test]
    fn test_deterministic() {
        let varmap = VarMap::new();
        let aggregator = build(3, 16, 2, &varmap).unwrap();
        let region = Tensor::randn(0.0f32, 1.0, (5, 16), &Device::Cpu).unwrap();

        let a: Vec<f32> = aggregator.aggregate(&region).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        let b: Vec<f32> = aggregator.aggregate(&region).unwrap().flatten_all().unwrap().to_vec1().unwrap();

        assert_eq!(a, b);
    }

    #[test]
    fn test_gradients_reach_implicit_tokens_and_region() {
        let varmap = VarMap::new();
        let aggregator = build(2, 8, 2, &varmap).unwrap();
        let region = candle_core::Var::randn(0.0f32, 1.0, (3, 8), &Device::Cpu).unwrap();

        let out = aggregator.aggregate(region.as_tensor()).unwrap();
        let grads = out.sum_all().unwrap().backward().unwrap();

        assert!(grads.get(aggregator.queries().tensor()).is_some());
        assert!(grads.get(region.as_tensor()).is_some());
    }
}
