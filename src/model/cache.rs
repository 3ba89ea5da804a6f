//! Key/value cache for incremental decoding.

use candle_core::{Result, Tensor};

/// Keys and values seen so far by one attention layer.
///
/// Both tensors are [batch, num_kv_heads, seq_len, head_dim].
#[derive(Debug, Clone, Default)]
pub struct LayerCache {
    kv: Option<(Tensor, Tensor)>,
}

impl LayerCache {
    /// Appends new keys/values and returns the full sequence.
    pub fn append(&mut self, k: &Tensor, v: &Tensor) -> Result<(Tensor, Tensor)> {
        let (k, v) = match &self.kv {
            Some((k_cache, v_cache)) => (
                Tensor::cat(&[k_cache, k], 2)?,
                Tensor::cat(&[v_cache, v], 2)?,
            ),
            None => (k.clone(), v.clone()),
        };
        self.kv = Some((k.clone(), v.clone()));
        Ok((k, v))
    }

    pub fn seq_len(&self) -> usize {
        self.kv.as_ref().map_or(0, |(k, _)| k.dims()[2])
    }
}

/// Per-layer caches of a whole model.
#[derive(Debug, Clone)]
pub struct KvCache {
    layers: Vec<LayerCache>,
}

impl KvCache {
    pub fn new(num_layers: usize) -> Self {
        Self {
            layers: vec![LayerCache::default(); num_layers],
        }
    }

    /// Number of cached positions.
    pub fn seq_len(&self) -> usize {
        self.layers.first().map_or(0, LayerCache::seq_len)
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    pub fn layers_mut(&mut self) -> &mut [LayerCache] {
        &mut self.layers
    }

    pub fn reset(&mut self) {
        self.layers.iter_mut().for_each(|l| *l = LayerCache::default());
    }
}
