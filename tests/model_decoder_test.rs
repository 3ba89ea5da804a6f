//! Integration tests for Qwen3DecoderLayer.

mod common;

use candle_core::{DType, Tensor};
use candle_nn::{VarBuilder, VarMap};
use implicit_tokens::model::{LayerCache, Qwen3DecoderLayer, RotaryEmbedding};

use common::{test_device, tiny_config};

fn build_layer(varmap: &VarMap) -> Qwen3DecoderLayer {
    let config = tiny_config();
    let device = test_device();
    let rotary = RotaryEmbedding::new(config.head_dim, 64, config.rope_theta, DType::F32, &device).unwrap();
    let vb = VarBuilder::from_varmap(varmap, DType::F32, &device);
    Qwen3DecoderLayer::new(&config, rotary, vb.pp("layers.0")).unwrap()
}

#[test]
fn test_decoder_layer_creation() {
    let varmap = VarMap::new();
    let layer = build_layer(&varmap);

    assert_eq!(layer.self_attn().num_heads(), 4);
    assert_eq!(layer.mlp().intermediate_size(), 64);

    let names: Vec<String> = varmap.data().lock().unwrap().keys().cloned().collect();
    assert!(names.contains(&"layers.0.self_attn.q_norm.weight".to_string()));
    assert!(names.contains(&"layers.0.post_attention_layernorm.weight".to_string()));
    assert!(names.contains(&"layers.0.mlp.gate_proj.weight".to_string()));
}

#[test]
fn test_decoder_layer_forward_shape() {
    let varmap = VarMap::new();
    let layer = build_layer(&varmap);
    let x = Tensor::randn(0.0f32, 0.1, (2, 6, 32), &test_device()).unwrap();

    let output = layer.forward(&x, 0, None, None).unwrap();

    assert_eq!(output.dims(), &[2, 6, 32]);
}

#[test]
fn test_decoder_layer_with_kv_cache() {
    let varmap = VarMap::new();
    let layer = build_layer(&varmap);
    let device = test_device();
    let mut cache = LayerCache::default();

    let prompt = Tensor::randn(0.0f32, 0.1, (1, 4, 32), &device).unwrap();
    layer.forward(&prompt, 0, Some(&mut cache), None).unwrap();
    let next = Tensor::randn(0.0f32, 0.1, (1, 1, 32), &device).unwrap();
    let output = layer.forward(&next, 4, Some(&mut cache), None).unwrap();

    assert_eq!(output.dims(), &[1, 1, 32]);
    assert_eq!(cache.seq_len(), 5);
}

#[test]
fn test_decoder_layer_residual() {
    let varmap = VarMap::new();
    let layer = build_layer(&varmap);
    // Zeroing every projection leaves only the residual path.
    for var in varmap.all_vars() {
        if var.rank() == 2 {
            var.set(&var.zeros_like().unwrap()).unwrap();
        }
    }
    let x = Tensor::randn(0.0f32, 1.0, (1, 3, 32), &test_device()).unwrap();

    let output = layer.forward(&x, 0, None, None).unwrap();

    let diff = (output - &x).unwrap().abs().unwrap().max_all().unwrap();
    assert!(diff.to_scalar::<f32>().unwrap() < 1e-6);
}
