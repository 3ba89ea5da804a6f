//! Integration tests for model loading.

mod common;

use candle_core::DType;
use candle_nn::{VarBuilder, VarMap};
use implicit_tokens::model::{load_config, load_into_varmap, resolve_model, Qwen3Config, Qwen3ForCausalLM};
use implicit_tokens::Error;

use common::{test_device, tiny_config, tiny_model};

#[test]
fn test_parse_qwen3_config() {
    let json = r#"{
        "vocab_size": 151936,
        "hidden_size": 1024,
        "intermediate_size": 3072,
        "num_hidden_layers": 28,
        "num_attention_heads": 16,
        "num_key_value_heads": 8,
        "head_dim": 128,
        "rms_norm_eps": 1e-6,
        "rope_theta": 1000000.0,
        "max_position_embeddings": 40960,
        "tie_word_embeddings": true
    }"#;

    let config: Qwen3Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.vocab_size, 151936);
    assert_eq!(config.hidden_size, 1024);
    assert_eq!(config.num_hidden_layers, 28);
    assert_eq!(config.num_attention_heads, 16);
    assert_eq!(config.num_key_value_heads, 8);
    assert!(config.tie_word_embeddings);
}

#[test]
fn test_config_with_defaults() {
    // Minimal config - defaults should fill in
    let json = r#"{
        "vocab_size": 151936,
        "hidden_size": 1024,
        "intermediate_size": 3072,
        "num_hidden_layers": 28,
        "num_attention_heads": 16,
        "num_key_value_heads": 8
    }"#;

    let config: Qwen3Config = serde_json::from_str(json).unwrap();

    assert_eq!(config.head_dim, 128);
    assert_eq!(config.rms_norm_eps, 1e-6);
    assert_eq!(config.rope_theta, 1000000.0);
    assert_eq!(config.max_position_embeddings, 40960);
    assert!(config.tie_word_embeddings);
}

#[test]
fn test_load_config_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, serde_json::to_string(&tiny_config()).unwrap()).unwrap();

    let config = load_config(&path).unwrap();

    assert_eq!(config.hidden_size, 32);
    assert_eq!(config.head_dim, 8);
}

#[test]
fn test_load_config_invalid_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(load_config(&path), Err(Error::ModelLoad(_))));
}

#[test]
fn test_local_model_directory() {
    let dir = tempfile::tempdir().unwrap();
    let (_, varmap) = tiny_model();
    std::fs::write(
        dir.path().join("config.json"),
        serde_json::to_string(&tiny_config()).unwrap(),
    )
    .unwrap();
    varmap.save(dir.path().join("model.safetensors")).unwrap();

    // tokenizer.json is still missing.
    let missing = resolve_model(dir.path().to_str().unwrap(), "main");
    assert!(matches!(missing, Err(Error::ModelLoad(_))));

    std::fs::write(dir.path().join("tokenizer.json"), "{}").unwrap();
    let files = resolve_model(dir.path().to_str().unwrap(), "main").unwrap();
    assert_eq!(files.weights, vec![dir.path().join("model.safetensors")]);
    assert_eq!(files.config, dir.path().join("config.json"));
}

#[test]
fn test_load_into_varmap_copies_weights() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("model.safetensors");
    let (source, source_vars) = tiny_model();
    source_vars.save(&path).unwrap();

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &test_device());
    let target = Qwen3ForCausalLM::new(&tiny_config(), vb).unwrap();
    let loaded = load_into_varmap(&[path], &varmap, &test_device()).unwrap();

    assert_eq!(loaded, source_vars.all_vars().len());
    let embeddings = |m: &Qwen3ForCausalLM| {
        m.model()
            .embed_tokens()
            .embeddings()
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap()
    };
    assert_eq!(embeddings(&target), embeddings(&source));
}
