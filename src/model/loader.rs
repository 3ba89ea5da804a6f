//! Base model files and weights.
//!
//! - Resolving a model from the HuggingFace Hub or a local directory
//! - Parsing `config.json`
//! - Frozen weights via memory-mapped SafeTensors
//! - Trainable weights copied into a `VarMap`

use std::path::{Path, PathBuf};

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use hf_hub::{api::sync::Api, Repo, RepoType};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Paths of a model's files.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    /// config.json
    pub config: PathBuf,
    /// SafeTensors weight shards.
    pub weights: Vec<PathBuf>,
    /// tokenizer.json
    pub tokenizer: PathBuf,
}

/// Resolves `model` as a local directory if it exists, else as a Hub model ID.
pub fn resolve_model(model: &str, revision: &str) -> Result<ModelFiles> {
    let dir = Path::new(model);
    if dir.is_dir() {
        local_model(dir)
    } else {
        download_model(model, revision)
    }
}

/// Downloads model files from the HuggingFace Hub.
///
/// # Arguments
///
/// * `model_id` - Model ID (e.g., "Qwen/Qwen3-0.6B")
/// * `revision` - Branch, tag, or commit ("main" for latest)
pub fn download_model(model_id: &str, revision: &str) -> Result<ModelFiles> {
    let api = Api::new().map_err(|e| Error::ModelLoad(format!("Failed to create HF API: {e}")))?;
    let repo = api.repo(Repo::with_revision(
        model_id.to_string(),
        RepoType::Model,
        revision.to_string(),
    ));
    let fetch = |name: &str| {
        repo.get(name)
            .map_err(|e| Error::ModelLoad(format!("Failed to download {name}: {e}")))
    };

    let config = fetch("config.json")?;
    let tokenizer = fetch("tokenizer.json")?;
    let weights = match repo.get("model.safetensors") {
        Ok(path) => vec![path],
        Err(_) => {
            let index = fetch("model.safetensors.index.json")?;
            shard_names(&index)?
                .iter()
                .map(|name| fetch(name.as_str()))
                .collect::<Result<Vec<_>>>()?
        }
    };

    info!("resolved {model_id}@{revision} ({} weight files)", weights.len());
    Ok(ModelFiles {
        config,
        weights,
        tokenizer,
    })
}

fn local_model(dir: &Path) -> Result<ModelFiles> {
    let index = dir.join("model.safetensors.index.json");
    let weights = if index.is_file() {
        shard_names(&index)?.iter().map(|name| dir.join(name)).collect()
    } else {
        vec![dir.join("model.safetensors")]
    };
    let files = ModelFiles {
        config: dir.join("config.json"),
        weights,
        tokenizer: dir.join("tokenizer.json"),
    };
    for path in files.weights.iter().chain([&files.config, &files.tokenizer]) {
        if !path.is_file() {
            return Err(Error::ModelLoad(format!("missing model file {}", path.display())));
        }
    }
    Ok(files)
}

/// Unique shard file names listed in a SafeTensors index.
fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(index_path)
        .map_err(|e| Error::ModelLoad(format!("Failed to read safetensors index: {e}")))?;
    let index: serde_json::Value = serde_json::from_str(&content)
        .map_err(|e| Error::ModelLoad(format!("Failed to parse safetensors index: {e}")))?;
    let weight_map = index["weight_map"]
        .as_object()
        .ok_or_else(|| Error::ModelLoad("Invalid safetensors index: missing weight_map".into()))?;

    let mut shards: Vec<String> = weight_map
        .values()
        .filter_map(|v| v.as_str())
        .map(str::to_string)
        .collect();
    shards.sort();
    shards.dedup();
    Ok(shards)
}

/// Memory-maps SafeTensors files into a read-only VarBuilder.
///
/// # Safety
///
/// The files must not be modified while mapped.
#[allow(unsafe_code)]
pub fn load_safetensors(paths: &[PathBuf], dtype: DType, device: &Device) -> Result<VarBuilder<'static>> {
    let vb = unsafe { VarBuilder::from_mmaped_safetensors(paths, dtype, device)? };
    Ok(vb)
}

/// Copies SafeTensors weights into variables already created in `varmap`.
///
/// Tensors the map does not hold are ignored; variables the files do not
/// cover keep their initialization and are reported. Returns the number of
/// variables loaded.
pub fn load_into_varmap(paths: &[PathBuf], varmap: &VarMap, device: &Device) -> Result<usize> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|e| Error::ModelLoad(format!("variable map lock poisoned: {e}")))?;

    let mut loaded = 0;
    for path in paths {
        for (name, tensor) in candle_core::safetensors::load(path, device)? {
            if let Some(var) = vars.get(&name) {
                var.set(&tensor.to_dtype(var.dtype())?)?;
                loaded += 1;
            }
        }
    }
    if loaded < vars.len() {
        warn!(
            "{} of {} variables not found in checkpoint, keeping their initialization",
            vars.len() - loaded,
            vars.len()
        );
    }
    Ok(loaded)
}

/// Loads the Qwen3 configuration from config.json.
pub fn load_config(path: &Path) -> Result<Qwen3Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::ModelLoad(format!("Failed to read config.json: {e}")))?;
    serde_json::from_str(&content)
        .map_err(|e| Error::ModelLoad(format!("Failed to parse config.json: {e}")))
}

/// Qwen3 model configuration from HuggingFace config.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Qwen3Config {
    pub vocab_size: usize,
    pub hidden_size: usize,
    /// MLP inner dimension.
    pub intermediate_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    /// Key/value heads (grouped-query attention).
    pub num_key_value_heads: usize,
    #[serde(default = "default_head_dim")]
    pub head_dim: usize,
    #[serde(default = "default_rms_norm_eps")]
    pub rms_norm_eps: f64,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,
    #[serde(default = "default_max_position_embeddings")]
    pub max_position_embeddings: usize,
    /// LM head shares the embedding matrix.
    #[serde(default = "default_tie_word_embeddings")]
    pub tie_word_embeddings: bool,
}

fn default_head_dim() -> usize {
    128
}

fn default_rms_norm_eps() -> f64 {
    1e-6
}

fn default_rope_theta() -> f64 {
    1_000_000.0
}

fn default_max_position_embeddings() -> usize {
    40960
}

fn default_tie_word_embeddings() -> bool {
    true
}
