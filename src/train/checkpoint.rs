//! Trainable parameters and their checkpoints.
//!
//! A checkpoint directory holds `aligner.safetensors` and, when the base
//! model is trained too, `model.safetensors` with HuggingFace tensor names.

use std::fs;
use std::path::Path;

use candle_core::Var;
use candle_nn::VarMap;
use tracing::info;

use crate::aligner::AlignerWeights;
use crate::error::{Error, Result};

pub const ALIGNER_FILE: &str = "aligner.safetensors";
pub const BASE_FILE: &str = "model.safetensors";

/// Aligner weights plus the (optional) trainable base model weights.
#[derive(Clone)]
pub struct ParameterStore {
    aligner: AlignerWeights,
    base: Option<VarMap>,
}

impl ParameterStore {
    pub fn new(aligner: AlignerWeights, base: Option<VarMap>) -> Self {
        Self { aligner, base }
    }

    pub fn aligner(&self) -> &AlignerWeights {
        &self.aligner
    }

    pub fn base(&self) -> Option<&VarMap> {
        self.base.as_ref()
    }

    /// Variables updated by the optimizer.
    pub fn trainable_vars(&self) -> Vec<Var> {
        let mut vars = self.aligner.all_vars();
        if let Some(base) = &self.base {
            vars.extend(base.all_vars());
        }
        vars
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        self.aligner.save(&dir.join(ALIGNER_FILE))?;
        if let Some(base) = &self.base {
            base.save(dir.join(BASE_FILE))?;
        }
        info!("saved checkpoint to {}", dir.display());
        Ok(())
    }

    /// Overwrites the current values from a checkpoint directory.
    pub fn load(&mut self, dir: &Path) -> Result<()> {
        self.aligner.load(&dir.join(ALIGNER_FILE))?;
        if let Some(base) = self.base.as_mut() {
            let path = dir.join(BASE_FILE);
            if !path.is_file() {
                return Err(Error::ModelLoad(format!(
                    "checkpoint {} has no base model weights",
                    dir.display()
                )));
            }
            base.load(path)?;
        }
        Ok(())
    }
}
