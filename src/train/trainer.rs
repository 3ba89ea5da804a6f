//! Training loop: AdamW over shuffled batches, per-epoch evaluation, best
//! checkpoint selection by eval loss.

use std::path::{Path, PathBuf};

use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::alignment::AlignmentModel;
use super::checkpoint::ParameterStore;
use crate::config::TrainingConfig;
use crate::data::{collate, LabeledExample};
use crate::error::{Error, Result};
use crate::tokenizer::TextTokenizer;

/// Sub-directory of the output directory holding the best checkpoint.
pub const BEST_DIR: &str = "best";
/// Final metrics written next to the checkpoints.
pub const SUMMARY_FILE: &str = "eval_results.json";

/// Metrics of a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs: usize,
    pub steps: usize,
    /// Mean training loss of each epoch.
    pub train_losses: Vec<f32>,
    /// Eval loss after each epoch.
    pub eval_losses: Vec<f32>,
    pub best_epoch: usize,
    pub best_eval_loss: f32,
}

/// Drives training of an [`AlignmentModel`].
pub struct Trainer {
    config: TrainingConfig,
    output_dir: PathBuf,
}

impl Trainer {
    pub fn new(config: TrainingConfig, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Trains, keeps the checkpoint with the lowest eval loss and reloads it
    /// into `params` before returning.
    ///
    /// # Arguments
    ///
    /// * `model` - Model whose trainable variables live in `params`
    /// * `params` - Trainable parameters (updated in place)
    /// * `train` - Training examples
    /// * `eval` - Evaluation examples
    pub fn train<T: TextTokenizer>(
        &self,
        model: &AlignmentModel<T>,
        params: &mut ParameterStore,
        train: &[LabeledExample],
        eval: &[LabeledExample],
    ) -> Result<TrainingSummary> {
        let c = &self.config;
        if train.is_empty() || eval.is_empty() {
            return Err(Error::Config(format!(
                "training needs examples in both splits (train {}, eval {})",
                train.len(),
                eval.len()
            )));
        }
        if c.batch_size == 0 || c.epochs == 0 {
            return Err(Error::Config("epochs and batch size must be positive".to_string()));
        }

        std::fs::create_dir_all(&self.output_dir)?;
        let vars = params.trainable_vars();
        info!(
            "training {} variables on {} examples ({} eval), {} epochs",
            vars.len(),
            train.len(),
            eval.len(),
            c.epochs
        );
        let mut optimizer = AdamW::new(
            vars,
            ParamsAdamW {
                lr: c.learning_rate,
                weight_decay: c.weight_decay,
                ..ParamsAdamW::default()
            },
        )?;

        let mut rng = StdRng::seed_from_u64(c.seed);
        let mut order: Vec<usize> = (0..train.len()).collect();
        let best_dir = self.output_dir.join(BEST_DIR);
        let mut summary = TrainingSummary {
            epochs: c.epochs,
            steps: 0,
            train_losses: Vec::with_capacity(c.epochs),
            eval_losses: Vec::with_capacity(c.epochs),
            best_epoch: 0,
            best_eval_loss: f32::INFINITY,
        };

        for epoch in 1..=c.epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;
            let mut window_loss = 0.0;
            let mut batches = 0;

            for chunk in order.chunks(c.batch_size) {
                let batch: Vec<LabeledExample> = chunk.iter().map(|&i| train[i].clone()).collect();
                let loss = self.batch_loss(model, &batch)?;
                optimizer.backward_step(&loss)?;

                let value = loss.to_scalar::<f32>()?;
                epoch_loss += value;
                window_loss += value;
                batches += 1;
                summary.steps += 1;
                if c.logging_steps > 0 && summary.steps % c.logging_steps == 0 {
                    info!(
                        "epoch {epoch} step {} loss {:.4}",
                        summary.steps,
                        window_loss / c.logging_steps as f32
                    );
                    window_loss = 0.0;
                }
            }
            summary.train_losses.push(epoch_loss / batches.max(1) as f32);

            let eval_loss = self.evaluate(model, eval)?;
            summary.eval_losses.push(eval_loss);
            info!("epoch {epoch}: eval loss {eval_loss:.4}");

            if eval_loss < summary.best_eval_loss {
                summary.best_eval_loss = eval_loss;
                summary.best_epoch = epoch;
                params.save(&best_dir)?;
                info!("new best checkpoint at epoch {epoch}");
            }
        }

        if summary.best_epoch > 0 {
            params.load(&best_dir)?;
            info!(
                "reloaded best checkpoint (epoch {}, eval loss {:.4})",
                summary.best_epoch, summary.best_eval_loss
            );
        }
        std::fs::write(
            self.output_dir.join(SUMMARY_FILE),
            serde_json::to_string_pretty(&summary)?,
        )?;
        Ok(summary)
    }

    /// Mean loss over `examples` in batches, without updating anything.
    pub fn evaluate<T: TextTokenizer>(
        &self,
        model: &AlignmentModel<T>,
        examples: &[LabeledExample],
    ) -> Result<f32> {
        let mut total = 0.0;
        let mut batches = 0;
        for batch in examples.chunks(self.config.batch_size.max(1)) {
            total += self.batch_loss(model, batch)?.to_scalar::<f32>()?;
            batches += 1;
        }
        debug!("evaluated {batches} batches");
        Ok(total / batches.max(1) as f32)
    }

    fn batch_loss<T: TextTokenizer>(
        &self,
        model: &AlignmentModel<T>,
        batch: &[LabeledExample],
    ) -> Result<candle_core::Tensor> {
        let pad_id = model.tokenizer().pad_token_id();
        let tokenized = collate(batch, pad_id, model.device())?;
        model
            .forward_tokenized(&tokenized)?
            .loss
            .ok_or_else(|| Error::Config("labeled batch produced no loss".to_string()))
    }
}
