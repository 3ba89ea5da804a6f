//! Base model with the implicit-token aligner in front of it.

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use tracing::info;

use crate::aligner::{AlignerInput, ImplicitTokensAligner, RegionSpan};
use crate::config::{AlignerConfig, PromptConfig};
use crate::data::{collate_unlabeled, TokenizedBatch};
use crate::error::{Error, Result};
use crate::model::{load_into_varmap, load_safetensors, ModelFiles, Qwen3Config, Qwen3ForCausalLM};
use crate::tokenizer::TextTokenizer;

/// Output of one alignment forward pass.
#[derive(Debug, Clone)]
pub struct AlignmentOutput {
    /// Logits over the reassembled sequences [batch, new_len, vocab].
    pub logits: Tensor,
    /// Masked LM loss (labeled batches only).
    pub loss: Option<Tensor>,
    /// Attention mask of the reassembled sequences [batch, new_len].
    pub attention_mask: Tensor,
    /// Region located in each example.
    pub spans: Vec<Option<RegionSpan>>,
}

/// Causal LM whose reasoning regions are replaced by implicit tokens.
pub struct AlignmentModel<T> {
    base: Qwen3ForCausalLM,
    aligner: ImplicitTokensAligner,
    tokenizer: T,
}

impl<T: TextTokenizer> AlignmentModel<T> {
    /// Wires a base model and tokenizer to a new aligner.
    ///
    /// # Arguments
    ///
    /// * `base` - Base causal LM
    /// * `tokenizer` - Tokenizer of the base model; must know both region tags
    /// * `config` - Aligner hyperparameters
    /// * `prompt` - Prompt layout (region tag strings)
    /// * `vb` - VarBuilder for the aligner parameters
    pub fn new(
        base: Qwen3ForCausalLM,
        tokenizer: T,
        config: &AlignerConfig,
        prompt: &PromptConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        let open_id = tokenizer.convert_tokens_to_ids(&prompt.think_open)?;
        let close_id = tokenizer.convert_tokens_to_ids(&prompt.think_close)?;
        let aligner = ImplicitTokensAligner::new(config, base.hidden_size(), open_id, close_id, vb)?;
        Ok(Self {
            base,
            aligner,
            tokenizer,
        })
    }

    pub fn base(&self) -> &Qwen3ForCausalLM {
        &self.base
    }

    pub fn aligner(&self) -> &ImplicitTokensAligner {
        &self.aligner
    }

    pub fn tokenizer(&self) -> &T {
        &self.tokenizer
    }

    pub fn device(&self) -> &Device {
        self.base.device()
    }

    /// Embedding of the pad token [hidden_size], used to fill padded rows.
    fn pad_embedding(&self) -> Result<Tensor> {
        let pad = Tensor::new(&[[self.tokenizer.pad_token_id()]], self.device())?;
        let hidden = self.base.hidden_size();
        Ok(self.base.embed(&pad)?.reshape(hidden)?.detach())
    }

    /// Forward pass over a collated batch.
    pub fn forward_tokenized(&self, batch: &TokenizedBatch) -> Result<AlignmentOutput> {
        let embeddings = self.base.embed(&batch.input_ids)?;
        let pad_embedding = self.pad_embedding()?;
        let aligned = self.aligner.forward(
            AlignerInput {
                embeddings: &embeddings,
                input_ids: &batch.input_ids,
                attention_mask: &batch.attention_mask,
                labels: batch.labels.as_ref(),
            },
            &pad_embedding,
        )?;

        let output = self.base.forward_embeds(
            &aligned.embeddings,
            Some(&aligned.attention_mask),
            aligned.labels.as_ref(),
        )?;
        Ok(AlignmentOutput {
            logits: output.logits,
            loss: output.loss,
            attention_mask: aligned.attention_mask,
            spans: aligned.spans,
        })
    }

    /// Tokenizes raw texts (no special tokens) and runs an unlabeled pass.
    pub fn forward_text(&self, texts: &[&str]) -> Result<AlignmentOutput> {
        let sequences = texts
            .iter()
            .map(|text| self.tokenizer.encode(text))
            .collect::<Result<Vec<_>>>()?;
        let batch = collate_unlabeled(&sequences, self.tokenizer.pad_token_id(), self.device())?;
        self.forward_tokenized(&batch)
    }
}

/// Loads the base model, trainable (backed by a `VarMap`) or frozen (memory-mapped).
pub fn load_base_model(
    files: &ModelFiles,
    config: &Qwen3Config,
    trainable: bool,
    dtype: DType,
    device: &Device,
) -> Result<(Qwen3ForCausalLM, Option<VarMap>)> {
    if !trainable {
        let vb = load_safetensors(&files.weights, dtype, device)?;
        return Ok((Qwen3ForCausalLM::new(config, vb)?, None));
    }

    let varmap = VarMap::new();
    let model = Qwen3ForCausalLM::new(config, VarBuilder::from_varmap(&varmap, dtype, device))?;
    let loaded = load_into_varmap(&files.weights, &varmap, device)?;
    if loaded == 0 {
        return Err(Error::ModelLoad("no base model weights matched the architecture".into()));
    }
    info!("loaded {loaded} trainable base tensors");
    Ok((model, Some(varmap)))
}
