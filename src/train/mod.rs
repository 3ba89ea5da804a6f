//! Joint training of the aligner and the base model.

pub mod alignment;
pub mod checkpoint;
pub mod trainer;

pub use alignment::{load_base_model, AlignmentModel, AlignmentOutput};
pub use checkpoint::{ParameterStore, ALIGNER_FILE, BASE_FILE};
pub use trainer::{Trainer, TrainingSummary, BEST_DIR, SUMMARY_FILE};
