//! Data pipeline: datasets, prompts, label masking, batching and
//! trajectory generation.

pub mod collate;
pub mod dataset;
pub mod generate;
pub mod labels;
pub mod prompt;

pub use collate::{collate, collate_unlabeled, TokenizedBatch};
pub use dataset::{download_problems, load_problems, CotRecord, Dataset, DatasetDict, ProblemRecord};
pub use generate::{parse_generation, validate_output, GenerationStats, TextGenerator, TrajectoryCollector};
pub use labels::{build_labels, label_records, prepare_example, LabeledExample, PreparedExample};
pub use prompt::PromptTemplate;
