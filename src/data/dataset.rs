//! Tabular datasets of JSON records.
//!
//! A [`Dataset`] is a list of JSON objects sharing one set of fields. On
//! disk it is a directory holding `dataset_info.json` and `data.jsonl`; a
//! [`DatasetDict`] directory holds `dataset_dict.json` plus one dataset
//! directory per split.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use hf_hub::{api::sync::Api, Repo, RepoType};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{Error, Result};

const INFO_FILE: &str = "dataset_info.json";
const DATA_FILE: &str = "data.jsonl";
const DICT_FILE: &str = "dataset_dict.json";

/// Source problem with its reference solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProblemRecord {
    pub problem: String,
    pub solution: String,
}

/// Problem with a generated reasoning trajectory and final answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CotRecord {
    pub problem: String,
    pub solution: String,
    /// Reasoning text found between the think tags.
    pub logic_trajectory: String,
    pub answer: String,
}

impl CotRecord {
    /// Field names of a serialized record.
    pub const FIELDS: [&'static str; 4] = ["problem", "solution", "logic_trajectory", "answer"];
}

#[derive(Debug, Serialize, Deserialize)]
struct DatasetInfo {
    features: Vec<String>,
    num_rows: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct DatasetDictInfo {
    splits: Vec<String>,
}

/// Ordered collection of JSON records with a fixed field set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    features: Vec<String>,
    rows: Vec<Map<String, Value>>,
}

impl Dataset {
    /// Builds a dataset from JSON objects; every row must have the same fields.
    pub fn from_rows(rows: Vec<Map<String, Value>>) -> Result<Self> {
        let features: Vec<String> = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        for row in &rows {
            let fields: Vec<String> = row.keys().cloned().collect();
            if !same_fields(&features, &fields) {
                return Err(Error::SchemaMismatch {
                    left: features,
                    right: fields,
                });
            }
        }
        Ok(Self { features, rows })
    }

    /// Serializes typed records into a dataset.
    pub fn from_records<T: Serialize>(records: &[T]) -> Result<Self> {
        let rows = records
            .iter()
            .map(|record| match serde_json::to_value(record)? {
                Value::Object(map) => Ok(map),
                other => Err(Error::Config(format!(
                    "dataset records must be JSON objects, got {other}"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_rows(rows)
    }

    /// Like [`Dataset::from_records`], but an empty slice still yields the
    /// given field set, so an empty shard can be merged with full ones later.
    pub fn from_records_with_features<T: Serialize>(records: &[T], features: &[&str]) -> Result<Self> {
        let expected: Vec<String> = features.iter().map(|f| f.to_string()).collect();
        if records.is_empty() {
            return Ok(Self {
                features: expected,
                rows: Vec::new(),
            });
        }
        let dataset = Self::from_records(records)?;
        if !same_fields(&expected, &dataset.features) {
            return Err(Error::SchemaMismatch {
                left: expected,
                right: dataset.features,
            });
        }
        Ok(dataset)
    }

    /// Deserializes every row into `T`.
    pub fn records<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        self.rows
            .iter()
            .map(|row| Ok(serde_json::from_value(Value::Object(row.clone()))?))
            .collect()
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn rows(&self) -> &[Map<String, Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows in `range`.
    pub fn select(&self, range: Range<usize>) -> Result<Self> {
        if range.start > range.end || range.end > self.len() {
            return Err(Error::Config(format!(
                "selection {}..{} out of bounds for {} rows",
                range.start,
                range.end,
                self.len()
            )));
        }
        Ok(Self {
            features: self.features.clone(),
            rows: self.rows[range].to_vec(),
        })
    }

    /// Appends datasets in order. All must share one field set.
    pub fn concatenate(datasets: &[Dataset]) -> Result<Self> {
        let first = datasets
            .first()
            .ok_or_else(|| Error::Config("nothing to concatenate".to_string()))?;
        for other in &datasets[1..] {
            if !same_fields(&first.features, &other.features) {
                return Err(Error::SchemaMismatch {
                    left: first.features.clone(),
                    right: other.features.clone(),
                });
            }
        }
        let rows = datasets.iter().flat_map(|d| d.rows.iter().cloned()).collect();
        Ok(Self {
            features: first.features.clone(),
            rows,
        })
    }

    /// Shuffles and splits into `train` and `test`.
    ///
    /// The test split gets `ceil(len * test_size)` rows; both splits must
    /// end up non-empty.
    pub fn train_test_split(&self, test_size: f64, seed: u64) -> Result<DatasetDict> {
        if !(test_size > 0.0 && test_size < 1.0) {
            return Err(Error::Config(format!(
                "test_size must be in (0, 1), got {test_size}"
            )));
        }
        let n_test = (self.len() as f64 * test_size).ceil() as usize;
        let n_train = self.len().saturating_sub(n_test);
        if n_test == 0 || n_train == 0 {
            return Err(Error::Config(format!(
                "cannot split {} rows with test_size {test_size}",
                self.len()
            )));
        }

        let mut indices: Vec<usize> = (0..self.len()).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);

        let take = |ids: &[usize]| Self {
            features: self.features.clone(),
            rows: ids.iter().map(|&i| self.rows[i].clone()).collect(),
        };
        debug!("dataset split: {n_train} train, {n_test} test");

        let mut dict = DatasetDict::new();
        dict.insert("train", take(&indices[..n_train]));
        dict.insert("test", take(&indices[n_train..]));
        Ok(dict)
    }

    /// Writes the dataset into `dir` (created if missing).
    pub fn save_to_disk(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let info = DatasetInfo {
            features: self.features.clone(),
            num_rows: self.len(),
        };
        fs::write(dir.join(INFO_FILE), serde_json::to_string_pretty(&info)?)?;

        let mut writer = BufWriter::new(File::create(dir.join(DATA_FILE))?);
        for row in &self.rows {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Reads a dataset written by [`Dataset::save_to_disk`].
    pub fn load_from_disk(dir: &Path) -> Result<Self> {
        let info: DatasetInfo = serde_json::from_str(&fs::read_to_string(dir.join(INFO_FILE))?)?;
        let mut dataset = Self::from_jsonl(&dir.join(DATA_FILE))?;
        if dataset.len() != info.num_rows {
            return Err(Error::Config(format!(
                "{} declares {} rows but holds {}",
                dir.display(),
                info.num_rows,
                dataset.len()
            )));
        }
        if dataset.is_empty() {
            dataset.features = info.features;
        }
        Ok(dataset)
    }

    /// Reads one JSON object per non-empty line.
    pub fn from_jsonl(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut rows = Vec::new();
        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(&line)? {
                Value::Object(map) => rows.push(map),
                _ => {
                    return Err(Error::Config(format!(
                        "line {} of {} is not a JSON object",
                        line_num + 1,
                        path.display()
                    )))
                }
            }
        }
        Self::from_rows(rows)
    }

    /// True when `dir` looks like a saved dataset.
    pub fn is_dataset_dir(dir: &Path) -> bool {
        dir.join(INFO_FILE).is_file()
    }
}

fn same_fields(left: &[String], right: &[String]) -> bool {
    left.iter().collect::<BTreeSet<_>>() == right.iter().collect::<BTreeSet<_>>()
}

/// Named splits of datasets.
#[derive(Debug, Clone, Default)]
pub struct DatasetDict {
    splits: BTreeMap<String, Dataset>,
}

impl DatasetDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, dataset: Dataset) {
        self.splits.insert(name.to_string(), dataset);
    }

    /// Looks up a split by name.
    pub fn split(&self, name: &str) -> Result<&Dataset> {
        self.splits
            .get(name)
            .ok_or_else(|| Error::MissingSplit(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.splits.keys().map(String::as_str)
    }

    pub fn save_to_disk(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        let info = DatasetDictInfo {
            splits: self.splits.keys().cloned().collect(),
        };
        fs::write(dir.join(DICT_FILE), serde_json::to_string_pretty(&info)?)?;
        for (name, dataset) in &self.splits {
            dataset.save_to_disk(&dir.join(name))?;
        }
        Ok(())
    }

    pub fn load_from_disk(dir: &Path) -> Result<Self> {
        let info: DatasetDictInfo = serde_json::from_str(&fs::read_to_string(dir.join(DICT_FILE))?)?;
        let mut dict = Self::new();
        for name in &info.splits {
            dict.insert(name, Dataset::load_from_disk(&dir.join(name))?);
        }
        Ok(dict)
    }
}

/// Loads problems from a JSONL file or a saved dataset directory.
pub fn load_problems(path: &Path) -> Result<Vec<ProblemRecord>> {
    let dataset = if path.is_dir() {
        Dataset::load_from_disk(path)?
    } else {
        Dataset::from_jsonl(path)?
    };
    info!("loaded {} problems from {}", dataset.len(), path.display());
    dataset.records()
}

/// Downloads a JSONL file from a HuggingFace dataset repository.
///
/// # Arguments
///
/// * `repo_id` - Dataset repository (e.g. "org/name")
/// * `filename` - File inside the repository
pub fn download_problems(repo_id: &str, filename: &str) -> Result<PathBuf> {
    let api = Api::new().map_err(|e| Error::ModelLoad(format!("Failed to create HF API: {e}")))?;
    let repo = api.repo(Repo::new(repo_id.to_string(), RepoType::Dataset));
    repo.get(filename)
        .map_err(|e| Error::ModelLoad(format!("Failed to download {filename} from {repo_id}: {e}")))
}
