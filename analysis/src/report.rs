use crate::validate::{self, ValidationError};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    io::BufReader,
    path::Path,
};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to access the result file")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode the result document")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// One full benchmarking session over a group of storage backends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkSet {
    pub name: String,
    pub description: String,
    pub uuid: Uuid,
    pub benchmarks: Vec<Benchmark>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Benchmark {
    pub name: String,
    pub description: String,
    pub uuid: Uuid,
    pub success: bool,
    pub db_factory: DbFactoryConfig,
    pub benchmark_config: BenchmarkConfig,
    pub sizes: Sizes,
    pub result: BenchmarkResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_results: Option<AverageResults>,
}

/// Reference to the factory that builds the storage adapter under test.
/// The module/name pair is resolved against the runner's factory registry,
/// never against live module paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DbFactoryConfig {
    pub uri: String,
    #[serde(default = "default_factory_module")]
    pub factory_module: String,
    #[serde(default = "default_factory")]
    pub factory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BenchmarkConfig {
    pub context_num: u64,
    pub from_dialog_len: u64,
    pub to_dialog_len: u64,
    pub step_dialog_len: u64,
    pub message_dimensions: Vec<u64>,
    pub misc_dimensions: Vec<u64>,
}

impl BenchmarkConfig {
    /// Every dialog length a benchmark visits, in increasing order:
    /// `[from_dialog_len, to_dialog_len)` stepped by `step_dialog_len`.
    ///
    /// Callers are expected to have run the config through preflight;
    /// a zero step is rejected there.
    pub fn dialog_lengths(&self) -> Vec<u64> {
        (self.from_dialog_len..self.to_dialog_len)
            .step_by(self.step_dialog_len as usize)
            .collect()
    }

    /// The largest dialog length actually visited (strictly below
    /// `to_dialog_len`).
    pub fn final_dialog_len(&self) -> u64 {
        self.dialog_lengths()
            .last()
            .copied()
            .unwrap_or(self.from_dialog_len)
    }
}

/// Serialized byte sizes measured once per benchmark during sizing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Sizes {
    pub starting_context_size: u64,
    pub final_context_size: u64,
    pub misc_size: u64,
    pub message_size: u64,
}

impl Sizes {
    /// Schema floor for a benchmark that failed before sizing finished.
    pub fn minimal() -> Self {
        Self {
            starting_context_size: 1,
            final_context_size: 1,
            misc_size: 1,
            message_size: 1,
        }
    }
}

/// Raw timings on success, a failure description otherwise. Serialized
/// untagged so the document carries either an object or a plain string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BenchmarkResult {
    Timings(RawTimings),
    Failure(String),
}

/// Timing series indexed by context identity; read/update values are keyed
/// by the dialog length at which they were measured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTimings {
    pub write_times: Vec<f64>,
    pub read_times: Vec<BTreeMap<u64, f64>>,
    pub update_times: Vec<BTreeMap<u64, f64>>,
}

impl RawTimings {
    pub fn with_capacity(context_num: usize) -> Self {
        Self {
            write_times: Vec::with_capacity(context_num),
            read_times: Vec::with_capacity(context_num),
            update_times: Vec::with_capacity(context_num),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageResults {
    pub average_write_time: f64,
    pub average_read_time: f64,
    pub average_update_time: f64,
    pub read_times_grouped_by_context_num: Vec<f64>,
    pub read_times_grouped_by_dialog_len: BTreeMap<u64, f64>,
    pub update_times_grouped_by_context_num: Vec<f64>,
    pub update_times_grouped_by_dialog_len: BTreeMap<u64, f64>,
    pub pretty_write: f64,
    pub pretty_read: f64,
    pub pretty_update: f64,
    #[serde(rename = "pretty_read+update")]
    pub pretty_read_update: f64,
}

impl BenchmarkSet {
    pub fn new(name: String, description: String, benchmarks: Vec<Benchmark>) -> Self {
        Self {
            name,
            description,
            uuid: Uuid::new_v4(),
            benchmarks,
        }
    }
}

/// Validate `set` against the output contract and write it as JSON.
/// Refuses to overwrite an existing file unless `exist_ok` is set;
/// nothing is written when validation fails.
pub fn save_to_file(set: &BenchmarkSet, path: &Path, exist_ok: bool) -> Result<(), ReportError> {
    validate::validate_set(set)?;

    let file = if exist_ok {
        File::create(path)?
    } else {
        OpenOptions::new().write(true).create_new(true).open(path)?
    };
    serde_json::to_writer(file, set)?;

    info!(
        path = %path.display(),
        benchmarks = set.benchmarks.len(),
        "Saved benchmark set"
    );

    Ok(())
}

/// Read a benchmark set back and validate it against the contract.
pub fn load_from_file(path: &Path) -> Result<BenchmarkSet, ReportError> {
    let reader = BufReader::new(File::open(path)?);
    let set: BenchmarkSet = serde_json::from_reader(reader)?;
    validate::validate_set(&set)?;

    Ok(set)
}

/// Registry entry configs fall back to: the runner's own scheme-dispatching
/// factory.
pub const DEFAULT_FACTORY_MODULE: &str = "ctxbench_runner::storage";
pub const DEFAULT_FACTORY: &str = "storage_factory";

fn default_factory_module() -> String {
    DEFAULT_FACTORY_MODULE.to_owned()
}

fn default_factory() -> String {
    DEFAULT_FACTORY.to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings() -> RawTimings {
        RawTimings {
            write_times: vec![0.5, 0.25],
            read_times: vec![
                BTreeMap::from([(0, 0.125), (2, 0.25)]),
                BTreeMap::from([(0, 0.5), (2, 0.75)]),
            ],
            update_times: vec![
                BTreeMap::from([(0, 0.1), (2, 0.2)]),
                BTreeMap::from([(0, 0.3), (2, 0.4)]),
            ],
        }
    }

    fn benchmark(result: BenchmarkResult) -> Benchmark {
        let success = matches!(result, BenchmarkResult::Timings(_));
        let average_results = match &result {
            BenchmarkResult::Timings(raw) => Some(crate::aggregate::averages(raw)),
            BenchmarkResult::Failure(_) => None,
        };

        Benchmark {
            name: "memory".to_owned(),
            description: String::new(),
            uuid: Uuid::new_v4(),
            success,
            db_factory: DbFactoryConfig {
                uri: "memory://".to_owned(),
                factory_module: default_factory_module(),
                factory: default_factory(),
            },
            benchmark_config: BenchmarkConfig {
                context_num: 2,
                from_dialog_len: 0,
                to_dialog_len: 4,
                step_dialog_len: 2,
                message_dimensions: vec![2, 2],
                misc_dimensions: vec![1],
            },
            sizes: Sizes {
                starting_context_size: 50,
                final_context_size: 500,
                misc_size: 10,
                message_size: 20,
            },
            result,
            average_results,
        }
    }

    fn set() -> BenchmarkSet {
        BenchmarkSet::new(
            "test set".to_owned(),
            "round trip fixture".to_owned(),
            vec![
                benchmark(BenchmarkResult::Timings(timings())),
                benchmark(BenchmarkResult::Failure("connection refused".to_owned())),
            ],
        )
    }

    #[test]
    fn dialog_lengths_cover_stepped_range() {
        let config = BenchmarkConfig {
            context_num: 2,
            from_dialog_len: 0,
            to_dialog_len: 4,
            step_dialog_len: 2,
            message_dimensions: vec![],
            misc_dimensions: vec![],
        };

        assert_eq!(config.dialog_lengths(), vec![0, 2]);
        assert_eq!(config.final_dialog_len(), 2);
    }

    #[test]
    fn dialog_lengths_exclude_upper_bound() {
        let config = BenchmarkConfig {
            context_num: 1,
            from_dialog_len: 300,
            to_dialog_len: 311,
            step_dialog_len: 5,
            message_dimensions: vec![],
            misc_dimensions: vec![],
        };

        assert_eq!(config.dialog_lengths(), vec![300, 305, 310]);
    }

    #[test]
    fn result_roundtrips_as_untagged_union() {
        let ok = serde_json::to_value(BenchmarkResult::Timings(timings())).unwrap();
        assert!(ok.is_object());
        assert!(matches!(
            serde_json::from_value(ok).unwrap(),
            BenchmarkResult::Timings(_)
        ));

        let failed =
            serde_json::to_value(BenchmarkResult::Failure("io error".to_owned())).unwrap();
        assert!(failed.is_string());
        assert!(matches!(
            serde_json::from_value(failed).unwrap(),
            BenchmarkResult::Failure(_)
        ));
    }

    #[test]
    fn summed_pretty_field_keeps_its_wire_name() {
        let raw = serde_json::to_string(&crate::aggregate::averages(&timings())).unwrap();

        assert!(raw.contains("\"pretty_read+update\""));
        assert!(!raw.contains("pretty_read_update"));
    }

    #[test]
    fn dialog_len_keys_become_json_strings() {
        let value = serde_json::to_value(timings()).unwrap();
        let keys: Vec<&String> = value["read_times"][0]
            .as_object()
            .unwrap()
            .keys()
            .collect();

        assert_eq!(keys, ["0", "2"]);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let set = set();

        save_to_file(&set, &path, false).unwrap();
        let loaded = load_from_file(&path).unwrap();

        assert_eq!(loaded.uuid, set.uuid);
        assert_eq!(loaded.benchmarks.len(), 2);
        assert!(loaded.benchmarks[0].success);
        assert!(!loaded.benchmarks[1].success);
    }

    #[test]
    fn save_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let set = set();

        save_to_file(&set, &path, false).unwrap();
        assert!(matches!(
            save_to_file(&set, &path, false),
            Err(ReportError::Io(_))
        ));
        save_to_file(&set, &path, true).unwrap();
    }
}
