use crate::{
    bench::BenchmarkCase,
    executor::{ExecutorError, Executors},
};
use ctxbench_analysis::report::{BenchmarkConfig, DbFactoryConfig};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path};
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read the benchmark config")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse the benchmark config")]
    Parse(#[from] serde_yaml::Error),
    #[error("Executor failed to load")]
    FailedLoadExecutor(#[from] ExecutorError),
}

/// A whole benchmark set as authored in YAML: set metadata, executor
/// selection and one entry per benchmark. Entries are keyed by name, and
/// name order is document order.
#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SetConfig {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub executor: ExecutorConfig,
    pub benchmarks: BTreeMap<String, CaseConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    // Name of the selected executor, see Executors::load for the selection
    #[serde(default = "default_executor_name")]
    pub name: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: default_executor_name(),
            workers: default_workers(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct CaseConfig {
    #[serde(default)]
    pub description: String,
    pub db_factory: DbFactoryConfig,
    pub config: BenchmarkConfig,
}

impl SetConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let raw = std::fs::read_to_string(path)?;

        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Returns true when the config contains at least one error. Every
    /// violation is logged, not just the first, so users can fix them in
    /// one pass. Nothing runs before this passes.
    pub fn preflight_checks(&self) -> bool {
        let mut contains_error = false;

        if self.benchmarks.is_empty() {
            error!("No benchmark was defined, the set would be empty");
            contains_error = true;
        }

        if self.executor.workers == 0 {
            error!("executor.workers cannot be 0, at least one worker is required");
            contains_error = true;
        }

        for (name, case) in self.benchmarks.iter() {
            let config = &case.config;

            if config.context_num == 0 {
                error!("benchmarks.{name}.config.context_num must be at least 1");
                contains_error = true;
            }

            if config.step_dialog_len == 0 {
                error!("benchmarks.{name}.config.step_dialog_len must be at least 1");
                contains_error = true;
            }

            if config.to_dialog_len <= config.from_dialog_len {
                error!(
                    "benchmarks.{name}.config.to_dialog_len ({}) must exceed from_dialog_len ({})",
                    config.to_dialog_len, config.from_dialog_len
                );
                contains_error = true;
            }

            if case.db_factory.uri.split_once("://").is_none() {
                error!(
                    "benchmarks.{name}.db_factory.uri ({}) carries no scheme",
                    case.db_factory.uri
                );
                contains_error = true;
            }
        }

        contains_error
    }

    pub fn cases(&self) -> Vec<BenchmarkCase> {
        self.benchmarks
            .iter()
            .map(|(name, case)| {
                BenchmarkCase::new(
                    name.clone(),
                    case.description.clone(),
                    case.db_factory.clone(),
                    case.config.clone(),
                )
            })
            .collect()
    }

    pub fn executors(&self) -> Result<Executors, ConfigErrors> {
        Ok(Executors::load(
            &self.executor.name,
            self.executor.workers,
            self.cases(),
        )?)
    }
}

fn default_executor_name() -> String {
    "local".to_owned()
}

fn default_workers() -> usize {
    1
}
