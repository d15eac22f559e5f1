use crate::{
    context::{serialized_size, Context, Message, Payload},
    storage::{self, StorageAdapters, StorageError},
};
use ctxbench_analysis::{
    aggregate,
    report::{Benchmark, BenchmarkConfig, BenchmarkResult, DbFactoryConfig, RawTimings, Sizes},
};
use std::{collections::BTreeMap, time::Instant};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum BenchError {
    #[error("Failed to resolve or construct the storage adapter: {0}")]
    Construction(StorageError),
    #[error("Storage operation failed: {0}")]
    Operation(StorageError),
    #[error("Failed to serialize a generated context: {0}")]
    Generation(#[from] serde_json::Error),
    #[error("Context read back for '{key}' at dialog length {dialog_len} differs from what was written")]
    ReadMismatch { key: String, dialog_len: u64 },
}

/// One configured benchmark, driven against a single adapter instance
/// through sizing and measurement. Any failure along the way is folded
/// into the result document; sibling benchmarks never notice.
#[derive(Debug, Clone)]
pub struct BenchmarkCase {
    pub name: String,
    pub description: String,
    pub uuid: Uuid,
    pub db_factory: DbFactoryConfig,
    pub config: BenchmarkConfig,
}

struct CaseFailure {
    sizes: Option<Sizes>,
    error: BenchError,
}

impl BenchmarkCase {
    pub fn new(
        name: String,
        description: String,
        db_factory: DbFactoryConfig,
        config: BenchmarkConfig,
    ) -> Self {
        Self {
            name,
            description,
            uuid: Uuid::new_v4(),
            db_factory,
            config,
        }
    }

    /// Serialized sizes of the smallest and largest context this case
    /// will generate, plus one message and one misc payload in isolation.
    /// Measured once; generation is deterministic, so these hold for all
    /// repetitions.
    pub fn measure_sizes(config: &BenchmarkConfig) -> Result<Sizes, BenchError> {
        let starting = Context::generate(
            config.from_dialog_len,
            &config.message_dimensions,
            &config.misc_dimensions,
        );
        let largest = Context::generate(
            config.final_dialog_len(),
            &config.message_dimensions,
            &config.misc_dimensions,
        );

        Ok(Sizes {
            starting_context_size: serialized_size(&starting)?,
            final_context_size: serialized_size(&largest)?,
            misc_size: serialized_size(&Payload::generate(&config.misc_dimensions))?,
            message_size: serialized_size(&Message::generate(&config.message_dimensions))?,
        })
    }

    /// Run the case to completion and assemble its document entry.
    #[instrument(skip(self), fields(name = %self.name, uri = %self.db_factory.uri), level = "info")]
    pub fn run(&self) -> Benchmark {
        info!("Starting benchmark");

        match self.execute() {
            Ok((sizes, raw)) => {
                let averages = aggregate::averages(&raw);
                info!(
                    pretty_write = averages.pretty_write,
                    pretty_read = averages.pretty_read,
                    pretty_update = averages.pretty_update,
                    "Benchmark finished"
                );

                self.assemble(true, sizes, BenchmarkResult::Timings(raw), Some(averages))
            }
            Err(failure) => {
                warn!(error = %failure.error, "Benchmark failed");

                self.assemble(
                    false,
                    failure.sizes.unwrap_or_else(Sizes::minimal),
                    BenchmarkResult::Failure(failure.error.to_string()),
                    None,
                )
            }
        }
    }

    fn assemble(
        &self,
        success: bool,
        sizes: Sizes,
        result: BenchmarkResult,
        average_results: Option<ctxbench_analysis::report::AverageResults>,
    ) -> Benchmark {
        Benchmark {
            name: self.name.clone(),
            description: self.description.clone(),
            uuid: self.uuid,
            success,
            db_factory: self.db_factory.clone(),
            benchmark_config: self.config.clone(),
            sizes,
            result,
            average_results,
        }
    }

    fn execute(&self) -> Result<(Sizes, RawTimings), CaseFailure> {
        let factory = storage::resolve(&self.db_factory.factory_module, &self.db_factory.factory)
            .map_err(|error| CaseFailure {
                sizes: None,
                error: BenchError::Construction(error),
            })?;
        let mut adapter = factory(&self.db_factory.uri).map_err(|error| CaseFailure {
            sizes: None,
            error: BenchError::Construction(error),
        })?;

        let outcome = Self::measure_sizes(&self.config)
            .map_err(|error| CaseFailure { sizes: None, error })
            .and_then(|sizes| {
                self.run_timed(&mut adapter)
                    .map(|raw| (sizes, raw))
                    .map_err(|error| CaseFailure {
                        sizes: Some(sizes),
                        error,
                    })
            });

        // the adapter is closed on every exit path; a close failure fails
        // the benchmark even when all measurements landed
        match (outcome, adapter.close()) {
            (Ok(result), Ok(())) => Ok(result),
            (Ok((sizes, _)), Err(error)) => Err(CaseFailure {
                sizes: Some(sizes),
                error: BenchError::Operation(error),
            }),
            (Err(failure), _) => Err(failure),
        }
    }

    /// The measurement loop: per context identity one timed write, then
    /// per visited dialog length one timed update followed by one timed
    /// read, lengths strictly increasing.
    fn run_timed(&self, adapter: &mut StorageAdapters) -> Result<RawTimings, BenchError> {
        let config = &self.config;
        let lengths = config.dialog_lengths();
        let mut raw = RawTimings::with_capacity(config.context_num as usize);

        for identity in 0..config.context_num {
            let key = Uuid::new_v4().to_string();
            let mut context = Context::generate(
                config.from_dialog_len,
                &config.message_dimensions,
                &config.misc_dimensions,
            );

            let start = Instant::now();
            adapter.write(&key, &context).map_err(BenchError::Operation)?;
            raw.write_times.push(start.elapsed().as_secs_f64());

            let mut read_times = BTreeMap::new();
            let mut update_times = BTreeMap::new();

            for &dialog_len in &lengths {
                context.grow_to(dialog_len, &config.message_dimensions);

                let start = Instant::now();
                adapter.update(&key, &context).map_err(BenchError::Operation)?;
                update_times.insert(dialog_len, start.elapsed().as_secs_f64());

                let start = Instant::now();
                let stored = adapter.read(&key).map_err(BenchError::Operation)?;
                read_times.insert(dialog_len, start.elapsed().as_secs_f64());

                // adapter contract check, outside the timed region
                if stored != context {
                    return Err(BenchError::ReadMismatch {
                        key: key.clone(),
                        dialog_len,
                    });
                }
            }

            raw.read_times.push(read_times);
            raw.update_times.push(update_times);
            debug!(identity, "Context identity finished");
        }

        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{faulty, register, DEFAULT_FACTORY, DEFAULT_FACTORY_MODULE};
    use ctxbench_analysis::{report::BenchmarkSet, validate};

    fn config(context_num: u64, from: u64, to: u64, step: u64) -> BenchmarkConfig {
        BenchmarkConfig {
            context_num,
            from_dialog_len: from,
            to_dialog_len: to,
            step_dialog_len: step,
            message_dimensions: vec![2, 2],
            misc_dimensions: vec![1],
        }
    }

    fn case(uri: &str, config: BenchmarkConfig) -> BenchmarkCase {
        BenchmarkCase::new(
            format!("case-{uri}"),
            String::new(),
            DbFactoryConfig {
                uri: uri.to_owned(),
                factory_module: DEFAULT_FACTORY_MODULE.to_owned(),
                factory: DEFAULT_FACTORY.to_owned(),
            },
            config,
        )
    }

    #[test]
    fn completed_case_collects_the_full_series() {
        let benchmark = case("memory://", config(2, 0, 4, 2)).run();

        assert!(benchmark.success);
        let raw = match &benchmark.result {
            BenchmarkResult::Timings(raw) => raw,
            BenchmarkResult::Failure(reason) => panic!("unexpected failure: {reason}"),
        };

        assert_eq!(raw.write_times.len(), 2);
        assert_eq!(raw.read_times.len(), 2);
        assert_eq!(raw.update_times.len(), 2);
        for identity in 0..2 {
            let visited: Vec<u64> = raw.read_times[identity].keys().copied().collect();
            assert_eq!(visited, vec![0, 2]);
            let visited: Vec<u64> = raw.update_times[identity].keys().copied().collect();
            assert_eq!(visited, vec![0, 2]);
        }

        let averages = benchmark.average_results.expect("averages present");
        assert_eq!(averages.read_times_grouped_by_context_num.len(), 2);
        assert_eq!(
            averages
                .read_times_grouped_by_dialog_len
                .keys()
                .copied()
                .collect::<Vec<u64>>(),
            vec![0, 2]
        );
    }

    #[test]
    fn sizes_stay_positive_for_minimal_configs() {
        let config = BenchmarkConfig {
            context_num: 1,
            from_dialog_len: 0,
            to_dialog_len: 1,
            step_dialog_len: 1,
            message_dimensions: vec![],
            misc_dimensions: vec![],
        };
        let sizes = BenchmarkCase::measure_sizes(&config).unwrap();

        assert!(sizes.starting_context_size >= 1);
        assert!(sizes.final_context_size >= 1);
        assert!(sizes.misc_size >= 1);
        assert!(sizes.message_size >= 1);
        assert_eq!(sizes.starting_context_size, sizes.final_context_size);
    }

    #[test]
    fn a_failing_read_discards_the_whole_case() {
        register(
            "ctxbench_tests::bench",
            "faulty_factory",
            faulty::faulty_factory,
        );

        let mut case = case("faulty://3", config(2, 0, 4, 2));
        case.db_factory.factory_module = "ctxbench_tests::bench".to_owned();
        case.db_factory.factory = "faulty_factory".to_owned();

        // two reads per identity; the third read is the second identity's
        // first, so the first identity had already completed cleanly
        let benchmark = case.run();

        assert!(!benchmark.success);
        match &benchmark.result {
            BenchmarkResult::Failure(reason) => {
                assert!(reason.contains("injected read failure"), "got: {reason}")
            }
            BenchmarkResult::Timings(_) => panic!("expected the case to fail"),
        }
        assert!(benchmark.average_results.is_none());
        // sizing had finished before the failure, so real sizes are kept
        assert!(benchmark.sizes.starting_context_size > 1);
    }

    #[test]
    fn unknown_schemes_fail_the_case_not_the_process() {
        let benchmark = case("carrier-pigeon://coop", config(1, 0, 2, 1)).run();

        assert!(!benchmark.success);
        match &benchmark.result {
            BenchmarkResult::Failure(reason) => {
                assert!(reason.contains("Unknown storage scheme"), "got: {reason}")
            }
            BenchmarkResult::Timings(_) => panic!("expected the case to fail"),
        }
    }

    #[test]
    fn unknown_factories_fail_the_case() {
        let mut case = case("memory://", config(1, 0, 2, 1));
        case.db_factory.factory_module = "somewhere::else".to_owned();

        let benchmark = case.run();

        assert!(!benchmark.success);
        match &benchmark.result {
            BenchmarkResult::Failure(reason) => {
                assert!(reason.contains("No storage factory"), "got: {reason}")
            }
            BenchmarkResult::Timings(_) => panic!("expected the case to fail"),
        }
    }

    #[test]
    fn fresh_documents_validate_against_the_contract() {
        let dir = tempfile::tempdir().unwrap();
        let file_uri = format!("file://{}", dir.path().join("contexts").display());

        let benchmarks = vec![
            case("memory://", config(2, 0, 4, 2)).run(),
            case(&file_uri, config(1, 1, 3, 1)).run(),
            case("carrier-pigeon://coop", config(1, 0, 2, 1)).run(),
        ];
        let set = BenchmarkSet::new(
            "mixed".to_owned(),
            "memory, file and one failure".to_owned(),
            benchmarks,
        );

        validate::validate_set(&set).unwrap();
    }
}
