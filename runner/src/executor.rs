use crate::{
    bench::BenchmarkCase,
    storage::{self, Concurrency},
};
use ctxbench_analysis::report::Benchmark;
use itertools::Itertools;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, info};
use tracing_unwrap::ResultExt;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Executor '{0}' is not supported")]
    Unsupported(String),
}

/// All possible executor variants, initialized through `Executors::load`
/// (kept as an enum instead of dynamic dispatch, matching the adapters).
#[derive(Debug)]
pub enum Executors {
    Local(LocalExecutor),
}

impl Executors {
    pub fn load(
        name: &str,
        workers: usize,
        cases: Vec<BenchmarkCase>,
    ) -> Result<Self, ExecutorError> {
        match name {
            "local" => Ok(Self::Local(LocalExecutor { workers, cases })),
            _ => Err(ExecutorError::Unsupported(name.to_owned())),
        }
    }

    pub fn execute(self) -> Vec<Benchmark> {
        match self {
            Self::Local(executor) => executor.execute(),
        }
    }
}

/// Runs the cases of a set on this machine, sequentially or on a thread
/// pool. Every case owns its adapter and key space, so cases are safe to
/// run in parallel; only cases whose URIs point at the same exclusive
/// resource are forced back to back.
#[derive(Debug)]
pub struct LocalExecutor {
    pub workers: usize,
    pub cases: Vec<BenchmarkCase>,
}

impl LocalExecutor {
    pub fn execute(self) -> Vec<Benchmark> {
        let total = self.cases.len() as u64;
        let processed = AtomicU64::new(0);

        let run_case = |(index, case): (usize, BenchmarkCase)| {
            let benchmark = case.run();
            info!(
                "Done with {}/{total}",
                processed.fetch_add(1, Ordering::SeqCst) + 1
            );

            (index, benchmark)
        };

        let mut benchmarks: Vec<(usize, Benchmark)> = if self.workers > 1 {
            let groups = self
                .cases
                .into_iter()
                .enumerate()
                .map(|(index, case)| {
                    let group = match storage::uri_concurrency(&case.db_factory.uri) {
                        Concurrency::Exclusive => case.db_factory.uri.clone(),
                        Concurrency::Shared => format!("{}#{index}", case.db_factory.uri),
                    };

                    (group, (index, case))
                })
                .into_group_map();

            debug!(
                workers = self.workers,
                groups = groups.len(),
                "Running benchmark groups on a thread pool"
            );

            let pool = ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .build()
                .unwrap_or_log();
            pool.install(|| {
                groups
                    .into_values()
                    .par_bridge()
                    .flat_map_iter(|group| group.into_iter().map(&run_case))
                    .collect()
            })
        } else {
            self.cases.into_iter().enumerate().map(run_case).collect()
        };

        // document order follows configuration order, not completion order
        benchmarks.sort_by_key(|(index, _)| *index);
        benchmarks
            .into_iter()
            .map(|(_, benchmark)| benchmark)
            .collect()
    }
}
