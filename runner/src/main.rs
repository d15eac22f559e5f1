use clap::{Parser, Subcommand, ValueEnum};
use ctxbench_runner::config::SetConfig;
use ctxbench_analysis::{
    report::{self, Benchmark, BenchmarkResult, BenchmarkSet},
    validate,
};
use itertools::Itertools;
use std::{cmp::Ordering, path::PathBuf, process::exit};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_unwrap::ResultExt;

const LINE_SEPARATOR: &str =
    "--------------------------------------------------------------------------------";

#[derive(Parser, Debug)]
#[command(name = "ctxbench")]
#[command(about = "Context storage latency benchmark runner")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a benchmark set from a YAML config and persist the validated
    /// result document.
    Run {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,

        /// Where to write the result document; stdout when omitted.
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,

        /// Overwrite an existing result file.
        #[arg(long, default_value_t = false)]
        exist_ok: bool,
    },

    /// Check an existing result document against the output contract.
    Validate {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Print averages and leaderboards for a result document.
    Report {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = SortBy::Write)]
        sort: SortBy,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SortBy {
    Write,
    Read,
    Update,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Args::parse().cmd {
        Command::Run {
            config,
            out,
            exist_ok,
        } => run(&config, out, exist_ok),
        Command::Validate { file } => validate_file(&file),
        Command::Report { file, sort } => report_file(&file, sort),
    }
}

fn run(config_path: &PathBuf, out: Option<PathBuf>, exist_ok: bool) {
    let config = match SetConfig::load(config_path) {
        Ok(config) => config,
        Err(error) => {
            error!("Failed to load {}: {error}", config_path.display());
            exit(1);
        }
    };

    if config.preflight_checks() {
        error!("Config did not pass the preflight checks, nothing was run");
        exit(1);
    }

    let executor = match config.executors() {
        Ok(executor) => executor,
        Err(error) => {
            error!("{error}");
            exit(1);
        }
    };

    let benchmarks = executor.execute();
    let set = BenchmarkSet::new(config.name, config.description, benchmarks);

    // an invalid document is never shipped; the measurements stay
    // inspectable in the logs above
    if let Err(error) = validate::validate_set(&set) {
        error!("{error}");
        exit(1);
    }

    match out {
        Some(path) => {
            if let Err(error) = report::save_to_file(&set, &path, exist_ok) {
                error!("Failed to save results to {}: {error}", path.display());
                exit(1);
            }
        }
        None => println!("{}", serde_json::to_string_pretty(&set).unwrap_or_log()),
    }
}

fn validate_file(file: &PathBuf) {
    match report::load_from_file(file) {
        Ok(set) => info!(
            name = %set.name,
            benchmarks = set.benchmarks.len(),
            "Document is valid"
        ),
        Err(error) => {
            error!("{error}");
            exit(1);
        }
    }
}

fn report_file(file: &PathBuf, sort: SortBy) {
    let set = match report::load_from_file(file) {
        Ok(set) => set,
        Err(error) => {
            error!("{error}");
            exit(1);
        }
    };

    print_report(&set, sort);
}

fn print_report(set: &BenchmarkSet, sort: SortBy) {
    println!("{LINE_SEPARATOR}");
    println!("DB benchmark: {} ({})", set.name, set.uuid);
    if !set.description.is_empty() {
        println!("{}", set.description);
    }
    println!("{LINE_SEPARATOR}");

    for benchmark in &set.benchmarks {
        println!("{}", benchmark.name);
        match (&benchmark.result, &benchmark.average_results) {
            (BenchmarkResult::Timings(_), Some(averages)) => {
                println!("Average write time: {} s", averages.average_write_time);
                println!("Average read time: {} s", averages.average_read_time);
                println!("Average update time: {} s", averages.average_update_time);
                println!("Pretty read+update: {} s", averages.pretty_read_update);
            }
            (BenchmarkResult::Failure(reason), _) => println!("{reason}"),
            (BenchmarkResult::Timings(_), None) => println!("(no averages recorded)"),
        }
        println!("{LINE_SEPARATOR}");
    }

    if set.benchmarks.len() > 1 {
        println!("{}", leaderboard(set, sort));
    }
}

fn score(benchmark: &Benchmark, sort: SortBy) -> Option<f64> {
    benchmark.average_results.as_ref().map(|averages| match sort {
        SortBy::Write => averages.average_write_time,
        SortBy::Read => averages.average_read_time,
        SortBy::Update => averages.average_update_time,
    })
}

/// Ranking across the set, fastest first; failed benchmarks end up at the
/// bottom without a score.
fn leaderboard(set: &BenchmarkSet, sort: SortBy) -> String {
    let mut lines = vec![
        format!("{sort:?} time leaderboard"),
        LINE_SEPARATOR.to_owned(),
    ];

    let scored = set
        .benchmarks
        .iter()
        .filter_map(|benchmark| score(benchmark, sort).map(|score| (score, &benchmark.name)))
        .sorted_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal))
        .collect_vec();
    for (score, name) in scored {
        lines.push(format!("{score} s: {name}"));
    }

    for benchmark in set
        .benchmarks
        .iter()
        .filter(|benchmark| benchmark.average_results.is_none())
    {
        lines.push(format!("n/a: {}", benchmark.name));
    }
    lines.push(LINE_SEPARATOR.to_owned());

    lines.join("\n")
}
