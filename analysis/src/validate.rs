use crate::report::BenchmarkSet;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// Structural violation of the output contract, pointing at the first
/// offending field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid document at {path}: {reason}")]
pub struct ValidationError {
    pub path: String,
    pub reason: String,
}

fn fail(path: impl Into<String>, reason: impl Into<String>) -> ValidationError {
    ValidationError {
        path: path.into(),
        reason: reason.into(),
    }
}

fn object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, ValidationError> {
    value
        .as_object()
        .ok_or_else(|| fail(path, "expected an object"))
}

fn array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>, ValidationError> {
    value
        .as_array()
        .ok_or_else(|| fail(path, "expected an array"))
}

fn field<'a>(
    object: &'a Map<String, Value>,
    key: &str,
    parent: &str,
) -> Result<(&'a Value, String), ValidationError> {
    let path = format!("{parent}.{key}");

    match object.get(key) {
        Some(value) => Ok((value, path)),
        None => Err(fail(path, "required field is missing")),
    }
}

fn string_field<'a>(
    object: &'a Map<String, Value>,
    key: &str,
    parent: &str,
) -> Result<&'a str, ValidationError> {
    let (value, path) = field(object, key, parent)?;

    value.as_str().ok_or_else(|| fail(path, "expected a string"))
}

fn bool_field(object: &Map<String, Value>, key: &str, parent: &str) -> Result<bool, ValidationError> {
    let (value, path) = field(object, key, parent)?;

    value
        .as_bool()
        .ok_or_else(|| fail(path, "expected a boolean"))
}

fn uint_field(
    object: &Map<String, Value>,
    key: &str,
    parent: &str,
    min: u64,
) -> Result<u64, ValidationError> {
    let (value, path) = field(object, key, parent)?;
    let number = value
        .as_u64()
        .ok_or_else(|| fail(&path, "expected a non-negative integer"))?;

    if number < min {
        return Err(fail(path, format!("must be at least {min}")));
    }

    Ok(number)
}

fn number_min(value: &Value, path: &str, min: f64) -> Result<f64, ValidationError> {
    let number = value
        .as_f64()
        .ok_or_else(|| fail(path, "expected a number"))?;

    if number < min {
        return Err(fail(path, format!("must be at least {min}")));
    }

    Ok(number)
}

fn uuid_field(object: &Map<String, Value>, key: &str, parent: &str) -> Result<String, ValidationError> {
    let (value, path) = field(object, key, parent)?;
    let raw = value.as_str().ok_or_else(|| fail(&path, "expected a string"))?;

    Uuid::parse_str(raw).map_err(|_| fail(path, "expected a UUID"))?;

    Ok(raw.to_owned())
}

fn validate_dimensions(
    config: &Map<String, Value>,
    key: &str,
    parent: &str,
) -> Result<(), ValidationError> {
    let (value, path) = field(config, key, parent)?;

    for (index, dimension) in array(value, &path)?.iter().enumerate() {
        if dimension.as_u64().is_none() {
            return Err(fail(
                format!("{path}[{index}]"),
                "expected a non-negative integer",
            ));
        }
    }

    Ok(())
}

fn validate_benchmark_config(value: &Value, path: &str) -> Result<(), ValidationError> {
    let config = object(value, path)?;

    uint_field(config, "context_num", path, 1)?;
    let from = uint_field(config, "from_dialog_len", path, 0)?;
    let to = uint_field(config, "to_dialog_len", path, 1)?;
    if to <= from {
        return Err(fail(
            format!("{path}.to_dialog_len"),
            "must exceed from_dialog_len",
        ));
    }
    uint_field(config, "step_dialog_len", path, 1)?;
    validate_dimensions(config, "message_dimensions", path)?;
    validate_dimensions(config, "misc_dimensions", path)?;

    Ok(())
}

fn validate_sizes(value: &Value, path: &str) -> Result<(), ValidationError> {
    let sizes = object(value, path)?;

    for key in [
        "starting_context_size",
        "final_context_size",
        "misc_size",
        "message_size",
    ] {
        uint_field(sizes, key, path, 1)?;
    }

    Ok(())
}

/// A timing map keyed by dialog length: JSON object whose keys parse back
/// to integers and whose values are non-negative numbers.
fn validate_dialog_len_map(value: &Value, path: &str) -> Result<(), ValidationError> {
    for (key, elapsed) in object(value, path)? {
        if key.parse::<u64>().is_err() {
            return Err(fail(path, format!("key '{key}' is not a dialog length")));
        }
        number_min(elapsed, &format!("{path}.{key}"), 0.0)?;
    }

    Ok(())
}

fn validate_timings(value: &Value, path: &str) -> Result<(), ValidationError> {
    let timings = object(value, path)?;

    let (write_times, write_path) = field(timings, "write_times", path)?;
    for (index, elapsed) in array(write_times, &write_path)?.iter().enumerate() {
        number_min(elapsed, &format!("{write_path}[{index}]"), 0.0)?;
    }

    for key in ["read_times", "update_times"] {
        let (series, series_path) = field(timings, key, path)?;
        for (index, times) in array(series, &series_path)?.iter().enumerate() {
            validate_dialog_len_map(times, &format!("{series_path}[{index}]"))?;
        }
    }

    Ok(())
}

fn validate_average_results(value: &Value, path: &str) -> Result<(), ValidationError> {
    let averages = object(value, path)?;

    for key in ["average_write_time", "average_read_time", "average_update_time"] {
        let (value, path) = field(averages, key, path)?;
        if value.as_f64().is_none() {
            return Err(fail(path, "expected a number"));
        }
    }

    for key in [
        "read_times_grouped_by_context_num",
        "update_times_grouped_by_context_num",
    ] {
        let (value, grouped_path) = field(averages, key, path)?;
        for (index, mean) in array(value, &grouped_path)?.iter().enumerate() {
            number_min(mean, &format!("{grouped_path}[{index}]"), 0.0)?;
        }
    }

    for key in [
        "read_times_grouped_by_dialog_len",
        "update_times_grouped_by_dialog_len",
    ] {
        let (value, grouped_path) = field(averages, key, path)?;
        validate_dialog_len_map(value, &grouped_path)?;
    }

    for key in ["pretty_write", "pretty_read", "pretty_update", "pretty_read+update"] {
        let (value, path) = field(averages, key, path)?;
        number_min(value, &path, 0.0)?;
    }

    Ok(())
}

fn validate_benchmark(
    value: &Value,
    path: &str,
    seen: &mut BTreeSet<String>,
) -> Result<(), ValidationError> {
    let benchmark = object(value, path)?;

    string_field(benchmark, "name", path)?;
    string_field(benchmark, "description", path)?;
    let uuid = uuid_field(benchmark, "uuid", path)?;
    if !seen.insert(uuid) {
        return Err(fail(format!("{path}.uuid"), "duplicate benchmark uuid"));
    }
    bool_field(benchmark, "success", path)?;

    let (db_factory, factory_path) = field(benchmark, "db_factory", path)?;
    let db_factory = object(db_factory, &factory_path)?;
    string_field(db_factory, "uri", &factory_path)?;
    string_field(db_factory, "factory_module", &factory_path)?;
    string_field(db_factory, "factory", &factory_path)?;

    let (config, config_path) = field(benchmark, "benchmark_config", path)?;
    validate_benchmark_config(config, &config_path)?;

    let (sizes, sizes_path) = field(benchmark, "sizes", path)?;
    validate_sizes(sizes, &sizes_path)?;

    let (result, result_path) = field(benchmark, "result", path)?;
    if !result.is_string() {
        validate_timings(result, &result_path)?;
    }

    match benchmark.get("average_results") {
        None | Some(Value::Null) => {}
        Some(averages) => {
            validate_average_results(averages, &format!("{path}.average_results"))?
        }
    }

    Ok(())
}

/// Validate a serialized benchmark-set document against the output
/// contract. Purely structural: types, required fields and numeric
/// minimums; timing semantics are not re-derived.
pub fn validate_document(document: &Value) -> Result<(), ValidationError> {
    let root = object(document, "document")?;

    string_field(root, "name", "document")?;
    string_field(root, "description", "document")?;
    uuid_field(root, "uuid", "document")?;

    let (benchmarks, benchmarks_path) = field(root, "benchmarks", "document")?;
    let mut seen = BTreeSet::new();
    for (index, benchmark) in array(benchmarks, &benchmarks_path)?.iter().enumerate() {
        validate_benchmark(benchmark, &format!("benchmarks[{index}]"), &mut seen)?;
    }

    Ok(())
}

/// Serialize and validate an in-memory benchmark set.
pub fn validate_set(set: &BenchmarkSet) -> Result<(), ValidationError> {
    let document = serde_json::to_value(set)
        .map_err(|error| fail("document", format!("failed to serialize: {error}")))?;

    validate_document(&document)
}
