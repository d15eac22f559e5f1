use crate::report::{AverageResults, RawTimings};
use std::collections::BTreeMap;

/// Round to `digits` significant digits (not decimal places).
pub fn round_sig(value: f64, digits: u32) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }

    let magnitude = value.abs().log10().floor() as i32;
    let factor = 10f64.powi(digits as i32 - 1 - magnitude);

    (value * factor).round() / factor
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0u64), |(sum, count), value| (sum + value, count + 1));

    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// One mean per context identity, averaged over that identity's dialog
/// lengths, in identity order.
fn grouped_by_context(series: &[BTreeMap<u64, f64>]) -> Vec<f64> {
    series
        .iter()
        .map(|times| mean(times.values().copied()))
        .collect()
}

/// One mean per dialog length, averaged across context identities.
fn grouped_by_dialog_len(series: &[BTreeMap<u64, f64>]) -> BTreeMap<u64, f64> {
    let mut pooled: BTreeMap<u64, Vec<f64>> = BTreeMap::new();
    for times in series {
        for (&dialog_len, &elapsed) in times {
            pooled.entry(dialog_len).or_default().push(elapsed);
        }
    }

    pooled
        .into_iter()
        .map(|(dialog_len, elapsed)| (dialog_len, mean(elapsed.into_iter())))
        .collect()
}

/// Reduce a completed raw timing series into its aggregate statistics.
///
/// The summed pretty value is rounded once, from the unrounded averages,
/// so it does not compound the rounding error of its two addends.
pub fn averages(raw: &RawTimings) -> AverageResults {
    let average_write_time = mean(raw.write_times.iter().copied());
    let average_read_time = mean(raw.read_times.iter().flat_map(|times| times.values().copied()));
    let average_update_time = mean(
        raw.update_times
            .iter()
            .flat_map(|times| times.values().copied()),
    );

    AverageResults {
        average_write_time,
        average_read_time,
        average_update_time,
        read_times_grouped_by_context_num: grouped_by_context(&raw.read_times),
        read_times_grouped_by_dialog_len: grouped_by_dialog_len(&raw.read_times),
        update_times_grouped_by_context_num: grouped_by_context(&raw.update_times),
        update_times_grouped_by_dialog_len: grouped_by_dialog_len(&raw.update_times),
        pretty_write: round_sig(average_write_time, 3),
        pretty_read: round_sig(average_read_time, 3),
        pretty_update: round_sig(average_update_time, 3),
        pretty_read_update: round_sig(average_read_time + average_update_time, 3),
    }
}
