//! Spreadsheet summary of every trial of an experiment.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use gt_optimizer::Trial;
use gt_types::GtResult;
use tracing::info;

/// Name of this machine, used in report file names.
pub fn host_name() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return name.trim().to_string();
        }
    }
    fs::read_to_string("/proc/sys/kernel/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Columns written before the parameter columns.
pub const LEADING_COLUMNS: [&str; 4] = ["trial_number", "trial_id", "status", "work_dir"];
/// Columns written after the metric columns.
pub const TRAILING_COLUMNS: [&str; 2] = ["duration_seconds", "error"];

/// Whether `name` is one of the fixed report columns.
pub fn is_reserved_column(name: &str) -> bool {
    LEADING_COLUMNS.contains(&name) || TRAILING_COLUMNS.contains(&name)
}

/// `<prefix>_ray_tune_<host>_<YYYYmmdd_HHMMSS>.csv`
pub fn report_file_name(prefix: &str, host: &str, at: DateTime<Local>) -> String {
    format!("{}_ray_tune_{}_{}.csv", prefix, host, at.format("%Y%m%d_%H%M%S"))
}

/// Write one row per trial into `path`.
///
/// `parameter_names` fixes the order of the parameter columns; metric columns
/// are the sorted union of every reported metric. A metric whose name is taken
/// by a parameter or a fixed column is written as `metric_<name>`.
pub fn write_report(path: &Path, parameter_names: &[String], trials: &[Trial]) -> GtResult<()> {
    let metric_names: BTreeSet<&str> = trials
        .iter()
        .filter_map(|t| t.result.as_ref())
        .flat_map(|r| r.metrics.names())
        .collect();
    let metric_columns: Vec<String> = metric_names
        .iter()
        .map(|&name| {
            if is_reserved_column(name) || parameter_names.iter().any(|p| p == name) {
                format!("metric_{name}")
            } else {
                name.to_string()
            }
        })
        .collect();

    let mut writer = csv::Writer::from_path(path)?;

    let mut header: Vec<&str> = LEADING_COLUMNS.to_vec();
    header.extend(parameter_names.iter().map(String::as_str));
    header.extend(metric_columns.iter().map(String::as_str));
    header.extend(TRAILING_COLUMNS);
    writer.write_record(&header)?;

    for trial in trials {
        let mut row = vec![
            trial.trial_number.to_string(),
            trial.id.to_string(),
            trial.status.to_string(),
            trial.work_dir.display().to_string(),
        ];
        for name in parameter_names {
            row.push(
                trial
                    .parameters
                    .get(name)
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            );
        }
        for metric in &metric_names {
            row.push(
                trial
                    .result
                    .as_ref()
                    .and_then(|r| r.metrics.get(metric))
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        row.push(
            trial
                .duration_seconds()
                .map(|d| d.to_string())
                .unwrap_or_default(),
        );
        row.push(trial.error.clone().unwrap_or_default());
        writer.write_record(&row)?;
    }
    writer.flush()?;
    info!("Wrote summary of {} trials to {}", trials.len(), path.display());
    Ok(())
}

/// Write the report for `trials` into `results_dir` under a timestamped name.
pub fn write_timestamped_report(
    results_dir: &Path,
    prefix: &str,
    parameter_names: &[String],
    trials: &[Trial],
) -> GtResult<PathBuf> {
    fs::create_dir_all(results_dir)?;
    let path = results_dir.join(report_file_name(prefix, &host_name(), Local::now()));
    write_report(&path, parameter_names, trials)?;
    Ok(path)
}
