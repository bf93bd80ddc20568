// gridtune trial engine
// Turns parameter assignments into finished training runs and a summary report.

pub mod cleanup;
pub mod config;
pub mod extract;
pub mod materialize;
pub mod plan;
pub mod presets;
pub mod report;
pub mod runner;
pub mod tuner;

pub use cleanup::{cleanup_trial, CleanupReport};
pub use config::{expand_home, ExperimentSection, PathsSection, TuneFile, RESULTS_DIR_ENV};
pub use extract::{extract_metrics, RESULT_RECORD_FILE};
pub use materialize::{copy_dir, copy_prefixed, copy_template_files, materialize};
pub use plan::{
    render, DataStaging, MetricSource, OverrideRule, ParameterBinding, TrialPlan,
    DEFAULT_STDOUT_FILE,
};
pub use presets::{preset, PRESET_NAMES};
pub use report::{host_name, report_file_name, write_report, write_timestamped_report};
pub use runner::{ShellRunner, TrainingRunner};
pub use tuner::{TuneSummary, Tuner};
