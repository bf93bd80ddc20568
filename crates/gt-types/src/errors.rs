use thiserror::Error;

/// Main error type for gridtune
#[derive(Error, Debug)]
pub enum GtError {
    #[error("Materialization error: {0}")]
    Materialize(#[from] MaterializeError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Metric error: {0}")]
    Metric(#[from] MetricError),

    #[error("Trial error: {0}")]
    Trial(#[from] TrialError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Errors raised while preparing a trial working directory
#[derive(Error, Debug)]
pub enum MaterializeError {
    #[error("Template file not found: {path}")]
    MissingTemplate { path: String },

    #[error("Data source not found: {path}")]
    MissingDataSource { path: String },

    #[error("No entries starting with '{prefix}' in {dir}")]
    NoMatchingEntries { dir: String, prefix: String },

    #[error("Copy failed from {from} to {to}: {message}")]
    CopyFailed {
        from: String,
        to: String,
        message: String,
    },

    #[error("Parameter '{key}' not found in {file}")]
    ParameterNotFound { file: String, key: String },

    #[error("Unresolved placeholder '{{{name}}}' in '{template}'")]
    UnresolvedPlaceholder { template: String, name: String },
}

/// Errors raised by the training subprocess
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to spawn '{command}': {message}")]
    SpawnFailed { command: String, message: String },

    #[error("'{command}' exited with status {code}")]
    NonZeroExit { command: String, code: i32 },

    #[error("'{command}' was terminated by a signal")]
    Terminated { command: String },
}

/// Errors raised while extracting metrics from trial output
#[derive(Error, Debug)]
pub enum MetricError {
    #[error("Marker not found: '{marker}'")]
    MarkerNotFound { marker: String },

    #[error("Invalid value after '{marker}': '{value}'")]
    InvalidValue { marker: String, value: String },

    #[error("Key not found: {key}")]
    MissingKey { key: String },

    #[error("Invalid result format: {message}")]
    InvalidFormat { message: String },

    #[error("Unsupported result record version: {version}")]
    UnsupportedFormat { version: u32 },

    #[error("Expected exactly one file matching {pattern}, found {found}")]
    SampleListCount { pattern: String, found: usize },

    #[error("Metric '{metric}' missing from trial result")]
    NotReported { metric: String },

    #[error("Metric '{metric}' is not a finite number: {value}")]
    NotFinite { metric: String, value: f64 },
}

/// Trial bookkeeping errors
#[derive(Error, Debug)]
pub enum TrialError {
    #[error("Trial not found: {trial_id}")]
    NotFound { trial_id: String },

    #[error("Trial already finished: {trial_id}")]
    AlreadyFinished { trial_id: String },

    #[error("Trial directory {dir} belongs to a different configuration")]
    ConfigConflict { dir: String },
}

/// Result type alias for gridtune operations
pub type GtResult<T> = Result<T, GtError>;

impl From<csv::Error> for GtError {
    fn from(err: csv::Error) -> Self {
        GtError::Csv(err.to_string())
    }
}

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::GtError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::GtError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::GtError::Config(format!($($arg)*))
    };
}
