//! # gt-optimizer
//!
//! Parameter search and trial orchestration for gridtune.
//!
//! Provides the discrete search space, grid and random sweep strategies, trial
//! tracking, per-trial resource requests and the search controller contract
//! (with a local, resumable implementation).

mod controller;
mod resources;
mod search;
mod trial;

pub use controller::{
    load_experiment_config, load_trials, trial_dir_name, LocalController, Submission,
    TrialHandle, TuneController, EXPERIMENT_FILE, STATUS_FILE, TRIAL_FILE,
};
pub use resources::{
    GpuLease, GpuPool, HostResources, ResourceRequest, DEFAULT_MAX_CPUS_PER_TRIAL,
    DEFAULT_MAX_GPUS_PER_TRIAL,
};
pub use search::{
    GridSearch, ParameterDef, ParameterSet, ParameterValue, RandomSearch, SearchSpace,
    SearchStrategy,
};
pub use trial::{
    best_by, ExperimentState, ExperimentStatus, Mode, SearchKind, Trial, TrialResult,
    TrialStatus, TuneConfig,
};
