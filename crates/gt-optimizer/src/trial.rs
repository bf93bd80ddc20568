//! Trial tracking and tuning run configuration.

use chrono::{DateTime, Utc};
use gt_types::{GtError, MetricRecord};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::resources::ResourceRequest;
use crate::search::{GridSearch, ParameterSet, RandomSearch, SearchSpace, SearchStrategy};

/// Whether we are maximizing or minimizing the objective.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Max,
    Min,
}

impl Mode {
    /// True when `candidate` beats `incumbent` under this mode.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Mode::Max => candidate > incumbent,
            Mode::Min => candidate < incumbent,
        }
    }
}

impl FromStr for Mode {
    type Err = GtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "max" => Ok(Mode::Max),
            "min" => Ok(Mode::Min),
            other => Err(GtError::Validation(format!(
                "mode must be 'max' or 'min', got '{other}'"
            ))),
        }
    }
}

/// How parameter combinations are generated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchKind {
    #[default]
    Grid,
    Random,
}

/// Top-level configuration for a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneConfig {
    /// Experiment name, also the directory under the results root.
    pub name: String,

    /// The parameter search space.
    pub search_space: SearchSpace,

    #[serde(default)]
    pub search: SearchKind,

    /// Grid repeats (grid search) or number of draws (random search).
    #[serde(default = "default_num_samples")]
    pub num_samples: usize,

    /// Upper bound on trials running at the same time.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Metric name to optimize (e.g. "top_1_accuracy", "overall_miou").
    pub metric: String,

    #[serde(default)]
    pub mode: Mode,

    /// Per-trial resource request; detected from the host when absent.
    #[serde(default)]
    pub resources: Option<ResourceRequest>,

    /// Seed for random search, fixed on first start so resumes draw the same points.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_num_samples() -> usize {
    1
}

fn default_max_concurrent() -> usize {
    1
}

impl TuneConfig {
    pub fn new(name: impl Into<String>, search_space: SearchSpace, metric: &str) -> Self {
        Self {
            name: name.into(),
            search_space,
            search: SearchKind::Grid,
            num_samples: default_num_samples(),
            max_concurrent: default_max_concurrent(),
            metric: metric.to_string(),
            mode: Mode::Max,
            resources: None,
            seed: None,
        }
    }

    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn with_objective(mut self, metric: &str, mode: Mode) -> Self {
        self.metric = metric.to_string();
        self.mode = mode;
        self
    }

    pub fn with_random_search(mut self, num_samples: usize, seed: u64) -> Self {
        self.search = SearchKind::Random;
        self.num_samples = num_samples;
        self.seed = Some(seed);
        self
    }

    pub fn with_resources(mut self, resources: ResourceRequest) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Build the strategy described by this config.
    pub fn strategy(&self) -> Box<dyn SearchStrategy> {
        match self.search {
            SearchKind::Grid => Box::new(GridSearch::with_repeats(
                &self.search_space,
                self.num_samples,
            )),
            SearchKind::Random => Box::new(RandomSearch::new(
                self.search_space.clone(),
                self.num_samples,
                self.seed.unwrap_or_default(),
            )),
        }
    }

    pub fn validate(&self) -> Result<(), GtError> {
        if self.name.trim().is_empty() {
            return Err(GtError::Validation("experiment name is empty".into()));
        }
        if self.metric.trim().is_empty() {
            return Err(GtError::Validation("objective metric is empty".into()));
        }
        if self.search_space.parameters.is_empty() {
            return Err(GtError::Validation("search space has no parameters".into()));
        }
        if let Some(problem) = self.search_space.problems().into_iter().next() {
            return Err(GtError::Validation(problem));
        }
        Ok(())
    }
}

/// Lifecycle state for a tuning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate status of a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentStatus {
    pub name: String,
    pub metric: String,
    pub mode: Mode,
    pub state: ExperimentState,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub trials_resumed: usize,
    pub best_trial: Option<TrialResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl ExperimentStatus {
    pub fn new(config: &TuneConfig) -> Self {
        Self {
            name: config.name.clone(),
            metric: config.metric.clone(),
            mode: config.mode,
            state: ExperimentState::Pending,
            trials_completed: 0,
            trials_failed: 0,
            trials_resumed: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = ExperimentState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = ExperimentState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = ExperimentState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Update the best trial if `result` improves on the current best.
    /// Non-finite objectives never become the best.
    pub fn update_best(&mut self, result: &TrialResult) {
        if !result.objective.is_finite() {
            return;
        }
        let better = match &self.best_trial {
            None => true,
            Some(current_best) => self.mode.improves(result.objective, current_best.objective),
        };
        if better {
            self.best_trial = Some(result.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial (one parameter combination evaluated by one training run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub trial_number: usize,
    pub parameters: ParameterSet,
    pub work_dir: PathBuf,
    pub status: TrialStatus,
    pub result: Option<TrialResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub gpu_ids: Vec<u32>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(trial_number: usize, parameters: ParameterSet, work_dir: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            trial_number,
            parameters,
            work_dir,
            status: TrialStatus::Pending,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            gpu_ids: Vec::new(),
            error: None,
        }
    }

    pub fn mark_running(&mut self, gpu_ids: Vec<u32>) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
        self.gpu_ids = gpu_ids;
        self.error = None;
    }

    pub fn mark_completed(&mut self, result: TrialResult) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.result = None;
        self.error = Some(error);
    }

    /// Wall-clock seconds between start and finish, if both are known.
    pub fn duration_seconds(&self) -> Option<u64> {
        let started = self.started_at?;
        let finished = self.finished_at.unwrap_or_else(Utc::now);
        u64::try_from((finished - started).num_seconds()).ok()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, TrialStatus::Completed | TrialStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrialStatus::Pending => "pending",
            TrialStatus::Running => "running",
            TrialStatus::Completed => "completed",
            TrialStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of a single trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: Uuid,
    pub trial_number: usize,
    pub objective: f64,
    pub metrics: MetricRecord,
    pub parameters: ParameterSet,
    pub duration_seconds: Option<u64>,
}

/// Best finished trial in `trials` by `metric`, ignoring trials that lack it.
pub fn best_by<'a>(
    trials: impl IntoIterator<Item = &'a Trial>,
    metric: &str,
    mode: Mode,
) -> Option<&'a TrialResult> {
    let mut best: Option<(&TrialResult, f64)> = None;
    for result in trials.into_iter().filter_map(|t| t.result.as_ref()) {
        let Some(value) = result.metrics.get(metric) else {
            continue;
        };
        if value.is_nan() {
            continue;
        }
        match best {
            Some((_, incumbent)) if !mode.improves(value, incumbent) => {}
            _ => best = Some((result, value)),
        }
    }
    best.map(|(result, _)| result)
}
