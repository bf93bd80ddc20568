//! Search controller: the submit / report / best contract the tuner drives,
//! plus a local implementation that keeps its bookkeeping on disk so an
//! interrupted search can be resumed.

use chrono::{DateTime, Utc};
use gt_types::{GtError, GtResult, MetricError, MetricRecord, TrialError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::search::ParameterSet;
use crate::trial::{
    best_by, ExperimentStatus, Mode, SearchKind, Trial, TrialResult, TrialStatus, TuneConfig,
};

/// Experiment manifest written at the experiment root.
pub const EXPERIMENT_FILE: &str = "experiment.json";
/// Final experiment status written when the search finishes.
pub const STATUS_FILE: &str = "status.json";
/// Per-trial record written inside each trial directory.
pub const TRIAL_FILE: &str = "trial.json";

/// Directory name of trial `trial_number` (e.g. `clip_tuning_00007`).
pub fn trial_dir_name(prefix: &str, trial_number: usize) -> String {
    format!("{prefix}_{trial_number:05}")
}

/// Identifies a submitted trial when reporting back to the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialHandle {
    pub trial_id: Uuid,
    pub trial_number: usize,
    pub work_dir: PathBuf,
    pub parameters: ParameterSet,
}

/// Outcome of [`TuneController::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The trial must be executed.
    Run(TrialHandle),
    /// An earlier session already finished this configuration.
    Resumed(TrialResult),
}

/// Capability interface of the search controller.
pub trait TuneController: Send + Sync {
    /// Register trial `trial_number` with its parameter assignment.
    fn submit(&self, trial_number: usize, parameters: ParameterSet) -> GtResult<Submission>;

    /// Record that the trial started on the given devices.
    fn start(&self, handle: &TrialHandle, gpu_ids: Vec<u32>) -> GtResult<()>;

    /// Report the trial's metrics; the objective metric must be present.
    fn report(&self, handle: &TrialHandle, metrics: MetricRecord) -> GtResult<TrialResult>;

    /// Record that the trial failed; nothing is reported for it.
    fn fail(&self, handle: &TrialHandle, error: &str) -> GtResult<()>;

    /// Best finished trial by `metric`.
    fn best(&self, metric: &str, mode: Mode) -> Option<TrialResult>;

    /// All known trials ordered by trial number.
    fn trials(&self) -> Vec<Trial>;

    fn status(&self) -> ExperimentStatus;

    /// Close the experiment; `error` marks it failed.
    fn finish(&self, error: Option<String>) -> GtResult<ExperimentStatus>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ExperimentManifest {
    config: TuneConfig,
    trial_prefix: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug)]
struct ControllerState {
    status: ExperimentStatus,
    trials: BTreeMap<usize, Trial>,
}

/// Controller that runs inside this process and persists to the experiment directory.
#[derive(Debug)]
pub struct LocalController {
    experiment_dir: PathBuf,
    trial_prefix: String,
    config: TuneConfig,
    resumed: bool,
    state: Mutex<ControllerState>,
}

impl LocalController {
    /// Open `experiment_dir`, resuming when a manifest already exists there.
    pub fn open(
        experiment_dir: impl Into<PathBuf>,
        mut config: TuneConfig,
        trial_prefix: &str,
    ) -> GtResult<Self> {
        config.validate()?;
        let experiment_dir = experiment_dir.into();
        let manifest_path = experiment_dir.join(EXPERIMENT_FILE);
        let resumed = manifest_path.is_file();

        let created_at = if resumed {
            let stored: ExperimentManifest = read_json(&manifest_path)?;
            info!(
                "Resuming from previous session at {}",
                experiment_dir.display()
            );
            if config.seed.is_none() {
                config.seed = stored.config.seed;
            }
            stored.created_at
        } else {
            info!("Starting a new session at {}", experiment_dir.display());
            Utc::now()
        };
        if config.search == SearchKind::Random && config.seed.is_none() {
            config.seed = Some(rand::random());
        }

        fs::create_dir_all(&experiment_dir)?;
        write_json_atomic(
            &manifest_path,
            &ExperimentManifest {
                config: config.clone(),
                trial_prefix: trial_prefix.to_string(),
                created_at,
            },
        )?;

        let trials = if resumed {
            load_trials(&experiment_dir)?
                .into_iter()
                .map(|t| (t.trial_number, t))
                .collect()
        } else {
            BTreeMap::new()
        };

        let mut status = ExperimentStatus::new(&config);
        status.mark_running();

        Ok(Self {
            experiment_dir,
            trial_prefix: trial_prefix.to_string(),
            config,
            resumed,
            state: Mutex::new(ControllerState { status, trials }),
        })
    }

    pub fn config(&self) -> &TuneConfig {
        &self.config
    }

    pub fn experiment_dir(&self) -> &Path {
        &self.experiment_dir
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    fn persist(trial: &Trial) -> GtResult<()> {
        write_json_atomic(&trial.work_dir.join(TRIAL_FILE), trial)
    }

    /// Apply `update` to the trial behind `handle` and persist it.
    fn update_trial<F>(&self, handle: &TrialHandle, update: F) -> GtResult<Trial>
    where
        F: FnOnce(&mut Trial, &mut ExperimentStatus) -> GtResult<()>,
    {
        let snapshot = {
            let mut state = self.state.lock();
            let ControllerState { status, trials } = &mut *state;
            let trial = trials
                .get_mut(&handle.trial_number)
                .filter(|t| t.id == handle.trial_id)
                .ok_or_else(|| TrialError::NotFound {
                    trial_id: handle.trial_id.to_string(),
                })?;
            if trial.is_finished() {
                return Err(TrialError::AlreadyFinished {
                    trial_id: handle.trial_id.to_string(),
                }
                .into());
            }
            update(trial, status)?;
            trial.clone()
        };
        Self::persist(&snapshot)?;
        Ok(snapshot)
    }
}

impl TuneController for LocalController {
    fn submit(&self, trial_number: usize, parameters: ParameterSet) -> GtResult<Submission> {
        let work_dir = self
            .experiment_dir
            .join(trial_dir_name(&self.trial_prefix, trial_number));

        let trial = {
            let mut state = self.state.lock();
            if let Some(existing) = state.trials.get(&trial_number) {
                if existing.parameters != parameters {
                    return Err(TrialError::ConfigConflict {
                        dir: work_dir.display().to_string(),
                    }
                    .into());
                }
                if let (TrialStatus::Completed, Some(result)) = (existing.status, &existing.result)
                {
                    let result = result.clone();
                    state.status.trials_resumed += 1;
                    state.status.update_best(&result);
                    info!(
                        "Trial {} already completed ({} = {}), skipping",
                        trial_number, self.config.metric, result.objective
                    );
                    return Ok(Submission::Resumed(result));
                }
                debug!("Re-running unfinished trial {}", trial_number);
            }
            let trial = Trial::new(trial_number, parameters, work_dir);
            state.trials.insert(trial_number, trial.clone());
            trial
        };

        fs::create_dir_all(&trial.work_dir)?;
        Self::persist(&trial)?;

        Ok(Submission::Run(TrialHandle {
            trial_id: trial.id,
            trial_number,
            work_dir: trial.work_dir,
            parameters: trial.parameters,
        }))
    }

    fn start(&self, handle: &TrialHandle, gpu_ids: Vec<u32>) -> GtResult<()> {
        self.update_trial(handle, |trial, _| {
            trial.mark_running(gpu_ids);
            Ok(())
        })?;
        Ok(())
    }

    fn report(&self, handle: &TrialHandle, metrics: MetricRecord) -> GtResult<TrialResult> {
        let metric = self.config.metric.clone();
        let objective = match metrics.require(&metric) {
            Ok(value) if value.is_finite() => value,
            Ok(value) => {
                let err = MetricError::NotFinite {
                    metric: metric.clone(),
                    value,
                };
                self.fail(handle, &err.to_string())?;
                return Err(err.into());
            }
            Err(err) => {
                self.fail(handle, &err.to_string())?;
                return Err(err.into());
            }
        };

        let trial = self.update_trial(handle, |trial, status| {
            let result = TrialResult {
                trial_id: trial.id,
                trial_number: trial.trial_number,
                objective,
                metrics,
                parameters: trial.parameters.clone(),
                duration_seconds: trial.duration_seconds(),
            };
            trial.mark_completed(result.clone());
            status.trials_completed += 1;
            status.update_best(&result);
            Ok(())
        })?;

        info!(
            "Trial {} reported {} = {}",
            trial.trial_number, metric, objective
        );
        trial
            .result
            .ok_or_else(|| GtError::Internal("completed trial has no result".into()))
    }

    fn fail(&self, handle: &TrialHandle, error: &str) -> GtResult<()> {
        self.update_trial(handle, |trial, status| {
            trial.mark_failed(error.to_string());
            status.trials_failed += 1;
            Ok(())
        })?;
        warn!("Trial {} failed: {}", handle.trial_number, error);
        Ok(())
    }

    fn best(&self, metric: &str, mode: Mode) -> Option<TrialResult> {
        let state = self.state.lock();
        best_by(state.trials.values(), metric, mode).cloned()
    }

    fn trials(&self) -> Vec<Trial> {
        self.state.lock().trials.values().cloned().collect()
    }

    fn status(&self) -> ExperimentStatus {
        self.state.lock().status.clone()
    }

    fn finish(&self, error: Option<String>) -> GtResult<ExperimentStatus> {
        let status = {
            let mut state = self.state.lock();
            match error {
                Some(error) => state.status.mark_failed(error),
                None => state.status.mark_completed(),
            }
            state.status.clone()
        };
        write_json_atomic(&self.experiment_dir.join(STATUS_FILE), &status)?;
        Ok(status)
    }
}

/// Read every trial record found one level below `experiment_dir`.
///
/// Unreadable records are skipped with a warning so a single corrupt file
/// does not block a resume.
pub fn load_trials(experiment_dir: &Path) -> GtResult<Vec<Trial>> {
    let mut trials = Vec::new();
    for entry in fs::read_dir(experiment_dir)? {
        let path = entry?.path().join(TRIAL_FILE);
        if !path.is_file() {
            continue;
        }
        match read_json::<Trial>(&path) {
            Ok(trial) => trials.push(trial),
            Err(e) => warn!("Skipping unreadable trial record {}: {}", path.display(), e),
        }
    }
    trials.sort_by_key(|t| t.trial_number);
    Ok(trials)
}

/// Load the configuration stored in an experiment manifest.
pub fn load_experiment_config(experiment_dir: &Path) -> GtResult<TuneConfig> {
    let manifest: ExperimentManifest = read_json(&experiment_dir.join(EXPERIMENT_FILE))?;
    Ok(manifest.config)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> GtResult<T> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> GtResult<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{ParameterValue, SearchSpace};
    use gt_types::{GtError, TOP_1_ACCURACY};

    fn config() -> TuneConfig {
        let space = SearchSpace::new()
            .add_choice("lr", [1e-5, 1e-4])
            .add_choice("model_type", ["RN50"]);
        TuneConfig::new("tune_clip_para", space, TOP_1_ACCURACY)
    }

    fn params(lr: f64) -> ParameterSet {
        let mut p = ParameterSet::new();
        p.insert("lr".into(), ParameterValue::Float(lr));
        p.insert("model_type".into(), ParameterValue::from("RN50"));
        p
    }

    fn run_handle(submission: Submission) -> TrialHandle {
        match submission {
            Submission::Run(handle) => handle,
            Submission::Resumed(_) => panic!("expected a fresh trial"),
        }
    }

    #[test]
    fn trial_dir_names_are_zero_padded() {
        assert_eq!(trial_dir_name("clip_tuning", 7), "clip_tuning_00007");
    }

    #[test]
    fn submit_report_and_best() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = LocalController::open(dir.path().join("exp"), config(), "clip_tuning").unwrap();
        assert!(!ctl.is_resumed());

        let a = run_handle(ctl.submit(0, params(1e-5)).unwrap());
        assert!(a.work_dir.join(TRIAL_FILE).is_file());
        ctl.start(&a, vec![]).unwrap();
        ctl.report(&a, MetricRecord::new().with(TOP_1_ACCURACY, 0.7))
            .unwrap();

        let b = run_handle(ctl.submit(1, params(1e-4)).unwrap());
        ctl.start(&b, vec![]).unwrap();
        ctl.report(&b, MetricRecord::new().with(TOP_1_ACCURACY, 0.83))
            .unwrap();

        let best = ctl.best(TOP_1_ACCURACY, Mode::Max).unwrap();
        assert_eq!(best.trial_number, 1);
        assert_eq!(ctl.status().best_trial.unwrap().objective, 0.83);
        assert_eq!(ctl.status().trials_completed, 2);

        // A finished trial cannot be reported twice
        let err = ctl
            .report(&b, MetricRecord::new().with(TOP_1_ACCURACY, 0.9))
            .unwrap_err();
        assert!(matches!(err, GtError::Trial(TrialError::AlreadyFinished { .. })));
    }

    #[test]
    fn report_without_objective_fails_trial() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = LocalController::open(dir.path(), config(), "clip_tuning").unwrap();
        let h = run_handle(ctl.submit(0, params(1e-5)).unwrap());
        ctl.start(&h, vec![]).unwrap();

        let err = ctl
            .report(&h, MetricRecord::new().with("top1_acc_c1", 0.5))
            .unwrap_err();
        assert!(err.to_string().contains(TOP_1_ACCURACY));

        let trials = ctl.trials();
        assert_eq!(trials[0].status, TrialStatus::Failed);
        assert!(trials[0].result.is_none());
        assert_eq!(ctl.status().trials_failed, 1);
    }

    #[test]
    fn nan_objective_fails_trial_and_never_becomes_best() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = LocalController::open(dir.path(), config(), "clip_tuning").unwrap();

        let a = run_handle(ctl.submit(0, params(1e-5)).unwrap());
        ctl.start(&a, vec![]).unwrap();
        let err = ctl
            .report(&a, MetricRecord::new().with(TOP_1_ACCURACY, f64::NAN))
            .unwrap_err();
        assert!(matches!(
            err,
            GtError::Metric(MetricError::NotFinite { .. })
        ));

        let b = run_handle(ctl.submit(1, params(1e-4)).unwrap());
        ctl.start(&b, vec![]).unwrap();
        ctl.report(&b, MetricRecord::new().with(TOP_1_ACCURACY, 0.83))
            .unwrap();

        let status = ctl.finish(None).unwrap();
        assert_eq!(status.trials_failed, 1);
        assert_eq!(status.trials_completed, 1);
        assert_eq!(status.best_trial.unwrap().trial_number, 1);
        assert_eq!(ctl.best(TOP_1_ACCURACY, Mode::Max).unwrap().objective, 0.83);
        assert_eq!(ctl.trials()[0].status, TrialStatus::Failed);
    }

    #[test]
    fn resume_skips_completed_and_reruns_failed() {
        let dir = tempfile::tempdir().unwrap();
        let exp = dir.path().join("exp");
        {
            let ctl = LocalController::open(&exp, config(), "clip_tuning").unwrap();
            let a = run_handle(ctl.submit(0, params(1e-5)).unwrap());
            ctl.start(&a, vec![]).unwrap();
            ctl.report(&a, MetricRecord::new().with(TOP_1_ACCURACY, 0.6))
                .unwrap();
            let b = run_handle(ctl.submit(1, params(1e-4)).unwrap());
            ctl.start(&b, vec![]).unwrap();
            ctl.fail(&b, "exit 1").unwrap();
        }

        let ctl = LocalController::open(&exp, config(), "clip_tuning").unwrap();
        assert!(ctl.is_resumed());
        match ctl.submit(0, params(1e-5)).unwrap() {
            Submission::Resumed(result) => assert_eq!(result.objective, 0.6),
            Submission::Run(_) => panic!("completed trial should not re-run"),
        }
        assert!(matches!(
            ctl.submit(1, params(1e-4)).unwrap(),
            Submission::Run(_)
        ));
        assert_eq!(ctl.status().trials_resumed, 1);
    }

    #[test]
    fn conflicting_parameters_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let exp = dir.path().join("exp");
        {
            let ctl = LocalController::open(&exp, config(), "clip_tuning").unwrap();
            run_handle(ctl.submit(0, params(1e-5)).unwrap());
        }
        let ctl = LocalController::open(&exp, config(), "clip_tuning").unwrap();
        let err = ctl.submit(0, params(1e-4)).unwrap_err();
        assert!(matches!(err, GtError::Trial(TrialError::ConfigConflict { .. })));
    }

    #[test]
    fn random_seed_survives_resume() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config();
        cfg.search = SearchKind::Random;
        cfg.num_samples = 3;

        let first = LocalController::open(dir.path(), cfg.clone(), "t").unwrap();
        let seed = first.config().seed;
        assert!(seed.is_some());
        drop(first);

        let second = LocalController::open(dir.path(), cfg, "t").unwrap();
        assert_eq!(second.config().seed, seed);
        assert_eq!(load_experiment_config(dir.path()).unwrap().seed, seed);
    }

    #[test]
    fn finish_writes_status() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = LocalController::open(dir.path(), config(), "t").unwrap();
        let status = ctl.finish(None).unwrap();
        assert_eq!(status.state, crate::trial::ExperimentState::Completed);
        assert!(dir.path().join(STATUS_FILE).is_file());
    }
}
