//! Tune file: the TOML document describing a whole search.

use std::path::{Path, PathBuf};

use gt_optimizer::{Mode, ParameterDef, ResourceRequest, SearchKind, SearchSpace, TuneConfig};
use gt_types::{config_error, GtResult};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::plan::TrialPlan;

/// Overrides the results directory of any tune file.
pub const RESULTS_DIR_ENV: &str = "GRIDTUNE_RESULTS_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSection {
    pub name: String,
    pub metric: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub search: SearchKind,
    #[serde(default = "one")]
    pub num_samples: usize,
    #[serde(default = "one")]
    pub max_concurrent: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn one() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsSection {
    /// Directory holding the template parameter files.
    pub template_dir: PathBuf,
    /// Source of training data; defaults to `template_dir`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Root under which `<experiment name>/` is created.
    pub results_dir: PathBuf,
}

impl PathsSection {
    pub fn data_dir(&self) -> &Path {
        self.data_dir.as_deref().unwrap_or(&self.template_dir)
    }
}

/// A complete search description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneFile {
    pub experiment: ExperimentSection,
    pub paths: PathsSection,
    pub parameters: Vec<ParameterDef>,
    pub plan: TrialPlan,
}

impl TuneFile {
    pub fn load(path: &Path) -> GtResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| config_error!("cannot read tune file {}: {}", path.display(), e))?;
        let mut file = Self::from_toml(&text)?;
        file.apply_env();
        info!("Loaded tune file {}", path.display());
        Ok(file)
    }

    pub fn from_toml(text: &str) -> GtResult<Self> {
        let mut file: TuneFile = toml::from_str(text)?;
        file.paths.template_dir = expand_home(&file.paths.template_dir);
        file.paths.data_dir = file.paths.data_dir.as_deref().map(expand_home);
        file.paths.results_dir = expand_home(&file.paths.results_dir);
        Ok(file)
    }

    pub fn to_toml(&self) -> GtResult<String> {
        toml::to_string_pretty(self).map_err(|e| config_error!("cannot serialize tune file: {}", e))
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(dir) = std::env::var(RESULTS_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.paths.results_dir = expand_home(Path::new(&dir));
            }
        }
    }

    pub fn search_space(&self) -> SearchSpace {
        SearchSpace {
            parameters: self.parameters.clone(),
        }
    }

    pub fn tune_config(&self) -> TuneConfig {
        let e = &self.experiment;
        TuneConfig {
            name: e.name.clone(),
            search_space: self.search_space(),
            search: e.search,
            num_samples: e.num_samples,
            max_concurrent: e.max_concurrent,
            metric: e.metric.clone(),
            mode: e.mode,
            resources: e.resources.clone(),
            seed: e.seed,
        }
    }

    pub fn experiment_dir(&self) -> PathBuf {
        self.paths.results_dir.join(&self.experiment.name)
    }

    /// Check the whole file, reporting the first problem found.
    pub fn validate(&self) -> GtResult<()> {
        self.tune_config().validate()?;
        if let Some(problem) = self.plan.problems(&self.search_space()).into_iter().next() {
            return Err(config_error!("{}", problem));
        }
        Ok(())
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{DataStaging, MetricSource};
    use gt_optimizer::ParameterValue;

    const TUNE_TOML: &str = r#"
[experiment]
name = "tune_clip_para"
metric = "top_1_accuracy"
mode = "max"
max_concurrent = 2

[paths]
template_dir = "/data/ini_files"
results_dir = "./ray_results"

[[parameters]]
name = "lr"
values = [1e-5, 1e-4]

[[parameters]]
name = "model_type"
values = ["RN50", "ViT-B/32"]

[plan]
trial_prefix = "clip_tuning"
report_prefix = "top1_acc"
template_files = ["model_clip.ini"]
command = "./finetune_clip.sh"
cleanup = ["exp11"]

[plan.data]
kind = "directory"
name = "training_data"

[[plan.bindings]]
param = "lr"
file = "model_clip.ini"
key = "base_learning_rate"

[plan.metric]
kind = "top1_accuracy"
log_file = "accuracy_log.txt"
"#;

    #[test]
    fn parses_tune_file() {
        let file = TuneFile::from_toml(TUNE_TOML).unwrap();
        assert_eq!(file.experiment.mode, Mode::Max);
        assert_eq!(file.experiment.search, SearchKind::Grid);
        assert_eq!(file.experiment.num_samples, 1);
        assert_eq!(file.paths.data_dir(), Path::new("/data/ini_files"));
        assert_eq!(file.parameters[0].values[0], ParameterValue::Float(1e-5));
        assert_eq!(
            file.plan.data,
            DataStaging::Directory {
                name: "training_data".into()
            }
        );
        assert_eq!(
            file.plan.metric,
            MetricSource::Top1Accuracy {
                log_file: "accuracy_log.txt".into(),
                sample_counts: false
            }
        );
        assert_eq!(file.plan.stdout_file, "screen_output.txt");
        assert_eq!(file.tune_config().search_space.grid_size(), Some(4));
        assert!(file.validate().is_ok());
        assert_eq!(
            file.experiment_dir(),
            PathBuf::from("./ray_results/tune_clip_para")
        );
    }

    #[test]
    fn toml_round_trip() {
        let file = TuneFile::from_toml(TUNE_TOML).unwrap();
        let text = file.to_toml().unwrap();
        assert_eq!(TuneFile::from_toml(&text).unwrap(), file);
    }

    #[test]
    fn validation_reports_plan_problems() {
        let mut file = TuneFile::from_toml(TUNE_TOML).unwrap();
        file.plan.bindings[0].param = "batch_size".into();
        let err = file.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn home_expansion() {
        assert_eq!(expand_home(Path::new("/abs/x")), PathBuf::from("/abs/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home(Path::new("~/Data")), home.join("Data"));
        }
    }
}
