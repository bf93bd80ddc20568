//! Declarative recipe for one trial: which files to stage, which INI keys to
//! rewrite, what to run and where the metrics come from.

use globset::GlobBuilder;
use gt_optimizer::{ParameterSet, SearchSpace};
use gt_types::{GtResult, MaterializeError};
use serde::{Deserialize, Serialize};

use crate::report::is_reserved_column;

/// Default file receiving the training command's output.
pub const DEFAULT_STDOUT_FILE: &str = "screen_output.txt";

/// How training data reaches the trial directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataStaging {
    /// Nothing is copied.
    #[default]
    None,
    /// Copy the directory `name` from the data directory.
    Directory { name: String },
    /// Copy every top-level entry of the data directory starting with one of the prefixes.
    Prefixed { prefixes: Vec<String> },
}

/// Writes one parameter into one INI key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBinding {
    pub param: String,
    /// Target file inside the trial directory, may contain `{param}` placeholders.
    pub file: String,
    pub key: String,
}

/// Sets `key = value` in `file` when `param`'s value contains any of `contains`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRule {
    pub param: String,
    pub contains: Vec<String>,
    pub file: String,
    pub key: String,
    pub value: String,
}

impl OverrideRule {
    pub fn applies(&self, params: &ParameterSet) -> bool {
        params.get(&self.param).is_some_and(|value| {
            let text = value.to_string();
            self.contains.iter().any(|needle| text.contains(needle.as_str()))
        })
    }
}

/// Where a trial's metrics are read from once training has exited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricSource {
    /// Top-1 accuracy markers in a text log.
    Top1Accuracy {
        log_file: String,
        /// Also count the training/validation sample lists.
        #[serde(default)]
        sample_counts: bool,
    },
    /// `<expr_name>/<eval_file>` JSON with an `overall` mIoU history, where
    /// `expr_name` is read from `para_file`.
    OverallMiou { para_file: String, eval_file: String },
    /// Only the structured result record.
    ResultRecord,
}

/// Everything needed to turn a parameter assignment into a finished training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialPlan {
    /// Trial directory prefix (`<prefix>_<nnnnn>`).
    pub trial_prefix: String,
    /// Prefix of the summary spreadsheet name.
    pub report_prefix: String,
    /// Files copied from the template directory; may contain placeholders.
    pub template_files: Vec<String>,
    #[serde(default)]
    pub data: DataStaging,
    #[serde(default)]
    pub bindings: Vec<ParameterBinding>,
    #[serde(default)]
    pub overrides: Vec<OverrideRule>,
    /// Shell command run inside the trial directory.
    pub command: String,
    #[serde(default = "default_stdout_file")]
    pub stdout_file: String,
    pub metric: MetricSource,
    /// Glob patterns, relative to the trial directory, removed after the run.
    #[serde(default)]
    pub cleanup: Vec<String>,
}

fn default_stdout_file() -> String {
    DEFAULT_STDOUT_FILE.to_string()
}

impl TrialPlan {
    /// Problems that would make every trial fail, reported up front.
    pub fn problems(&self, space: &SearchSpace) -> Vec<String> {
        let known: Vec<&str> = space.names().collect();
        let mut problems = Vec::new();

        if self.command.trim().is_empty() {
            problems.push("plan command is empty".to_string());
        }
        for name in &known {
            if is_reserved_column(name) {
                problems.push(format!(
                    "parameter '{name}' clashes with a report column of the same name"
                ));
            }
        }
        for binding in &self.bindings {
            if !known.contains(&binding.param.as_str()) {
                problems.push(format!(
                    "binding for '{}' refers to an unknown parameter",
                    binding.param
                ));
            }
        }
        for rule in &self.overrides {
            if !known.contains(&rule.param.as_str()) {
                problems.push(format!(
                    "override rule refers to unknown parameter '{}'",
                    rule.param
                ));
            }
        }
        for pattern in &self.cleanup {
            if let Err(e) = GlobBuilder::new(pattern).literal_separator(true).build() {
                problems.push(format!("invalid cleanup pattern '{pattern}': {e}"));
            }
        }
        let templated = self
            .template_files
            .iter()
            .chain(self.bindings.iter().map(|b| &b.file))
            .chain(self.overrides.iter().map(|r| &r.file));
        for template in templated {
            for name in placeholders(template) {
                if !known.contains(&name) {
                    problems.push(format!(
                        "'{template}' uses placeholder '{{{name}}}' that is not a parameter"
                    ));
                }
            }
        }
        problems
    }
}

fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                names.push(&after[..end]);
                rest = &after[end + 1..];
            }
            None => break,
        }
    }
    names
}

/// Substitute `{param}` placeholders in `template` with parameter values.
pub fn render(template: &str, params: &ParameterSet) -> GtResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        let value = params
            .get(name)
            .ok_or_else(|| MaterializeError::UnresolvedPlaceholder {
                template: template.to_string(),
                name: name.to_string(),
            })?;
        out.push_str(&value.to_string());
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gt_optimizer::ParameterValue;

    fn params() -> ParameterSet {
        let mut p = ParameterSet::new();
        p.insert(
            "backbone".into(),
            ParameterValue::from("deeplabv3plus_mobilenetv2_coco_voc_trainval.ini"),
        );
        p.insert("lr".into(), ParameterValue::Float(0.007));
        p
    }

    #[test]
    fn render_substitutes_parameters() {
        assert_eq!(
            render("{backbone}", &params()).unwrap(),
            "deeplabv3plus_mobilenetv2_coco_voc_trainval.ini"
        );
        assert_eq!(render("lr_{lr}.txt", &params()).unwrap(), "lr_0.007.txt");
        assert_eq!(render("plain.ini", &params()).unwrap(), "plain.ini");
        assert_eq!(render("open{brace", &params()).unwrap(), "open{brace");
    }

    #[test]
    fn render_rejects_unknown_placeholder() {
        let err = render("{iter_num}", &params()).unwrap_err();
        assert!(err.to_string().contains("iter_num"));
    }

    #[test]
    fn override_rule_matches_substrings() {
        let rule = OverrideRule {
            param: "backbone".into(),
            contains: vec!["mobilenetv2".into(), "EdgeTPU".into()],
            file: "main_para.ini".into(),
            key: "b_initialize_last_layer".into(),
            value: "No".into(),
        };
        assert!(rule.applies(&params()));

        let mut other = params();
        other.insert(
            "backbone".into(),
            ParameterValue::from("deeplabv3plus_xception65.ini"),
        );
        assert!(!rule.applies(&other));
    }

    #[test]
    fn plan_problems_flag_unknown_names() {
        let space = SearchSpace::new().add_choice("lr", [0.1]);
        let plan = TrialPlan {
            trial_prefix: "t".into(),
            report_prefix: "r".into(),
            template_files: vec!["{backbone}".into()],
            data: DataStaging::None,
            bindings: vec![ParameterBinding {
                param: "batch_size".into(),
                file: "a.ini".into(),
                key: "batch_size".into(),
            }],
            overrides: Vec::new(),
            command: "true".into(),
            stdout_file: default_stdout_file(),
            metric: MetricSource::ResultRecord,
            cleanup: vec!["exp*/vis".into(), "tfrecord[".into()],
        };
        let problems = plan.problems(&space);
        assert_eq!(problems.len(), 3);
        assert!(problems[0].contains("batch_size"));
        assert!(problems[1].contains("tfrecord["));
        assert!(problems[2].contains("{backbone}"));
    }

    #[test]
    fn parameters_named_like_report_columns_are_rejected() {
        let space = SearchSpace::new()
            .add_choice("lr", [0.1])
            .add_choice("status", ["x"]);
        let plan = TrialPlan {
            trial_prefix: "t".into(),
            report_prefix: "r".into(),
            template_files: Vec::new(),
            data: DataStaging::None,
            bindings: Vec::new(),
            overrides: Vec::new(),
            command: "true".into(),
            stdout_file: default_stdout_file(),
            metric: MetricSource::ResultRecord,
            cleanup: Vec::new(),
        };
        let problems = plan.problems(&space);
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("'status'"));
    }
}
