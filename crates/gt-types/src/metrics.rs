//! Named scalar metrics harvested from a finished trial.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::MetricError;

/// Overall top-1 accuracy of a classification run.
pub const TOP_1_ACCURACY: &str = "top_1_accuracy";
/// Top-1 accuracy restricted to class 1.
pub const TOP_1_ACCURACY_CLASS_1: &str = "top1_acc_c1";
/// Overall mean IoU of a segmentation run.
pub const OVERALL_MIOU: &str = "overall_miou";
/// Number of training samples listed for the run.
pub const TRAIN_COUNT: &str = "train_count";
/// Number of validation samples listed for the run.
pub const VALID_COUNT: &str = "valid_count";

/// A small set of named floating-point values reported once per trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricRecord {
    values: BTreeMap<String, f64>,
}

impl MetricRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Like [`get`](Self::get) but fails when the metric was never recorded.
    pub fn require(&self, name: &str) -> Result<f64, MetricError> {
        self.get(name).ok_or_else(|| MetricError::NotReported {
            metric: name.to_string(),
        })
    }

    /// Copy every value of `other` into `self`, overwriting duplicates.
    pub fn merge(&mut self, other: MetricRecord) {
        self.values.extend(other.values);
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, f64)> for MetricRecord {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_reports_missing_metric() {
        let record = MetricRecord::new().with(TOP_1_ACCURACY, 0.83);
        assert_eq!(record.require(TOP_1_ACCURACY).unwrap(), 0.83);

        let err = record.require(OVERALL_MIOU).unwrap_err();
        assert!(err.to_string().contains(OVERALL_MIOU));
    }

    #[test]
    fn merge_overwrites_duplicates() {
        let mut a = MetricRecord::new()
            .with(TOP_1_ACCURACY, 0.5)
            .with(TRAIN_COUNT, 10.0);
        let b = MetricRecord::new().with(TOP_1_ACCURACY, 0.9);
        a.merge(b);
        assert_eq!(a.len(), 2);
        assert_eq!(a.get(TOP_1_ACCURACY), Some(0.9));
    }

    #[test]
    fn serializes_as_plain_map() {
        let record = MetricRecord::new().with(OVERALL_MIOU, 0.75);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"overall_miou":0.75}"#);
        let back: MetricRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
