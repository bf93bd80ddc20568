//! Metric extraction from the text and JSON files left behind by a training run.

use std::fs;
use std::path::Path;

use gt_types::{
    GtResult, MetricError, MetricRecord, TOP_1_ACCURACY, TOP_1_ACCURACY_CLASS_1, TRAIN_COUNT,
    VALID_COUNT,
};
use serde::{Deserialize, Serialize};

/// Line marker of the class-1 top-1 accuracy in `accuracy_log.txt`.
pub const CLASS_1_ACCURACY_MARKER: &str = "class: 1, accuracy (top-1)";
/// Line marker of the overall top-1 accuracy in `accuracy_log.txt`.
pub const TOP_1_ACCURACY_MARKER: &str = "top 1 accuracy:";
/// Key holding the per-evaluation mIoU history in `miou.txt`.
pub const OVERALL_KEY: &str = "overall";
/// Version of the structured result record understood here.
pub const RESULT_RECORD_VERSION: u32 = 1;

/// Top-1 accuracies of a classification run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Top1Accuracy {
    pub class_1: f64,
    pub overall: f64,
}

impl Top1Accuracy {
    pub fn to_record(self) -> MetricRecord {
        MetricRecord::new()
            .with(TOP_1_ACCURACY, self.overall)
            .with(TOP_1_ACCURACY_CLASS_1, self.class_1)
    }
}

fn value_after_last_colon(line: &str, marker: &str) -> Result<f64, MetricError> {
    let raw = line.rsplit(':').next().unwrap_or_default().trim();
    raw.parse().map_err(|_| MetricError::InvalidValue {
        marker: marker.to_string(),
        value: raw.to_string(),
    })
}

/// Scan `text` from the end for the two top-1 accuracy markers.
///
/// The last occurrence of each marker wins; scanning stops once both are found.
/// Each marker is resolved on its own, so with several overall lines after the
/// last class-1 line the final overall line is taken, not the one nearest the
/// class-1 line.
pub fn parse_top1_accuracy(text: &str) -> Result<Top1Accuracy, MetricError> {
    let mut class_1 = None;
    let mut overall = None;

    for line in text.lines().rev() {
        if class_1.is_none() && line.contains(CLASS_1_ACCURACY_MARKER) {
            class_1 = Some(value_after_last_colon(line, CLASS_1_ACCURACY_MARKER)?);
        }
        if overall.is_none() && line.contains(TOP_1_ACCURACY_MARKER) {
            overall = Some(value_after_last_colon(line, TOP_1_ACCURACY_MARKER)?);
        }
        if class_1.is_some() && overall.is_some() {
            break;
        }
    }

    let missing = |marker: &str| MetricError::MarkerNotFound {
        marker: marker.to_string(),
    };
    Ok(Top1Accuracy {
        class_1: class_1.ok_or_else(|| missing(CLASS_1_ACCURACY_MARKER))?,
        overall: overall.ok_or_else(|| missing(TOP_1_ACCURACY_MARKER))?,
    })
}

/// Latest overall mIoU from a `miou.txt` JSON document.
///
/// `overall` may hold a single number or the history of evaluations, in which
/// case the last entry is taken.
pub fn parse_overall_miou(text: &str) -> Result<f64, MetricError> {
    let doc: serde_json::Value =
        serde_json::from_str(text).map_err(|e| MetricError::InvalidFormat {
            message: e.to_string(),
        })?;
    let overall = doc.get(OVERALL_KEY).ok_or_else(|| MetricError::MissingKey {
        key: OVERALL_KEY.to_string(),
    })?;
    let latest = match overall {
        serde_json::Value::Array(history) => history.last(),
        other => Some(other),
    };
    latest
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| MetricError::InvalidFormat {
            message: format!("'{OVERALL_KEY}' is not a number or a non-empty list of numbers"),
        })
}

/// Versioned record a training process may write instead of free-form logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub format_version: u32,
    pub metrics: MetricRecord,
}

pub fn parse_result_record(text: &str) -> Result<MetricRecord, MetricError> {
    let record: ResultRecord =
        serde_json::from_str(text).map_err(|e| MetricError::InvalidFormat {
            message: e.to_string(),
        })?;
    if record.format_version != RESULT_RECORD_VERSION {
        return Err(MetricError::UnsupportedFormat {
            version: record.format_version,
        });
    }
    Ok(record.metrics)
}

pub fn top1_accuracy_from_file(path: &Path) -> GtResult<Top1Accuracy> {
    Ok(parse_top1_accuracy(&fs::read_to_string(path)?)?)
}

pub fn overall_miou_from_file(path: &Path) -> GtResult<f64> {
    Ok(parse_overall_miou(&fs::read_to_string(path)?)?)
}

pub fn result_record_from_file(path: &Path) -> GtResult<MetricRecord> {
    Ok(parse_result_record(&fs::read_to_string(path)?)?)
}

/// Training and validation sample counts of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleCounts {
    pub train: usize,
    pub valid: usize,
}

impl SampleCounts {
    pub fn to_record(self) -> MetricRecord {
        MetricRecord::new()
            .with(TRAIN_COUNT, self.train as f64)
            .with(VALID_COUNT, self.valid as f64)
    }
}

fn single_file_with_suffix(dir: &Path, suffix: &str) -> GtResult<std::path::PathBuf> {
    let mut matches = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_match = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(suffix) && n.len() > suffix.len());
        if is_match && path.is_file() {
            matches.push(path);
        }
    }
    if matches.len() != 1 {
        return Err(MetricError::SampleListCount {
            pattern: format!("{}/*{}", dir.display(), suffix),
            found: matches.len(),
        }
        .into());
    }
    Ok(matches.remove(0))
}

/// Count the lines of the single `*_regions.txt` and `*_regions_valid.txt`
/// sample lists under `work_dir/training_data`.
pub fn count_samples(work_dir: &Path) -> GtResult<SampleCounts> {
    let data_dir = work_dir.join("training_data");
    let train = single_file_with_suffix(&data_dir, "_regions.txt")?;
    let valid = single_file_with_suffix(&data_dir, "_regions_valid.txt")?;
    Ok(SampleCounts {
        train: fs::read_to_string(train)?.lines().count(),
        valid: fs::read_to_string(valid)?.lines().count(),
    })
}
