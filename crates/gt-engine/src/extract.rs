//! Collects the metrics of a finished training run.

use std::path::Path;

use gt_data::{
    count_samples, overall_miou_from_file, read_parameter, result_record_from_file,
    top1_accuracy_from_file,
};
use gt_types::{GtResult, MetricRecord, OVERALL_MIOU};
use tracing::debug;

use crate::plan::MetricSource;

/// Structured record a training process may leave in its working directory.
/// When present it takes precedence over log scraping.
pub const RESULT_RECORD_FILE: &str = "result_record.json";

/// Metrics of the run in `work_dir`, read as `source` describes.
pub fn extract_metrics(work_dir: &Path, source: &MetricSource) -> GtResult<MetricRecord> {
    let record_path = work_dir.join(RESULT_RECORD_FILE);
    if record_path.is_file() {
        debug!("Reading metrics from {}", record_path.display());
        return result_record_from_file(&record_path);
    }

    match source {
        MetricSource::Top1Accuracy {
            log_file,
            sample_counts,
        } => {
            let mut record = top1_accuracy_from_file(&work_dir.join(log_file))?.to_record();
            if *sample_counts {
                record.merge(count_samples(work_dir)?.to_record());
            }
            Ok(record)
        }
        MetricSource::OverallMiou {
            para_file,
            eval_file,
        } => {
            let expr_name = read_parameter(&work_dir.join(para_file), "expr_name")?;
            let miou = overall_miou_from_file(&work_dir.join(expr_name).join(eval_file))?;
            Ok(MetricRecord::new().with(OVERALL_MIOU, miou))
        }
        MetricSource::ResultRecord => result_record_from_file(&record_path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gt_types::{GtError, TOP_1_ACCURACY, TOP_1_ACCURACY_CLASS_1, TRAIN_COUNT, VALID_COUNT};
    use std::fs;

    #[test]
    fn top1_with_sample_counts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("accuracy_log.txt"),
            "class: 1, accuracy (top-1): 0.71\ntop 1 accuracy: 0.83\n",
        )
        .unwrap();
        let data = dir.path().join("training_data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("s2_regions.txt"), "a\nb\n").unwrap();
        fs::write(data.join("s2_regions_valid.txt"), "c\n").unwrap();

        let source = MetricSource::Top1Accuracy {
            log_file: "accuracy_log.txt".into(),
            sample_counts: true,
        };
        let record = extract_metrics(dir.path(), &source).unwrap();
        assert_eq!(record.get(TOP_1_ACCURACY), Some(0.83));
        assert_eq!(record.get(TOP_1_ACCURACY_CLASS_1), Some(0.71));
        assert_eq!(record.get(TRAIN_COUNT), Some(2.0));
        assert_eq!(record.get(VALID_COUNT), Some(1.0));
    }

    #[test]
    fn miou_follows_expr_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("main_para_exp9.ini"),
            "expr_name = exp9  # experiment folder\n",
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("exp9/eval")).unwrap();
        fs::write(
            dir.path().join("exp9/eval/miou.txt"),
            r#"{"overall": [0.5, 0.64]}"#,
        )
        .unwrap();

        let source = MetricSource::OverallMiou {
            para_file: "main_para_exp9.ini".into(),
            eval_file: "eval/miou.txt".into(),
        };
        let record = extract_metrics(dir.path(), &source).unwrap();
        assert_eq!(record.get(OVERALL_MIOU), Some(0.64));
    }

    #[test]
    fn result_record_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(RESULT_RECORD_FILE),
            r#"{"format_version": 1, "metrics": {"top_1_accuracy": 0.9}}"#,
        )
        .unwrap();
        let source = MetricSource::Top1Accuracy {
            log_file: "accuracy_log.txt".into(),
            sample_counts: false,
        };
        let record = extract_metrics(dir.path(), &source).unwrap();
        assert_eq!(record.get(TOP_1_ACCURACY), Some(0.9));
    }

    #[test]
    fn missing_log_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = MetricSource::Top1Accuracy {
            log_file: "accuracy_log.txt".into(),
            sample_counts: false,
        };
        assert!(matches!(
            extract_metrics(dir.path(), &source).unwrap_err(),
            GtError::Io(_)
        ));
    }
}
