//! Best-effort removal of bulky training artifacts from a trial directory.

use std::fs;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use gt_types::{config_error, GtResult};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// What a cleanup pass removed and what it could not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
}

fn build_globs(patterns: &[String]) -> GtResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| config_error!("invalid cleanup pattern '{}': {}", pattern, e))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| config_error!("invalid cleanup patterns: {}", e))
}

/// Remove every entry of `work_dir` matching one of `patterns`.
///
/// Patterns are relative to `work_dir`, `*` does not cross `/`. Matching
/// directories are removed whole. Failures are logged and collected, never
/// returned as errors; only an invalid pattern is.
pub fn cleanup_trial(work_dir: &Path, patterns: &[String]) -> GtResult<CleanupReport> {
    let mut report = CleanupReport::default();
    if patterns.is_empty() || !work_dir.is_dir() {
        return Ok(report);
    }
    let globs = build_globs(patterns)?;

    let mut walker = WalkDir::new(work_dir).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cleanup could not read an entry of {}: {}", work_dir.display(), e);
                continue;
            }
        };
        let Ok(rel) = entry.path().strip_prefix(work_dir) else {
            continue;
        };
        if !globs.is_match(rel) {
            continue;
        }

        let is_dir = entry.file_type().is_dir();
        if is_dir {
            walker.skip_current_dir();
        }
        let path = entry.into_path();
        let removed = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Ok(()) => {
                debug!("Removed {}", path.display());
                report.removed.push(path);
            }
            Err(e) => {
                warn!("Failed to remove {}: {}", path.display(), e);
                report.failed.push((path, e.to_string()));
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn removes_matching_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        touch(&root.join("exp9/init_models/model.ckpt"));
        touch(&root.join("exp9/eval/events.out.tfevents.123"));
        touch(&root.join("exp9/eval/miou.txt"));
        touch(&root.join("split_images/a.png"));
        touch(&root.join("tfrecord_a/part-0"));
        touch(&root.join("main_para.ini"));

        let patterns: Vec<String> = [
            "exp*/init_models",
            "exp*/eval/events.out.tfevents*",
            "split*",
            "tfrecord*",
        ]
        .iter()
        .map(|p| p.to_string())
        .collect();
        let report = cleanup_trial(root, &patterns).unwrap();

        assert_eq!(report.removed.len(), 4);
        assert!(report.failed.is_empty());
        assert!(!root.join("exp9/init_models").exists());
        assert!(!root.join("split_images").exists());
        assert!(root.join("exp9/eval/miou.txt").is_file());
        assert!(root.join("main_para.ini").is_file());
    }

    #[test]
    fn star_does_not_cross_directories() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("keep/split_x.txt"));
        let report = cleanup_trial(dir.path(), &["split*".to_string()]).unwrap();
        assert!(report.removed.is_empty());
        assert!(dir.path().join("keep/split_x.txt").is_file());
    }

    #[test]
    fn missing_dir_and_bad_pattern() {
        let dir = tempfile::tempdir().unwrap();
        let report = cleanup_trial(&dir.path().join("gone"), &["exp11".to_string()]).unwrap();
        assert_eq!(report, CleanupReport::default());

        assert!(cleanup_trial(dir.path(), &["exp[".to_string()]).is_err());
    }
}
