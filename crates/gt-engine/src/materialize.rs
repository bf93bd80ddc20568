//! Builds a trial working directory: template files, training data and the
//! per-trial parameter edits.

use std::fs;
use std::path::Path;

use gt_data::set_parameter;
use gt_optimizer::TrialHandle;
use gt_types::{GtResult, MaterializeError};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::PathsSection;
use crate::plan::{render, DataStaging, TrialPlan};

fn copy_failed(from: &Path, to: &Path, err: impl ToString) -> MaterializeError {
    MaterializeError::CopyFailed {
        from: from.display().to_string(),
        to: to.display().to_string(),
        message: err.to_string(),
    }
}

/// Copy each named file from `src_dir` into `dst_dir`.
pub fn copy_template_files(src_dir: &Path, dst_dir: &Path, names: &[String]) -> GtResult<()> {
    fs::create_dir_all(dst_dir)?;
    for name in names {
        let from = src_dir.join(name);
        if !from.is_file() {
            return Err(MaterializeError::MissingTemplate {
                path: from.display().to_string(),
            }
            .into());
        }
        let file_name = from
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new(name));
        let to = dst_dir.join(file_name);
        fs::copy(&from, &to).map_err(|e| copy_failed(&from, &to, e))?;
        debug!("Copied {} to {}", from.display(), to.display());
    }
    Ok(())
}

/// Recursively copy `src` to `dst`, merging into `dst` if it already exists.
pub fn copy_dir(src: &Path, dst: &Path) -> GtResult<()> {
    if !src.exists() {
        return Err(MaterializeError::MissingDataSource {
            path: src.display().to_string(),
        }
        .into());
    }
    if src.is_file() {
        fs::copy(src, dst).map_err(|e| copy_failed(src, dst, e))?;
        return Ok(());
    }

    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| copy_failed(src, dst, e))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| copy_failed(src, dst, e))?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| copy_failed(entry.path(), &target, e))?;
        } else {
            fs::copy(entry.path(), &target).map_err(|e| copy_failed(entry.path(), &target, e))?;
        }
    }
    Ok(())
}

/// Copy every top-level entry of `src_dir` whose name starts with one of
/// `prefixes` into `dst_dir`. Each prefix must match at least one entry.
pub fn copy_prefixed(src_dir: &Path, dst_dir: &Path, prefixes: &[String]) -> GtResult<usize> {
    if !src_dir.is_dir() {
        return Err(MaterializeError::MissingDataSource {
            path: src_dir.display().to_string(),
        }
        .into());
    }
    let mut names: Vec<String> = fs::read_dir(src_dir)?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();

    let mut copied = 0;
    for prefix in prefixes {
        let matching: Vec<&String> = names.iter().filter(|n| n.starts_with(prefix)).collect();
        if matching.is_empty() {
            return Err(MaterializeError::NoMatchingEntries {
                dir: src_dir.display().to_string(),
                prefix: prefix.clone(),
            }
            .into());
        }
        for name in matching {
            copy_dir(&src_dir.join(name), &dst_dir.join(name))?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Prepare the trial directory behind `handle` according to `plan`.
pub fn materialize(plan: &TrialPlan, paths: &PathsSection, handle: &TrialHandle) -> GtResult<()> {
    let work_dir = &handle.work_dir;
    let params = &handle.parameters;

    let templates = plan
        .template_files
        .iter()
        .map(|name| render(name, params))
        .collect::<GtResult<Vec<_>>>()?;
    copy_template_files(&paths.template_dir, work_dir, &templates)?;

    match &plan.data {
        DataStaging::None => {}
        DataStaging::Directory { name } => {
            copy_dir(&paths.data_dir().join(name), &work_dir.join(name))?;
        }
        DataStaging::Prefixed { prefixes } => {
            let copied = copy_prefixed(paths.data_dir(), work_dir, prefixes)?;
            debug!("Staged {} data entries into {}", copied, work_dir.display());
        }
    }

    for binding in &plan.bindings {
        let Some(value) = params.get(&binding.param) else {
            continue;
        };
        let file = work_dir.join(render(&binding.file, params)?);
        set_parameter(&file, &binding.key, &value.to_string())?;
    }

    for rule in plan.overrides.iter().filter(|r| r.applies(params)) {
        let file = work_dir.join(render(&rule.file, params)?);
        set_parameter(&file, &rule.key, &rule.value)?;
    }

    info!(
        "Materialized trial {} in {}",
        handle.trial_number,
        work_dir.display()
    );
    Ok(())
}
