//! Remote-sensing image patch dataset: a list of patch files with class labels.

use std::fs;
use std::path::{Path, PathBuf};

use gt_types::{validation_error, GtResult};

/// Patches and their labels, plus the class names from `label.txt`.
#[derive(Debug, Clone, PartialEq)]
pub struct RsPatchDataset {
    image_paths: Vec<PathBuf>,
    labels: Vec<i64>,
    classes: Vec<(String, i64)>,
}

impl RsPatchDataset {
    /// `label_txt` holds one `name,id` pair per line.
    pub fn new(image_paths: Vec<PathBuf>, labels: Vec<i64>, label_txt: &Path) -> GtResult<Self> {
        if image_paths.len() != labels.len() {
            return Err(validation_error!(
                "{} image paths but {} labels",
                image_paths.len(),
                labels.len()
            ));
        }
        let classes = parse_label_list(&fs::read_to_string(label_txt)?)?;
        Ok(Self {
            image_paths,
            labels,
            classes,
        })
    }

    pub fn len(&self) -> usize {
        self.image_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_paths.is_empty()
    }

    /// Patch path and label at `index`.
    pub fn get(&self, index: usize) -> Option<(&Path, i64)> {
        let path = self.image_paths.get(index)?;
        Some((path.as_path(), self.labels[index]))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Path, i64)> {
        self.image_paths
            .iter()
            .map(PathBuf::as_path)
            .zip(self.labels.iter().copied())
    }

    /// Class names in `label.txt` order.
    pub fn classes(&self) -> Vec<&str> {
        self.classes.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn class_name(&self, label: i64) -> Option<&str> {
        self.classes
            .iter()
            .find(|(_, id)| *id == label)
            .map(|(name, _)| name.as_str())
    }
}

fn parse_label_list(text: &str) -> GtResult<Vec<(String, i64)>> {
    let mut classes = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (name, id) = line
            .split_once(',')
            .ok_or_else(|| validation_error!("label.txt line {}: expected 'name,id'", lineno + 1))?;
        let id = id
            .trim()
            .parse::<i64>()
            .map_err(|_| validation_error!("label.txt line {}: bad class id '{}'", lineno + 1, id))?;
        classes.push((name.trim().to_string(), id));
    }
    Ok(classes)
}
