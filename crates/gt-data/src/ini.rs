//! In-place editing of INI-style `key = value` parameter files.
//!
//! Files are treated as text: only the lines for the edited key change, every
//! other line (comments, sections, spacing, line endings) is kept verbatim.

use std::fs;
use std::path::Path;

use gt_types::{GtResult, MaterializeError};
use tracing::debug;

/// Key of a `key = value` line, `None` for comments, sections and other text.
fn line_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') || trimmed.starts_with(';') || trimmed.starts_with('[') {
        return None;
    }
    let (key, _) = trimmed.split_once('=')?;
    let key = key.trim();
    (!key.is_empty()).then_some(key)
}

fn line_value(line: &str) -> Option<&str> {
    let (_, value) = line.split_once('=')?;
    let value = match value.find('#') {
        Some(idx) => &value[..idx],
        None => value,
    };
    Some(value.trim())
}

/// Value of `key` in `text`, first occurrence wins.
pub fn find_parameter<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    text.lines()
        .find(|line| line_key(line) == Some(key))
        .and_then(line_value)
}

/// Return `text` with exactly one `key = value` line for `key`.
///
/// The first matching line is replaced in place and later duplicates are
/// dropped; an absent key is appended at the end.
pub fn rewrite_parameter(text: &str, key: &str, value: &str) -> String {
    let mut out = String::with_capacity(text.len() + key.len() + value.len() + 4);
    let mut written = false;

    for line in text.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        if line_key(body) != Some(key) {
            out.push_str(line);
            continue;
        }
        if written {
            continue;
        }
        let ending = &line[body.len()..];
        out.push_str(key);
        out.push_str(" = ");
        out.push_str(value);
        out.push_str(if ending.is_empty() { "\n" } else { ending });
        written = true;
    }

    if !written {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(key);
        out.push_str(" = ");
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Read the value of `key` from the parameter file at `path`.
pub fn read_parameter(path: &Path, key: &str) -> GtResult<String> {
    let text = read_param_file(path)?;
    find_parameter(&text, key)
        .map(str::to_string)
        .ok_or_else(|| {
            MaterializeError::ParameterNotFound {
                file: path.display().to_string(),
                key: key.to_string(),
            }
            .into()
        })
}

/// Set `key` to `value` in the parameter file at `path`.
pub fn set_parameter(path: &Path, key: &str, value: &str) -> GtResult<()> {
    let text = read_param_file(path)?;
    fs::write(path, rewrite_parameter(&text, key, value))?;
    debug!("Set {} = {} in {}", key, value, path.display());
    Ok(())
}

fn read_param_file(path: &Path) -> GtResult<String> {
    if !path.is_file() {
        return Err(MaterializeError::MissingTemplate {
            path: path.display().to_string(),
        }
        .into());
    }
    Ok(fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL_INI: &str = "\
[clip]
# learning rate for fine-tuning
base_learning_rate = 0.0001
train_epoch_num = 100
model_type = RN50   # backbone
batch_size=32
";

    #[test]
    fn rewrite_replaces_only_the_key_line() {
        let out = rewrite_parameter(MODEL_INI, "model_type", "ViT-B/32");
        let before: Vec<&str> = MODEL_INI.lines().collect();
        let after: Vec<&str> = out.lines().collect();

        assert_eq!(before.len(), after.len());
        for (b, a) in before.iter().zip(&after) {
            if b.starts_with("model_type") {
                assert_eq!(*a, "model_type = ViT-B/32");
            } else {
                assert_eq!(b, a);
            }
        }
        assert_eq!(
            out.lines().filter(|l| l.starts_with("model_type")).count(),
            1
        );
    }

    #[test]
    fn rewrite_collapses_duplicates() {
        let text = "lr = 1\nother = x\nlr = 2\n";
        assert_eq!(rewrite_parameter(text, "lr", "3"), "lr = 3\nother = x\n");
    }

    #[test]
    fn rewrite_appends_missing_key() {
        assert_eq!(rewrite_parameter("a = 1", "b", "2"), "a = 1\nb = 2\n");
        assert_eq!(rewrite_parameter("", "b", "2"), "b = 2\n");
    }

    #[test]
    fn rewrite_ignores_prefix_and_commented_keys() {
        let text = "# lr = 0\nlr_decay = 0.9\nlr = 0.1\n";
        let out = rewrite_parameter(text, "lr", "0.5");
        assert_eq!(out, "# lr = 0\nlr_decay = 0.9\nlr = 0.5\n");
    }

    #[test]
    fn rewrite_keeps_crlf_endings() {
        let out = rewrite_parameter("a = 1\r\nb = 2\r\n", "a", "9");
        assert_eq!(out, "a = 9\r\nb = 2\r\n");
    }

    #[test]
    fn find_strips_inline_comments() {
        assert_eq!(find_parameter(MODEL_INI, "model_type"), Some("RN50"));
        assert_eq!(find_parameter(MODEL_INI, "batch_size"), Some("32"));
        assert_eq!(find_parameter(MODEL_INI, "missing"), None);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main_para.ini");
        fs::write(&path, "expr_name = exp11\na_few_shot_samp_count = 10\n").unwrap();

        set_parameter(&path, "a_few_shot_samp_count", "150").unwrap();
        assert_eq!(read_parameter(&path, "a_few_shot_samp_count").unwrap(), "150");
        assert_eq!(read_parameter(&path, "expr_name").unwrap(), "exp11");

        let err = read_parameter(&path, "network_setting_ini").unwrap_err();
        assert!(err.to_string().contains("network_setting_ini"));

        let err = set_parameter(&dir.path().join("absent.ini"), "k", "v").unwrap_err();
        assert!(err.to_string().contains("absent.ini"));
    }
}
