//! Runs the training command of a trial as a shell subprocess.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use gt_types::{ExecutionError, GtResult};
use tokio::process::Command;
use tracing::{debug, info};

/// Executes one training run inside a prepared trial directory.
#[async_trait]
pub trait TrainingRunner: Send + Sync {
    /// Run `command` in `work_dir` with stdout and stderr captured in
    /// `work_dir/stdout_file`. Only a zero exit status counts as success.
    async fn run(
        &self,
        work_dir: &Path,
        command: &str,
        stdout_file: &str,
        env: &BTreeMap<String, String>,
    ) -> GtResult<()>;
}

/// Runs commands through `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

#[async_trait]
impl TrainingRunner for ShellRunner {
    async fn run(
        &self,
        work_dir: &Path,
        command: &str,
        stdout_file: &str,
        env: &BTreeMap<String, String>,
    ) -> GtResult<()> {
        let spawn_failed = |e: std::io::Error| ExecutionError::SpawnFailed {
            command: command.to_string(),
            message: e.to_string(),
        };

        let out = File::create(work_dir.join(stdout_file)).map_err(spawn_failed)?;
        let err = out.try_clone().map_err(spawn_failed)?;

        debug!("Running '{}' in {}", command, work_dir.display());
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(work_dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .kill_on_drop(true)
            .status()
            .await
            .map_err(spawn_failed)?;

        match status.code() {
            Some(0) => {
                info!("'{}' finished in {}", command, work_dir.display());
                Ok(())
            }
            Some(code) => Err(ExecutionError::NonZeroExit {
                command: command.to_string(),
                code,
            }
            .into()),
            None => Err(ExecutionError::Terminated {
                command: command.to_string(),
            }
            .into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gt_types::GtError;

    #[tokio::test]
    async fn captures_output_and_env() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = BTreeMap::new();
        env.insert("CUDA_VISIBLE_DEVICES".to_string(), "1".to_string());

        ShellRunner
            .run(
                dir.path(),
                "echo gpu=$CUDA_VISIBLE_DEVICES; echo oops >&2; touch made_here",
                "screen_output.txt",
                &env,
            )
            .await
            .unwrap();

        let output = std::fs::read_to_string(dir.path().join("screen_output.txt")).unwrap();
        assert!(output.contains("gpu=1"));
        assert!(output.contains("oops"));
        assert!(dir.path().join("made_here").is_file());
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShellRunner
            .run(dir.path(), "exit 3", "out.txt", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GtError::Execution(ExecutionError::NonZeroExit { code: 3, .. })
        ));
    }

    #[tokio::test]
    async fn missing_work_dir_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShellRunner
            .run(&dir.path().join("nope"), "true", "out.txt", &BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GtError::Execution(ExecutionError::SpawnFailed { .. })
        ));
    }
}
