//! Timed subprocess execution.
//!
//! The library is synchronous; subprocesses run on a private current-thread tokio
//! runtime so a hard timeout can be enforced. The runtime lives on its own thread, so
//! callers may themselves be running inside a tokio runtime.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Empty command")]
    EmptyCommand,

    #[error("Failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Subprocess runner panicked")]
    RunnerPanicked,
}

#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// None when the process was terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs `command` in `cwd`, optionally feeding `stdin`, and kills it after `timeout`.
pub fn run_command(
    command: &[String],
    cwd: &Path,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
) -> Result<CommandOutput, ProcessError> {
    let (program, args) = command.split_first().ok_or(ProcessError::EmptyCommand)?;
    std::thread::scope(|scope| {
        scope
            .spawn(move || run_on_private_runtime(program, args, cwd, stdin, timeout))
            .join()
            .unwrap_or(Err(ProcessError::RunnerPanicked))
    })
}

fn run_on_private_runtime(
    program: &str,
    args: &[String],
    cwd: &Path,
    stdin: Option<Vec<u8>>,
    timeout: Duration,
) -> Result<CommandOutput, ProcessError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&input).await {
                    tracing::debug!("Subprocess closed stdin early: {}", e);
                }
            });
        }

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                Ok(CommandOutput {
                    status: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            Err(_) => Err(ProcessError::Timeout(timeout)),
        }
    })
}
