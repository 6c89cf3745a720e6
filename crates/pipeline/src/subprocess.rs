//! Pipeline adapter for an external executable.
//!
//! The child runs inside the task's working directory. It receives the
//! prompt, parameters and execution context as a JSON object on stdin; the
//! context is also exported as `PLANGEN_*` environment variables. Each stdout line of the
//! form `{"progress": 42, "message": "..."}` is forwarded to the progress
//! callback; other lines are logged at debug level. If the callback aborts,
//! the child is killed.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use crate::{Pipeline, PipelineConfig, PipelineError, PipelineReturn, ProgressCallback};

/// Maximum stderr captured for the failure message (64 KiB).
const MAX_STDERR_BYTES: u64 = 64 * 1024;

/// One progress line on the child's stdout.
#[derive(Debug, Deserialize)]
struct ProgressLine {
    progress: f64,
    #[serde(default)]
    message: String,
}

/// Runs the pipeline as a child process.
#[derive(Debug, Clone)]
pub struct SubprocessPipeline {
    program: String,
    args: Vec<String>,
}

impl SubprocessPipeline {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Pipeline for SubprocessPipeline {
    async fn run(
        &self,
        config: &PipelineConfig,
        on_progress: &dyn ProgressCallback,
    ) -> Result<PipelineReturn, PipelineError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&config.context.work_dir)
            .envs(config.context.env_vars())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(PipelineError::Spawn)?;
        tracing::debug!(program = %self.program, pid = child.id(), "Pipeline process started");

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(&stdin_payload(config))
                .map_err(|e| PipelineError::Other(format!("Failed to encode input: {e}")))?;
            // The child may exit without reading stdin; that is its business.
            let _ = stdin.write_all(&payload).await;
        }

        let stderr_task = tokio::spawn(read_capped(child.stderr.take()));

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                let Some(tick) = parse_progress_line(&line) else {
                    tracing::debug!(line = %line, "Pipeline output");
                    continue;
                };
                if let Err(abort) = on_progress.on_progress(tick.progress, &tick.message).await {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "Failed to kill aborted pipeline");
                    }
                    return Err(PipelineError::Aborted(abort));
                }
            }
        }

        let status = child.wait().await?;
        let stderr = stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(PipelineReturn {
                exit_code: status.code(),
            })
        } else {
            Err(PipelineError::Failed {
                exit_code: status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            })
        }
    }
}

fn stdin_payload(config: &PipelineConfig) -> serde_json::Value {
    serde_json::json!({
        "prompt": config.prompt,
        "parameters": config.parameters,
        "task_id": config.context.task_id,
        "user_id": config.context.user_id,
        "run_dir": config.context.work_dir.display().to_string(),
    })
}

fn parse_progress_line(line: &str) -> Option<ProgressLine> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Read a stream to the end, keeping at most [`MAX_STDERR_BYTES`].
async fn read_capped<R: AsyncRead + Unpin>(handle: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(h) = handle {
        let _ = h.take(MAX_STDERR_BYTES).read_to_end(&mut buf).await;
    }
    buf
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
