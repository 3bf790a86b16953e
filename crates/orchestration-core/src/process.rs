//! OS-process isolation for a single task's execution: one `tokio::process`
//! child per task, stdout/stderr captured, killed on timeout or on `Drop`.
//! Adapted from the sandboxed-subprocess runner pattern used elsewhere in
//! this workspace, generalized from a fixed Docker-sandboxed Python
//! interpreter to an arbitrary shell command per task.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::time;
use tracing::{debug, info, warn};

use crate::graph::TaskRunner;
use crate::model::{Task, TaskResult};

/// How much of the combined stdout/stderr history `ProcessTaskRunner` keeps
/// around for the interpreter's `log_tail` upload (spec §4.1 REPORTING).
const LOG_TAIL_BYTES: usize = 8192;

#[derive(Debug, Clone)]
pub struct ProcessRunnerConfig {
    pub shell: String,
    pub timeout: Duration,
    pub env: Vec<(String, String)>,
}

impl Default for ProcessRunnerConfig {
    fn default() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
            timeout: Duration::from_secs(300),
            env: Vec::new(),
        }
    }
}

/// Runs a task's payload (interpreted as a UTF-8 shell script) as a child
/// process, isolated from the interpreter's own process and from every
/// other task running concurrently in the same wave.
#[derive(Debug, Clone)]
pub struct ProcessTaskRunner {
    config: ProcessRunnerConfig,
    log_tail: Arc<Mutex<String>>,
}

impl ProcessTaskRunner {
    pub fn new(config: ProcessRunnerConfig) -> Self {
        Self { config, log_tail: Arc::new(Mutex::new(String::new())) }
    }

    /// The most recent `LOG_TAIL_BYTES` of every task's combined stdout and
    /// stderr, oldest first. Uploaded alongside the outcome in `REPORTING`.
    pub fn log_tail(&self) -> String {
        self.log_tail.lock().unwrap().clone()
    }

    fn append_log(&self, task: &str, stdout: &[u8], stderr: &[u8]) {
        let mut buf = self.log_tail.lock().unwrap();
        if !String::from_utf8_lossy(stdout).trim().is_empty() {
            buf.push_str(&format!("[{task}] stdout: {}\n", String::from_utf8_lossy(stdout).trim_end()));
        }
        if !String::from_utf8_lossy(stderr).trim().is_empty() {
            buf.push_str(&format!("[{task}] stderr: {}\n", String::from_utf8_lossy(stderr).trim_end()));
        }
        if buf.len() > LOG_TAIL_BYTES {
            let cut = buf.len() - LOG_TAIL_BYTES;
            let boundary = (cut..buf.len()).find(|&i| buf.is_char_boundary(i)).unwrap_or(buf.len());
            buf.replace_range(..boundary, "");
        }
    }

    #[tracing::instrument(skip(self, task), fields(task = %task.name))]
    async fn run_internal(&self, task: &Task) -> TaskResult {
        let script = String::from_utf8_lossy(&task.payload).into_owned();

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(&script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &self.config.env {
            cmd.env(key, value);
        }

        let start = Instant::now();
        let mut child = match cmd.spawn().context("failed to spawn task process") {
            Ok(child) => child,
            Err(err) => return TaskResult::Failure { reason: err.to_string() },
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(async move { read_pipe(stdout).await });
        let stderr_task = tokio::spawn(async move { read_pipe(stderr).await });

        let wait_result = time::timeout(self.config.timeout, child.wait()).await;
        let (timed_out, status) = match wait_result {
            Ok(Ok(status)) => (false, Some(status)),
            Ok(Err(err)) => {
                warn!(task = %task.name, error = %err, "failed to wait for task process");
                (false, None)
            }
            Err(_elapsed) => {
                warn!(task = %task.name, "task process timed out; killing");
                let _ = child.kill().await;
                (true, child.wait().await.ok())
            }
        };

        let stdout_bytes = stdout_task.await.unwrap_or_default().unwrap_or_default();
        let stderr_bytes = stderr_task.await.unwrap_or_default().unwrap_or_default();
        self.append_log(&task.name, &stdout_bytes, &stderr_bytes);
        let duration = start.elapsed();
        let exit_code = status.and_then(|s| s.code());
        let success = !timed_out && exit_code == Some(0);

        debug!(
            task = %task.name,
            success,
            timed_out,
            duration_ms = duration.as_millis() as u64,
            "task process finished"
        );
        crate::metrics::record_task_duration(
            duration.as_millis() as u64,
            if success { "success" } else { "failure" },
        );

        if success {
            TaskResult::Success {
                output: serde_json::json!({
                    "stdout": String::from_utf8_lossy(&stdout_bytes),
                }),
            }
        } else if timed_out {
            TaskResult::Failure { reason: "task process timed out".to_string() }
        } else {
            TaskResult::Failure {
                reason: format!(
                    "task exited with code {:?}: {}",
                    exit_code,
                    String::from_utf8_lossy(&stderr_bytes)
                ),
            }
        }
    }
}

#[async_trait]
impl TaskRunner for ProcessTaskRunner {
    async fn run(&self, task: &Task) -> TaskResult {
        self.run_internal(task).await
    }
}

async fn read_pipe<R>(pipe: Option<R>) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut buffer = Vec::new();
    if let Some(mut reader) = pipe {
        reader.read_to_end(&mut buffer).await.context("failed to drain task pipe")?;
    }
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_reports_success() {
        let runner = ProcessTaskRunner::new(ProcessRunnerConfig::default());
        let task = Task::new("echo", b"echo hello".to_vec());
        let result = runner.run(&task).await;
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn failing_command_reports_failure() {
        let runner = ProcessTaskRunner::new(ProcessRunnerConfig::default());
        let task = Task::new("fail", b"exit 1".to_vec());
        let result = runner.run(&task).await;
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn log_tail_accumulates_across_tasks() {
        let runner = ProcessTaskRunner::new(ProcessRunnerConfig::default());
        runner.run(&Task::new("one", b"echo first".to_vec())).await;
        runner.run(&Task::new("two", b"echo second >&2".to_vec())).await;

        let tail = runner.log_tail();
        assert!(tail.contains("first"));
        assert!(tail.contains("second"));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let mut config = ProcessRunnerConfig::default();
        config.timeout = Duration::from_millis(50);
        let runner = ProcessTaskRunner::new(config);
        let task = Task::new("slow", b"sleep 5".to_vec());
        let result = runner.run(&task).await;
        match result {
            TaskResult::Failure { reason } => assert!(reason.contains("timed out")),
            TaskResult::Success { .. } => panic!("expected timeout failure"),
        }
    }
}
