//! Host-side worker supervision.
//!
//! The host spawns the worker process, writes the serialized job to its
//! stdin, and waits for the single result line with a hard deadline. On
//! expiry the worker is terminated and the job reports `timeout`. A
//! semaphore bounds how many workers run at once; that pool is the only
//! process-wide sandbox state.

use crate::protocol::{SandboxJob, SandboxOutcome};
use crate::worker::WORKER_ARG;
use crate::DEADLINE_GRACE_MS;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;

#[derive(Debug, thiserror::Error)]
pub enum SandboxHostError {
    #[error("failed to spawn sandbox worker: {0}")]
    Spawn(std::io::Error),
    #[error("sandbox worker io: {0}")]
    Io(#[from] std::io::Error),
    #[error("sandbox worker exited without a result")]
    WorkerExited,
    #[error("sandbox worker produced a malformed result: {0}")]
    MalformedResult(#[from] serde_json::Error),
    #[error("sandbox worker pool is shut down")]
    PoolClosed,
}

/// Opaque handle to one running worker: `recv(deadline)` and `terminate()`
/// are the only operations.
pub struct WorkerHandle {
    child: Child,
}

impl WorkerHandle {
    pub async fn spawn(program: &PathBuf, job: &SandboxJob) -> Result<Self, SandboxHostError> {
        let mut child = Command::new(program)
            .arg(WORKER_ARG)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(SandboxHostError::Spawn)?;

        let mut line = serde_json::to_vec(job)?;
        line.push(b'\n');
        let mut stdin = child.stdin.take().ok_or(SandboxHostError::WorkerExited)?;
        stdin.write_all(&line).await?;
        // Closing stdin signals end-of-job to the worker.
        drop(stdin);

        Ok(Self { child })
    }

    /// Wait for the single result line. On deadline expiry the worker is
    /// killed and the job reports `timeout`.
    pub async fn recv(mut self, deadline: Duration) -> Result<SandboxOutcome, SandboxHostError> {
        let stdout = self.child.stdout.take().ok_or(SandboxHostError::WorkerExited)?;
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();

        let read = tokio::time::timeout(deadline, reader.read_line(&mut line)).await;
        match read {
            Err(_) => {
                self.terminate().await;
                Ok(SandboxOutcome::timeout(deadline.as_millis() as u64))
            }
            Ok(Ok(0)) => {
                self.terminate().await;
                Err(SandboxHostError::WorkerExited)
            }
            Ok(Ok(_)) => {
                let outcome: SandboxOutcome = serde_json::from_str(line.trim())?;
                // The worker exits on its own right after writing.
                let _ = self.child.wait().await;
                Ok(outcome)
            }
            Ok(Err(e)) => {
                self.terminate().await;
                Err(SandboxHostError::Io(e))
            }
        }
    }

    pub async fn terminate(&mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
    }
}

/// Process-wide sandbox worker pool: a spawn target plus a concurrency
/// bound.
#[derive(Clone)]
pub struct SandboxHost {
    program: PathBuf,
    permits: Arc<Semaphore>,
}

impl SandboxHost {
    /// Workers are spawned from the current executable, which embeds the
    /// worker entry point behind the argv marker.
    pub fn new(max_workers: usize) -> std::io::Result<Self> {
        Ok(Self::with_program(std::env::current_exe()?, max_workers))
    }

    pub fn with_program(program: PathBuf, max_workers: usize) -> Self {
        Self {
            program,
            permits: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// Execute one job in a fresh worker process.
    pub async fn execute(&self, job: SandboxJob) -> Result<SandboxOutcome, SandboxHostError> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SandboxHostError::PoolClosed)?;

        let handle = WorkerHandle::spawn(&self.program, &job).await?;
        let deadline = Duration::from_millis(job.deadline_ms + DEADLINE_GRACE_MS);
        tracing::debug!(
            deadline_ms = job.deadline_ms,
            source_bytes = job.source.len(),
            "sandbox worker spawned"
        );
        let outcome = handle.recv(deadline).await;
        if let Ok(result) = &outcome {
            tracing::debug!(status = ?result.status, duration_ms = result.duration_ms, "sandbox worker finished");
        }
        outcome
    }
}
