//! Execution of synthesized code in a separate process.
//!
//! The sandbox writes code to a fixed file in a working directory, runs the
//! configured interpreter there under a wall-clock timeout, and reports
//! which artifact files appeared. It isolates resources (directory,
//! process lifetime), not privileges: it is not a security boundary.

mod report;
mod snapshot;

pub use report::{SandboxExecutionReport, SandboxOutcome, STDERR_MARKER, TRUNCATED_MARKER};

use crate::cancellation::CancellationToken;
use crate::config::SandboxConfig;
use crate::core::Artifact;
use crate::errors::SandboxError;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Upper bound on captured bytes per stream.
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;


enum Ending {
    Exited(ExitStatus),
    TimedOut,
    Cancelled(String),
}

/// Runs synthesized code.
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SandboxConfig,
    producer: String,
}

impl Sandbox {
    /// Creates a sandbox with the given configuration.
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            producer: "sandbox".to_string(),
        }
    }

    /// Sets the `produced_by` tag recorded on artifacts.
    #[must_use]
    pub fn with_producer(mut self, producer: impl Into<String>) -> Self {
        self.producer = producer.into();
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Runs `code` in `workdir` with a timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError`] only if the directory cannot be prepared,
    /// the script cannot be written or the interpreter cannot be started.
    /// Once the process is running, every ending is an ordinary report.
    pub async fn run(
        &self,
        code: &str,
        workdir: &Path,
        timeout: Duration,
    ) -> Result<SandboxExecutionReport, SandboxError> {
        self.execute(code, workdir, timeout, None).await
    }

    /// Like [`Sandbox::run`], also killing the process when `token` is cancelled.
    ///
    /// # Errors
    ///
    /// Same as [`Sandbox::run`].
    pub async fn run_cancellable(
        &self,
        code: &str,
        workdir: &Path,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<SandboxExecutionReport, SandboxError> {
        self.execute(code, workdir, timeout, Some(token)).await
    }

    async fn execute(
        &self,
        code: &str,
        workdir: &Path,
        timeout: Duration,
        token: Option<&CancellationToken>,
    ) -> Result<SandboxExecutionReport, SandboxError> {
        let workdir_error = |source| SandboxError::Workdir {
            path: workdir.to_path_buf(),
            source,
        };

        tokio::fs::create_dir_all(workdir).await.map_err(workdir_error)?;
        let workdir = tokio::fs::canonicalize(workdir).await.map_err(workdir_error)?;
        let before = snapshot::artifact_files(&workdir, &self.config)
            .await
            .map_err(workdir_error)?;

        let script_path = workdir.join(&self.config.script_name);
        tokio::fs::write(&script_path, code)
            .await
            .map_err(|source| SandboxError::WriteScript {
                path: script_path.clone(),
                source,
            })?;
        let code_sha256 = hex::encode(Sha256::digest(code.as_bytes()));

        debug!(
            interpreter = %self.config.interpreter,
            script = %script_path.display(),
            sha256 = %code_sha256,
            "Launching sandbox process"
        );

        let mut command = Command::new(&self.config.interpreter);
        command
            .args(&self.config.args)
            .arg(&self.config.script_name)
            .current_dir(&workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own group, so anything the script forks can be killed with it.
        #[cfg(unix)]
        command.process_group(0);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|source| SandboxError::Launch {
            interpreter: self.config.interpreter.clone(),
            source,
        })?;
        let pid = child.id();

        let stdout = child.stdout.take().map(capture);
        let stderr = child.stderr.take().map(capture);

        let cancelled = async {
            match token {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let ending = tokio::select! {
            status = child.wait() => Ending::Exited(status.map_err(SandboxError::Wait)?),
            () = tokio::time::sleep(timeout) => Ending::TimedOut,
            reason = cancelled => Ending::Cancelled(reason),
        };

        let status = match &ending {
            Ending::Exited(status) => *status,
            Ending::TimedOut | Ending::Cancelled(_) => {
                kill_process_group(pid);
                if let Err(e) = child.start_kill() {
                    warn!(error = %e, "Failed to signal sandbox process");
                }
                child.wait().await.map_err(SandboxError::Wait)?
            }
        };
        let duration = started.elapsed();
        // Background jobs must not outlive the run, even after a clean exit.
        kill_process_group(pid);

        let grace = self.config.reader_grace();
        let (stdout, stderr) = futures::join!(collect(stdout, grace), collect(stderr, grace));

        let (timed_out, cancelled) = match &ending {
            Ending::Exited(_) => (false, false),
            Ending::TimedOut => {
                warn!(timeout_secs = timeout.as_secs_f64(), "Sandbox process timed out and was killed");
                (true, false)
            }
            Ending::Cancelled(reason) => {
                warn!(reason = %reason, "Sandbox process cancelled and was killed");
                (false, true)
            }
        };

        let (artifacts, snapshot_error) = match snapshot::artifact_files(&workdir, &self.config).await {
            Ok(after) => (
                after
                    .difference(&before)
                    .filter(|path| **path != script_path)
                    .map(|path| Artifact::discovered(path.clone(), self.producer.clone()))
                    .collect(),
                None,
            ),
            Err(e) => {
                warn!(error = %e, workdir = %workdir.display(), "Artifact scan after sandbox run failed");
                (BTreeSet::new(), Some(e.to_string()))
            }
        };

        let report = SandboxExecutionReport {
            exit_status: status.code(),
            stdout,
            stderr,
            timed_out,
            cancelled,
            artifacts,
            duration,
            script_path,
            code_sha256,
            snapshot_error,
        };

        info!(
            exit_status = ?report.exit_status,
            timed_out = report.timed_out,
            cancelled = report.cancelled,
            artifacts = report.artifacts.len(),
            duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            "Sandbox run finished"
        );

        Ok(report)
    }
}

/// Sends SIGKILL to the process group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(error = %e, pgid = pid, "Failed to kill sandbox process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[derive(Default)]
struct CaptureBuffer {
    bytes: Vec<u8>,
    truncated: bool,
}

impl CaptureBuffer {
    fn push(&mut self, chunk: &[u8]) {
        let room = MAX_CAPTURE_BYTES.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.bytes.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn take_text(&mut self) -> String {
        let mut text = String::from_utf8_lossy(&std::mem::take(&mut self.bytes)).into_owned();
        if self.truncated {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(TRUNCATED_MARKER);
            text.push('\n');
        }
        text
    }
}

type Captured = (JoinHandle<()>, Arc<Mutex<CaptureBuffer>>);

/// Drains a pipe into a shared buffer so partial output survives an
/// abandoned reader.
fn capture<R>(mut pipe: R) -> Captured
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = Arc::new(Mutex::new(CaptureBuffer::default()));
    let sink = buffer.clone();
    let handle = tokio::spawn(async move {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.lock().push(&chunk[..n]),
            }
        }
    });
    (handle, buffer)
}

/// Waits up to `grace` for a reader to hit EOF, then takes what it has.
///
/// A grandchild that inherited the pipe can hold it open after the
/// interpreter is gone.
async fn collect(captured: Option<Captured>, grace: Duration) -> String {
    let Some((handle, buffer)) = captured else {
        return String::new();
    };
    let abort = handle.abort_handle();
    if tokio::time::timeout(grace, handle).await.is_err() {
        abort.abort();
        debug!("Sandbox output pipe still open after grace period");
    }
    let text = buffer.lock().take_text();
    text
}
