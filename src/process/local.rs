use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use crate::errors::WardenError;
use super::{ProcessBackend, ProcessOutput, ProcessRequest};

/// Output beyond this many bytes per stream is dropped.
const MAX_CAPTURE_BYTES: usize = 8 * 1024 * 1024;
/// How long to wait for pipe readers after the group has been killed.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Runs commands on the host, each in its own process group so a timeout or
/// cancellation takes down everything the tool spawned.
#[derive(Debug, Default, Clone)]
pub struct LocalBackend;

impl LocalBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessBackend for LocalBackend {
    async fn run(&self, request: &ProcessRequest) -> Result<ProcessOutput, WardenError> {
        let (program, args) = request
            .argv
            .split_first()
            .ok_or_else(|| WardenError::CommandRejected("empty command".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            WardenError::ToolFailed(format!("failed to start {}: {}", program, e))
        })?;
        let mut group = ProcessGroupGuard::new(child.id());
        debug!(program = %program, pid = ?child.id(), "Process started");

        let stdout_buf = Arc::new(Mutex::new(Vec::new()));
        let stderr_buf = Arc::new(Mutex::new(Vec::new()));
        let readers = [
            child.stdout.take().map(|s| tokio::spawn(capture(s, stdout_buf.clone()))),
            child.stderr.take().map(|s| tokio::spawn(capture(s, stderr_buf.clone()))),
        ];

        match tokio::time::timeout(request.timeout, child.wait()).await {
            Ok(status) => {
                let status = status?;
                group.disarm();
                join_readers(readers).await;
                Ok(ProcessOutput {
                    stdout: snapshot(&stdout_buf),
                    stderr: snapshot(&stderr_buf),
                    exit_code: status.code(),
                    duration: started.elapsed(),
                })
            }
            Err(_) => {
                warn!(program = %program, timeout_secs = request.timeout.as_secs(), "Process timed out, killing group");
                group.kill();
                let _ = child.wait().await;
                let _ = tokio::time::timeout(DRAIN_GRACE, join_readers(readers)).await;
                Err(WardenError::CommandTimeout {
                    secs: request.timeout.as_secs(),
                    stdout: snapshot(&stdout_buf),
                })
            }
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

async fn capture<R: AsyncRead + Unpin>(mut reader: R, sink: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if let Ok(mut buf) = sink.lock() {
                    let room = MAX_CAPTURE_BYTES.saturating_sub(buf.len());
                    buf.extend_from_slice(&chunk[..n.min(room)]);
                }
            }
        }
    }
}

async fn join_readers(readers: [Option<JoinHandle<()>>; 2]) {
    for reader in readers.into_iter().flatten() {
        let _ = reader.await;
    }
}

fn snapshot(buf: &Arc<Mutex<Vec<u8>>>) -> String {
    buf.lock()
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default()
}

/// Kills the child's process group on drop unless disarmed. Dropping the
/// future running a command (scan cancellation) therefore also stops every
/// process the tool forked.
struct ProcessGroupGuard {
    pgid: Option<i32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid.and_then(|p| i32::try_from(p).ok()) }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: i32) {
    // SAFETY: killpg only sends a signal; a stale pgid yields ESRCH.
    let rc = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if rc != 0 {
        debug!(pgid, error = %std::io::Error::last_os_error(), "killpg failed");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: i32) {}
