use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::exec::{CreateExecOptions, StartExecResults};
use futures::StreamExt;
use crate::errors::WardenError;
use crate::process::{ProcessBackend, ProcessOutput, ProcessRequest};
use super::manager::ContainerManager;
use tracing::{debug, warn};

/// Exit statuses coreutils `timeout` reports when it had to kill the command.
const TIMEOUT_EXIT_CODES: &[i64] = &[124, 137];
/// Extra time given to the exec stream beyond the in-container deadline.
const STREAM_GRACE: Duration = Duration::from_secs(5);

/// Runs commands inside the tools container through `docker exec`.
pub struct ContainerBackend {
    manager: Arc<ContainerManager>,
}

impl ContainerBackend {
    /// Make sure the container is up before handing out a backend for it.
    pub async fn connect(manager: Arc<ContainerManager>) -> Result<Self, WardenError> {
        manager.ensure_running().await?;
        Ok(Self { manager })
    }

    async fn collect(&self, exec_id: &str, stdout: &mut Vec<u8>, stderr: &mut Vec<u8>) -> Result<(), WardenError> {
        let started = self.manager.docker().start_exec(exec_id, None).await?;
        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        stdout.extend_from_slice(&message)
                    }
                    Ok(LogOutput::StdErr { message }) => stderr.extend_from_slice(&message),
                    Ok(LogOutput::StdIn { .. }) => {}
                    Err(e) => {
                        warn!(error = %e, "Exec stream error");
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProcessBackend for ContainerBackend {
    async fn run(&self, request: &ProcessRequest) -> Result<ProcessOutput, WardenError> {
        let secs = request.timeout.as_secs().max(1);
        let mut cmd = vec!["timeout".to_string(), "-s".to_string(), "KILL".to_string(), format!("{}s", secs)];
        cmd.extend(request.argv.iter().cloned());
        debug!(container = %self.manager.container_name(), argv = ?cmd, "Executing in container");

        let exec = self.manager.docker().create_exec(
            self.manager.container_name(),
            CreateExecOptions {
                cmd: Some(cmd),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                ..Default::default()
            },
        ).await
        .map_err(|e| WardenError::Container(format!("Failed to create exec: {}", e)))?;

        let started = Instant::now();
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let streamed = tokio::time::timeout(
            Duration::from_secs(secs) + STREAM_GRACE,
            self.collect(&exec.id, &mut stdout, &mut stderr),
        ).await;

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        match streamed {
            Ok(result) => result?,
            Err(_) => return Err(WardenError::CommandTimeout { secs, stdout }),
        }

        let inspect = self.manager.docker().inspect_exec(&exec.id).await?;
        let exit_code = inspect.exit_code;
        if exit_code.is_some_and(|c| TIMEOUT_EXIT_CODES.contains(&c)) && started.elapsed() >= request.timeout {
            return Err(WardenError::CommandTimeout { secs, stdout });
        }

        Ok(ProcessOutput {
            stdout,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: exit_code.and_then(|c| i32::try_from(c).ok()),
            duration: started.elapsed(),
        })
    }

    fn name(&self) -> &'static str {
        "container"
    }
}
