use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use crate::errors::WardenError;
use super::policy::{render_pipeline, CommandPolicy};
use super::{ProcessBackend, ProcessOutput, ProcessRequest};

/// Policy-checked process launcher shared by tool runners and the agent.
pub struct ProcessExecutor {
    policy: CommandPolicy,
    backend: Arc<dyn ProcessBackend>,
}

impl ProcessExecutor {
    pub fn new(policy: CommandPolicy, backend: Arc<dyn ProcessBackend>) -> Self {
        Self { policy, backend }
    }

    pub fn policy(&self) -> &CommandPolicy {
        &self.policy
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run an argv directly. Nothing here is interpreted by a shell.
    pub async fn run(&self, argv: Vec<String>, timeout: Duration) -> Result<ProcessOutput, WardenError> {
        if let Err(e) = self.policy.check_argv(&argv) {
            warn!(program = argv.first().map(String::as_str).unwrap_or(""), error = %e, "Command rejected");
            return Err(e);
        }
        debug!(argv = ?argv, backend = self.backend.name(), "Running command");
        self.backend.run(&ProcessRequest { argv, timeout }).await
    }

    /// Run a free-form command line, allowing only pipes between allow-listed
    /// binaries.
    pub async fn run_shell(&self, command: &str, timeout: Duration) -> Result<ProcessOutput, WardenError> {
        let segments = match self.policy.parse_shell(command) {
            Ok(segments) => segments,
            Err(e) => {
                warn!(error = %e, "Shell command rejected");
                return Err(e);
            }
        };

        let argv = if segments.len() == 1 {
            segments.into_iter().flatten().collect()
        } else {
            vec!["sh".to_string(), "-c".to_string(), render_pipeline(&segments)]
        };
        debug!(argv = ?argv, backend = self.backend.name(), "Running shell command");
        self.backend.run(&ProcessRequest { argv, timeout }).await
    }
}
