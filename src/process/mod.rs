//! The single place external processes are launched from. Scan runners and
//! the agent both go through [`ProcessExecutor`], which applies the
//! [`CommandPolicy`] before handing the request to a backend.

pub mod executor;
pub mod local;
pub mod policy;

use std::time::Duration;
use async_trait::async_trait;
use crate::errors::WardenError;

pub use executor::ProcessExecutor;
pub use local::LocalBackend;
pub use policy::{CommandPolicy, DEFAULT_ALLOWED_COMMANDS};

#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub argv: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Where a validated argv actually runs. Implementations must terminate the
/// process when `timeout` elapses and return [`WardenError::CommandTimeout`]
/// with whatever stdout was captured.
#[async_trait]
pub trait ProcessBackend: Send + Sync {
    async fn run(&self, request: &ProcessRequest) -> Result<ProcessOutput, WardenError>;

    fn name(&self) -> &'static str;
}
