use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::errors::WardenError;
use crate::models::{ToolPayload, ToolResult};
use crate::process::{ProcessExecutor, ProcessOutput};
use crate::utils::truncation::truncate_error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCategory {
    NetworkScanning,
    WebScanning,
    WebFuzzing,
    VulnerabilityScanning,
    SqlInjection,
    CredentialAttack,
    Exploitation,
    PostExploitation,
    ReconOsint,
    ActiveDirectory,
    SslTls,
    Pivoting,
    PrivilegeEscalation,
}

impl ToolCategory {
    pub const ALL: &'static [ToolCategory] = &[
        Self::NetworkScanning,
        Self::WebScanning,
        Self::WebFuzzing,
        Self::VulnerabilityScanning,
        Self::SqlInjection,
        Self::CredentialAttack,
        Self::Exploitation,
        Self::PostExploitation,
        Self::ReconOsint,
        Self::ActiveDirectory,
        Self::SslTls,
        Self::Pivoting,
        Self::PrivilegeEscalation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkScanning => "network-scanning",
            Self::WebScanning => "web-scanning",
            Self::WebFuzzing => "web-fuzzing",
            Self::VulnerabilityScanning => "vulnerability-scanning",
            Self::SqlInjection => "sql-injection",
            Self::CredentialAttack => "credential-attack",
            Self::Exploitation => "exploitation",
            Self::PostExploitation => "post-exploitation",
            Self::ReconOsint => "recon-osint",
            Self::ActiveDirectory => "active-directory",
            Self::SslTls => "ssl-tls",
            Self::Pivoting => "pivoting",
            Self::PrivilegeEscalation => "privilege-escalation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let wanted = value.trim().to_lowercase().replace('_', "-");
        Self::ALL.iter().copied().find(|c| c.as_str() == wanted)
    }
}

impl std::fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform contract over one external security tool.
///
/// Runners translate their typed options into an argv, launch it through the
/// shared process executor and parse the tool's output into a
/// [`ToolPayload`]. Options arrive as JSON and are deserialized into each
/// runner's own struct; `Value::Null` means all defaults.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    fn name(&self) -> &'static str;

    fn category(&self) -> ToolCategory;

    fn validate(&self, targets: &[String], options: &Value) -> bool;

    async fn execute(
        &self,
        targets: &[String],
        options: &Value,
        timeout: Duration,
    ) -> Result<ToolResult, WardenError>;
}

/// Deserialize runner options, treating `null` as "use defaults".
pub fn parse_options<T: DeserializeOwned + Default>(tool: &str, options: &Value) -> Result<T, WardenError> {
    if options.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(options.clone())
        .map_err(|e| WardenError::ToolFailed(format!("{}: invalid options: {}", tool, e)))
}

/// A process that was killed by a signal, or exited non-zero without
/// printing anything, did not run. Several tools exit non-zero after a
/// normal run, so the exit code alone is not enough.
pub fn ensure_ran(tool: &str, output: &ProcessOutput) -> Result<(), WardenError> {
    match output.exit_code {
        None => Err(WardenError::ToolFailed(format!("{} was terminated by a signal", tool))),
        Some(code) if code != 0 && output.stdout.trim().is_empty() => Err(WardenError::ToolFailed(format!(
            "{} exited with code {}: {}",
            tool,
            code,
            truncate_error(output.stderr.trim())
        ))),
        Some(_) => Ok(()),
    }
}

/// Run one argv per target, sequentially, under a single shared deadline.
/// Output of all runs is concatenated; the first non-zero exit code wins.
pub async fn run_per_target<F>(
    executor: &ProcessExecutor,
    targets: &[String],
    timeout: Duration,
    build: F,
) -> Result<(Vec<String>, ProcessOutput), WardenError>
where
    F: Fn(&str) -> Vec<String>,
{
    let deadline = std::time::Instant::now() + timeout;
    let mut first_argv = Vec::new();
    let mut combined = ProcessOutput { exit_code: Some(0), ..Default::default() };

    for target in targets {
        let argv = build(target);
        if first_argv.is_empty() {
            first_argv = argv.clone();
        }
        let remaining = deadline.saturating_duration_since(std::time::Instant::now());
        if remaining.is_zero() {
            return Err(WardenError::CommandTimeout { secs: timeout.as_secs(), stdout: combined.stdout });
        }
        let output = match executor.run(argv, remaining).await {
            Ok(output) => output,
            Err(WardenError::CommandTimeout { stdout, .. }) => {
                combined.stdout.push_str(&stdout);
                return Err(WardenError::CommandTimeout { secs: timeout.as_secs(), stdout: combined.stdout });
            }
            Err(e) => return Err(e),
        };
        combined.stdout.push_str(&output.stdout);
        combined.stderr.push_str(&output.stderr);
        combined.duration += output.duration;
        if combined.exit_code == Some(0) {
            combined.exit_code = output.exit_code;
        }
    }
    Ok((first_argv, combined))
}

pub fn build_result(
    tool: &str,
    argv: Vec<String>,
    options: &Value,
    started_at: DateTime<Utc>,
    output: ProcessOutput,
    payload: ToolPayload,
) -> ToolResult {
    ToolResult {
        tool: tool.to_string(),
        argv,
        config: options.clone(),
        started_at,
        finished_at: Utc::now(),
        exit_code: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
        payload,
    }
}
