use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::errors::WardenError;
use super::finding::{Finding, FindingStatus, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    Network,
    Web,
    Directory,
    Full,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Web => "web",
            Self::Directory => "directory",
            Self::Full => "full",
        }
    }

    pub fn parse(value: &str) -> Result<Self, WardenError> {
        match value.trim().to_lowercase().as_str() {
            "network" => Ok(Self::Network),
            "web" => Ok(Self::Web),
            "directory" => Ok(Self::Directory),
            "full" => Ok(Self::Full),
            other => Err(WardenError::Config(format!("Unknown scan type: {}", other))),
        }
    }
}

impl std::fmt::Display for ScanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self, WardenError> {
        match value {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "cancelling" => Ok(Self::Cancelling),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(WardenError::Internal(format!("Unknown scan status: {}", other))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Statuses that count against a principal's concurrency budget.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running | Self::Cancelling)
    }

    pub fn can_transition_to(&self, next: ScanStatus) -> bool {
        use ScanStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Cancelling)
                | (Running, Completed)
                | (Running, Failed)
                | (Cancelling, Cancelled)
                | (Cancelling, Completed)
                | (Cancelling, Failed)
        )
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-severity finding counts. Always recomputed from the finding set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub info: u32,
}

impl SeverityCounts {
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut counts = Self::default();
        for finding in findings.iter().filter(|f| f.status != FindingStatus::FalsePositive) {
            match finding.severity {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
                Severity::Info => counts.info += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> u32 {
        self.critical + self.high + self.medium + self.low + self.info
    }
}

/// Outcome of one tool invocation, kept on the scan for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRun {
    pub tool: String,
    pub succeeded: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
    pub id: String,
    pub name: String,
    pub principal: String,
    pub targets: Vec<String>,
    pub scan_type: ScanType,
    pub status: ScanStatus,
    pub progress_percent: u8,
    pub counts: SeverityCounts,
    /// Explicit tool list; `None` means the scan type's default set.
    pub tools: Option<Vec<String>>,
    /// Per-tool options keyed by tool name, deserialized by each runner.
    #[serde(default)]
    pub tool_options: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub tool_runs: Vec<ToolRun>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<i64>,
}

impl Scan {
    pub fn new(name: &str, principal: &str, targets: Vec<String>, scan_type: ScanType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            principal: principal.to_string(),
            targets,
            scan_type,
            status: ScanStatus::Pending,
            progress_percent: 0,
            counts: SeverityCounts::default(),
            tools: None,
            tool_options: BTreeMap::new(),
            tool_runs: Vec::new(),
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            duration_secs: None,
        }
    }

    /// Apply a status change, stamping lifecycle timestamps.
    pub fn transition(&mut self, next: ScanStatus) -> Result<(), WardenError> {
        if !self.status.can_transition_to(next) {
            return Err(WardenError::InvalidTransition(format!(
                "scan {}: {} -> {}",
                self.id, self.status, next
            )));
        }
        let now = Utc::now();
        match next {
            ScanStatus::Running => self.started_at = Some(now),
            s if s.is_terminal() => {
                self.completed_at = Some(now);
                self.duration_secs = self.started_at.map(|start| (now - start).num_seconds());
            }
            _ => {}
        }
        self.status = next;
        Ok(())
    }

    /// Progress never moves backwards and never exceeds 100.
    pub fn advance_progress(&mut self, percent: u8) {
        self.progress_percent = self.progress_percent.max(percent.min(100));
    }

    pub fn options_for(&self, tool: &str) -> serde_json::Value {
        self.tool_options.get(tool).cloned().unwrap_or(serde_json::Value::Null)
    }

    pub fn successful_tools(&self) -> usize {
        self.tool_runs.iter().filter(|r| r.succeeded).count()
    }
}
