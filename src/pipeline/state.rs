use serde::Serialize;
use crate::errors::WardenError;
use crate::models::{Finding, FindingStatus, Scan, SeverityCounts, Severity};
use crate::repository::Repository;

/// What running one set of tools against a scan produced.
#[derive(Debug, Clone, Default)]
pub struct ToolSetOutcome {
    pub succeeded: Vec<String>,
    /// `(tool, error)` in completion order.
    pub failed: Vec<(String, String)>,
    /// Findings newly written by this run.
    pub created: Vec<Finding>,
    /// Cancellation was observed; some tools may not have started.
    pub cancelled: bool,
}

impl ToolSetOutcome {
    pub fn absorb(&mut self, other: ToolSetOutcome) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        self.created.extend(other.created);
        self.cancelled |= other.cancelled;
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// "All N tools failed: tool: error; tool: error"
pub fn failure_summary(failed: &[(String, String)]) -> String {
    let details: Vec<String> = failed.iter().map(|(tool, error)| format!("{}: {}", tool, error)).collect();
    format!("All {} tools failed: {}", failed.len(), details.join("; "))
}

/// Result of one automated run, phase by phase.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AutomationReport {
    pub scan_id: String,
    pub phases_run: Vec<String>,
    pub tools_succeeded: Vec<String>,
    pub tools_failed: Vec<(String, String)>,
    /// Ids of original findings confirmed by exploitation.
    pub exploited: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Operator follow-ups derived from the final finding set.
pub fn next_steps(findings: &[Finding]) -> Vec<String> {
    let live: Vec<&Finding> = findings.iter().filter(|f| f.status != FindingStatus::FalsePositive).collect();
    let mut steps = Vec::new();

    let critical = live.iter().filter(|f| f.severity == Severity::Critical).count();
    if critical > 0 {
        steps.push(format!("Remediate {} critical finding(s) immediately", critical));
    }
    let high = live.iter().filter(|f| f.severity == Severity::High).count();
    if high > 0 {
        steps.push(format!("Schedule remediation for {} high severity finding(s)", high));
    }
    if live.iter().any(|f| f.dedup_key.starts_with("cred:")) {
        steps.push("Rotate credentials that were recovered during the scan".to_string());
    }
    if live.iter().any(|f| f.status == FindingStatus::Open) {
        steps.push("Review open findings and mark false positives".to_string());
    }
    steps
}

/// A scan with its findings, as shown by `warden status`.
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub scan: Scan,
    pub findings: Vec<Finding>,
}

impl ScanSummary {
    pub async fn load(repo: &dyn Repository, scan_id: &str) -> Result<Self, WardenError> {
        let scan = repo.load_scan(scan_id).await?;
        let findings = repo.list_findings(scan_id).await?;
        Ok(Self { scan, findings })
    }

    pub fn counts(&self) -> SeverityCounts {
        self.scan.counts
    }

    pub fn failed_tools(&self) -> Vec<(&str, &str)> {
        self.scan
            .tool_runs
            .iter()
            .filter(|r| !r.succeeded)
            .map(|r| (r.tool.as_str(), r.error.as_deref().unwrap_or("unknown error")))
            .collect()
    }
}
