use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use crate::llm::ChatMessage;
use crate::utils::truncation::truncate_chars;

/// Characters of tool output kept in the tool-call log.
pub const LOGGED_OUTPUT_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Termination {
    /// The model called `task_complete`.
    Complete,
    /// The iteration budget ran out first.
    Exhausted,
    /// The provider failed and no fallback could answer.
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub iteration: u32,
    pub tool: String,
    pub arguments: Value,
    pub output: String,
    pub is_error: bool,
    pub at: DateTime<Utc>,
}

/// Outcome of one autonomous run.
#[derive(Debug, Clone, Serialize)]
pub struct AgentReport {
    pub task: String,
    pub provider: String,
    pub model: String,
    pub complete: bool,
    pub termination: Termination,
    pub summary: String,
    pub iterations: u32,
    pub tool_calls: Vec<ToolCallRecord>,
    pub findings_count: u32,
    pub critical_findings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Conversation and bookkeeping for a single run. Discarded once the report
/// is built.
pub struct AgentSession {
    pub task: String,
    pub messages: Vec<ChatMessage>,
    pub iterations: u32,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Token of the platform session opened by `login`.
    pub login_token: Option<String>,
    pub last_text: Option<String>,
    started_at: DateTime<Utc>,
    termination: Option<(Termination, String)>,
    findings_count: u32,
    critical_findings: Vec<String>,
}

impl AgentSession {
    pub fn new(task: &str) -> Self {
        Self {
            task: task.to_string(),
            messages: vec![ChatMessage::user(task)],
            iterations: 0,
            tool_calls: Vec::new(),
            login_token: None,
            last_text: None,
            started_at: Utc::now(),
            termination: None,
            findings_count: 0,
            critical_findings: Vec::new(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.termination.is_some()
    }

    pub fn log_call(&mut self, tool: &str, arguments: &Value, output: &str, is_error: bool) {
        self.tool_calls.push(ToolCallRecord {
            iteration: self.iterations,
            tool: tool.to_string(),
            arguments: arguments.clone(),
            output: truncate_chars(output, LOGGED_OUTPUT_CHARS),
            is_error,
            at: Utc::now(),
        });
    }

    pub fn complete(&mut self, summary: &str, findings_count: u32, critical_findings: Vec<String>) {
        self.findings_count = findings_count;
        self.critical_findings = critical_findings;
        self.termination = Some((Termination::Complete, summary.to_string()));
    }

    pub fn fail(&mut self, error: &str) {
        let summary = match &self.last_text {
            Some(text) => format!("{} (stopped on error: {})", text, error),
            None => format!("Agent stopped on error: {}", error),
        };
        self.termination = Some((Termination::Error, summary));
    }

    /// Close out the run. A session that never terminated ran out of
    /// iterations; its summary falls back to the last text the model wrote.
    pub fn into_report(self, provider: &str, model: &str) -> AgentReport {
        let (termination, summary) = self.termination.unwrap_or_else(|| {
            let summary = match self.last_text.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
                Some(text) => text.to_string(),
                None => format!(
                    "Iteration limit reached after {} iteration(s) and {} tool call(s) without task completion",
                    self.iterations,
                    self.tool_calls.len()
                ),
            };
            (Termination::Exhausted, summary)
        });
        AgentReport {
            task: self.task,
            provider: provider.to_string(),
            model: model.to_string(),
            complete: termination == Termination::Complete,
            termination,
            summary,
            iterations: self.iterations,
            tool_calls: self.tool_calls,
            findings_count: self.findings_count,
            critical_findings: self.critical_findings,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exhausted_summary_uses_last_text() {
        let mut session = AgentSession::new("scan 10.0.0.1");
        session.iterations = 8;
        session.last_text = Some("Port 22 looks interesting".into());
        let report = session.into_report("anthropic", "m");
        assert!(!report.complete);
        assert_eq!(report.termination, Termination::Exhausted);
        assert_eq!(report.summary, "Port 22 looks interesting");
    }

    #[test]
    fn test_exhausted_summary_never_empty() {
        let mut session = AgentSession::new("task");
        session.iterations = 3;
        let report = session.into_report("p", "m");
        assert!(report.summary.contains("3 iteration"));
    }

    #[test]
    fn test_logged_output_truncated() {
        let mut session = AgentSession::new("task");
        session.log_call("shell_command", &json!({"command": "cat big"}), &"x".repeat(2000), false);
        assert_eq!(session.tool_calls[0].output.len(), LOGGED_OUTPUT_CHARS);
    }

    #[test]
    fn test_complete_carries_findings() {
        let mut session = AgentSession::new("task");
        session.complete("done", 3, vec!["CVE-2021-41773".into()]);
        let report = session.into_report("p", "m");
        assert!(report.complete);
        assert_eq!(report.findings_count, 3);
        assert_eq!(report.critical_findings.len(), 1);
    }
}
