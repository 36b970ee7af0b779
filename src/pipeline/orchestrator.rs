use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::aggregator::ResultAggregator;
use crate::audit::AuditLog;
use crate::config::{AggregationMode, EngineConfig};
use crate::errors::WardenError;
use crate::events::{Notifier, ScanEvent};
use crate::models::{Finding, Scan, ScanStatus, ToolResult, ToolRun};
use crate::queue::ScanWorker;
use crate::safety::SafetyGate;
use crate::tools::ToolRegistry;
use crate::utils::truncation::truncate_error;
use super::state::{failure_summary, ToolSetOutcome};

/// How a single tool slot ended.
enum ToolAttempt {
    /// Cancellation was seen before the tool launched.
    NotStarted,
    /// Ran and was folded into the scan.
    Aggregated { tool: String, created: Vec<Finding> },
    /// Ran; aggregation and the run record are deferred to the end of the set.
    Succeeded { tool: String, result: ToolResult, started_at: DateTime<Utc>, percent: u8 },
    Failed { tool: String, error: String },
    Interrupted { tool: String },
}

/// Runs an admitted scan's tools and drives it to a terminal status.
pub struct ScanEngine {
    registry: ToolRegistry,
    gate: Arc<SafetyGate>,
    aggregator: Arc<ResultAggregator>,
    notifier: Arc<dyn Notifier>,
    audit: Option<Arc<AuditLog>>,
    config: EngineConfig,
}

impl ScanEngine {
    pub fn new(
        registry: ToolRegistry,
        gate: Arc<SafetyGate>,
        aggregator: Arc<ResultAggregator>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        Self { registry, gate, aggregator, notifier, audit: None, config }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn aggregator(&self) -> &Arc<ResultAggregator> {
        &self.aggregator
    }

    pub fn gate(&self) -> &Arc<SafetyGate> {
        &self.gate
    }

    pub fn audit(&self) -> Option<&Arc<AuditLog>> {
        self.audit.as_ref()
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Explicit override list, else the configured set for the scan type.
    pub fn tools_for(&self, scan: &Scan) -> Vec<String> {
        scan.tools.clone().unwrap_or_else(|| self.config.tools_for(scan.scan_type))
    }

    /// Run a scan end to end. Returns `None` when the scan was not pending
    /// (already cancelled, or picked up elsewhere).
    pub async fn execute(&self, scan_id: &str, cancel: CancellationToken) -> Result<Option<Scan>, WardenError> {
        let Some(scan) = self.begin(scan_id).await? else {
            return Ok(None);
        };
        let tools = self.tools_for(&scan);
        let outcome = self.run_tools(&scan, &tools, (0, 100), &cancel).await;
        self.finish(scan_id, &outcome).await.map(Some)
    }

    /// Re-check the gate and move a pending scan to running.
    pub async fn begin(&self, scan_id: &str) -> Result<Option<Scan>, WardenError> {
        let repo = self.aggregator.repository().clone();
        let scan = repo.load_scan(scan_id).await?;
        if scan.status != ScanStatus::Pending {
            info!(scan_id, status = %scan.status, "Scan is not pending, skipping");
            return Ok(None);
        }

        if let Err(e) = self.gate.check_start(&scan, repo.as_ref()).await {
            warn!(scan_id, error = %e, "Scan rejected at start");
            self.abort(scan_id, &e.to_string()).await?;
            return Ok(None);
        }

        let started = self
            .aggregator
            .update_scan(scan_id, |scan| scan.transition(ScanStatus::Running))
            .await;
        let scan = match started {
            Ok(scan) => scan,
            // Cancelled between the load and the transition.
            Err(WardenError::InvalidTransition(reason)) => {
                info!(scan_id, %reason, "Scan left pending before start");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let tools = self.tools_for(&scan);
        info!(scan_id, scan_type = %scan.scan_type, tools = ?tools, "Scan started");
        self.notifier.emit(ScanEvent::ScanStarted { scan_id: scan_id.to_string(), tools });
        Ok(Some(scan))
    }

    /// Run `tools` against the scan with bounded parallelism. Progress moves
    /// across `span` as tools finish. Individual tool errors are recorded
    /// on the scan and never abort the set.
    pub async fn run_tools(
        &self,
        scan: &Scan,
        tools: &[String],
        span: (u8, u8),
        cancel: &CancellationToken,
    ) -> ToolSetOutcome {
        let mut outcome = ToolSetOutcome::default();
        if tools.is_empty() {
            return outcome;
        }
        let total = tools.len();
        let finished = AtomicUsize::new(0);
        let parallelism = self.config.parallelism.max(1);

        // Collected first: a `map` closure inside the stream fails the
        // higher-ranked `Send` check in `ScanWorker::process`.
        let pending: Vec<_> = tools
            .iter()
            .map(|tool| self.attempt(scan, tool, total, span, &finished, cancel))
            .collect();
        let mut attempts = futures::stream::iter(pending).buffer_unordered(parallelism);

        let mut batch = Vec::new();
        while let Some(attempt) = attempts.next().await {
            match attempt {
                ToolAttempt::NotStarted => outcome.cancelled = true,
                ToolAttempt::Interrupted { tool } => {
                    debug!(scan_id = %scan.id, tool = %tool, "Tool interrupted by cancellation");
                    outcome.cancelled = true;
                }
                ToolAttempt::Failed { tool, error } => outcome.failed.push((tool, error)),
                ToolAttempt::Aggregated { tool, created } => {
                    outcome.created.extend(created);
                    outcome.succeeded.push(tool);
                }
                ToolAttempt::Succeeded { tool, result, started_at, percent } => {
                    batch.push((tool, result, started_at, percent))
                }
            }
        }
        drop(attempts);

        for (tool, result, started_at, percent) in batch {
            let run_error = match self.aggregator.aggregate(&scan.id, &result).await {
                Ok(aggregated) => {
                    outcome.created.extend(aggregated.created);
                    None
                }
                Err(e) => {
                    error!(scan_id = %scan.id, tool = %tool, error = %e, "Aggregation failed");
                    Some(format!("aggregation failed: {}", e))
                }
            };
            self.record_run(&scan.id, &tool, started_at, run_error.clone(), percent).await;
            match run_error {
                None => outcome.succeeded.push(tool),
                Some(error) => outcome.failed.push((tool, error)),
            }
        }
        outcome
    }

    async fn attempt(
        &self,
        scan: &Scan,
        tool: &str,
        total: usize,
        span: (u8, u8),
        finished: &AtomicUsize,
        cancel: &CancellationToken,
    ) -> ToolAttempt {
        if self.stop_requested(&scan.id, cancel).await {
            return ToolAttempt::NotStarted;
        }

        let started_at = Utc::now();
        let options = self.options_for(scan, tool);
        let result = self.run_tool(&scan.id, tool, &scan.targets, &options, cancel).await;

        let done = finished.fetch_add(1, Ordering::SeqCst) + 1;
        let percent = progress_at(span, done, total);

        let (attempt, run_error) = match result {
            Ok(result) if self.config.aggregation == AggregationMode::Batched => {
                return ToolAttempt::Succeeded { tool: tool.to_string(), result, started_at, percent };
            }
            Ok(result) => match self.aggregator.aggregate(&scan.id, &result).await {
                Ok(aggregated) => (ToolAttempt::Aggregated { tool: tool.to_string(), created: aggregated.created }, None),
                Err(e) => {
                    error!(scan_id = %scan.id, tool, error = %e, "Aggregation failed");
                    let error = format!("aggregation failed: {}", e);
                    (ToolAttempt::Failed { tool: tool.to_string(), error: error.clone() }, Some(error))
                }
            },
            Err(WardenError::Cancelled(_)) => (ToolAttempt::Interrupted { tool: tool.to_string() }, Some("cancelled".to_string())),
            Err(e) => {
                let error = truncate_error(&e.to_string());
                (ToolAttempt::Failed { tool: tool.to_string(), error: error.clone() }, Some(error))
            }
        };

        self.record_run(&scan.id, tool, started_at, run_error, percent).await;
        attempt
    }

    /// Launch one tool under the scan's cancellation token. Emits tool events
    /// and writes the audit record; does not aggregate.
    pub async fn run_tool(
        &self,
        scan_id: &str,
        tool: &str,
        targets: &[String],
        options: &Value,
        cancel: &CancellationToken,
    ) -> Result<ToolResult, WardenError> {
        let result = self.launch(scan_id, tool, targets, options, cancel).await;
        match &result {
            Ok(result) => {
                info!(scan_id, tool, duration_ms = result.duration_ms(), "Tool completed");
                self.notifier.emit(ScanEvent::ToolCompleted {
                    scan_id: scan_id.to_string(),
                    tool: tool.to_string(),
                    duration_ms: result.duration_ms(),
                });
                if let Some(audit) = &self.audit {
                    audit.record_tool_result(Some(scan_id), result).await;
                }
            }
            Err(WardenError::Cancelled(_)) => {}
            Err(e) => {
                warn!(scan_id, tool, error = %e, "Tool failed");
                self.notifier.emit(ScanEvent::ToolFailed {
                    scan_id: scan_id.to_string(),
                    tool: tool.to_string(),
                    error: e.to_string(),
                });
                if let Some(audit) = &self.audit {
                    audit
                        .record("tool_failed", json!({ "scan_id": scan_id, "tool": tool, "error": e.to_string() }))
                        .await;
                }
            }
        }
        result
    }

    async fn launch(
        &self,
        scan_id: &str,
        tool: &str,
        targets: &[String],
        options: &Value,
        cancel: &CancellationToken,
    ) -> Result<ToolResult, WardenError> {
        self.gate.check_resources().await?;
        let runner = self.registry.get(tool)?;
        if !runner.validate(targets, options) {
            return Err(WardenError::ToolFailed(format!("{}: invalid targets or options", runner.name())));
        }

        debug!(scan_id, tool = runner.name(), targets = ?targets, "Launching tool");
        self.notifier.emit(ScanEvent::ToolStarted { scan_id: scan_id.to_string(), tool: tool.to_string() });
        let timeout = Duration::from_secs(self.config.tool_timeout_secs);

        // Dropping the runner future kills the process group.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WardenError::Cancelled(format!("{} interrupted", runner.name()))),
            result = runner.execute(targets, options, timeout) => result,
        }
    }

    fn options_for(&self, scan: &Scan, tool: &str) -> Value {
        let options = scan.options_for(tool);
        if !options.is_null() {
            return options;
        }
        match self.registry.canonical_name(tool) {
            Some(canonical) => scan.options_for(canonical),
            None => Value::Null,
        }
    }

    /// True when the token fired or a cancel was recorded on the scan by
    /// another process. A recorded cancel also trips the token.
    async fn stop_requested(&self, scan_id: &str, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        match self.aggregator.repository().load_scan(scan_id).await {
            Ok(scan) if scan.status == ScanStatus::Cancelling => {
                info!(scan_id, "Cancellation recorded on scan");
                cancel.cancel();
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(scan_id, error = %e, "Could not poll scan status");
                false
            }
        }
    }

    async fn record_run(&self, scan_id: &str, tool: &str, started_at: DateTime<Utc>, error: Option<String>, percent: u8) {
        let run = ToolRun {
            tool: tool.to_string(),
            succeeded: error.is_none(),
            error,
            started_at,
            finished_at: Utc::now(),
        };
        let updated = self
            .aggregator
            .update_scan(scan_id, move |scan| {
                scan.tool_runs.push(run);
                scan.advance_progress(percent);
                Ok(())
            })
            .await;
        match updated {
            Ok(scan) => self.notifier.emit(ScanEvent::ScanProgress {
                scan_id: scan_id.to_string(),
                percent: scan.progress_percent,
            }),
            Err(e) => error!(scan_id, tool, error = %e, "Failed to record tool run"),
        }
    }

    /// Apply the finalization rule: cancelled if cancellation stopped work,
    /// failed if nothing succeeded, completed otherwise.
    pub async fn finish(&self, scan_id: &str, outcome: &ToolSetOutcome) -> Result<Scan, WardenError> {
        let cancelled = outcome.cancelled;
        let succeeded = !outcome.succeeded.is_empty();
        let summary = if outcome.failed.is_empty() {
            "No tools were run".to_string()
        } else {
            failure_summary(&outcome.failed)
        };

        let result = self
            .aggregator
            .update_scan(scan_id, move |scan| {
                if cancelled {
                    if scan.status == ScanStatus::Running {
                        scan.transition(ScanStatus::Cancelling)?;
                    }
                    scan.transition(ScanStatus::Cancelled)
                } else if succeeded {
                    scan.advance_progress(100);
                    scan.transition(ScanStatus::Completed)
                } else {
                    scan.error_message = Some(summary);
                    scan.transition(ScanStatus::Failed)
                }
            })
            .await;
        self.aggregator.release(scan_id);
        let scan = result?;

        match scan.status {
            ScanStatus::Completed => {
                info!(scan_id, findings = scan.counts.total(), tools = outcome.succeeded.len(), "Scan completed");
                self.notifier.emit(ScanEvent::ScanCompleted { scan_id: scan_id.to_string(), counts: scan.counts });
            }
            ScanStatus::Cancelled => {
                info!(scan_id, "Scan cancelled");
                self.notifier.emit(ScanEvent::ScanCancelled { scan_id: scan_id.to_string() });
            }
            _ => {
                let error = scan.error_message.clone().unwrap_or_default();
                warn!(scan_id, %error, "Scan failed");
                self.notifier.emit(ScanEvent::ScanFailed { scan_id: scan_id.to_string(), error });
            }
        }
        Ok(scan)
    }

    /// Force a non-terminal scan to failed with `reason`.
    pub async fn abort(&self, scan_id: &str, reason: &str) -> Result<(), WardenError> {
        let message = reason.to_string();
        let result = self
            .aggregator
            .update_scan(scan_id, move |scan| {
                if scan.status.is_terminal() {
                    return Ok(());
                }
                if scan.status == ScanStatus::Pending {
                    scan.transition(ScanStatus::Running)?;
                }
                scan.error_message = Some(message);
                scan.transition(ScanStatus::Failed)
            })
            .await;
        self.aggregator.release(scan_id);
        let scan = result?;
        if scan.status == ScanStatus::Failed {
            self.notifier.emit(ScanEvent::ScanFailed {
                scan_id: scan_id.to_string(),
                error: reason.to_string(),
            });
        }
        Ok(())
    }
}

fn progress_at(span: (u8, u8), done: usize, total: usize) -> u8 {
    let (start, end) = (span.0 as usize, span.1.max(span.0) as usize);
    let percent = start + (end - start) * done / total.max(1);
    percent.min(100) as u8
}

#[async_trait]
impl ScanWorker for ScanEngine {
    async fn process(&self, scan_id: &str, cancel: CancellationToken) {
        if let Err(e) = self.execute(scan_id, cancel).await {
            error!(scan_id, error = %e, "Scan execution failed");
            if let Err(abort_err) = self.abort(scan_id, &e.to_string()).await {
                error!(scan_id, error = %abort_err, "Could not mark scan failed");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use serde_json::json;
    use crate::config::SafetyConfig;
    use crate::db::Database;
    use crate::events::ChannelNotifier;
    use crate::models::{ScanType, Severity};
    use crate::process::{CommandPolicy, ProcessBackend, ProcessExecutor, ProcessOutput, ProcessRequest};
    use crate::repository::Repository;
    use crate::safety::gate::tests::FixedMonitor;

    #[derive(Clone)]
    pub(crate) enum Script {
        Output(String),
        Timeout(String),
        Hang,
    }

    /// Answers by binary name; unknown binaries exit 127.
    #[derive(Default)]
    pub(crate) struct ScriptedBackend {
        pub scripts: Mutex<HashMap<String, Script>>,
        pub calls: AtomicU32,
        pub seen: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedBackend {
        pub(crate) fn with(self, binary: &str, script: Script) -> Self {
            self.scripts.lock().unwrap().insert(binary.to_string(), script);
            self
        }
    }

    #[async_trait]
    impl ProcessBackend for ScriptedBackend {
        async fn run(&self, request: &ProcessRequest) -> Result<ProcessOutput, WardenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(request.argv.clone());
            let script = self.scripts.lock().unwrap().get(&request.argv[0]).cloned();
            match script {
                Some(Script::Output(stdout)) => Ok(ProcessOutput { stdout, exit_code: Some(0), ..Default::default() }),
                Some(Script::Timeout(stdout)) => Err(WardenError::CommandTimeout { secs: request.timeout.as_secs(), stdout }),
                Some(Script::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(ProcessOutput { exit_code: Some(0), ..Default::default() })
                }
                None => Ok(ProcessOutput { exit_code: Some(127), stderr: "not found".into(), ..Default::default() }),
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    pub(crate) fn nuclei_line(cve: &str, host: &str) -> String {
        json!({
            "template-id": cve.to_lowercase(),
            "info": {
                "name": format!("{} detected", cve),
                "severity": "high",
                "classification": {"cve-id": [cve.to_lowercase()], "cvss-score": 7.5}
            },
            "host": host,
            "matched-at": host
        })
        .to_string()
    }

    pub(crate) struct Harness {
        pub engine: Arc<ScanEngine>,
        pub db: Arc<Database>,
        pub backend: Arc<ScriptedBackend>,
        pub events: tokio::sync::mpsc::UnboundedReceiver<ScanEvent>,
    }

    pub(crate) fn harness(backend: ScriptedBackend, config: EngineConfig) -> Harness {
        let db = Arc::new(Database::in_memory().unwrap());
        let backend = Arc::new(backend);
        let executor = Arc::new(ProcessExecutor::new(CommandPolicy::default(), backend.clone()));
        let (notifier, events) = ChannelNotifier::new();
        let notifier: Arc<dyn Notifier> = Arc::new(notifier);
        let aggregator = Arc::new(ResultAggregator::new(db.clone(), notifier.clone()));
        let gate = Arc::new(SafetyGate::new(SafetyConfig::default(), Arc::new(FixedMonitor::healthy())).unwrap());
        let engine = Arc::new(ScanEngine::new(ToolRegistry::new(executor), gate, aggregator, notifier, config));
        Harness { engine, db, backend, events }
    }

    pub(crate) async fn pending_scan(db: &Database, tools: &[&str]) -> Scan {
        let mut scan = Scan::new("test", "alice", vec!["10.0.0.8".into()], ScanType::Web);
        scan.tools = Some(tools.iter().map(|t| t.to_string()).collect());
        db.save_scan(&scan).await.unwrap();
        scan
    }

    #[tokio::test]
    async fn test_timeout_and_success_completes_with_successful_findings_only() {
        let backend = ScriptedBackend::default()
            .with("nuclei", Script::Output(nuclei_line("CVE-2021-41773", "10.0.0.8")))
            .with("nmap", Script::Timeout("<nmaprun>partial".into()));
        let h = harness(backend, EngineConfig::default());
        let scan = pending_scan(&h.db, &["nmap", "nuclei"]).await;

        let done = h.engine.execute(&scan.id, CancellationToken::new()).await.unwrap().unwrap();
        assert_eq!(done.status, ScanStatus::Completed);
        assert_eq!(done.progress_percent, 100);
        assert_eq!(done.tool_runs.len(), 2);
        assert_eq!(done.successful_tools(), 1);

        let findings = h.db.list_findings(&scan.id).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].source_tool, "nuclei");
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(done.counts.high, 1);
    }

    #[tokio::test]
    async fn test_all_tools_failed_summary() {
        let backend = ScriptedBackend::default().with("nmap", Script::Timeout(String::new()));
        let h = harness(backend, EngineConfig::default());
        let scan = pending_scan(&h.db, &["nmap", "nessus"]).await;

        let done = h.engine.execute(&scan.id, CancellationToken::new()).await.unwrap().unwrap();
        assert_eq!(done.status, ScanStatus::Failed);
        let message = done.error_message.unwrap();
        assert!(message.starts_with("All 2 tools failed: "), "{}", message);
        assert!(message.contains("nessus"));
        assert!(message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_stop_the_rest() {
        let backend = ScriptedBackend::default()
            .with("nuclei", Script::Output(nuclei_line("CVE-2023-0001", "10.0.0.8")));
        let h = harness(backend, EngineConfig::default());
        let scan = pending_scan(&h.db, &["nessus", "nuclei"]).await;

        let done = h.engine.execute(&scan.id, CancellationToken::new()).await.unwrap().unwrap();
        assert_eq!(done.status, ScanStatus::Completed);
        assert!(done.tool_runs.iter().any(|r| r.tool == "nessus" && !r.succeeded));
    }

    #[tokio::test]
    async fn test_batched_aggregation_matches_incremental() {
        let backend = ScriptedBackend::default()
            .with("nuclei", Script::Output(nuclei_line("CVE-2021-41773", "10.0.0.8")));
        let config = EngineConfig { aggregation: AggregationMode::Batched, ..Default::default() };
        let h = harness(backend, config);
        let scan = pending_scan(&h.db, &["nuclei"]).await;

        let done = h.engine.execute(&scan.id, CancellationToken::new()).await.unwrap().unwrap();
        assert_eq!(done.status, ScanStatus::Completed);
        assert_eq!(done.counts.total(), 1);
    }

    #[tokio::test]
    async fn test_worker_runs_on_spawned_task() {
        let backend = ScriptedBackend::default()
            .with("nuclei", Script::Output(nuclei_line("CVE-2021-41773", "10.0.0.8")))
            .with("whatweb", Script::Output(String::new()));
        let h = harness(backend, EngineConfig { parallelism: 2, ..Default::default() });
        let scan = pending_scan(&h.db, &["nuclei", "whatweb"]).await;

        let engine = h.engine.clone();
        let scan_id = scan.id.clone();
        tokio::spawn(async move { engine.process(&scan_id, CancellationToken::new()).await })
            .await
            .unwrap();

        let stored = h.db.load_scan(&scan.id).await.unwrap();
        assert_eq!(stored.status, ScanStatus::Completed);
        assert_eq!(stored.tool_runs.len(), 2);
    }

    #[tokio::test]
    async fn test_batched_run_record_reflects_aggregation_failure() {
        let backend = ScriptedBackend::default()
            .with("nuclei", Script::Output(nuclei_line("CVE-2021-41773", "10.0.0.8")));
        let config = EngineConfig { aggregation: AggregationMode::Batched, ..Default::default() };
        let h = harness(backend, config);
        let scan = pending_scan(&h.db, &["nuclei"]).await;
        h.db.lock().unwrap().execute_batch("DROP TABLE findings;").unwrap();

        let tools = vec!["nuclei".to_string()];
        let outcome = h.engine.run_tools(&scan, &tools, (0, 100), &CancellationToken::new()).await;

        assert!(outcome.succeeded.is_empty());
        assert_eq!(outcome.failed.len(), 1);
        let stored = h.db.load_scan(&scan.id).await.unwrap();
        assert_eq!(stored.tool_runs.len(), 1);
        assert!(!stored.tool_runs[0].succeeded);
        assert!(stored.tool_runs[0].error.as_deref().unwrap().starts_with("aggregation failed"));
        assert_eq!(stored.progress_percent, 100);
    }

    #[tokio::test]
    async fn test_cancel_mid_tool_kills_and_starts_nothing_else() {
        let backend = ScriptedBackend::default()
            .with("nuclei", Script::Hang)
            .with("whatweb", Script::Output(String::new()));
        let config = EngineConfig { parallelism: 1, ..Default::default() };
        let h = harness(backend, config);
        let scan = pending_scan(&h.db, &["nuclei", "whatweb"]).await;

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let done = tokio::time::timeout(Duration::from_secs(5), h.engine.execute(&scan.id, token))
            .await
            .expect("engine should stop promptly")
            .unwrap()
            .unwrap();
        assert_eq!(done.status, ScanStatus::Cancelled);
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recorded_cancel_is_observed_between_tools() {
        let h = harness(ScriptedBackend::default(), EngineConfig::default());
        let scan = pending_scan(&h.db, &["nuclei"]).await;
        let running = h.engine.begin(&scan.id).await.unwrap().unwrap();
        h.engine
            .aggregator()
            .update_scan(&scan.id, |s| s.transition(ScanStatus::Cancelling))
            .await
            .unwrap();

        let outcome = h.engine.run_tools(&running, &["nuclei".to_string()], (0, 100), &CancellationToken::new()).await;
        assert!(outcome.cancelled);
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 0);
        let done = h.engine.finish(&scan.id, &outcome).await.unwrap();
        assert_eq!(done.status, ScanStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_non_pending_scan_is_skipped() {
        let h = harness(ScriptedBackend::default(), EngineConfig::default());
        let mut scan = pending_scan(&h.db, &["nuclei"]).await;
        scan.transition(ScanStatus::Cancelled).unwrap();
        h.db.save_scan(&scan).await.unwrap();

        assert!(h.engine.execute(&scan.id, CancellationToken::new()).await.unwrap().is_none());
        assert_eq!(h.backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_events_in_order() {
        let backend = ScriptedBackend::default()
            .with("nuclei", Script::Output(nuclei_line("CVE-2021-41773", "10.0.0.8")));
        let mut h = harness(backend, EngineConfig::default());
        let scan = pending_scan(&h.db, &["nuclei"]).await;
        h.engine.execute(&scan.id, CancellationToken::new()).await.unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = h.events.try_recv() {
            kinds.push(event.event_type());
        }
        assert_eq!(kinds.first(), Some(&"scan.started"));
        assert_eq!(kinds.last(), Some(&"scan.completed"));
        assert!(kinds.contains(&"tool.started"));
        assert!(kinds.contains(&"finding.created"));
        assert!(kinds.contains(&"scan.progress"));
    }

    #[test]
    fn test_progress_at() {
        assert_eq!(progress_at((0, 100), 1, 2), 50);
        assert_eq!(progress_at((50, 100), 1, 1), 100);
        assert_eq!(progress_at((0, 100), 0, 0), 0);
    }
}
