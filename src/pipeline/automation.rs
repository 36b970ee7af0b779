use std::sync::Arc;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use crate::config::AutomationConfig;
use crate::errors::WardenError;
use crate::events::ScanEvent;
use crate::models::{ExploitRecord, Finding, FindingStatus, Scan};
use crate::queue::ScanWorker;
use crate::safety::Target;
use crate::tools::ToolCategory;
use super::orchestrator::ScanEngine;
use super::phase::{MethodologyPlanner, Phase};
use super::state::{next_steps, AutomationReport, ToolSetOutcome};

/// Walks a scan through its methodology phase by phase, with an optional
/// exploitation side-branch after each phase.
pub struct AutomationEngine {
    engine: Arc<ScanEngine>,
    planner: MethodologyPlanner,
    config: AutomationConfig,
}

impl AutomationEngine {
    pub fn new(engine: Arc<ScanEngine>, planner: MethodologyPlanner, config: AutomationConfig) -> Self {
        Self { engine, planner, config }
    }

    pub fn planner(&self) -> &MethodologyPlanner {
        &self.planner
    }

    fn is_exploitation_tool(&self, tool: &str) -> bool {
        self.engine.registry().category_of(tool) == Some(ToolCategory::Exploitation)
    }

    /// Phases made only of exploitation tools run through the sub-loop, never
    /// the plain phase loop.
    fn is_exploitation_phase(&self, phase: &Phase) -> bool {
        !phase.tools.is_empty() && phase.tools.iter().all(|t| self.is_exploitation_tool(t))
    }

    pub async fn execute(&self, scan_id: &str, cancel: CancellationToken) -> Result<Option<AutomationReport>, WardenError> {
        let Some(scan) = self.engine.begin(scan_id).await? else {
            return Ok(None);
        };

        let phases: Vec<Phase> = self
            .planner
            .plan(scan.scan_type)
            .into_iter()
            .filter(|p| {
                let skip = self.is_exploitation_phase(p);
                if skip {
                    debug!(scan_id, phase = %p.name, "Exploitation phase left to the exploitation sub-loop");
                }
                !skip
            })
            .collect();

        let mut report = AutomationReport { scan_id: scan_id.to_string(), ..Default::default() };
        let mut outcome = ToolSetOutcome::default();
        let count = phases.len();

        for (index, phase) in phases.iter().enumerate() {
            if cancel.is_cancelled() {
                outcome.cancelled = true;
                break;
            }
            info!(scan_id, phase = %phase.name, tools = ?phase.tools, "Phase started");
            self.engine.notifier().emit(ScanEvent::PhaseStarted {
                scan_id: scan_id.to_string(),
                phase: phase.name.clone(),
            });

            let tools: Vec<String> = phase.tools.iter().filter(|t| !self.is_exploitation_tool(t)).cloned().collect();
            let span = (percent_of(index, count), percent_of(index + 1, count));
            let phase_outcome = self.engine.run_tools(&scan, &tools, span, &cancel).await;
            report.phases_run.push(phase.name.clone());

            self.engine.notifier().emit(ScanEvent::PhaseCompleted {
                scan_id: scan_id.to_string(),
                phase: phase.name.clone(),
            });
            info!(
                scan_id,
                phase = %phase.name,
                succeeded = phase_outcome.succeeded.len(),
                failed = phase_outcome.failed.len(),
                new_findings = phase_outcome.created.len(),
                "Phase completed"
            );

            let stop = phase_outcome.cancelled;
            if self.config.auto_exploit && !stop {
                let exploited = self.exploit(&scan, &phase_outcome.created, &cancel).await;
                report.exploited.extend(exploited);
            }
            outcome.absorb(phase_outcome);
            if stop {
                break;
            }
        }

        let finished = self.engine.finish(scan_id, &outcome).await?;
        let findings = self.engine.aggregator().repository().list_findings(scan_id).await?;
        report.suggestions = next_steps(&findings);
        report.tools_succeeded = outcome.succeeded;
        report.tools_failed = outcome.failed;
        info!(scan_id, status = %finished.status, phases = report.phases_run.len(), exploited = report.exploited.len(), "Automation finished");
        Ok(Some(report))
    }

    /// Bounded exploitation over findings at or above the trigger threshold.
    /// Returns ids of the findings that were confirmed.
    async fn exploit(&self, scan: &Scan, findings: &[Finding], cancel: &CancellationToken) -> Vec<String> {
        let tools = self.engine.registry().by_category(ToolCategory::Exploitation);
        let mut confirmed = Vec::new();
        if tools.is_empty() {
            return confirmed;
        }

        let candidates = findings
            .iter()
            .filter(|f| f.severity.at_least(self.config.severity_threshold) && f.status == FindingStatus::Open);

        'findings: for finding in candidates {
            let Some(options) = self.exploit_options(finding) else {
                debug!(scan_id = %scan.id, finding_id = %finding.id, cve = ?finding.cve_id, "No exploit module mapped");
                continue;
            };
            let Some(host) = exploit_host(&finding.target) else {
                debug!(scan_id = %scan.id, target = %finding.target, "Finding target is not a single host");
                continue;
            };
            if let Err(rejection) = self.engine.gate().validate_in_scope(&host, &scan.targets) {
                warn!(scan_id = %scan.id, finding_id = %finding.id, host = %host, reason = %rejection, "Exploitation target refused");
                continue;
            }

            let mut attempts = 0;
            for tool in &tools {
                while attempts < self.config.max_attempts_per_finding {
                    if cancel.is_cancelled() {
                        return confirmed;
                    }
                    attempts += 1;
                    info!(scan_id = %scan.id, finding_id = %finding.id, tool, attempt = attempts, "Exploitation attempt");

                    let result = match self.engine.run_tool(&scan.id, tool, &[host.clone()], &options, cancel).await {
                        Ok(result) => result,
                        Err(e) => {
                            warn!(scan_id = %scan.id, finding_id = %finding.id, tool, error = %e, "Exploitation attempt failed");
                            continue;
                        }
                    };
                    let record = result.payload.exploitation.clone().unwrap_or_else(|| ExploitRecord {
                        success: false,
                        detail: format!("{} reported no exploitation result", tool),
                        session: None,
                    });
                    match self
                        .engine
                        .aggregator()
                        .record_exploitation(&scan.id, finding, tool, &record, Some(result.raw_ref()))
                        .await
                    {
                        Ok(Some(_)) => {
                            confirmed.push(finding.id.clone());
                            continue 'findings;
                        }
                        Ok(None) => {}
                        Err(e) => error!(scan_id = %scan.id, finding_id = %finding.id, error = %e, "Could not record exploitation"),
                    }
                }
            }
            info!(scan_id = %scan.id, finding_id = %finding.id, attempts, "Exploitation attempts exhausted");
        }
        confirmed
    }

    fn exploit_options(&self, finding: &Finding) -> Option<Value> {
        let cve = finding.cve_id.as_deref()?.to_uppercase();
        let module = self
            .config
            .exploit_modules
            .iter()
            .find(|(key, _)| key.to_uppercase() == cve)
            .map(|(_, module)| module.clone())?;
        let mut options = json!({ "module": module });
        if let Some(port) = finding.port {
            options["options"] = json!({ "RPORT": port.to_string() });
        }
        Some(options)
    }
}

/// Single address or hostname to aim an exploit at.
fn exploit_host(target: &str) -> Option<String> {
    match Target::parse(target).ok()? {
        Target::Ip(addr) => Some(addr.to_string()),
        Target::Host(name) => Some(name),
        Target::Net(_) => None,
    }
}

fn percent_of(index: usize, count: usize) -> u8 {
    (index * 100 / count.max(1)).min(100) as u8
}

#[async_trait]
impl ScanWorker for AutomationEngine {
    async fn process(&self, scan_id: &str, cancel: CancellationToken) {
        if let Err(e) = self.execute(scan_id, cancel).await {
            error!(scan_id, error = %e, "Automated scan failed");
            if let Err(abort_err) = self.engine.abort(scan_id, &e.to_string()).await {
                error!(scan_id, error = %abort_err, "Could not mark scan failed");
            }
        }
    }
}
