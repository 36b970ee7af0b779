use std::collections::BTreeMap;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use crate::aggregator::ResultAggregator;
use crate::errors::WardenError;
use crate::events::{Notifier, ScanEvent};
use crate::models::{Scan, ScanStatus, ScanType};
use crate::queue::TaskQueue;
use crate::safety::SafetyGate;
use super::state::ScanSummary;

/// What a caller asks for when creating a scan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    pub name: String,
    pub targets: Vec<String>,
    pub scan_type: ScanType,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub tool_options: BTreeMap<String, Value>,
}

impl ScanRequest {
    pub fn new(name: &str, targets: Vec<String>, scan_type: ScanType) -> Self {
        Self {
            name: name.to_string(),
            targets,
            scan_type,
            tools: None,
            tool_options: BTreeMap::new(),
        }
    }
}

/// Scan lifecycle entry points: submit, cancel, status.
pub struct ScanService {
    gate: Arc<SafetyGate>,
    aggregator: Arc<ResultAggregator>,
    queue: Arc<dyn TaskQueue>,
    notifier: Arc<dyn Notifier>,
}

impl ScanService {
    pub fn new(
        gate: Arc<SafetyGate>,
        aggregator: Arc<ResultAggregator>,
        queue: Arc<dyn TaskQueue>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { gate, aggregator, queue, notifier }
    }

    /// Admit, persist and enqueue a scan. A rejection leaves no trace.
    pub async fn submit(&self, request: ScanRequest, principal: &str) -> Result<Scan, WardenError> {
        let name = if request.name.trim().is_empty() {
            format!("{} scan of {}", request.scan_type, request.targets.join(", "))
        } else {
            request.name.trim().to_string()
        };
        let mut scan = Scan::new(&name, principal, request.targets, request.scan_type);
        scan.tools = request.tools.filter(|t| !t.is_empty());
        scan.tool_options = request.tool_options;

        self.gate.admit(&scan, self.aggregator.repository().as_ref()).await?;

        if let Err(e) = self.queue.enqueue(&scan.id).await {
            warn!(scan_id = %scan.id, error = %e, "Enqueue failed after admission");
            let reason = format!("Could not enqueue scan: {}", e);
            self.aggregator
                .update_scan(&scan.id, move |s| {
                    s.transition(ScanStatus::Running)?;
                    s.error_message = Some(reason);
                    s.transition(ScanStatus::Failed)
                })
                .await?;
            return Err(e);
        }

        info!(scan_id = %scan.id, principal, scan_type = %scan.scan_type, targets = ?scan.targets, "Scan submitted");
        self.notifier.emit(ScanEvent::ScanCreated {
            scan_id: scan.id.clone(),
            name: scan.name.clone(),
            targets: scan.targets.clone(),
            scan_type: scan.scan_type,
        });
        Ok(scan)
    }

    /// Pending scans are cancelled at once; running scans move to cancelling
    /// and the worker finishes the job. Repeating a cancel is harmless.
    pub async fn cancel(&self, scan_id: &str) -> Result<Scan, WardenError> {
        let scan = self
            .aggregator
            .update_scan(scan_id, |scan| {
                let status = scan.status;
                match status {
                    ScanStatus::Pending => scan.transition(ScanStatus::Cancelled),
                    ScanStatus::Running => scan.transition(ScanStatus::Cancelling),
                    ScanStatus::Cancelling => Ok(()),
                    terminal => Err(WardenError::InvalidTransition(format!(
                        "scan {} is already {}",
                        scan.id, terminal
                    ))),
                }
            })
            .await?;

        let signalled = self.queue.request_cancel(scan_id).await?;
        info!(scan_id, status = %scan.status, signalled, "Scan cancel requested");
        if scan.status == ScanStatus::Cancelled {
            self.aggregator.release(scan_id);
            self.notifier.emit(ScanEvent::ScanCancelled { scan_id: scan_id.to_string() });
        }
        Ok(scan)
    }

    pub async fn status(&self, scan_id: &str) -> Result<ScanSummary, WardenError> {
        ScanSummary::load(self.aggregator.repository().as_ref(), scan_id).await
    }
}
