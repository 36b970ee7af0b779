use serde::Serialize;
use tokio::sync::mpsc;
use crate::models::{ScanType, Severity, SeverityCounts};

/// Lifecycle events emitted by the service, engine and aggregator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ScanEvent {
    /// A scan passed the safety gate and was queued
    #[serde(rename = "scan.created")]
    ScanCreated {
        scan_id: String,
        name: String,
        targets: Vec<String>,
        scan_type: ScanType,
    },
    #[serde(rename = "scan.started")]
    ScanStarted {
        scan_id: String,
        tools: Vec<String>,
    },
    #[serde(rename = "tool.started")]
    ToolStarted {
        scan_id: String,
        tool: String,
    },
    #[serde(rename = "tool.completed")]
    ToolCompleted {
        scan_id: String,
        tool: String,
        duration_ms: u64,
    },
    #[serde(rename = "tool.failed")]
    ToolFailed {
        scan_id: String,
        tool: String,
        error: String,
    },
    /// A new (non-duplicate) finding was written
    #[serde(rename = "finding.created")]
    FindingCreated {
        scan_id: String,
        finding_id: String,
        title: String,
        severity: Severity,
    },
    #[serde(rename = "phase.started")]
    PhaseStarted {
        scan_id: String,
        phase: String,
    },
    #[serde(rename = "phase.completed")]
    PhaseCompleted {
        scan_id: String,
        phase: String,
    },
    #[serde(rename = "scan.progress")]
    ScanProgress {
        scan_id: String,
        percent: u8,
    },
    #[serde(rename = "scan.completed")]
    ScanCompleted {
        scan_id: String,
        counts: SeverityCounts,
    },
    #[serde(rename = "scan.failed")]
    ScanFailed {
        scan_id: String,
        error: String,
    },
    #[serde(rename = "scan.cancelled")]
    ScanCancelled {
        scan_id: String,
    },
    /// An exploitation attempt confirmed a finding
    #[serde(rename = "exploitation.succeeded")]
    ExploitationSucceeded {
        scan_id: String,
        finding_id: String,
        original_finding_id: String,
    },
}

impl ScanEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ScanCreated { .. } => "scan.created",
            Self::ScanStarted { .. } => "scan.started",
            Self::ToolStarted { .. } => "tool.started",
            Self::ToolCompleted { .. } => "tool.completed",
            Self::ToolFailed { .. } => "tool.failed",
            Self::FindingCreated { .. } => "finding.created",
            Self::PhaseStarted { .. } => "phase.started",
            Self::PhaseCompleted { .. } => "phase.completed",
            Self::ScanProgress { .. } => "scan.progress",
            Self::ScanCompleted { .. } => "scan.completed",
            Self::ScanFailed { .. } => "scan.failed",
            Self::ScanCancelled { .. } => "scan.cancelled",
            Self::ExploitationSucceeded { .. } => "exploitation.succeeded",
        }
    }

    pub fn scan_id(&self) -> &str {
        match self {
            Self::ScanCreated { scan_id, .. }
            | Self::ScanStarted { scan_id, .. }
            | Self::ToolStarted { scan_id, .. }
            | Self::ToolCompleted { scan_id, .. }
            | Self::ToolFailed { scan_id, .. }
            | Self::FindingCreated { scan_id, .. }
            | Self::PhaseStarted { scan_id, .. }
            | Self::PhaseCompleted { scan_id, .. }
            | Self::ScanProgress { scan_id, .. }
            | Self::ScanCompleted { scan_id, .. }
            | Self::ScanFailed { scan_id, .. }
            | Self::ScanCancelled { scan_id }
            | Self::ExploitationSucceeded { scan_id, .. } => scan_id,
        }
    }
}

/// Fire-and-forget event sink. `emit` must never block.
pub trait Notifier: Send + Sync {
    fn emit(&self, event: ScanEvent);
}

/// Forwards events over an unbounded channel; a dropped receiver is ignored.
#[derive(Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<ScanEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn emit(&self, event: ScanEvent) {
        let _ = self.tx.send(event);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn emit(&self, _event: ScanEvent) {}
}
