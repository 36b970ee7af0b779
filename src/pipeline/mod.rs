pub mod automation;
pub mod orchestrator;
pub mod phase;
pub mod service;
pub mod state;

pub use automation::AutomationEngine;
pub use orchestrator::ScanEngine;
pub use phase::{MethodologyPlanner, Phase};
pub use service::{ScanRequest, ScanService};
pub use state::{AutomationReport, ScanSummary, ToolSetOutcome};
