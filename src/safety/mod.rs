pub mod gate;
pub mod rate_limit;
pub mod resources;
pub mod targets;

pub use gate::{HealthReport, SafetyGate};
pub use rate_limit::RateLimiter;
pub use resources::{check_thresholds, ResourceMonitor, ResourceSnapshot, SysinfoMonitor};
pub use targets::{IpNet, RangeRule, Target, TargetValidator};
