use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use crate::config::SafetyConfig;
use crate::errors::{Rejection, WardenError};
use crate::models::{Scan, ScanStatus};
use crate::repository::Repository;
use super::rate_limit::RateLimiter;
use super::resources::{check_thresholds, ResourceMonitor, ResourceSnapshot};
use super::targets::{Target, TargetValidator};

/// Usage above this percentage is reported as a warning by `health`.
const HEALTH_WARN_PERCENT: f32 = 90.0;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub resources: ResourceSnapshot,
    pub warnings: Vec<String>,
}

/// Admission control for scans and agent commands.
///
/// Checks run in a fixed order and stop at the first failure. Nothing is
/// recorded until all of them pass.
pub struct SafetyGate {
    config: SafetyConfig,
    targets: TargetValidator,
    rate: RateLimiter,
    monitor: Arc<dyn ResourceMonitor>,
    /// Serializes admission so the active-scan count and the insert of the
    /// new scan are observed together.
    admission: Mutex<()>,
}

impl SafetyGate {
    pub fn new(config: SafetyConfig, monitor: Arc<dyn ResourceMonitor>) -> Result<Self, WardenError> {
        let targets = TargetValidator::new(&config)?;
        let rate = RateLimiter::new(
            Duration::from_secs(config.rate_limit_window_secs),
            config.rate_limit_max,
        );
        Ok(Self {
            config,
            targets,
            rate,
            monitor,
            admission: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn validate_target(&self, target: &str) -> Result<(), Rejection> {
        self.targets.validate(target)
    }

    /// Gate check for a host that came out of tool output rather than from
    /// the operator: it must pass target validation and fall inside one of
    /// the scan's own targets.
    pub fn validate_in_scope(&self, target: &str, scope: &[String]) -> Result<(), Rejection> {
        self.validate_target(target)?;
        let candidate = Target::parse(target)?;
        let inside = scope
            .iter()
            .filter_map(|s| Target::parse(s).ok())
            .any(|s| candidate.within(&s));
        if inside {
            Ok(())
        } else {
            Err(Rejection::OutOfScope(target.trim().to_string()))
        }
    }

    /// Validate every address-like argument of a parsed command line.
    ///
    /// URLs and IP literals go through full target validation. A bare name
    /// is only held against the blocklist, as it is as likely to be a file
    /// name as a host.
    pub fn validate_command(&self, segments: &[Vec<String>]) -> Result<(), Rejection> {
        let candidates = segments
            .iter()
            .flat_map(|segment| segment.iter().skip(1))
            .flat_map(|arg| argument_hosts(arg));
        for candidate in candidates {
            match Target::parse(candidate) {
                Ok(Target::Host(_)) if !candidate.contains("://") => {
                    if let Err(e @ Rejection::BlockedTarget { .. }) = self.validate_target(candidate) {
                        return Err(e);
                    }
                }
                Ok(_) => self.validate_target(candidate)?,
                Err(_) => {}
            }
        }
        Ok(())
    }

    pub fn validate_targets(&self, targets: &[String]) -> Result<(), Rejection> {
        if targets.is_empty() {
            return Err(Rejection::InvalidTarget("no targets given".into()));
        }
        targets.iter().try_for_each(|t| self.validate_target(t))
    }

    /// Run the full gate for a new scan and persist it as pending.
    ///
    /// The save happens under the admission lock, so a concurrent
    /// submission from the same principal counts this scan as active.
    pub async fn admit(&self, scan: &Scan, repo: &dyn Repository) -> Result<(), WardenError> {
        let _guard = self.admission.lock().await;
        self.rate.purge_expired();
        if let Err(e) = self.run_checks(scan, repo).await {
            if let WardenError::Rejected(ref rejection) = e {
                warn!(scan_id = %scan.id, principal = %scan.principal, reason = %rejection, "Scan rejected");
            }
            return Err(e);
        }

        repo.save_scan(scan).await?;
        for target in distinct_targets(&scan.targets) {
            self.rate.record(target, scan.scan_type.as_str());
        }
        info!(scan_id = %scan.id, principal = %scan.principal, targets = scan.targets.len(), "Scan admitted");
        Ok(())
    }

    async fn run_checks(&self, scan: &Scan, repo: &dyn Repository) -> Result<(), WardenError> {
        self.validate_targets(&scan.targets)?;

        for target in distinct_targets(&scan.targets) {
            self.rate.check(target, scan.scan_type.as_str())?;
        }

        let active = repo.count_active_scans(&scan.principal).await?;
        debug!(principal = %scan.principal, active, max = self.config.max_concurrent_scans, "Concurrency check");
        if active >= self.config.max_concurrent_scans {
            return Err(Rejection::ConcurrencyLimit(self.config.max_concurrent_scans).into());
        }

        self.check_resources().await?;
        self.guard_duplicate(scan, repo).await
    }

    async fn guard_duplicate(&self, scan: &Scan, repo: &dyn Repository) -> Result<(), WardenError> {
        match repo.load_scan(&scan.id).await {
            Ok(stored) if stored.status == ScanStatus::Running => {
                Err(Rejection::DuplicateRun(scan.id.clone()).into())
            }
            Ok(_) | Err(WardenError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Re-check load and the duplicate-run guard when a worker picks a
    /// scan up.
    pub async fn check_start(&self, scan: &Scan, repo: &dyn Repository) -> Result<(), WardenError> {
        self.check_resources().await?;
        self.guard_duplicate(scan, repo).await
    }

    /// Resource thresholds only. Run before every tool launch and agent
    /// command.
    pub async fn check_resources(&self) -> Result<(), WardenError> {
        let snapshot = self.monitor.sample().await?;
        check_thresholds(&snapshot, &self.config).map_err(|r| {
            warn!(reason = %r, "Resource check failed");
            WardenError::Rejected(r)
        })
    }

    pub async fn health(&self) -> Result<HealthReport, WardenError> {
        let resources = self.monitor.sample().await?;
        let mut warnings = Vec::new();
        if resources.cpu_percent > HEALTH_WARN_PERCENT {
            warnings.push(format!("High CPU usage: {:.1}%", resources.cpu_percent));
        }
        if resources.memory_percent > HEALTH_WARN_PERCENT {
            warnings.push(format!("High memory usage: {:.1}%", resources.memory_percent));
        }
        if resources.disk_free_gb < self.config.min_disk_gb {
            warnings.push(format!("Low disk space: {:.2}GB free", resources.disk_free_gb));
        }
        Ok(HealthReport {
            healthy: warnings.is_empty(),
            resources,
            warnings,
        })
    }
}

/// One entry per target as the rate limiter keys them.
fn distinct_targets(targets: &[String]) -> Vec<&str> {
    let mut seen = HashSet::new();
    targets
        .iter()
        .map(String::as_str)
        .filter(|t| seen.insert(t.trim().to_lowercase()))
        .collect()
}

/// Places a host can hide in one argument: the whole of it, the value of
/// `--opt=value`, and the part after `user@`. Short decimal runs are counts
/// and ports, not addresses.
fn argument_hosts(arg: &str) -> Vec<&str> {
    let mut hosts = vec![arg];
    if let Some((_, value)) = arg.split_once('=') {
        hosts.push(value);
    }
    if !arg.contains("://") {
        if let Some((_, host)) = arg.rsplit_once('@') {
            hosts.push(host);
        }
    }
    hosts.retain(|h| !(h.len() <= 5 && h.chars().all(|c| c.is_ascii_digit())));
    hosts
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use async_trait::async_trait;
    use crate::db::Database;
    use crate::models::ScanType;

    /// Fixed snapshot, counting how often it was asked.
    pub(crate) struct FixedMonitor {
        pub snapshot: ResourceSnapshot,
        pub calls: AtomicU32,
    }

    impl FixedMonitor {
        pub(crate) fn healthy() -> Self {
            Self::with(10.0, 20.0, 100.0)
        }

        pub(crate) fn with(cpu: f32, mem: f32, disk: f64) -> Self {
            Self {
                snapshot: ResourceSnapshot { cpu_percent: cpu, memory_percent: mem, disk_free_gb: disk },
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ResourceMonitor for FixedMonitor {
        async fn sample(&self) -> Result<ResourceSnapshot, WardenError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.snapshot)
        }
    }

    fn gate_with(config: SafetyConfig, monitor: FixedMonitor) -> SafetyGate {
        SafetyGate::new(config, Arc::new(monitor)).unwrap()
    }

    fn scan(target: &str) -> Scan {
        Scan::new("t", "alice", vec![target.to_string()], ScanType::Network)
    }

    #[tokio::test]
    async fn test_blocked_target_rejected_and_not_saved() {
        let db = Database::in_memory().unwrap();
        let gate = gate_with(SafetyConfig::default(), FixedMonitor::healthy());
        let s = scan("127.0.0.1");
        let err = gate.admit(&s, &db).await.unwrap_err();
        assert!(matches!(err, WardenError::Rejected(ref r) if r.is_authorization()));
        assert!(matches!(db.load_scan(&s.id).await, Err(WardenError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_admitted_scan_is_pending_in_repo() {
        let db = Database::in_memory().unwrap();
        let gate = gate_with(SafetyConfig::default(), FixedMonitor::healthy());
        let s = scan("10.0.0.1");
        gate.admit(&s, &db).await.unwrap();
        assert_eq!(db.load_scan(&s.id).await.unwrap().status, ScanStatus::Pending);
    }

    #[tokio::test]
    async fn test_rate_limit_only_consumed_on_success() {
        let db = Database::in_memory().unwrap();
        let config = SafetyConfig { max_concurrent_scans: 0, ..Default::default() };
        let gate = gate_with(config, FixedMonitor::healthy());
        assert!(gate.admit(&scan("10.0.0.1"), &db).await.is_err());
        // the failed admission left no rate-limit slot behind
        assert!(gate.rate.check("10.0.0.1", "network").is_ok());
    }

    #[tokio::test]
    async fn test_rate_limit_second_scan_same_target() {
        let db = Database::in_memory().unwrap();
        let gate = gate_with(SafetyConfig::default(), FixedMonitor::healthy());
        gate.admit(&scan("10.0.0.1"), &db).await.unwrap();
        let err = gate.admit(&scan("10.0.0.1"), &db).await.unwrap_err();
        assert!(matches!(err, WardenError::Rejected(Rejection::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_repeated_target_takes_one_rate_slot() {
        let db = Database::in_memory().unwrap();
        let config = SafetyConfig { rate_limit_max: 2, ..Default::default() };
        let gate = gate_with(config, FixedMonitor::healthy());
        let repeated = Scan::new("t", "alice", vec!["10.0.0.1".into(), " 10.0.0.1".into()], ScanType::Network);
        gate.admit(&repeated, &db).await.unwrap();

        gate.admit(&scan("10.0.0.1"), &db).await.unwrap();
        let err = gate.admit(&scan("10.0.0.1"), &db).await.unwrap_err();
        assert!(matches!(err, WardenError::Rejected(Rejection::RateLimited { .. })));
    }

    #[tokio::test]
    async fn test_concurrency_cap() {
        let db = Database::in_memory().unwrap();
        let config = SafetyConfig { max_concurrent_scans: 2, ..Default::default() };
        let gate = gate_with(config, FixedMonitor::healthy());
        gate.admit(&scan("10.0.0.1"), &db).await.unwrap();
        gate.admit(&scan("10.0.0.2"), &db).await.unwrap();
        let err = gate.admit(&scan("10.0.0.3"), &db).await.unwrap_err();
        assert_eq!(err.to_string(), "Maximum 2 concurrent scans allowed");

        let other = Scan::new("t", "bob", vec!["10.0.0.4".into()], ScanType::Network);
        assert!(gate.admit(&other, &db).await.is_ok());
    }

    #[tokio::test]
    async fn test_resource_rejection_after_target_checks() {
        let db = Database::in_memory().unwrap();
        let monitor = FixedMonitor::with(99.0, 10.0, 100.0);
        let gate = gate_with(SafetyConfig::default(), monitor);
        let err = gate.admit(&scan("10.0.0.1"), &db).await.unwrap_err();
        assert!(matches!(err, WardenError::Rejected(Rejection::CpuExhausted { .. })));

        // target validation short-circuits before the monitor is consulted
        let monitor = Arc::new(FixedMonitor::with(99.0, 10.0, 100.0));
        let gate = SafetyGate::new(SafetyConfig::default(), monitor.clone()).unwrap();
        assert!(gate.admit(&scan("127.0.0.1"), &db).await.is_err());
        assert_eq!(monitor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_duplicate_run_guard() {
        let db = Database::in_memory().unwrap();
        let gate = gate_with(SafetyConfig::default(), FixedMonitor::healthy());
        let mut s = scan("10.0.0.1");
        gate.admit(&s, &db).await.unwrap();
        s.transition(ScanStatus::Running).unwrap();
        db.save_scan(&s).await.unwrap();

        let err = gate.check_start(&s, &db).await.unwrap_err();
        assert!(matches!(err, WardenError::Rejected(Rejection::DuplicateRun(_))));
    }

    #[tokio::test]
    async fn test_empty_target_list_rejected() {
        let gate = gate_with(SafetyConfig::default(), FixedMonitor::healthy());
        assert!(matches!(gate.validate_targets(&[]), Err(Rejection::InvalidTarget(_))));
    }

    fn argv(line: &str) -> Vec<Vec<String>> {
        line.split('|')
            .map(|segment| segment.split_whitespace().map(String::from).collect())
            .collect()
    }

    #[test]
    fn test_command_arguments_checked_as_targets() {
        let gate = gate_with(SafetyConfig::default(), FixedMonitor::healthy());
        for line in [
            "curl http://169.254.169.254/latest/meta-data/",
            "curl -s --url=http://127.1:8080/admin",
            "nc 2130706433 80",
            "ssh root@localhost",
            "nmap -sV 10.0.0.5 | grep -i 127.0.0.0/24",
        ] {
            assert!(
                matches!(gate.validate_command(&argv(line)), Err(Rejection::BlockedTarget { .. })),
                "{line}"
            );
        }
        for line in ["nmap -sV -p 22,80 --top-ports 1000 10.0.0.5 -oN scan.txt", "whois example.com", "echo done"] {
            assert!(gate.validate_command(&argv(line)).is_ok(), "{line}");
        }
    }

    #[test]
    fn test_command_arguments_respect_allow_list() {
        let config = SafetyConfig { allowed_ranges: vec!["10.0.0.0/24".into()], ..Default::default() };
        let gate = gate_with(config, FixedMonitor::healthy());
        assert!(gate.validate_command(&argv("nmap 10.0.0.7 -oN out.txt")).is_ok());
        assert!(matches!(
            gate.validate_command(&argv("curl https://203.0.113.9/")),
            Err(Rejection::NotAllowed(_))
        ));
    }

    #[tokio::test]
    async fn test_health_warnings() {
        let gate = gate_with(SafetyConfig::default(), FixedMonitor::with(95.0, 50.0, 100.0));
        let report = gate.health().await.unwrap();
        assert!(!report.healthy);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].starts_with("High CPU usage"));
    }
}
