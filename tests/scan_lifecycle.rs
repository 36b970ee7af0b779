mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;
use common::{nuclei_hit, FakeBackend, Reply, Stack, SteadyMonitor};
use warden::config::{EngineConfig, SafetyConfig};
use warden::errors::{Rejection, WardenError};
use warden::events::ScanEvent;
use warden::models::{FindingStatus, ScanStatus, ScanType};
use warden::pipeline::ScanRequest;
use warden::repository::Repository;
use warden::safety::ResourceSnapshot;

fn web_request(targets: &[&str], tools: &[&str]) -> ScanRequest {
    let mut request = ScanRequest::new("integration", targets.iter().map(|t| t.to_string()).collect(), ScanType::Web);
    request.tools = Some(tools.iter().map(|t| t.to_string()).collect());
    request
}

#[tokio::test]
async fn loopback_target_rejected_before_anything_runs() {
    let mut stack = Stack::new(FakeBackend::default(), SafetyConfig::default(), EngineConfig::default());
    let (service, _queue) = stack.service(None);

    let err = service.submit(web_request(&["127.0.0.1"], &["nuclei"]), "alice").await.unwrap_err();
    match err {
        WardenError::Rejected(rejection) => {
            assert!(rejection.is_authorization());
            assert_eq!(rejection.to_string(), "Target 127.0.0.1 is in blocked range 127.0.0.0/8");
        }
        other => panic!("expected a rejection, got {other:?}"),
    }

    assert!(stack.db.list_scans(10).await.unwrap().is_empty());
    assert_eq!(stack.backend.calls.load(Ordering::SeqCst), 0);
    assert!(stack.drain_events().is_empty());
}

#[tokio::test]
async fn blocklist_beats_allow_list() {
    let safety = SafetyConfig { allowed_ranges: vec!["127.0.0.0/8".into(), "10.0.0.0/8".into()], ..Default::default() };
    let stack = Stack::new(FakeBackend::default(), safety, EngineConfig::default());
    let gate = stack.engine.gate();

    assert!(matches!(gate.validate_target("127.0.0.1"), Err(Rejection::BlockedTarget { .. })));
    assert!(matches!(gate.validate_target("169.254.10.1"), Err(Rejection::BlockedTarget { .. })));
    assert!(matches!(gate.validate_target("192.168.1.1"), Err(Rejection::NotAllowed(_))));
    assert!(gate.validate_target("10.1.2.3").is_ok());
}

#[tokio::test]
async fn timeout_plus_success_completes_with_only_successful_findings() {
    let backend = FakeBackend::default()
        .reply("nmap", Reply::Timeout)
        .reply("nuclei", Reply::Stdout(nuclei_hit("CVE-2021-41773", "10.20.0.5")));
    let stack = Stack::new(backend, SafetyConfig::default(), EngineConfig::default());
    let (service, queue) = stack.service(None);

    let scan = service.submit(web_request(&["10.20.0.5"], &["nmap", "nuclei"]), "alice").await.unwrap();
    queue.wait(&scan.id).await;

    let summary = service.status(&scan.id).await.unwrap();
    assert_eq!(summary.scan.status, ScanStatus::Completed);
    assert_eq!(summary.scan.progress_percent, 100);
    assert!(summary.scan.completed_at.is_some());
    assert_eq!(summary.findings.len(), 1);
    assert_eq!(summary.findings[0].source_tool, "nuclei");
    assert_eq!(summary.findings[0].cve_id.as_deref(), Some("CVE-2021-41773"));

    let failed = summary.failed_tools();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].0, "nmap");
}

#[tokio::test]
async fn same_cve_from_two_results_is_one_open_finding() {
    let hit = nuclei_hit("CVE-2021-41773", "10.20.0.6");
    let twice = format!("{}\n{}\n", hit, hit);
    let backend = FakeBackend::default().reply("nuclei", Reply::Stdout(twice));
    let stack = Stack::new(backend, SafetyConfig::default(), EngineConfig::default());
    let (service, queue) = stack.service(None);

    let scan = service.submit(web_request(&["10.20.0.6"], &["nuclei"]), "bob").await.unwrap();
    queue.wait(&scan.id).await;

    let findings = stack.db.list_findings(&scan.id).await.unwrap();
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].status, FindingStatus::Open);

    let stored = stack.db.load_scan(&scan.id).await.unwrap();
    assert_eq!(stored.counts.total(), 1);
    assert_eq!(stored.counts.critical, 1);
}

#[tokio::test]
async fn concurrency_cap_rejects_before_any_tool_runs() {
    let safety = SafetyConfig { max_concurrent_scans: 1, ..Default::default() };
    let backend = FakeBackend::default().reply("nuclei", Reply::Hang);
    let stack = Stack::new(backend, safety, EngineConfig::default());
    let (service, queue) = stack.service(None);

    let first = service.submit(web_request(&["10.30.0.1"], &["nuclei"]), "carol").await.unwrap();
    let err = service.submit(web_request(&["10.30.0.2"], &["nuclei"]), "carol").await.unwrap_err();
    assert!(matches!(err, WardenError::Rejected(Rejection::ConcurrencyLimit(1))), "{err:?}");
    assert_eq!(stack.db.list_scans(10).await.unwrap().len(), 1);

    // Another principal has its own allowance
    let other = service.submit(web_request(&["10.30.0.3"], &["nuclei"]), "dave").await.unwrap();

    for id in [&first.id, &other.id] {
        service.cancel(id).await.unwrap();
    }
    tokio::time::timeout(Duration::from_secs(5), queue.drain()).await.unwrap();
    for id in [&first.id, &other.id] {
        assert_eq!(stack.db.load_scan(id).await.unwrap().status, ScanStatus::Cancelled);
    }
}

#[tokio::test]
async fn rate_limit_applies_per_target_and_scan_type() {
    let stack = Stack::new(FakeBackend::default(), SafetyConfig::default(), EngineConfig::default());
    let (service, queue) = stack.service(None);

    service.submit(web_request(&["10.40.0.1"], &["nuclei"]), "erin").await.unwrap();
    let err = service.submit(web_request(&["10.40.0.1"], &["nuclei"]), "erin").await.unwrap_err();
    assert!(matches!(err, WardenError::Rejected(Rejection::RateLimited { .. })), "{err:?}");

    let mut network = web_request(&["10.40.0.1"], &["nmap"]);
    network.scan_type = ScanType::Network;
    service.submit(network, "erin").await.unwrap();
    queue.drain().await;
}

#[tokio::test]
async fn overloaded_host_refuses_admission() {
    let monitor = SteadyMonitor(ResourceSnapshot { cpu_percent: 97.5, memory_percent: 20.0, disk_free_gb: 40.0 });
    let stack = Stack::with_monitor(FakeBackend::default(), SafetyConfig::default(), EngineConfig::default(), monitor);
    let (service, _queue) = stack.service(None);

    let err = service.submit(web_request(&["10.50.0.1"], &["nuclei"]), "frank").await.unwrap_err();
    assert_eq!(err.to_string(), "CPU usage too high (97.5%). Maximum allowed: 90%");
}

#[tokio::test]
async fn every_tool_failing_fails_the_scan_with_a_summary() {
    let backend = FakeBackend::default().reply("nmap", Reply::Timeout);
    let stack = Stack::new(backend, SafetyConfig::default(), EngineConfig::default());
    let (service, queue) = stack.service(None);

    let scan = service.submit(web_request(&["10.60.0.1"], &["nmap", "nikto"]), "gina").await.unwrap();
    queue.wait(&scan.id).await;

    let stored = stack.db.load_scan(&scan.id).await.unwrap();
    assert_eq!(stored.status, ScanStatus::Failed);
    let message = stored.error_message.unwrap();
    assert!(message.starts_with("All 2 tools failed: "), "{message}");
}

#[tokio::test]
async fn lifecycle_events_arrive_in_order() {
    let backend = FakeBackend::default().reply("nuclei", Reply::Stdout(nuclei_hit("CVE-2023-1111", "10.70.0.1")));
    let mut stack = Stack::new(backend, SafetyConfig::default(), EngineConfig::default());
    let (service, queue) = stack.service(None);

    let scan = service.submit(web_request(&["10.70.0.1"], &["nuclei"]), "hana").await.unwrap();
    queue.wait(&scan.id).await;

    let types: Vec<&'static str> = stack.drain_events().iter().map(ScanEvent::event_type).collect();
    let position = |t: &str| types.iter().position(|x| *x == t).unwrap_or_else(|| panic!("missing {t} in {types:?}"));
    assert!(position("scan.created") < position("scan.started"));
    assert!(position("tool.started") < position("finding.created"));
    assert!(position("finding.created") < position("scan.completed"));
}

#[tokio::test]
async fn cancelling_a_pending_scan_is_immediate() {
    let stack = Stack::new(FakeBackend::default(), SafetyConfig::default(), EngineConfig::default());
    let (service, queue) = stack.service(Some(std::sync::Arc::new(NeverRuns)));

    let scan = service.submit(web_request(&["10.80.0.1"], &["nuclei"]), "ivan").await.unwrap();
    let cancelled = service.cancel(&scan.id).await.unwrap();
    assert_eq!(cancelled.status, ScanStatus::Cancelled);
    assert!(matches!(service.cancel(&scan.id).await, Err(WardenError::InvalidTransition(_))));
    queue.drain().await;
}

/// A worker that never picks anything up, so scans stay pending.
struct NeverRuns;

#[async_trait::async_trait]
impl warden::queue::ScanWorker for NeverRuns {
    async fn process(&self, _scan_id: &str, _cancel: tokio_util::sync::CancellationToken) {}
}
