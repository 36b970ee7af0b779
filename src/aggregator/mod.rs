//! Turns tool payloads into assets and deduplicated findings, and owns every
//! write to a scan record while the scan is live.

pub mod dedup;
pub mod severity;

use std::collections::HashSet;
use std::sync::Arc;
use chrono::Utc;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use crate::errors::WardenError;
use crate::events::{Notifier, ScanEvent};
use crate::models::{
    Asset, CredentialRecord, ExploitRecord, Finding, FindingStatus, HostRecord, PortRecord, Scan,
    SeverityCounts, Severity, ToolResult, VulnRecord,
};
use crate::repository::Repository;

pub use dedup::{finding_key, normalize_title};
pub use severity::resolve_severity;

/// What one aggregation pass wrote.
#[derive(Debug, Default, Clone)]
pub struct AggregationOutcome {
    pub created: Vec<Finding>,
    pub duplicates: usize,
    pub assets: usize,
    /// Set when the payload failed validation and nothing was written.
    pub skipped: Option<String>,
    pub counts: SeverityCounts,
}

/// Finding fields before ids and timestamps are assigned.
struct Draft {
    title: String,
    description: String,
    severity: Severity,
    target: String,
    cve_id: Option<String>,
    cvss_score: Option<f64>,
    port: Option<u16>,
    service: Option<String>,
    evidence: Option<String>,
    dedup_key: String,
}

impl Draft {
    fn into_finding(self, scan_id: &str, tool: &str, raw_ref: Option<String>) -> Finding {
        let now = Utc::now();
        Finding {
            id: uuid::Uuid::new_v4().to_string(),
            scan_id: scan_id.to_string(),
            title: self.title,
            description: self.description,
            severity: self.severity,
            status: FindingStatus::Open,
            target: self.target,
            cve_id: self.cve_id,
            cvss_score: self.cvss_score,
            port: self.port,
            service: self.service,
            evidence: self.evidence,
            source_tool: tool.to_string(),
            raw_ref,
            dedup_key: self.dedup_key,
            related_finding_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

pub struct ResultAggregator {
    repo: Arc<dyn Repository>,
    notifier: Arc<dyn Notifier>,
    /// One writer per scan at a time.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ResultAggregator {
    pub fn new(repo: Arc<dyn Repository>, notifier: Arc<dyn Notifier>) -> Self {
        Self { repo, notifier, locks: DashMap::new() }
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    fn lock_for(&self, scan_id: &str) -> Arc<Mutex<()>> {
        self.locks.entry(scan_id.to_string()).or_default().clone()
    }

    /// Drop the scan's writer lock once the scan is terminal.
    pub fn release(&self, scan_id: &str) {
        self.locks.remove(scan_id);
    }

    /// Load, modify and save a scan under its writer lock.
    pub async fn update_scan<F>(&self, scan_id: &str, update: F) -> Result<Scan, WardenError>
    where
        F: FnOnce(&mut Scan) -> Result<(), WardenError> + Send,
    {
        let lock = self.lock_for(scan_id);
        let _guard = lock.lock().await;
        let mut scan = self.repo.load_scan(scan_id).await?;
        update(&mut scan)?;
        self.repo.save_scan(&scan).await?;
        Ok(scan)
    }

    /// Fold one tool result into the scan's assets and findings.
    ///
    /// Safe to repeat: findings are keyed by content, so a second pass over
    /// the same result only merges assets and recomputes counts.
    pub async fn aggregate(&self, scan_id: &str, result: &ToolResult) -> Result<AggregationOutcome, WardenError> {
        let lock = self.lock_for(scan_id);
        let _guard = lock.lock().await;
        let mut outcome = AggregationOutcome::default();

        if let Err(reason) = result.payload.validate() {
            warn!(scan_id, tool = %result.tool, reason = %reason, "Skipping malformed tool payload");
            outcome.skipped = Some(reason);
            return Ok(outcome);
        }

        let raw_ref = result.raw_ref();
        let mut drafts = Vec::new();

        for host in &result.payload.hosts {
            self.repo.upsert_asset(host_asset(host, &result.tool)).await?;
            outcome.assets += 1;
            drafts.extend(host.ports.iter().filter(|p| p.is_open()).map(|p| open_port_draft(host, p)));
        }
        drafts.extend(result.payload.vulnerabilities.iter().map(|v| vuln_draft(v, &result.tool)));
        drafts.extend(result.payload.credentials.iter().map(credential_draft));

        let mut seen: HashSet<String> = self
            .repo
            .list_findings(scan_id)
            .await?
            .into_iter()
            .map(|f| f.dedup_key)
            .collect();

        for draft in drafts {
            if !seen.insert(draft.dedup_key.clone()) {
                outcome.duplicates += 1;
                continue;
            }
            let finding = draft.into_finding(scan_id, &result.tool, Some(raw_ref.clone()));
            self.repo.append_finding(&finding).await?;
            debug!(scan_id, finding_id = %finding.id, title = %finding.title, "Finding created");
            self.notifier.emit(ScanEvent::FindingCreated {
                scan_id: scan_id.to_string(),
                finding_id: finding.id.clone(),
                title: finding.title.clone(),
                severity: finding.severity,
            });
            outcome.created.push(finding);
        }

        outcome.counts = self.recompute_counts(scan_id).await?;
        info!(
            scan_id,
            tool = %result.tool,
            created = outcome.created.len(),
            duplicates = outcome.duplicates,
            assets = outcome.assets,
            "Aggregated tool result"
        );
        Ok(outcome)
    }

    /// Record an exploitation attempt against `original`. A success adds a
    /// confirmed critical finding pointing at the original and promotes the
    /// original to confirmed.
    pub async fn record_exploitation(
        &self,
        scan_id: &str,
        original: &Finding,
        tool: &str,
        record: &ExploitRecord,
        raw_ref: Option<String>,
    ) -> Result<Option<Finding>, WardenError> {
        if !record.success {
            info!(scan_id, finding_id = %original.id, tool, "Exploitation attempt did not succeed");
            return Ok(None);
        }

        let lock = self.lock_for(scan_id);
        let _guard = lock.lock().await;

        let key = dedup::exploitation_key(&original.id);
        let existing = self.repo.list_findings(scan_id).await?;
        if let Some(found) = existing.into_iter().find(|f| f.dedup_key == key) {
            return Ok(Some(found));
        }

        let mut finding = Draft {
            title: format!("Exploitation successful: {}", original.title),
            description: record.detail.clone(),
            severity: Severity::Critical,
            target: original.target.clone(),
            cve_id: original.cve_id.clone(),
            cvss_score: original.cvss_score,
            port: original.port,
            service: original.service.clone(),
            evidence: record.session.as_ref().map(|s| format!("Session: {}", s)),
            dedup_key: key,
        }
        .into_finding(scan_id, tool, raw_ref);
        finding.status = FindingStatus::Confirmed;
        finding.related_finding_id = Some(original.id.clone());

        self.repo.append_finding(&finding).await?;
        self.repo.update_finding_status(&original.id, FindingStatus::Confirmed).await?;
        self.recompute_counts(scan_id).await?;

        info!(scan_id, finding_id = %finding.id, original = %original.id, "Exploitation confirmed finding");
        self.notifier.emit(ScanEvent::ExploitationSucceeded {
            scan_id: scan_id.to_string(),
            finding_id: finding.id.clone(),
            original_finding_id: original.id.clone(),
        });
        Ok(Some(finding))
    }

    /// Change a finding's status (e.g. to false_positive) and recompute the
    /// scan's counters.
    pub async fn set_finding_status(
        &self,
        scan_id: &str,
        finding_id: &str,
        status: FindingStatus,
    ) -> Result<SeverityCounts, WardenError> {
        let lock = self.lock_for(scan_id);
        let _guard = lock.lock().await;
        self.repo.update_finding_status(finding_id, status).await?;
        self.recompute_counts(scan_id).await
    }

    /// Counters are always derived from the stored finding set. Caller holds
    /// the scan lock.
    async fn recompute_counts(&self, scan_id: &str) -> Result<SeverityCounts, WardenError> {
        let findings = self.repo.list_findings(scan_id).await?;
        let counts = SeverityCounts::from_findings(&findings);
        let mut scan = self.repo.load_scan(scan_id).await?;
        scan.counts = counts;
        self.repo.save_scan(&scan).await?;
        Ok(counts)
    }
}

fn host_asset(host: &HostRecord, tool: &str) -> Asset {
    let mut asset = Asset::new(&host.address, host.asset_type, tool);
    asset.name = host.hostnames.first().cloned();

    let mut properties = host.properties.clone();
    if !host.hostnames.is_empty() {
        properties.insert("hostnames".into(), json!(host.hostnames));
    }
    if let Some(os) = &host.os {
        properties.insert("os".into(), json!(os));
    }
    if let Some(status) = &host.status {
        properties.insert("status".into(), json!(status));
    }
    if !host.ports.is_empty() {
        let ports: Vec<Value> = host
            .ports
            .iter()
            .map(|p| {
                json!({
                    "port": p.port,
                    "protocol": p.protocol,
                    "state": p.state,
                    "service": p.service,
                    "version": p.version,
                })
            })
            .collect();
        properties.insert("ports".into(), Value::Array(ports));
    }
    asset.properties = properties;
    asset
}

fn open_port_draft(host: &HostRecord, port: &PortRecord) -> Draft {
    let title = format!("Open Port {}/{} on {}", port.port, port.protocol, host.address);
    let description = match (&port.service, &port.version) {
        (Some(service), Some(version)) => format!("Service {} ({}) is listening", service, version),
        (Some(service), None) => format!("Service {} is listening", service),
        _ => "Port is open".to_string(),
    };
    Draft {
        dedup_key: finding_key(None, &title, &host.address),
        title,
        description,
        severity: Severity::Info,
        target: host.address.clone(),
        cve_id: None,
        cvss_score: None,
        port: Some(port.port),
        service: port.service.clone(),
        evidence: port.version.clone(),
    }
}

fn vuln_draft(vuln: &VulnRecord, tool: &str) -> Draft {
    let cve_id = vuln
        .cve_id
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_uppercase);
    let title = match (vuln.title.as_deref().map(str::trim).filter(|t| !t.is_empty()), &cve_id) {
        (Some(title), _) => title.to_string(),
        (None, Some(cve)) => format!("{} - {} detection", cve, tool),
        (None, None) => format!("Vulnerability detected by {}", tool),
    };
    let description = vuln.description.clone().unwrap_or_default();
    let severity = resolve_severity(vuln.severity.as_deref(), vuln.cvss_score, &title, &description);
    Draft {
        dedup_key: finding_key(cve_id.as_deref(), &title, &vuln.target),
        title,
        description,
        severity,
        target: vuln.target.clone(),
        cve_id,
        cvss_score: vuln.cvss_score,
        port: vuln.port,
        service: None,
        evidence: vuln.evidence.clone(),
    }
}

fn credential_draft(cred: &CredentialRecord) -> Draft {
    Draft {
        title: format!("Valid credentials for {} on {}", cred.service, cred.target),
        description: format!("Login succeeded against {} with a discovered password", cred.service),
        severity: Severity::High,
        target: cred.target.clone(),
        cve_id: None,
        cvss_score: None,
        port: cred.port,
        service: Some(cred.service.clone()),
        // the password itself is never stored
        evidence: Some(format!("Username: {}", cred.username)),
        dedup_key: dedup::credential_key(&cred.service, &cred.username, &cred.target),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::events::NullNotifier;
    use crate::models::{ScanType, ToolPayload};

    async fn setup() -> (ResultAggregator, Arc<Database>, String) {
        let db = Arc::new(Database::in_memory().unwrap());
        let scan = Scan::new("t", "alice", vec!["10.0.0.1".into()], ScanType::Full);
        db.save_scan(&scan).await.unwrap();
        (ResultAggregator::new(db.clone(), Arc::new(NullNotifier)), db, scan.id)
    }

    fn result(tool: &str, payload: ToolPayload) -> ToolResult {
        let now = Utc::now();
        ToolResult {
            tool: tool.into(),
            argv: vec![tool.into()],
            config: Value::Null,
            started_at: now,
            finished_at: now,
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
            payload,
        }
    }

    fn cve_vuln(cve: &str, title: &str) -> VulnRecord {
        VulnRecord {
            title: Some(title.into()),
            cve_id: Some(cve.into()),
            cvss_score: Some(7.5),
            target: "10.0.0.1".into(),
            ..Default::default()
        }
    }

    fn host_payload() -> ToolPayload {
        ToolPayload {
            hosts: vec![HostRecord {
                address: "10.0.0.1".into(),
                hostnames: vec!["web01".into()],
                ports: vec![
                    PortRecord { port: 22, protocol: "tcp".into(), state: "open".into(), service: Some("ssh".into()), version: None },
                    PortRecord { port: 25, protocol: "tcp".into(), state: "filtered".into(), service: None, version: None },
                ],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    async fn assert_counts_match(db: &Database, scan_id: &str) {
        let findings = db.list_findings(scan_id).await.unwrap();
        let scan = db.load_scan(scan_id).await.unwrap();
        let live = findings.iter().filter(|f| f.status != FindingStatus::FalsePositive).count();
        assert_eq!(scan.counts.total() as usize, live);
    }

    #[tokio::test]
    async fn test_hosts_become_assets_and_open_port_findings() {
        let (agg, db, scan_id) = setup().await;
        let outcome = agg.aggregate(&scan_id, &result("nmap", host_payload())).await.unwrap();

        assert_eq!(outcome.assets, 1);
        assert_eq!(outcome.created.len(), 1);
        assert_eq!(outcome.created[0].title, "Open Port 22/tcp on 10.0.0.1");
        assert_eq!(outcome.created[0].severity, Severity::Info);
        let asset = db.get_asset("10.0.0.1").await.unwrap().unwrap();
        assert_eq!(asset.name.as_deref(), Some("web01"));
        assert_eq!(asset.properties["ports"].as_array().unwrap().len(), 2);
        assert_counts_match(&db, &scan_id).await;
    }

    #[tokio::test]
    async fn test_aggregation_is_idempotent() {
        let (agg, db, scan_id) = setup().await;
        let mut payload = host_payload();
        payload.vulnerabilities.push(cve_vuln("CVE-2021-41773", "Apache path traversal"));
        let r = result("nuclei", payload);

        let first = agg.aggregate(&scan_id, &r).await.unwrap();
        let second = agg.aggregate(&scan_id, &r).await.unwrap();
        assert_eq!(first.created.len(), 2);
        assert!(second.created.is_empty());
        assert_eq!(second.duplicates, 2);
        assert_eq!(db.list_findings(&scan_id).await.unwrap().len(), 2);
        assert_eq!(db.list_assets().await.unwrap().len(), 1);
        assert_counts_match(&db, &scan_id).await;
    }

    #[tokio::test]
    async fn test_same_cve_from_two_tools_is_one_finding() {
        let (agg, db, scan_id) = setup().await;
        let a = ToolPayload { vulnerabilities: vec![cve_vuln("CVE-2021-41773", "Apache 2.4.49 LFI")], ..Default::default() };
        let b = ToolPayload { vulnerabilities: vec![cve_vuln("cve-2021-41773", "Path Traversal")], ..Default::default() };
        agg.aggregate(&scan_id, &result("nuclei", a)).await.unwrap();
        agg.aggregate(&scan_id, &result("nmap", b)).await.unwrap();

        let findings = db.list_findings(&scan_id).await.unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].status, FindingStatus::Open);
        assert_eq!(db.load_scan(&scan_id).await.unwrap().counts.high, 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_skipped_without_writes() {
        let (agg, db, scan_id) = setup().await;
        let bad = ToolPayload {
            vulnerabilities: vec![VulnRecord { target: "10.0.0.1".into(), ..Default::default() }],
            ..Default::default()
        };
        let outcome = agg.aggregate(&scan_id, &result("nikto", bad)).await.unwrap();
        assert!(outcome.skipped.is_some());
        assert!(db.list_findings(&scan_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_title_fallbacks_and_keyword_severity() {
        let (agg, _db, scan_id) = setup().await;
        let payload = ToolPayload {
            vulnerabilities: vec![
                VulnRecord { cve_id: Some("CVE-2017-5638".into()), target: "10.0.0.1".into(), ..Default::default() },
                VulnRecord {
                    title: Some("Reflected XSS in q".into()),
                    target: "10.0.0.1".into(),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };
        let outcome = agg.aggregate(&scan_id, &result("nuclei", payload)).await.unwrap();
        assert_eq!(outcome.created[0].title, "CVE-2017-5638 - nuclei detection");
        assert_eq!(outcome.created[0].severity, Severity::Low);
        assert_eq!(outcome.created[1].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_credentials_are_high_without_password() {
        let (agg, _db, scan_id) = setup().await;
        let payload = ToolPayload {
            credentials: vec![CredentialRecord {
                target: "10.0.0.1".into(),
                service: "ssh".into(),
                port: Some(22),
                username: "root".into(),
                password: Some("toor".into()),
            }],
            ..Default::default()
        };
        let outcome = agg.aggregate(&scan_id, &result("hydra", payload)).await.unwrap();
        let finding = &outcome.created[0];
        assert_eq!(finding.title, "Valid credentials for ssh on 10.0.0.1");
        assert_eq!(finding.severity, Severity::High);
        assert_eq!(finding.evidence.as_deref(), Some("Username: root"));
        assert!(!serde_json::to_string(finding).unwrap().contains("toor"));
    }

    #[tokio::test]
    async fn test_false_positive_excluded_from_counts() {
        let (agg, db, scan_id) = setup().await;
        let payload = ToolPayload { vulnerabilities: vec![cve_vuln("CVE-2021-41773", "x")], ..Default::default() };
        let outcome = agg.aggregate(&scan_id, &result("nuclei", payload)).await.unwrap();
        assert_eq!(outcome.counts.total(), 1);

        let counts = agg
            .set_finding_status(&scan_id, &outcome.created[0].id, FindingStatus::FalsePositive)
            .await
            .unwrap();
        assert_eq!(counts.total(), 0);
        assert_counts_match(&db, &scan_id).await;
    }

    #[tokio::test]
    async fn test_record_exploitation_confirms_original() {
        let (agg, db, scan_id) = setup().await;
        let payload = ToolPayload { vulnerabilities: vec![cve_vuln("CVE-2017-5638", "Struts RCE")], ..Default::default() };
        let original = agg.aggregate(&scan_id, &result("nuclei", payload)).await.unwrap().created.remove(0);

        let record = ExploitRecord { success: true, detail: "shell".into(), session: Some("1".into()) };
        let exploit = agg
            .record_exploitation(&scan_id, &original, "metasploit", &record, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exploit.title, "Exploitation successful: Struts RCE");
        assert_eq!(exploit.status, FindingStatus::Confirmed);
        assert_eq!(exploit.related_finding_id.as_deref(), Some(original.id.as_str()));

        let findings = db.list_findings(&scan_id).await.unwrap();
        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.status == FindingStatus::Confirmed));
        let counts = db.load_scan(&scan_id).await.unwrap().counts;
        assert_eq!((counts.critical, counts.high), (1, 1));

        // a repeated success does not add another finding
        agg.record_exploitation(&scan_id, &original, "metasploit", &record, None).await.unwrap();
        assert_eq!(db.list_findings(&scan_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_exploitation_writes_nothing() {
        let (agg, db, scan_id) = setup().await;
        let payload = ToolPayload { vulnerabilities: vec![cve_vuln("CVE-2017-5638", "Struts RCE")], ..Default::default() };
        let original = agg.aggregate(&scan_id, &result("nuclei", payload)).await.unwrap().created.remove(0);
        let record = ExploitRecord { success: false, detail: "no session".into(), session: None };
        assert!(agg.record_exploitation(&scan_id, &original, "metasploit", &record, None).await.unwrap().is_none());
        assert_eq!(db.list_findings(&scan_id).await.unwrap()[0].status, FindingStatus::Open);
    }

    #[tokio::test]
    async fn test_update_scan_round_trips_through_repo() {
        let (agg, db, scan_id) = setup().await;
        agg.update_scan(&scan_id, |s| {
            s.advance_progress(40);
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(db.load_scan(&scan_id).await.unwrap().progress_percent, 40);
    }
}
