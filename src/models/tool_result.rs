use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use super::asset::AssetType;

/// Everything one tool invocation produced. Consumed once by the aggregator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub argv: Vec<String>,
    /// Snapshot of the options the runner was given.
    pub config: Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub payload: ToolPayload,
}

impl ToolResult {
    pub fn duration_ms(&self) -> u64 {
        (self.finished_at - self.started_at).num_milliseconds().max(0) as u64
    }

    /// Stable reference used by findings to point back at this output.
    pub fn raw_ref(&self) -> String {
        format!("{}@{}", self.tool, self.started_at.timestamp_millis())
    }
}

/// Normalized partial output of a tool. Each runner fills the parts it knows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolPayload {
    #[serde(default)]
    pub hosts: Vec<HostRecord>,
    #[serde(default)]
    pub vulnerabilities: Vec<VulnRecord>,
    #[serde(default)]
    pub credentials: Vec<CredentialRecord>,
    #[serde(default)]
    pub exploitation: Option<ExploitRecord>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub address: String,
    #[serde(default)]
    pub asset_type: AssetType,
    #[serde(default)]
    pub hostnames: Vec<String>,
    pub os: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub ports: Vec<PortRecord>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortRecord {
    pub port: u16,
    pub protocol: String,
    pub state: String,
    pub service: Option<String>,
    pub version: Option<String>,
}

impl PortRecord {
    pub fn is_open(&self) -> bool {
        self.state == "open"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VulnRecord {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Severity as the tool reported it, if it did.
    pub severity: Option<String>,
    pub cve_id: Option<String>,
    pub cvss_score: Option<f64>,
    pub target: String,
    pub port: Option<u16>,
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub target: String,
    pub service: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExploitRecord {
    pub success: bool,
    pub detail: String,
    pub session: Option<String>,
}

impl ToolPayload {
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
            && self.vulnerabilities.is_empty()
            && self.credentials.is_empty()
            && self.exploitation.is_none()
    }

    /// Structural checks; a payload failing these is skipped as a whole.
    pub fn validate(&self) -> Result<(), String> {
        for host in &self.hosts {
            if host.address.trim().is_empty() {
                return Err("host record with empty address".into());
            }
            if host.ports.iter().any(|p| p.port == 0) {
                return Err(format!("host {} reports port 0", host.address));
            }
        }
        for (i, vuln) in self.vulnerabilities.iter().enumerate() {
            let has_title = vuln.title.as_deref().is_some_and(|t| !t.trim().is_empty());
            let has_cve = vuln.cve_id.as_deref().is_some_and(|c| !c.trim().is_empty());
            if !has_title && !has_cve {
                return Err(format!("vulnerability #{} has neither title nor CVE", i));
            }
            if vuln.target.trim().is_empty() {
                return Err(format!("vulnerability #{} has no target", i));
            }
            if let Some(score) = vuln.cvss_score {
                if !(0.0..=10.0).contains(&score) {
                    return Err(format!("vulnerability #{} has CVSS {} outside 0-10", i, score));
                }
            }
        }
        if self.credentials.iter().any(|c| c.username.trim().is_empty()) {
            return Err("credential record without username".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vuln(title: Option<&str>, cve: Option<&str>) -> VulnRecord {
        VulnRecord {
            title: title.map(String::from),
            cve_id: cve.map(String::from),
            target: "10.0.0.1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_payload_is_valid() {
        assert!(ToolPayload::default().validate().is_ok());
        assert!(ToolPayload::default().is_empty());
    }

    #[test]
    fn test_vuln_needs_title_or_cve() {
        let mut p = ToolPayload::default();
        p.vulnerabilities.push(vuln(None, Some("CVE-2021-44228")));
        assert!(p.validate().is_ok());
        p.vulnerabilities.push(vuln(Some("  "), None));
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_cvss_range_checked() {
        let mut v = vuln(Some("x"), None);
        v.cvss_score = Some(11.0);
        let p = ToolPayload { vulnerabilities: vec![v], ..Default::default() };
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_port_zero_rejected() {
        let p = ToolPayload {
            hosts: vec![HostRecord {
                address: "10.0.0.1".into(),
                ports: vec![PortRecord {
                    port: 0,
                    protocol: "tcp".into(),
                    state: "open".into(),
                    service: None,
                    version: None,
                }],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(p.validate().is_err());
    }
}
