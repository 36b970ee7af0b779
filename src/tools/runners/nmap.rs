use std::sync::{Arc, LazyLock};
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use crate::errors::WardenError;
use crate::models::{AssetType, HostRecord, PortRecord, ToolPayload, ToolResult, VulnRecord};
use crate::process::ProcessExecutor;
use crate::tools::runner::{build_result, ensure_ran, parse_options, ToolCategory, ToolRunner};
use crate::tools::validation::{is_plain_value, validate_common, TargetKind};
use tracing::debug;

#[allow(clippy::expect_used)]
static CVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"CVE-\d{4}-\d{4,}").expect("CVE pattern is valid")
});

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum NmapScanType {
    #[default]
    Syn,
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NmapOptions {
    pub scan_type: NmapScanType,
    pub ports: Option<String>,
    pub service_detection: bool,
    pub os_detection: bool,
    pub scripts: Vec<String>,
    /// Timing template 0-5 (`-T`).
    pub timing: Option<u8>,
}

impl Default for NmapOptions {
    fn default() -> Self {
        Self {
            scan_type: NmapScanType::Syn,
            ports: None,
            service_detection: true,
            os_detection: false,
            scripts: Vec::new(),
            timing: None,
        }
    }
}

impl NmapOptions {
    fn is_valid(&self) -> bool {
        self.ports.as_deref().map_or(true, is_plain_value)
            && self.scripts.iter().all(|s| is_plain_value(s))
            && self.timing.map_or(true, |t| t <= 5)
    }
}

// Partial nmap XML schema: only the parts that feed the payload.

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(rename = "host", default)]
    hosts: Vec<Host>,
}

#[derive(Debug, Deserialize)]
struct Host {
    #[serde(rename = "address", default)]
    addresses: Vec<Address>,
    status: Option<Status>,
    hostnames: Option<Hostnames>,
    ports: Option<Ports>,
    os: Option<Os>,
}

#[derive(Debug, Deserialize)]
struct Address {
    #[serde(rename = "@addr")]
    addr: String,
    #[serde(rename = "@addrtype")]
    addr_type: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct Hostnames {
    #[serde(rename = "hostname", default)]
    hostnames: Vec<Hostname>,
}

#[derive(Debug, Deserialize)]
struct Hostname {
    #[serde(rename = "@name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct Ports {
    #[serde(rename = "port", default)]
    ports: Vec<Port>,
}

#[derive(Debug, Deserialize)]
struct Port {
    #[serde(rename = "@portid")]
    portid: u16,
    #[serde(rename = "@protocol")]
    protocol: String,
    state: PortState,
    service: Option<Service>,
    #[serde(rename = "script", default)]
    scripts: Vec<Script>,
}

#[derive(Debug, Deserialize)]
struct PortState {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct Service {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "@product")]
    product: Option<String>,
    #[serde(rename = "@version")]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Script {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@output", default)]
    output: String,
}

#[derive(Debug, Deserialize)]
struct Os {
    #[serde(rename = "osmatch", default)]
    matches: Vec<OsMatch>,
}

#[derive(Debug, Deserialize)]
struct OsMatch {
    #[serde(rename = "@name")]
    name: String,
}

pub struct NmapRunner {
    executor: Arc<ProcessExecutor>,
}

impl NmapRunner {
    pub fn new(executor: Arc<ProcessExecutor>) -> Self {
        Self { executor }
    }

    fn build_argv(targets: &[String], opts: &NmapOptions) -> Vec<String> {
        let mut argv = vec!["nmap".to_string()];
        argv.push(match opts.scan_type {
            NmapScanType::Syn => "-sS",
            NmapScanType::Tcp => "-sT",
            NmapScanType::Udp => "-sU",
        }.to_string());
        if let Some(ports) = &opts.ports {
            argv.extend(["-p".to_string(), ports.clone()]);
        }
        if opts.os_detection {
            argv.push("-O".into());
        }
        if opts.service_detection {
            argv.push("-sV".into());
        }
        if !opts.scripts.is_empty() {
            argv.extend(["--script".to_string(), opts.scripts.join(",")]);
        }
        if let Some(timing) = opts.timing {
            argv.push(format!("-T{}", timing));
        }
        argv.extend(["-oX".to_string(), "-".to_string()]);
        argv.extend(targets.iter().cloned());
        argv
    }
}

fn reports_vulnerable(output: &str) -> bool {
    output.contains("VULNERABLE") && !output.contains("NOT VULNERABLE")
}

/// Parse `-oX` output into host and vulnerability records.
pub fn parse_xml(xml: &str) -> Result<ToolPayload, WardenError> {
    let run: NmapRun = quick_xml::de::from_str(xml)
        .map_err(|e| WardenError::OutputParse(format!("nmap XML: {}", e)))?;

    let mut payload = ToolPayload::default();
    for host in run.hosts {
        let Some(address) = host
            .addresses
            .iter()
            .find(|a| a.addr_type != "mac")
            .or_else(|| host.addresses.first())
            .map(|a| a.addr.clone())
        else {
            continue;
        };

        let mut ports = Vec::new();
        for port in host.ports.map(|p| p.ports).unwrap_or_default() {
            for script in port.scripts.iter().filter(|s| reports_vulnerable(&s.output)) {
                payload.vulnerabilities.push(VulnRecord {
                    title: Some(format!("{} on port {}", script.id, port.portid)),
                    description: Some(script.output.trim().to_string()),
                    cve_id: CVE_RE.find(&script.output).map(|m| m.as_str().to_string()),
                    target: address.clone(),
                    port: Some(port.portid),
                    evidence: Some(script.id.clone()),
                    ..Default::default()
                });
            }
            let version = port.service.as_ref().and_then(|s| {
                match (s.product.as_deref(), s.version.as_deref()) {
                    (Some(p), Some(v)) => Some(format!("{} {}", p, v)),
                    (Some(p), None) => Some(p.to_string()),
                    (None, v) => v.map(String::from),
                }
            });
            ports.push(PortRecord {
                port: port.portid,
                protocol: port.protocol,
                state: port.state.state,
                service: port.service.map(|s| s.name),
                version,
            });
        }

        payload.hosts.push(HostRecord {
            address,
            asset_type: AssetType::Host,
            hostnames: host.hostnames.map(|h| h.hostnames.into_iter().map(|n| n.name).collect()).unwrap_or_default(),
            os: host.os.and_then(|o| o.matches.into_iter().next()).map(|m| m.name),
            status: host.status.map(|s| s.state),
            ports,
            properties: Default::default(),
        });
    }
    Ok(payload)
}

#[async_trait]
impl ToolRunner for NmapRunner {
    fn name(&self) -> &'static str {
        "nmap"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::NetworkScanning
    }

    fn validate(&self, targets: &[String], options: &Value) -> bool {
        validate_common(targets, options, TargetKind::Host)
            && parse_options::<NmapOptions>(self.name(), options).is_ok_and(|o| o.is_valid())
    }

    async fn execute(&self, targets: &[String], options: &Value, timeout: Duration) -> Result<ToolResult, WardenError> {
        let opts: NmapOptions = parse_options(self.name(), options)?;
        let argv = Self::build_argv(targets, &opts);
        let started_at = Utc::now();
        let output = self.executor.run(argv.clone(), timeout).await?;
        ensure_ran(self.name(), &output)?;
        if output.exit_code != Some(0) {
            return Err(WardenError::ToolFailed(format!(
                "nmap exited with code {:?}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        let payload = parse_xml(&output.stdout)?;
        debug!(hosts = payload.hosts.len(), vulns = payload.vulnerabilities.len(), "Parsed nmap output");
        Ok(build_result(self.name(), argv, options, started_at, output, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::process::{CommandPolicy, LocalBackend};

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<nmaprun scanner="nmap" args="nmap -sV -oX - 10.0.0.5">
<host starttime="1" endtime="2">
<status state="up" reason="echo-reply"/>
<address addr="10.0.0.5" addrtype="ipv4"/>
<address addr="00:11:22:33:44:55" addrtype="mac"/>
<hostnames><hostname name="web01.lab" type="PTR"/></hostnames>
<ports>
<extraports state="closed" count="997"/>
<port protocol="tcp" portid="22"><state state="open" reason="syn-ack"/><service name="ssh" product="OpenSSH" version="8.9"/></port>
<port protocol="tcp" portid="445"><state state="open" reason="syn-ack"/><service name="microsoft-ds"/>
<script id="smb-vuln-ms17-010" output="VULNERABLE: Remote Code Execution vulnerability in Microsoft SMBv1 servers (ms17-010) IDs: CVE:CVE-2017-0143"/></port>
<port protocol="tcp" portid="8080"><state state="filtered" reason="no-response"/></port>
</ports>
<os><osmatch name="Linux 5.4" accuracy="95"/></os>
</host>
</nmaprun>"#;

    fn runner() -> NmapRunner {
        NmapRunner::new(Arc::new(ProcessExecutor::new(CommandPolicy::default(), Arc::new(LocalBackend::new()))))
    }

    #[test]
    fn test_parse_hosts_and_ports() {
        let payload = parse_xml(SAMPLE).unwrap();
        assert_eq!(payload.hosts.len(), 1);
        let host = &payload.hosts[0];
        assert_eq!(host.address, "10.0.0.5");
        assert_eq!(host.hostnames, vec!["web01.lab".to_string()]);
        assert_eq!(host.os.as_deref(), Some("Linux 5.4"));
        assert_eq!(host.ports.len(), 3);
        assert_eq!(host.ports.iter().filter(|p| p.is_open()).count(), 2);
        assert_eq!(host.ports[0].version.as_deref(), Some("OpenSSH 8.9"));
    }

    #[test]
    fn test_vulnerable_script_becomes_vuln() {
        let payload = parse_xml(SAMPLE).unwrap();
        assert_eq!(payload.vulnerabilities.len(), 1);
        let vuln = &payload.vulnerabilities[0];
        assert_eq!(vuln.cve_id.as_deref(), Some("CVE-2017-0143"));
        assert_eq!(vuln.port, Some(445));
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_garbage_is_parse_error() {
        assert!(matches!(parse_xml(
            r#"<nmaprun><host><ports><port portid="abc" protocol="tcp"><state state="open"/></port></ports></host></nmaprun>"#
        ), Err(WardenError::OutputParse(_))));
    }

    #[test]
    fn test_build_argv() {
        let opts: NmapOptions = serde_json::from_value(json!({
            "scan_type": "tcp", "ports": "1-1000", "scripts": ["vuln"], "timing": 4
        })).unwrap();
        let argv = NmapRunner::build_argv(&["10.0.0.1".to_string()], &opts);
        assert_eq!(argv, vec!["nmap", "-sT", "-p", "1-1000", "-sV", "--script", "vuln", "-T4", "-oX", "-", "10.0.0.1"]);
    }

    #[test]
    fn test_validate() {
        let r = runner();
        let targets = vec!["10.0.0.1".to_string()];
        assert!(r.validate(&targets, &Value::Null));
        assert!(!r.validate(&targets, &json!({"ports": "-oN /tmp/x"})));
        assert!(!r.validate(&targets, &json!({"timing": 9})));
        assert!(!r.validate(&["http://x.com".to_string()], &Value::Null));
        assert!(!r.validate(&[], &Value::Null));
    }
}
