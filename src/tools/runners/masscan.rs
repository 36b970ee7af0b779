use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use crate::errors::WardenError;
use crate::models::{AssetType, HostRecord, PortRecord, ToolPayload, ToolResult};
use crate::process::ProcessExecutor;
use crate::tools::runner::{build_result, ensure_ran, parse_options, ToolCategory, ToolRunner};
use crate::tools::validation::{is_plain_value, validate_common, TargetKind};
use super::json_lines;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MasscanOptions {
    pub ports: String,
    /// Packets per second.
    pub rate: u32,
}

impl Default for MasscanOptions {
    fn default() -> Self {
        Self { ports: "1-65535".to_string(), rate: 1000 }
    }
}

#[derive(Debug, Deserialize)]
struct MasscanRecord {
    ip: String,
    #[serde(default)]
    ports: Vec<MasscanPort>,
}

#[derive(Debug, Deserialize)]
struct MasscanPort {
    port: u16,
    proto: String,
    #[serde(default = "open_state")]
    status: String,
}

fn open_state() -> String {
    "open".to_string()
}

pub struct MasscanRunner {
    executor: Arc<ProcessExecutor>,
}

impl MasscanRunner {
    pub fn new(executor: Arc<ProcessExecutor>) -> Self {
        Self { executor }
    }
}

/// Masscan emits one record per discovered port; fold them per address.
pub fn parse_output(stdout: &str) -> ToolPayload {
    let mut by_ip: BTreeMap<String, Vec<PortRecord>> = BTreeMap::new();
    for record in json_lines::<MasscanRecord>(stdout) {
        let ports = by_ip.entry(record.ip).or_default();
        for p in record.ports {
            if !ports.iter().any(|e| e.port == p.port && e.protocol == p.proto) {
                ports.push(PortRecord { port: p.port, protocol: p.proto, state: p.status, service: None, version: None });
            }
        }
    }
    ToolPayload {
        hosts: by_ip
            .into_iter()
            .map(|(address, ports)| HostRecord {
                address,
                asset_type: AssetType::Host,
                status: Some("up".into()),
                ports,
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    }
}

#[async_trait]
impl ToolRunner for MasscanRunner {
    fn name(&self) -> &'static str {
        "masscan"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::NetworkScanning
    }

    fn validate(&self, targets: &[String], options: &Value) -> bool {
        validate_common(targets, options, TargetKind::Host)
            && parse_options::<MasscanOptions>(self.name(), options)
                .is_ok_and(|o| is_plain_value(&o.ports) && o.rate > 0)
    }

    async fn execute(&self, targets: &[String], options: &Value, timeout: Duration) -> Result<ToolResult, WardenError> {
        let opts: MasscanOptions = parse_options(self.name(), options)?;
        let mut argv = vec!["masscan".to_string()];
        argv.extend(targets.iter().cloned());
        argv.extend([
            "-p".to_string(), opts.ports.clone(),
            "--rate".to_string(), opts.rate.to_string(),
            "-oJ".to_string(), "-".to_string(),
        ]);

        let started_at = Utc::now();
        let output = self.executor.run(argv.clone(), timeout).await?;
        ensure_ran(self.name(), &output)?;
        let payload = parse_output(&output.stdout);
        Ok(build_result(self.name(), argv, options, started_at, output, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_groups_ports_by_host() {
        let out = r#"[
{   "ip": "10.0.0.2",   "timestamp": "1700000000", "ports": [ {"port": 80, "proto": "tcp", "status": "open", "reason": "syn-ack", "ttl": 64} ] },
{   "ip": "10.0.0.2",   "timestamp": "1700000001", "ports": [ {"port": 443, "proto": "tcp", "status": "open", "reason": "syn-ack", "ttl": 64} ] },
{   "ip": "10.0.0.3",   "timestamp": "1700000002", "ports": [ {"port": 22, "proto": "tcp", "status": "open", "reason": "syn-ack", "ttl": 64} ] }
]"#;
        let payload = parse_output(out);
        assert_eq!(payload.hosts.len(), 2);
        assert_eq!(payload.hosts[0].address, "10.0.0.2");
        assert_eq!(payload.hosts[0].ports.len(), 2);
        assert!(payload.hosts[1].ports[0].is_open());
    }

    #[test]
    fn test_defaults() {
        let opts = MasscanOptions::default();
        assert_eq!(opts.ports, "1-65535");
        assert_eq!(opts.rate, 1000);
    }
}
