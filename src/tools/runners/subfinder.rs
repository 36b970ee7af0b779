use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use crate::errors::WardenError;
use crate::models::{AssetType, HostRecord, ToolPayload, ToolResult};
use crate::process::ProcessExecutor;
use crate::tools::runner::{build_result, ensure_ran, parse_options, ToolCategory, ToolRunner};
use crate::tools::validation::{validate_common, TargetKind};
use super::json_lines;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SubfinderOptions {
    pub all_sources: bool,
    pub recursive: bool,
}

impl Default for SubfinderOptions {
    fn default() -> Self {
        Self { all_sources: true, recursive: false }
    }
}

#[derive(Debug, Deserialize)]
struct SubfinderRecord {
    host: String,
    input: Option<String>,
    source: Option<String>,
}

pub struct SubfinderRunner {
    executor: Arc<ProcessExecutor>,
}

impl SubfinderRunner {
    pub fn new(executor: Arc<ProcessExecutor>) -> Self {
        Self { executor }
    }
}

pub fn parse_output(stdout: &str) -> ToolPayload {
    let mut found: BTreeMap<String, (Option<String>, Vec<String>)> = BTreeMap::new();
    for record in json_lines::<SubfinderRecord>(stdout) {
        let entry = found.entry(record.host.to_lowercase()).or_insert_with(|| (record.input.clone(), Vec::new()));
        if let Some(source) = record.source {
            if !entry.1.contains(&source) {
                entry.1.push(source);
            }
        }
    }
    let hosts = found
        .into_iter()
        .map(|(host, (parent, sources))| {
            let mut properties = Map::new();
            properties.insert("sources".into(), json!(sources));
            if let Some(parent) = parent {
                properties.insert("parent_domain".into(), json!(parent));
            }
            HostRecord {
                address: host,
                asset_type: AssetType::Domain,
                properties,
                ..Default::default()
            }
        })
        .collect();
    ToolPayload { hosts, ..Default::default() }
}

/// Subfinder only makes sense for domain names.
fn is_domain(target: &str) -> bool {
    target.parse::<std::net::IpAddr>().is_err() && !target.contains('/') && target.contains('.')
}

#[async_trait]
impl ToolRunner for SubfinderRunner {
    fn name(&self) -> &'static str {
        "subfinder"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReconOsint
    }

    fn validate(&self, targets: &[String], options: &Value) -> bool {
        validate_common(targets, options, TargetKind::Host)
            && targets.iter().all(|t| is_domain(t))
            && parse_options::<SubfinderOptions>(self.name(), options).is_ok()
    }

    async fn execute(&self, targets: &[String], options: &Value, timeout: Duration) -> Result<ToolResult, WardenError> {
        let opts: SubfinderOptions = parse_options(self.name(), options)?;
        let mut argv = vec!["subfinder".to_string()];
        for target in targets {
            argv.extend(["-d".to_string(), target.clone()]);
        }
        if opts.all_sources {
            argv.push("-all".into());
        }
        if opts.recursive {
            argv.push("-recursive".into());
        }
        argv.extend(["-oJ".to_string(), "-silent".to_string()]);

        let started_at = Utc::now();
        let output = self.executor.run(argv.clone(), timeout).await?;
        ensure_ran(self.name(), &output)?;
        let payload = parse_output(&output.stdout);
        Ok(build_result(self.name(), argv, options, started_at, output, payload))
    }
}
