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
pub struct WhatwebOptions {
    /// 1 (stealthy) to 4 (heavy).
    pub aggression: u8,
}

impl Default for WhatwebOptions {
    fn default() -> Self {
        Self { aggression: 1 }
    }
}

#[derive(Debug, Deserialize)]
struct WhatwebRecord {
    target: String,
    #[serde(default)]
    http_status: u16,
    #[serde(default)]
    plugins: BTreeMap<String, PluginData>,
}

#[derive(Debug, Default, Deserialize)]
struct PluginData {
    #[serde(default)]
    version: Vec<String>,
    #[serde(default)]
    string: Vec<String>,
}

pub struct WhatwebRunner {
    executor: Arc<ProcessExecutor>,
}

impl WhatwebRunner {
    pub fn new(executor: Arc<ProcessExecutor>) -> Self {
        Self { executor }
    }
}

pub fn parse_output(stdout: &str) -> ToolPayload {
    let hosts = json_lines::<WhatwebRecord>(stdout)
        .into_iter()
        .map(|record| {
            let mut technologies = Vec::new();
            let mut title = None;
            for (name, data) in &record.plugins {
                if name == "Title" {
                    title = data.string.first().cloned();
                    continue;
                }
                match data.version.first() {
                    Some(v) => technologies.push(format!("{} {}", name, v)),
                    None => technologies.push(name.clone()),
                }
            }
            let mut properties = Map::new();
            properties.insert("technologies".into(), json!(technologies));
            properties.insert("http_status".into(), json!(record.http_status));
            if let Some(title) = title {
                properties.insert("title".into(), json!(title));
            }
            HostRecord {
                address: record.target,
                asset_type: AssetType::WebApplication,
                status: Some(if record.http_status > 0 { "up" } else { "unknown" }.to_string()),
                properties,
                ..Default::default()
            }
        })
        .collect();
    ToolPayload { hosts, ..Default::default() }
}

#[async_trait]
impl ToolRunner for WhatwebRunner {
    fn name(&self) -> &'static str {
        "whatweb"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::WebScanning
    }

    fn validate(&self, targets: &[String], options: &Value) -> bool {
        validate_common(targets, options, TargetKind::Either)
            && parse_options::<WhatwebOptions>(self.name(), options).is_ok_and(|o| (1..=4).contains(&o.aggression))
    }

    async fn execute(&self, targets: &[String], options: &Value, timeout: Duration) -> Result<ToolResult, WardenError> {
        let opts: WhatwebOptions = parse_options(self.name(), options)?;
        let mut argv = vec![
            "whatweb".to_string(),
            "-a".to_string(),
            opts.aggression.to_string(),
            "--log-json=-".to_string(),
            "-q".to_string(),
        ];
        argv.extend(targets.iter().cloned());

        let started_at = Utc::now();
        let output = self.executor.run(argv.clone(), timeout).await?;
        ensure_ran(self.name(), &output)?;
        let payload = parse_output(&output.stdout);
        Ok(build_result(self.name(), argv, options, started_at, output, payload))
    }
}
