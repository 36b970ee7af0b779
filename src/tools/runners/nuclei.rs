use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use crate::errors::WardenError;
use crate::models::{ToolPayload, ToolResult, VulnRecord};
use crate::process::ProcessExecutor;
use crate::tools::runner::{build_result, ensure_ran, parse_options, ToolCategory, ToolRunner};
use crate::tools::validation::{is_plain_value, validate_common, TargetKind};
use super::json_lines;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NucleiOptions {
    /// Comma-separated severity filter, e.g. `critical,high`.
    pub severity: Option<String>,
    pub tags: Option<String>,
    pub templates: Vec<String>,
    pub rate_limit: u32,
    pub concurrency: u32,
    pub bulk_size: u32,
    /// Per-request timeout in seconds.
    pub timeout: u32,
    pub retries: u32,
}

impl Default for NucleiOptions {
    fn default() -> Self {
        Self {
            severity: None,
            tags: None,
            templates: Vec::new(),
            rate_limit: 150,
            concurrency: 25,
            bulk_size: 25,
            timeout: 10,
            retries: 1,
        }
    }
}

impl NucleiOptions {
    fn is_valid(&self) -> bool {
        self.severity.as_deref().map_or(true, is_plain_value)
            && self.tags.as_deref().map_or(true, is_plain_value)
            && self.templates.iter().all(|t| is_plain_value(t))
    }
}

#[derive(Debug, Deserialize)]
struct NucleiRecord {
    #[serde(rename = "template-id")]
    template_id: String,
    info: NucleiInfo,
    host: Option<String>,
    #[serde(rename = "matched-at")]
    matched_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NucleiInfo {
    name: Option<String>,
    severity: Option<String>,
    description: Option<String>,
    classification: Option<Classification>,
}

#[derive(Debug, Deserialize)]
struct Classification {
    /// A list in current nuclei releases, a bare string in older ones.
    #[serde(rename = "cve-id", default)]
    cve_id: Value,
    #[serde(rename = "cvss-score")]
    cvss_score: Option<f64>,
}

impl Classification {
    fn first_cve(&self) -> Option<String> {
        match &self.cve_id {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => items.iter().find_map(|v| v.as_str()).map(String::from),
            _ => None,
        }
        .map(|c| c.to_uppercase())
    }
}

pub struct NucleiRunner {
    executor: Arc<ProcessExecutor>,
}

impl NucleiRunner {
    pub fn new(executor: Arc<ProcessExecutor>) -> Self {
        Self { executor }
    }

    fn build_argv(targets: &[String], opts: &NucleiOptions) -> Vec<String> {
        let mut argv = vec!["nuclei".to_string()];
        for target in targets {
            argv.extend(["-u".to_string(), target.clone()]);
        }
        argv.extend(["-jsonl".to_string(), "-silent".to_string()]);
        for template in &opts.templates {
            argv.extend(["-t".to_string(), template.clone()]);
        }
        if let Some(severity) = &opts.severity {
            argv.extend(["-severity".to_string(), severity.clone()]);
        }
        if let Some(tags) = &opts.tags {
            argv.extend(["-tags".to_string(), tags.clone()]);
        }
        for (flag, value) in [
            ("-rate-limit", opts.rate_limit),
            ("-concurrency", opts.concurrency),
            ("-bulk-size", opts.bulk_size),
            ("-timeout", opts.timeout),
            ("-retries", opts.retries),
        ] {
            argv.extend([flag.to_string(), value.to_string()]);
        }
        argv
    }
}

pub fn parse_output(stdout: &str, targets: &[String]) -> ToolPayload {
    let fallback_target = targets.first().cloned().unwrap_or_default();
    let vulnerabilities = json_lines::<NucleiRecord>(stdout)
        .into_iter()
        .map(|r| {
            let cve_id = r.info.classification.as_ref().and_then(Classification::first_cve);
            let cvss_score = r.info.classification.as_ref().and_then(|c| c.cvss_score);
            VulnRecord {
                title: r.info.name.or_else(|| Some(r.template_id.clone())),
                description: r.info.description,
                severity: r.info.severity,
                cve_id,
                cvss_score,
                target: r.host.unwrap_or_else(|| fallback_target.clone()),
                port: None,
                evidence: Some(format!("{} matched at {}", r.template_id, r.matched_at.as_deref().unwrap_or("?"))),
            }
        })
        .collect();
    ToolPayload { vulnerabilities, ..Default::default() }
}

#[async_trait]
impl ToolRunner for NucleiRunner {
    fn name(&self) -> &'static str {
        "nuclei"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::VulnerabilityScanning
    }

    fn validate(&self, targets: &[String], options: &Value) -> bool {
        validate_common(targets, options, TargetKind::Either)
            && parse_options::<NucleiOptions>(self.name(), options).is_ok_and(|o| o.is_valid())
    }

    async fn execute(&self, targets: &[String], options: &Value, timeout: Duration) -> Result<ToolResult, WardenError> {
        let opts: NucleiOptions = parse_options(self.name(), options)?;
        let argv = Self::build_argv(targets, &opts);
        let started_at = Utc::now();
        let output = self.executor.run(argv.clone(), timeout).await?;
        ensure_ran(self.name(), &output)?;
        let payload = parse_output(&output.stdout, targets);
        Ok(build_result(self.name(), argv, options, started_at, output, payload))
    }
}
