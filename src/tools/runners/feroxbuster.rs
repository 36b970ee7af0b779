use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use crate::errors::WardenError;
use crate::models::{AssetType, HostRecord, ToolPayload, ToolResult, VulnRecord};
use crate::process::ProcessExecutor;
use crate::tools::runner::{build_result, ensure_ran, parse_options, run_per_target, ToolCategory, ToolRunner};
use crate::tools::validation::{is_plain_value, validate_common, TargetKind};
use super::json_lines;

const INTERESTING_PATTERNS: &[&str] = &[
    "admin", "login", "upload", "backup", "config", "api", "debug", "console",
    "phpmyadmin", "wp-admin", "dashboard", ".git", ".env", ".htaccess", "web.config",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeroxbusterOptions {
    pub wordlist: String,
    pub threads: u32,
    pub depth: u32,
    /// Comma-separated extensions, e.g. `php,html`.
    pub extensions: Option<String>,
}

impl Default for FeroxbusterOptions {
    fn default() -> Self {
        Self {
            wordlist: "/usr/share/wordlists/dirb/common.txt".to_string(),
            threads: 50,
            depth: 4,
            extensions: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeroxRecord {
    #[serde(rename = "type", default)]
    kind: String,
    url: String,
    #[serde(default)]
    status: u16,
}

pub struct FeroxbusterRunner {
    executor: Arc<ProcessExecutor>,
}

impl FeroxbusterRunner {
    pub fn new(executor: Arc<ProcessExecutor>) -> Self {
        Self { executor }
    }

    fn build_argv(target: &str, opts: &FeroxbusterOptions) -> Vec<String> {
        let mut argv = vec![
            "feroxbuster".to_string(),
            "-u".to_string(), base_url(target),
            "-w".to_string(), opts.wordlist.clone(),
            "-t".to_string(), opts.threads.to_string(),
            "-d".to_string(), opts.depth.to_string(),
        ];
        if let Some(ext) = &opts.extensions {
            argv.extend(["-x".to_string(), ext.clone()]);
        }
        argv.extend([
            "--json".to_string(),
            "-o".to_string(), "/dev/stdout".to_string(),
            "--silent".to_string(),
            "--no-state".to_string(),
        ]);
        argv
    }
}

/// Bare hosts are scanned over plain HTTP.
fn base_url(target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("http://{}", target)
    }
}

pub fn parse_output(stdout: &str, targets: &[String]) -> ToolPayload {
    let responses: Vec<FeroxRecord> = json_lines::<FeroxRecord>(stdout)
        .into_iter()
        .filter(|r| r.kind.is_empty() || r.kind == "response")
        .collect();

    let mut payload = ToolPayload::default();
    for target in targets {
        let base = base_url(target);
        let found: Vec<&FeroxRecord> = responses.iter().filter(|r| r.url.starts_with(&base)).collect();
        if found.is_empty() {
            continue;
        }
        for record in found.iter().filter(|r| is_interesting(&r.url)) {
            payload.vulnerabilities.push(VulnRecord {
                title: Some(format!("Interesting path exposed: {}", record.url)),
                description: Some(format!("Content discovery returned HTTP {} for {}", record.status, record.url)),
                severity: Some("info".into()),
                target: target.clone(),
                evidence: Some(record.url.clone()),
                ..Default::default()
            });
        }
        let mut properties = Map::new();
        properties.insert(
            "paths".into(),
            json!(found.iter().map(|r| json!({"url": r.url, "status": r.status})).collect::<Vec<_>>()),
        );
        payload.hosts.push(HostRecord {
            address: base,
            asset_type: AssetType::WebApplication,
            status: Some("up".into()),
            properties,
            ..Default::default()
        });
    }
    payload
}

fn is_interesting(url: &str) -> bool {
    let lower = url.to_lowercase();
    INTERESTING_PATTERNS.iter().any(|p| lower.contains(p))
}

#[async_trait]
impl ToolRunner for FeroxbusterRunner {
    fn name(&self) -> &'static str {
        "feroxbuster"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::WebFuzzing
    }

    fn validate(&self, targets: &[String], options: &Value) -> bool {
        validate_common(targets, options, TargetKind::Either)
            && parse_options::<FeroxbusterOptions>(self.name(), options).is_ok_and(|o| {
                is_plain_value(&o.wordlist)
                    && o.threads > 0
                    && o.extensions.as_deref().map_or(true, is_plain_value)
            })
    }

    async fn execute(&self, targets: &[String], options: &Value, timeout: Duration) -> Result<ToolResult, WardenError> {
        let opts: FeroxbusterOptions = parse_options(self.name(), options)?;
        let started_at = Utc::now();
        let (argv, output) =
            run_per_target(&self.executor, targets, timeout, |t| Self::build_argv(t, &opts)).await?;
        ensure_ran(self.name(), &output)?;
        let payload = parse_output(&output.stdout, targets);
        Ok(build_result(self.name(), argv, options, started_at, output, payload))
    }
}
