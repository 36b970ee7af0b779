use std::sync::{Arc, LazyLock};
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use crate::errors::WardenError;
use crate::models::{ToolPayload, ToolResult, VulnRecord};
use crate::process::{ProcessExecutor, ProcessOutput};
use crate::tools::runner::{build_result, ensure_ran, parse_options, ToolCategory, ToolRunner};
use crate::tools::validation::{validate_common, TargetKind};

#[allow(clippy::expect_used)]
static VULN_PARAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\w+) parameter '([^']+)' is vulnerable").expect("sqlmap parameter pattern is valid")
});

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqlmapOptions {
    /// POST body; switches sqlmap to POST.
    pub data: Option<String>,
    /// 1-5
    pub level: u8,
    /// 1-3
    pub risk: u8,
    pub batch: bool,
}

impl Default for SqlmapOptions {
    fn default() -> Self {
        Self { data: None, level: 1, risk: 1, batch: true }
    }
}

pub struct SqlmapRunner {
    executor: Arc<ProcessExecutor>,
}

impl SqlmapRunner {
    pub fn new(executor: Arc<ProcessExecutor>) -> Self {
        Self { executor }
    }

    fn build_argv(url: &str, opts: &SqlmapOptions) -> Vec<String> {
        let mut argv = vec!["sqlmap".to_string(), "-u".to_string(), url.to_string()];
        if let Some(data) = &opts.data {
            argv.push(format!("--data={}", data));
        }
        argv.push(format!("--level={}", opts.level));
        argv.push(format!("--risk={}", opts.risk));
        if opts.batch {
            argv.push("--batch".into());
        }
        argv
    }
}

/// Parse the console output of a single-URL run.
pub fn parse_output(stdout: &str, target: &str) -> ToolPayload {
    let dbms = stdout
        .lines()
        .find_map(|l| l.split_once("back-end DBMS:").map(|(_, rest)| rest.trim().to_string()));

    let mut vulnerabilities: Vec<VulnRecord> = Vec::new();
    for caps in VULN_PARAM_RE.captures_iter(stdout) {
        let place = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let param = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let title = format!("SQL injection in {} parameter '{}'", place, param);
        if vulnerabilities.iter().any(|v| v.title.as_deref() == Some(title.as_str())) {
            continue;
        }
        vulnerabilities.push(VulnRecord {
            title: Some(title),
            description: Some(format!("sqlmap confirmed that the {} parameter '{}' is injectable", place, param)),
            severity: Some("high".into()),
            target: target.to_string(),
            evidence: dbms.as_ref().map(|d| format!("back-end DBMS: {}", d)),
            ..Default::default()
        });
    }
    if vulnerabilities.is_empty() && stdout.to_lowercase().contains("is vulnerable") {
        vulnerabilities.push(VulnRecord {
            title: Some("SQL injection vulnerability".into()),
            severity: Some("high".into()),
            target: target.to_string(),
            evidence: dbms.map(|d| format!("back-end DBMS: {}", d)),
            ..Default::default()
        });
    }
    ToolPayload { vulnerabilities, ..Default::default() }
}

#[async_trait]
impl ToolRunner for SqlmapRunner {
    fn name(&self) -> &'static str {
        "sqlmap"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::SqlInjection
    }

    fn validate(&self, targets: &[String], options: &Value) -> bool {
        validate_common(targets, options, TargetKind::Url)
            && parse_options::<SqlmapOptions>(self.name(), options)
                .is_ok_and(|o| (1..=5).contains(&o.level) && (1..=3).contains(&o.risk))
    }

    async fn execute(&self, targets: &[String], options: &Value, timeout: Duration) -> Result<ToolResult, WardenError> {
        let opts: SqlmapOptions = parse_options(self.name(), options)?;
        let started_at = Utc::now();
        let mut payload = ToolPayload::default();
        let mut outputs = Vec::new();
        let mut first_argv = Vec::new();
        let deadline = std::time::Instant::now() + timeout;

        // One process per URL so markers can be attributed to it.
        for target in targets {
            let remaining = deadline.saturating_duration_since(std::time::Instant::now());
            if remaining.is_zero() {
                return Err(WardenError::CommandTimeout { secs: timeout.as_secs(), stdout: String::new() });
            }
            let argv = Self::build_argv(target, &opts);
            let output = self.executor.run(argv.clone(), remaining).await?;
            ensure_ran(self.name(), &output)?;
            payload.vulnerabilities.extend(parse_output(&output.stdout, target).vulnerabilities);
            if first_argv.is_empty() {
                first_argv = argv;
            }
            outputs.push(output);
        }

        let mut combined = ProcessOutput { exit_code: Some(0), ..Default::default() };
        for output in outputs {
            combined.stdout.push_str(&output.stdout);
            combined.stderr.push_str(&output.stderr);
            combined.duration += output.duration;
            if combined.exit_code == Some(0) {
                combined.exit_code = output.exit_code;
            }
        }
        Ok(build_result(self.name(), first_argv, options, started_at, combined, payload))
    }
}
