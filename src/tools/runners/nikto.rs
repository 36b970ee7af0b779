use std::sync::{Arc, LazyLock};
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use crate::errors::WardenError;
use crate::models::{ToolPayload, ToolResult, VulnRecord};
use crate::process::ProcessExecutor;
use crate::tools::runner::{build_result, ensure_ran, parse_options, run_per_target, ToolCategory, ToolRunner};
use crate::tools::validation::{validate_common, TargetKind};

#[allow(clippy::expect_used)]
static OSVDB_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"OSVDB-(\d+)").expect("OSVDB pattern is valid")
});

/// Banner lines nikto prints with the same `+ ` prefix as its results.
const METADATA_PREFIXES: &[&str] = &[
    "Target IP:", "Target Hostname:", "Target Port:", "Start Time:", "End Time:",
    "Server:", "SSL Info:", "Platform:", "Scan terminated",
];
const METADATA_MARKERS: &[&str] = &["host(s) tested", " requests: "];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NiktoOptions {
    pub port: Option<u16>,
    pub ssl: bool,
}

pub struct NiktoRunner {
    executor: Arc<ProcessExecutor>,
}

impl NiktoRunner {
    pub fn new(executor: Arc<ProcessExecutor>) -> Self {
        Self { executor }
    }

    fn build_argv(target: &str, opts: &NiktoOptions) -> Vec<String> {
        let mut argv = vec!["nikto".to_string(), "-h".to_string(), target.to_string()];
        if let Some(port) = opts.port {
            argv.extend(["-p".to_string(), port.to_string()]);
        }
        if opts.ssl {
            argv.push("-ssl".into());
        }
        argv.push("-nointeractive".into());
        argv
    }
}

pub fn parse_output(stdout: &str, targets: &[String]) -> ToolPayload {
    let mut current = targets.first().cloned().unwrap_or_default();
    let mut vulnerabilities = Vec::new();

    for line in stdout.lines() {
        let Some(text) = line.trim().strip_prefix("+ ") else {
            continue;
        };
        if let Some(host) = text.strip_prefix("Target Hostname:") {
            current = host.trim().to_string();
            continue;
        }
        if METADATA_PREFIXES.iter().any(|p| text.starts_with(p))
            || METADATA_MARKERS.iter().any(|m| text.contains(m))
        {
            continue;
        }
        let osvdb = OSVDB_RE.captures(text).and_then(|c| c.get(1)).map(|m| format!("OSVDB-{}", m.as_str()));
        let message = OSVDB_RE.replace(text, "").trim_start_matches(':').trim().to_string();
        if message.is_empty() {
            continue;
        }
        vulnerabilities.push(VulnRecord {
            title: Some(message.chars().take(120).collect()),
            description: Some(message),
            target: current.clone(),
            evidence: osvdb,
            ..Default::default()
        });
    }
    ToolPayload { vulnerabilities, ..Default::default() }
}

#[async_trait]
impl ToolRunner for NiktoRunner {
    fn name(&self) -> &'static str {
        "nikto"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::WebScanning
    }

    fn validate(&self, targets: &[String], options: &Value) -> bool {
        validate_common(targets, options, TargetKind::Either)
            && parse_options::<NiktoOptions>(self.name(), options).is_ok_and(|o| o.port != Some(0))
    }

    async fn execute(&self, targets: &[String], options: &Value, timeout: Duration) -> Result<ToolResult, WardenError> {
        let opts: NiktoOptions = parse_options(self.name(), options)?;
        let started_at = Utc::now();
        let (argv, output) =
            run_per_target(&self.executor, targets, timeout, |t| Self::build_argv(t, &opts)).await?;
        ensure_ran(self.name(), &output)?;
        let payload = parse_output(&output.stdout, targets);
        Ok(build_result(self.name(), argv, options, started_at, output, payload))
    }
}
