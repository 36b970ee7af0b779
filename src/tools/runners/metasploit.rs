use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use crate::errors::WardenError;
use crate::models::{ExploitRecord, ToolPayload, ToolResult};
use crate::process::ProcessExecutor;
use crate::tools::runner::{build_result, ensure_ran, parse_options, ToolCategory, ToolRunner};
use crate::tools::validation::{validate_common, TargetKind};

#[allow(clippy::expect_used)]
static MODULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9_]+(/[a-z0-9_\-.]+)+$").expect("module path pattern is valid")
});

#[allow(clippy::expect_used)]
static SESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(meterpreter|command shell) session (\d+) opened").expect("session pattern is valid")
});

#[allow(clippy::expect_used)]
static OPTION_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("option key pattern is valid")
});

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetasploitOptions {
    /// e.g. `exploit/windows/smb/ms17_010_eternalblue`
    pub module: String,
    pub payload: Option<String>,
    pub lhost: String,
    pub lport: u16,
    /// Extra `set KEY VALUE` pairs.
    pub options: BTreeMap<String, String>,
}

impl Default for MetasploitOptions {
    fn default() -> Self {
        Self {
            module: String::new(),
            payload: None,
            lhost: "0.0.0.0".to_string(),
            lport: 4444,
            options: BTreeMap::new(),
        }
    }
}

/// Console values end up inside a `-x` script where `;` separates commands.
fn console_safe(value: &str) -> bool {
    !value.is_empty() && !value.contains(';') && !value.chars().any(|c| c.is_control() || c.is_whitespace())
}

impl MetasploitOptions {
    fn is_valid(&self) -> bool {
        MODULE_RE.is_match(&self.module)
            && self.payload.as_deref().map_or(true, |p| MODULE_RE.is_match(p))
            && console_safe(&self.lhost)
            && self.options.iter().all(|(k, v)| OPTION_KEY_RE.is_match(k) && console_safe(v))
    }

    fn console_script(&self, targets: &[String]) -> String {
        let mut commands = vec![
            format!("use {}", self.module),
            format!("set RHOSTS {}", targets.join(" ")),
        ];
        if let Some(payload) = &self.payload {
            commands.push(format!("set PAYLOAD {}", payload));
            commands.push(format!("set LHOST {}", self.lhost));
            commands.push(format!("set LPORT {}", self.lport));
        }
        for (key, value) in &self.options {
            commands.push(format!("set {} {}", key, value));
        }
        commands.push("run".into());
        commands.push("exit".into());
        commands.join("; ")
    }
}

pub struct MetasploitRunner {
    executor: Arc<ProcessExecutor>,
}

impl MetasploitRunner {
    pub fn new(executor: Arc<ProcessExecutor>) -> Self {
        Self { executor }
    }
}

pub fn parse_output(stdout: &str, module: &str) -> ToolPayload {
    let session = SESSION_RE
        .captures(stdout)
        .and_then(|c| c.get(2))
        .map(|m| m.as_str().to_string());
    let success = session.is_some()
        || stdout.contains("Meterpreter session")
        || stdout.to_lowercase().contains("session opened");
    let detail = if success {
        format!("{} opened a session", module)
    } else {
        format!("{} completed without opening a session", module)
    };
    ToolPayload {
        exploitation: Some(ExploitRecord { success, detail, session }),
        ..Default::default()
    }
}

#[async_trait]
impl ToolRunner for MetasploitRunner {
    fn name(&self) -> &'static str {
        "metasploit"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Exploitation
    }

    fn validate(&self, targets: &[String], options: &Value) -> bool {
        validate_common(targets, options, TargetKind::Host)
            && targets.iter().all(|t| console_safe(t))
            && parse_options::<MetasploitOptions>(self.name(), options).is_ok_and(|o| o.is_valid())
    }

    async fn execute(&self, targets: &[String], options: &Value, timeout: Duration) -> Result<ToolResult, WardenError> {
        let opts: MetasploitOptions = parse_options(self.name(), options)?;
        if !opts.is_valid() {
            return Err(WardenError::ToolFailed(format!("metasploit: invalid module or options '{}'", opts.module)));
        }
        let argv = vec![
            "msfconsole".to_string(),
            "-q".to_string(),
            "-x".to_string(),
            opts.console_script(targets),
        ];
        let started_at = Utc::now();
        let output = self.executor.run(argv.clone(), timeout).await?;
        ensure_ran(self.name(), &output)?;
        let payload = parse_output(&output.stdout, &opts.module);
        Ok(build_result(self.name(), argv, options, started_at, output, payload))
    }
}
