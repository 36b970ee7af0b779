use std::sync::{Arc, LazyLock};
use std::time::Duration;
use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use crate::errors::WardenError;
use crate::models::{CredentialRecord, ToolPayload, ToolResult};
use crate::process::ProcessExecutor;
use crate::tools::runner::{build_result, ensure_ran, parse_options, run_per_target, ToolCategory, ToolRunner};
use crate::tools::validation::{is_plain_value, validate_common, TargetKind};

#[allow(clippy::expect_used)]
static PORT_SERVICE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(\d+)\]\[([\w-]+)\]").expect("hydra result prefix pattern is valid")
});

/// Exactly one of `username`/`userlist` and one of `password`/`passwordlist`
/// must be given.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HydraOptions {
    pub service: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub userlist: Option<String>,
    pub password: Option<String>,
    pub passwordlist: Option<String>,
}

impl HydraOptions {
    fn is_valid(&self) -> bool {
        let one_of = |a: &Option<String>, b: &Option<String>| match (a, b) {
            (Some(v), None) | (None, Some(v)) => is_plain_value(v),
            _ => false,
        };
        is_plain_value(&self.service)
            && one_of(&self.username, &self.userlist)
            && one_of(&self.password, &self.passwordlist)
            && self.port != Some(0)
    }
}

pub struct HydraRunner {
    executor: Arc<ProcessExecutor>,
}

impl HydraRunner {
    pub fn new(executor: Arc<ProcessExecutor>) -> Self {
        Self { executor }
    }

    fn build_argv(target: &str, opts: &HydraOptions) -> Vec<String> {
        let mut argv = vec!["hydra".to_string()];
        if let Some(port) = opts.port {
            argv.extend(["-s".to_string(), port.to_string()]);
        }
        match (&opts.username, &opts.userlist) {
            (Some(user), _) => argv.extend(["-l".to_string(), user.clone()]),
            (None, Some(list)) => argv.extend(["-L".to_string(), list.clone()]),
            (None, None) => {}
        }
        match (&opts.password, &opts.passwordlist) {
            (Some(pass), _) => argv.extend(["-p".to_string(), pass.clone()]),
            (None, Some(list)) => argv.extend(["-P".to_string(), list.clone()]),
            (None, None) => {}
        }
        argv.extend(["-I".to_string(), target.to_string(), opts.service.clone()]);
        argv
    }
}

/// Pull `host:`/`login:`/`password:` tokens out of hydra's result lines.
pub fn parse_output(stdout: &str, opts: &HydraOptions, fallback_target: &str) -> ToolPayload {
    let mut credentials: Vec<CredentialRecord> = Vec::new();
    for line in stdout.lines() {
        let lower = line.to_lowercase();
        if !(lower.contains("login:") && lower.contains("password:")) {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let value_after = |key: &str| {
            tokens
                .iter()
                .position(|t| t.eq_ignore_ascii_case(key))
                .and_then(|i| tokens.get(i + 1))
                .map(|s| s.to_string())
        };
        let Some(username) = value_after("login:") else {
            continue;
        };
        let (port, service) = PORT_SERVICE_RE
            .captures(line.trim())
            .map(|c| (c.get(1).and_then(|m| m.as_str().parse().ok()), c.get(2).map(|m| m.as_str().to_string())))
            .unwrap_or((None, None));
        let record = CredentialRecord {
            target: value_after("host:").unwrap_or_else(|| fallback_target.to_string()),
            service: service.unwrap_or_else(|| opts.service.clone()),
            port: port.or(opts.port),
            username,
            password: value_after("password:"),
        };
        if !credentials.contains(&record) {
            credentials.push(record);
        }
    }
    ToolPayload { credentials, ..Default::default() }
}

#[async_trait]
impl ToolRunner for HydraRunner {
    fn name(&self) -> &'static str {
        "hydra"
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::CredentialAttack
    }

    fn validate(&self, targets: &[String], options: &Value) -> bool {
        validate_common(targets, options, TargetKind::Host)
            && parse_options::<HydraOptions>(self.name(), options).is_ok_and(|o| o.is_valid())
    }

    async fn execute(&self, targets: &[String], options: &Value, timeout: Duration) -> Result<ToolResult, WardenError> {
        let opts: HydraOptions = parse_options(self.name(), options)?;
        if !opts.is_valid() {
            return Err(WardenError::ToolFailed(
                "hydra requires a service plus one of username/userlist and one of password/passwordlist".into(),
            ));
        }
        let started_at = Utc::now();
        let (argv, output) =
            run_per_target(&self.executor, targets, timeout, |t| Self::build_argv(t, &opts)).await?;
        ensure_ran(self.name(), &output)?;
        let fallback = targets.first().map(String::as_str).unwrap_or("");
        let payload = parse_output(&output.stdout, &opts, fallback);
        Ok(build_result(self.name(), argv, options, started_at, output, payload))
    }
}
