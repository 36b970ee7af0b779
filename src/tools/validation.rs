//! Argument checks shared by the runners' `validate` implementations.

use std::sync::LazyLock;
use regex::Regex;
use reqwest::Url;
use serde_json::Value;

#[allow(clippy::expect_used)]
static HOST_ARG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.\-_/:\[\]]+$").expect("host argument pattern is valid")
});

/// What kind of target string a runner passes on to its tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Address, CIDR or hostname.
    Host,
    /// Absolute http(s) URL.
    Url,
    Either,
}

pub fn is_host_arg(target: &str) -> bool {
    !target.starts_with('-') && HOST_ARG.is_match(target)
}

pub fn is_web_url(target: &str) -> bool {
    if target.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return false;
    }
    Url::parse(target)
        .map(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
        .unwrap_or(false)
}

pub fn target_ok(target: &str, kind: TargetKind) -> bool {
    match kind {
        TargetKind::Host => is_host_arg(target),
        TargetKind::Url => is_web_url(target),
        TargetKind::Either => is_host_arg(target) || is_web_url(target),
    }
}

/// True if any string anywhere in `value` carries a control character.
pub fn has_control_chars(value: &Value) -> bool {
    match value {
        Value::String(s) => s.chars().any(char::is_control),
        Value::Array(items) => items.iter().any(has_control_chars),
        Value::Object(map) => map.iter().any(|(k, v)| k.chars().any(char::is_control) || has_control_chars(v)),
        _ => false,
    }
}

/// The checks every runner applies before anything else.
pub fn validate_common(targets: &[String], options: &Value, kind: TargetKind) -> bool {
    !targets.is_empty()
        && targets.iter().all(|t| target_ok(t, kind))
        && !has_control_chars(options)
}

/// Option values that end up as separate argv elements must not look like
/// flags of their own.
pub fn is_plain_value(value: &str) -> bool {
    !value.is_empty() && !value.starts_with('-') && !value.chars().any(char::is_control)
}
