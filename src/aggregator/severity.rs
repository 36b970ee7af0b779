use std::sync::LazyLock;
use regex::Regex;
use crate::models::Severity;

/// Keyword fallback, checked in order. Whole words only, so "rce" does not
/// match "source".
#[allow(clippy::expect_used)]
static KEYWORD_TABLE: LazyLock<Vec<(Regex, Severity)>> = LazyLock::new(|| {
    [
        (r"\b(critical|rce|remote code execution)\b", Severity::Critical),
        (r"\b(high|sqli|sql injection|authentication bypass)\b", Severity::High),
        (r"\b(medium|xss|cross-site)\b", Severity::Medium),
        (r"\b(info|informational|open port)\b", Severity::Info),
    ]
    .into_iter()
    .map(|(pattern, severity)| (Regex::new(pattern).expect("valid severity pattern"), severity))
    .collect()
});

/// Resolve a finding's severity: the tool's own label, then the CVSS band,
/// then the keyword table, then low.
pub fn resolve_severity(label: Option<&str>, cvss: Option<f64>, title: &str, description: &str) -> Severity {
    if let Some(severity) = label.and_then(Severity::from_label) {
        return severity;
    }
    if let Some(severity) = cvss.and_then(Severity::from_cvss) {
        return severity;
    }
    keyword_severity(&format!("{} {}", title, description))
}

pub fn keyword_severity(text: &str) -> Severity {
    let text = text.to_lowercase();
    KEYWORD_TABLE
        .iter()
        .find(|(pattern, _)| pattern.is_match(&text))
        .map(|(_, severity)| *severity)
        .unwrap_or(Severity::Low)
}
