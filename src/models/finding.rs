use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity level for a security finding, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    /// Returns a numeric rank where lower values indicate higher severity.
    /// Critical = 0, High = 1, Medium = 2, Low = 3, Info = 4.
    pub fn rank(&self) -> u8 {
        match self {
            Severity::Critical => 0,
            Severity::High => 1,
            Severity::Medium => 2,
            Severity::Low => 3,
            Severity::Info => 4,
        }
    }

    /// True when `self` is at least as severe as `threshold`.
    pub fn at_least(&self, threshold: Severity) -> bool {
        self.rank() <= threshold.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    /// Lenient parse of the severity strings tools emit.
    pub fn from_label(label: &str) -> Option<Severity> {
        match label.trim().to_lowercase().as_str() {
            "critical" | "crit" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" | "moderate" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "info" | "informational" | "information" => Some(Severity::Info),
            _ => None,
        }
    }

    /// CVSS v3 qualitative bands. A score of 0 carries no severity.
    pub fn from_cvss(score: f64) -> Option<Severity> {
        match score {
            s if s >= 9.0 => Some(Severity::Critical),
            s if s >= 7.0 => Some(Severity::High),
            s if s >= 4.0 => Some(Severity::Medium),
            s if s > 0.0 => Some(Severity::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingStatus {
    Open,
    Confirmed,
    FalsePositive,
    Fixed,
    Accepted,
}

impl FindingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Confirmed => "confirmed",
            Self::FalsePositive => "false_positive",
            Self::Fixed => "fixed",
            Self::Accepted => "accepted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "confirmed" => Some(Self::Confirmed),
            "false_positive" => Some(Self::FalsePositive),
            "fixed" => Some(Self::Fixed),
            "accepted" => Some(Self::Accepted),
            _ => None,
        }
    }
}

/// A normalized security observation tied to one scan and target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub scan_id: String,
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub status: FindingStatus,
    pub target: String,
    pub cve_id: Option<String>,
    pub cvss_score: Option<f64>,
    pub port: Option<u16>,
    pub service: Option<String>,
    pub evidence: Option<String>,
    /// The tool that produced this finding (e.g. "nmap", "nuclei").
    pub source_tool: String,
    /// Pointer back to the raw tool output this finding was derived from.
    pub raw_ref: Option<String>,
    /// Content-derived key used for deduplication within a scan.
    pub dedup_key: String,
    /// Set on exploitation findings; points at the finding that was exploited.
    pub related_finding_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_ordering() {
        assert!(Severity::Critical.rank() < Severity::High.rank());
        assert!(Severity::Low.rank() < Severity::Info.rank());
    }

    #[test]
    fn test_at_least() {
        assert!(Severity::Critical.at_least(Severity::High));
        assert!(Severity::High.at_least(Severity::High));
        assert!(!Severity::Medium.at_least(Severity::High));
    }

    #[test]
    fn test_from_label() {
        assert_eq!(Severity::from_label("HIGH"), Some(Severity::High));
        assert_eq!(Severity::from_label("informational"), Some(Severity::Info));
        assert_eq!(Severity::from_label("unknown"), None);
    }

    #[test]
    fn test_from_cvss_bands() {
        assert_eq!(Severity::from_cvss(9.8), Some(Severity::Critical));
        assert_eq!(Severity::from_cvss(7.0), Some(Severity::High));
        assert_eq!(Severity::from_cvss(5.3), Some(Severity::Medium));
        assert_eq!(Severity::from_cvss(0.1), Some(Severity::Low));
        assert_eq!(Severity::from_cvss(0.0), None);
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&FindingStatus::FalsePositive).unwrap();
        assert_eq!(json, "\"false_positive\"");
        assert_eq!(FindingStatus::parse("false_positive"), Some(FindingStatus::FalsePositive));
    }
}
