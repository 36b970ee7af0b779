use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use crate::models::{ScanType, Severity};

pub const DEFAULT_BLOCKED_RANGES: &[&str] = &[
    "127.0.0.0/8",
    "::1/128",
    "169.254.0.0/16",
    "fe80::/10",
    "0.0.0.0/8",
    "localhost",
];

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct WardenConfig {
    pub safety: Option<SafetyConfig>,
    pub engine: Option<EngineConfig>,
    pub automation: Option<AutomationConfig>,
    pub agent: Option<AgentConfig>,
    pub llm: Option<LLMConfig>,
    pub execution: Option<ExecutionConfig>,
    pub container: Option<ContainerConfig>,
    pub audit: Option<AuditConfig>,
}

impl WardenConfig {
    pub fn safety(&self) -> SafetyConfig {
        self.safety.clone().unwrap_or_default()
    }

    pub fn engine(&self) -> EngineConfig {
        self.engine.clone().unwrap_or_default()
    }

    pub fn automation(&self) -> AutomationConfig {
        self.automation.clone().unwrap_or_default()
    }

    pub fn agent(&self) -> AgentConfig {
        self.agent.clone().unwrap_or_default()
    }

    pub fn execution(&self) -> ExecutionConfig {
        self.execution.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub blocked_ranges: Vec<String>,
    /// Non-empty switches the gate into allow-list mode.
    pub allowed_ranges: Vec<String>,
    pub rate_limit_window_secs: u64,
    pub rate_limit_max: usize,
    pub max_concurrent_scans: usize,
    pub max_cpu_percent: f32,
    pub max_memory_percent: f32,
    pub min_disk_gb: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            blocked_ranges: DEFAULT_BLOCKED_RANGES.iter().map(|s| s.to_string()).collect(),
            allowed_ranges: Vec::new(),
            rate_limit_window_secs: 60,
            rate_limit_max: 1,
            max_concurrent_scans: 5,
            max_cpu_percent: 90.0,
            max_memory_percent: 85.0,
            min_disk_gb: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMode {
    #[default]
    Incremental,
    Batched,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    pub parallelism: usize,
    pub tool_timeout_secs: u64,
    pub aggregation: AggregationMode,
    /// Default tool set per scan type, keyed by the scan type name.
    pub tools: BTreeMap<String, Vec<String>>,
    /// Maximum scans a single process works on at once.
    pub workers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut tools = BTreeMap::new();
        tools.insert("network".to_string(), vec!["nmap".to_string()]);
        tools.insert("web".to_string(), vec!["whatweb".to_string(), "nikto".to_string(), "nuclei".to_string()]);
        tools.insert("directory".to_string(), vec!["feroxbuster".to_string()]);
        tools.insert(
            "full".to_string(),
            vec!["nmap".to_string(), "nuclei".to_string(), "nikto".to_string(), "whatweb".to_string()],
        );
        Self {
            parallelism: 2,
            tool_timeout_secs: 600,
            aggregation: AggregationMode::Incremental,
            tools,
            workers: 3,
        }
    }
}

impl EngineConfig {
    pub fn tools_for(&self, scan_type: ScanType) -> Vec<String> {
        self.tools.get(scan_type.as_str()).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Exploitation is never attempted unless an operator turns this on.
    pub auto_exploit: bool,
    pub severity_threshold: Severity,
    pub max_attempts_per_finding: u32,
    /// CVE id to exploit module, used to build exploitation options.
    pub exploit_modules: BTreeMap<String, String>,
    /// Directory of YAML methodology overrides.
    pub methodology_dir: Option<String>,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            auto_exploit: false,
            severity_threshold: Severity::High,
            max_attempts_per_finding: 2,
            exploit_modules: BTreeMap::new(),
            methodology_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: u32,
    pub command_timeout_secs: u64,
    pub session_ttl_secs: u64,
    pub fallback: Option<LLMConfig>,
    pub operator: Option<OperatorCredentials>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            command_timeout_secs: 300,
            session_ttl_secs: 3600,
            fallback: None,
            operator: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OperatorCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct LLMConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionBackend {
    #[default]
    Local,
    Container,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ExecutionConfig {
    pub backend: ExecutionBackend,
    /// Replaces the built-in command allow-list when set.
    pub allowed_commands: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContainerConfig {
    pub image: Option<String>,
    pub name: Option<String>,
    pub network_mode: Option<String>,
    pub capabilities: Option<Vec<String>>,
    pub memory_limit_mb: Option<u64>,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: Some("warden-tools:latest".to_string()),
            name: Some("warden-tools".to_string()),
            network_mode: Some("host".to_string()),
            capabilities: Some(vec!["NET_RAW".to_string(), "NET_ADMIN".to_string()]),
            memory_limit_mb: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AuditConfig {
    pub directory: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safety_defaults() {
        let safety = WardenConfig::default().safety();
        assert_eq!(safety.max_concurrent_scans, 5);
        assert_eq!(safety.rate_limit_window_secs, 60);
        assert_eq!(safety.rate_limit_max, 1);
        assert!(safety.blocked_ranges.contains(&"127.0.0.0/8".to_string()));
        assert!(safety.allowed_ranges.is_empty());
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: WardenConfig = serde_yaml::from_str("safety:\n  max_concurrent_scans: 2\n").unwrap();
        let safety = config.safety();
        assert_eq!(safety.max_concurrent_scans, 2);
        assert_eq!(safety.max_cpu_percent, 90.0);
    }

    #[test]
    fn test_engine_tools_for_type() {
        let engine = EngineConfig::default();
        assert_eq!(engine.tools_for(ScanType::Network), vec!["nmap".to_string()]);
        assert!(engine.tools_for(ScanType::Web).contains(&"nuclei".to_string()));
    }

    #[test]
    fn test_automation_is_opt_in() {
        let automation = AutomationConfig::default();
        assert!(!automation.auto_exploit);
        assert_eq!(automation.severity_threshold, Severity::High);
    }

    #[test]
    fn test_aggregation_mode_deserialize() {
        let parsed: AggregationMode = serde_json::from_str("\"batched\"").unwrap();
        assert_eq!(parsed, AggregationMode::Batched);
    }

    #[test]
    fn test_container_config_defaults() {
        let config = ContainerConfig::default();
        assert_eq!(config.name, Some("warden-tools".to_string()));
        assert!(config.capabilities.as_ref().unwrap().contains(&"NET_RAW".to_string()));
    }
}
