use std::path::Path;
use crate::errors::WardenError;
use super::types::WardenConfig;
use super::security::validate_security_patterns;
use super::schema::CONFIG_SCHEMA;
use tracing::warn;

const MAX_CONFIG_BYTES: u64 = 1_048_576;

pub async fn parse_config(path: &Path) -> Result<WardenConfig, WardenError> {
    if !path.exists() {
        return Err(WardenError::Config(format!("Config file not found: {}", path.display())));
    }

    let metadata = tokio::fs::metadata(path).await?;
    if metadata.len() > MAX_CONFIG_BYTES {
        return Err(WardenError::Config("Config file exceeds 1MB limit".into()));
    }

    let content = tokio::fs::read_to_string(path).await?;
    parse_config_str(&content)
}

/// Parse an optional config path, falling back to built-in defaults.
pub async fn load_config(path: Option<&Path>) -> Result<WardenConfig, WardenError> {
    match path {
        Some(p) => parse_config(p).await,
        None => Ok(WardenConfig::default()),
    }
}

pub fn parse_config_str(content: &str) -> Result<WardenConfig, WardenError> {
    let yaml: serde_yaml::Value = serde_yaml::from_str(content)?;
    if yaml.is_null() {
        return Ok(WardenConfig::default());
    }

    validate_security_patterns(&yaml)?;
    validate_schema(&yaml)?;

    let config: WardenConfig = serde_yaml::from_value(yaml)?;
    validate_conflicts(&config)?;
    Ok(config)
}

/// Schema validation is advisory: violations are logged, typed parsing decides.
fn validate_schema(yaml: &serde_yaml::Value) -> Result<(), WardenError> {
    let json_value: serde_json::Value = serde_json::to_value(yaml)
        .map_err(|e| WardenError::Config(format!("Config conversion error: {}", e)))?;

    let compiled = jsonschema::JSONSchema::compile(&CONFIG_SCHEMA)
        .map_err(|e| WardenError::Config(format!("Schema compilation error: {}", e)))?;

    if let Err(errors) = compiled.validate(&json_value) {
        for e in errors {
            warn!(validation_error = %format!("{} at {}", e, e.instance_path), "Config schema warning");
        }
    }

    Ok(())
}

/// Detect semantic conflicts the schema cannot express.
fn validate_conflicts(config: &WardenConfig) -> Result<(), WardenError> {
    let safety = config.safety();
    for allowed in &safety.allowed_ranges {
        if safety.blocked_ranges.iter().any(|b| b.eq_ignore_ascii_case(allowed)) {
            return Err(WardenError::Config(format!(
                "Range '{}' appears in both blocked_ranges and allowed_ranges",
                allowed
            )));
        }
    }
    for (name, value) in [("max_cpu_percent", safety.max_cpu_percent), ("max_memory_percent", safety.max_memory_percent)] {
        if !(0.0..=100.0).contains(&value) {
            return Err(WardenError::Config(format!("safety.{} must be within 0-100, got {}", name, value)));
        }
    }
    if safety.max_concurrent_scans == 0 {
        return Err(WardenError::Config("safety.max_concurrent_scans must be at least 1".into()));
    }

    let engine = config.engine();
    if engine.parallelism == 0 {
        return Err(WardenError::Config("engine.parallelism must be at least 1".into()));
    }
    if engine.workers == 0 {
        return Err(WardenError::Config("engine.workers must be at least 1".into()));
    }

    let agent = config.agent();
    if agent.max_iterations == 0 {
        return Err(WardenError::Config("agent.max_iterations must be at least 1".into()));
    }

    let automation = config.automation();
    if automation.auto_exploit && automation.exploit_modules.is_empty() {
        warn!("auto_exploit enabled but no exploit_modules configured; exploitation will be skipped");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_gives_defaults() {
        let config = parse_config_str("").unwrap();
        assert!(config.safety.is_none());
        assert_eq!(config.agent().max_iterations, 8);
    }

    #[test]
    fn test_overlapping_allow_and_block_rejected() {
        let yaml = "safety:\n  blocked_ranges: ['10.0.0.0/8']\n  allowed_ranges: ['10.0.0.0/8']\n";
        assert!(matches!(parse_config_str(yaml), Err(WardenError::Config(_))));
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        assert!(parse_config_str("engine:\n  parallelism: 0\n").is_err());
    }

    #[test]
    fn test_cpu_threshold_range_checked() {
        assert!(parse_config_str("safety:\n  max_cpu_percent: 150\n").is_err());
    }

    #[test]
    fn test_full_config_parses() {
        let yaml = r#"
safety:
  allowed_ranges: ["10.10.0.0/16", "lab.example.com"]
  max_concurrent_scans: 3
engine:
  parallelism: 4
  aggregation: batched
  tools:
    network: [nmap, masscan]
automation:
  auto_exploit: true
  severity_threshold: critical
  exploit_modules:
    CVE-2017-0144: exploit/windows/smb/ms17_010_eternalblue
agent:
  max_iterations: 5
llm:
  provider: anthropic
"#;
        let config = parse_config_str(yaml).unwrap();
        assert_eq!(config.safety().max_concurrent_scans, 3);
        assert_eq!(config.engine().parallelism, 4);
        assert!(config.automation().auto_exploit);
        assert_eq!(config.agent().max_iterations, 5);
    }

    #[tokio::test]
    async fn test_parse_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "agent:\n  max_iterations: 3").unwrap();
        let config = parse_config(file.path()).await.unwrap();
        assert_eq!(config.agent().max_iterations, 3);
    }

    #[tokio::test]
    async fn test_missing_file_is_config_error() {
        let result = parse_config(Path::new("/nonexistent/warden.yaml")).await;
        assert!(matches!(result, Err(WardenError::Config(_))));
    }
}
