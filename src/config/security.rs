use crate::errors::WardenError;

const DANGEROUS_PATTERNS: &[&str] = &[
    "../",
    "..\\",
    "<script",
    "javascript:",
    "file:",
    "vbscript:",
];

/// Reject configs carrying traversal or script-injection strings anywhere,
/// including map keys.
pub fn validate_security_patterns(value: &serde_yaml::Value) -> Result<(), WardenError> {
    check_value(value, &mut Vec::new())
}

fn check_value(value: &serde_yaml::Value, path: &mut Vec<String>) -> Result<(), WardenError> {
    match value {
        serde_yaml::Value::String(s) => check_string(s, path),
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map {
                let key = k.as_str().unwrap_or("unknown").to_string();
                check_string(&key, path)?;
                path.push(key);
                let result = check_value(v, path);
                path.pop();
                result?;
            }
            Ok(())
        }
        serde_yaml::Value::Sequence(seq) => {
            for (i, v) in seq.iter().enumerate() {
                path.push(format!("[{}]", i));
                let result = check_value(v, path);
                path.pop();
                result?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn check_string(s: &str, path: &[String]) -> Result<(), WardenError> {
    let path_str = if path.is_empty() { "root".to_string() } else { path.join(".") };
    if s.contains('\0') {
        return Err(WardenError::Config(format!("NUL byte found at config path: {}", path_str)));
    }
    let lower = s.to_lowercase();
    if let Some(pattern) = DANGEROUS_PATTERNS.iter().find(|p| lower.contains(*p)) {
        return Err(WardenError::Config(format!(
            "Dangerous pattern '{}' found at config path: {}",
            pattern, path_str
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn test_safe_config_passes() {
        assert!(validate_security_patterns(&yaml("safety:\n  allowed_ranges: ['10.0.0.0/8']")).is_ok());
    }

    #[test]
    fn test_directory_traversal_blocked() {
        let err = validate_security_patterns(&yaml("automation:\n  methodology_dir: ../../etc")).unwrap_err();
        assert!(err.to_string().contains("automation.methodology_dir"));
    }

    #[test]
    fn test_script_injection_in_sequence_blocked() {
        assert!(validate_security_patterns(&yaml("items:\n  - '<script>alert(1)'")).is_err());
    }

    #[test]
    fn test_file_uri_blocked() {
        assert!(validate_security_patterns(&yaml("llm:\n  base_url: 'file:///etc/passwd'")).is_err());
    }

    #[test]
    fn test_dangerous_key_blocked() {
        assert!(validate_security_patterns(&yaml("'../x': 1")).is_err());
    }

    #[test]
    fn test_numeric_values_pass() {
        assert!(validate_security_patterns(&yaml("engine:\n  parallelism: 4\n  workers: 2")).is_ok());
    }
}
