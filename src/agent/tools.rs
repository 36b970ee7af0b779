use serde::Deserialize;
use serde_json::{json, Map, Value};
use crate::errors::WardenError;
use crate::llm::{ToolCall, ToolSchema};
use crate::models::ScanType;

const DEFAULT_PASSWORD_LIST: &str = "/usr/share/wordlists/rockyou.txt";

/// Every action the model can select. Parsed from `{name, arguments}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum AgentTool {
    Login {
        username: String,
        password: String,
    },
    StartAutomatedScan {
        #[serde(default)]
        name: String,
        targets: Vec<String>,
        #[serde(default = "default_scan_type")]
        scan_type: ScanType,
    },
    GetScanStatus {
        scan_id: String,
    },
    RunNmap {
        target: String,
        #[serde(default = "default_ports")]
        ports: String,
        /// Extra nmap flags, restricted to the subset the nmap runner models.
        #[serde(default)]
        options: Option<String>,
    },
    RunNuclei {
        target: String,
        #[serde(default)]
        severity: Option<String>,
        #[serde(default)]
        tags: Option<String>,
    },
    RunHydra {
        target: String,
        service: String,
        username: String,
        #[serde(default = "default_password_list")]
        passwordlist: String,
        #[serde(default)]
        port: Option<u16>,
    },
    ShellCommand {
        command: String,
    },
    TaskComplete {
        summary: String,
        #[serde(default)]
        findings_count: u32,
        #[serde(default)]
        critical_findings: Vec<String>,
    },
}

fn default_scan_type() -> ScanType {
    ScanType::Network
}

fn default_ports() -> String {
    "1-1000".to_string()
}

fn default_password_list() -> String {
    DEFAULT_PASSWORD_LIST.to_string()
}

impl AgentTool {
    pub fn parse(call: &ToolCall) -> Result<Self, WardenError> {
        let arguments = if call.arguments.is_object() { call.arguments.clone() } else { json!({}) };
        serde_json::from_value(json!({"name": call.name, "arguments": arguments}))
            .map_err(|e| WardenError::ToolFailed(format!("invalid call to {}: {}", call.name, e)))
    }

    /// Registry tool name and runner options for the named security tools.
    pub fn runner_invocation(&self) -> Option<Result<(&'static str, String, Value), WardenError>> {
        match self {
            AgentTool::RunNmap { target, ports, options } => Some(
                nmap_options(ports, options.as_deref()).map(|opts| ("nmap", target.clone(), opts)),
            ),
            AgentTool::RunNuclei { target, severity, tags } => {
                let mut opts = Map::new();
                if let Some(severity) = severity {
                    opts.insert("severity".into(), json!(severity));
                }
                if let Some(tags) = tags {
                    opts.insert("tags".into(), json!(tags));
                }
                Some(Ok(("nuclei", target.clone(), Value::Object(opts))))
            }
            AgentTool::RunHydra { target, service, username, passwordlist, port } => Some(Ok((
                "hydra",
                target.clone(),
                json!({
                    "service": service,
                    "username": username,
                    "passwordlist": passwordlist,
                    "port": port,
                }),
            ))),
            _ => None,
        }
    }
}

/// Translate a free-form nmap flag string into runner options. Flags the
/// runner has no field for are refused rather than passed through.
pub fn nmap_options(ports: &str, flags: Option<&str>) -> Result<Value, WardenError> {
    let mut opts = json!({"ports": ports});
    let mut scripts: Vec<String> = Vec::new();

    for flag in flags.unwrap_or("").split_whitespace() {
        match flag {
            "-sS" => opts["scan_type"] = json!("syn"),
            "-sT" => opts["scan_type"] = json!("tcp"),
            "-sU" => opts["scan_type"] = json!("udp"),
            "-sV" => opts["service_detection"] = json!(true),
            "-O" => opts["os_detection"] = json!(true),
            "-sC" => scripts.push("default".to_string()),
            other => {
                if let Some(level) = other.strip_prefix("-T").and_then(|t| t.parse::<u8>().ok()) {
                    opts["timing"] = json!(level);
                } else if let Some(list) = other.strip_prefix("--script=") {
                    scripts.extend(list.split(',').filter(|s| !s.is_empty()).map(str::to_string));
                } else {
                    return Err(WardenError::CommandRejected(format!("unsupported nmap option: {}", other)));
                }
            }
        }
    }
    if !scripts.is_empty() {
        opts["scripts"] = json!(scripts);
    }
    Ok(opts)
}

fn schema(name: &str, description: &str, input_schema: Value) -> ToolSchema {
    ToolSchema { name: name.to_string(), description: description.to_string(), input_schema }
}

/// The fixed tool surface offered to the model.
pub fn tool_schemas() -> Vec<ToolSchema> {
    vec![
        schema("login", "Authenticate as an operator before starting or inspecting scans", json!({
            "type": "object",
            "properties": {
                "username": {"type": "string"},
                "password": {"type": "string"}
            },
            "required": ["username", "password"]
        })),
        schema("start_automated_scan", "Start a phase-driven automated scan", json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "targets": {"type": "array", "items": {"type": "string"}},
                "scan_type": {"type": "string", "enum": ["network", "web", "directory", "full"]}
            },
            "required": ["targets"]
        })),
        schema("get_scan_status", "Get current status and results of a scan", json!({
            "type": "object",
            "properties": {"scan_id": {"type": "string"}},
            "required": ["scan_id"]
        })),
        schema("run_nmap", "Run an nmap port scan", json!({
            "type": "object",
            "properties": {
                "target": {"type": "string"},
                "ports": {"type": "string", "description": "Port spec like '22,80,443' or '1-1000'"},
                "options": {"type": "string", "description": "Additional flags: -sS, -sT, -sU, -sV, -O, -sC, -T0..-T5, --script=a,b"}
            },
            "required": ["target"]
        })),
        schema("run_nuclei", "Run nuclei vulnerability templates against a target", json!({
            "type": "object",
            "properties": {
                "target": {"type": "string"},
                "severity": {"type": "string", "description": "Comma-separated filter, e.g. 'critical,high'"},
                "tags": {"type": "string"}
            },
            "required": ["target"]
        })),
        schema("run_hydra", "Run a hydra credential attack", json!({
            "type": "object",
            "properties": {
                "target": {"type": "string"},
                "service": {"type": "string", "enum": ["ssh", "ftp", "telnet", "smb", "rdp", "mysql"]},
                "username": {"type": "string"},
                "passwordlist": {"type": "string"},
                "port": {"type": "integer"}
            },
            "required": ["target", "service", "username"]
        })),
        schema("shell_command", "Run an allow-listed command; pipes between allow-listed tools are permitted", json!({
            "type": "object",
            "properties": {"command": {"type": "string"}},
            "required": ["command"]
        })),
        schema("task_complete", "Signal that the task is complete", json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string", "description": "Summary of what was accomplished"},
                "findings_count": {"type": "integer"},
                "critical_findings": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["summary"]
        })),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall { id: "c1".into(), name: name.into(), arguments }
    }

    #[test]
    fn test_parse_applies_defaults() {
        let tool = AgentTool::parse(&call("run_nmap", json!({"target": "10.0.0.1"}))).unwrap();
        assert_eq!(tool, AgentTool::RunNmap { target: "10.0.0.1".into(), ports: "1-1000".into(), options: None });

        let tool = AgentTool::parse(&call("task_complete", json!({"summary": "done"}))).unwrap();
        assert_eq!(tool, AgentTool::TaskComplete { summary: "done".into(), findings_count: 0, critical_findings: vec![] });
    }

    #[test]
    fn test_parse_rejects_unknown_and_incomplete_calls() {
        assert!(AgentTool::parse(&call("rm_rf", json!({}))).is_err());
        assert!(AgentTool::parse(&call("login", json!({"username": "op"}))).is_err());
        assert!(AgentTool::parse(&call("get_scan_status", Value::Null)).is_err());
    }

    #[test]
    fn test_scan_type_parsed() {
        let tool = AgentTool::parse(&call("start_automated_scan", json!({"targets": ["10.0.0.0/24"], "scan_type": "web"}))).unwrap();
        match tool {
            AgentTool::StartAutomatedScan { scan_type, name, .. } => {
                assert_eq!(scan_type, ScanType::Web);
                assert!(name.is_empty());
            }
            other => panic!("unexpected tool {other:?}"),
        }
    }

    #[test]
    fn test_nmap_flags_map_to_options() {
        let opts = nmap_options("22,80", Some("-sT -sV -T4 --script=vuln,banner")).unwrap();
        assert_eq!(opts["ports"], "22,80");
        assert_eq!(opts["scan_type"], "tcp");
        assert_eq!(opts["service_detection"], true);
        assert_eq!(opts["timing"], 4);
        assert_eq!(opts["scripts"], json!(["vuln", "banner"]));
    }

    #[test]
    fn test_nmap_unknown_flag_refused() {
        assert!(matches!(nmap_options("80", Some("-oN /tmp/out")), Err(WardenError::CommandRejected(_))));
    }

    #[test]
    fn test_hydra_invocation_uses_default_wordlist() {
        let tool = AgentTool::parse(&call("run_hydra", json!({"target": "10.0.0.9", "service": "ssh", "username": "root"}))).unwrap();
        let (runner, target, opts) = tool.runner_invocation().unwrap().unwrap();
        assert_eq!(runner, "hydra");
        assert_eq!(target, "10.0.0.9");
        assert_eq!(opts["passwordlist"], DEFAULT_PASSWORD_LIST);
    }

    #[test]
    fn test_schema_names_match_variants() {
        let names: Vec<String> = tool_schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&"task_complete".to_string()));
        assert!(names.contains(&"shell_command".to_string()));
    }
}
