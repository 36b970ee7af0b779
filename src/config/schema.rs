use serde_json::{json, Value};
use std::sync::LazyLock;

pub static CONFIG_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": {
            "safety": {
                "type": "object",
                "properties": {
                    "blocked_ranges": { "type": "array", "items": { "type": "string" } },
                    "allowed_ranges": { "type": "array", "items": { "type": "string" } },
                    "rate_limit_window_secs": { "type": "integer", "minimum": 1 },
                    "rate_limit_max": { "type": "integer", "minimum": 1 },
                    "max_concurrent_scans": { "type": "integer", "minimum": 1 },
                    "max_cpu_percent": { "type": "number", "minimum": 0, "maximum": 100 },
                    "max_memory_percent": { "type": "number", "minimum": 0, "maximum": 100 },
                    "min_disk_gb": { "type": "number", "minimum": 0 }
                }
            },
            "engine": {
                "type": "object",
                "properties": {
                    "parallelism": { "type": "integer", "minimum": 1 },
                    "tool_timeout_secs": { "type": "integer", "minimum": 1 },
                    "aggregation": { "type": "string", "enum": ["incremental", "batched"] },
                    "workers": { "type": "integer", "minimum": 1 },
                    "tools": {
                        "type": "object",
                        "additionalProperties": { "type": "array", "items": { "type": "string" } }
                    }
                }
            },
            "automation": {
                "type": "object",
                "properties": {
                    "auto_exploit": { "type": "boolean" },
                    "severity_threshold": { "type": "string", "enum": ["critical", "high", "medium", "low", "info"] },
                    "max_attempts_per_finding": { "type": "integer", "minimum": 1 },
                    "exploit_modules": { "type": "object", "additionalProperties": { "type": "string" } },
                    "methodology_dir": { "type": "string" }
                }
            },
            "agent": {
                "type": "object",
                "properties": {
                    "max_iterations": { "type": "integer", "minimum": 1 },
                    "command_timeout_secs": { "type": "integer", "minimum": 1 },
                    "session_ttl_secs": { "type": "integer", "minimum": 1 },
                    "fallback": { "$ref": "#/$defs/llm" },
                    "operator": {
                        "type": "object",
                        "required": ["username", "password"],
                        "properties": {
                            "username": { "type": "string" },
                            "password": { "type": "string" }
                        }
                    }
                }
            },
            "llm": { "$ref": "#/$defs/llm" },
            "execution": {
                "type": "object",
                "properties": {
                    "backend": { "type": "string", "enum": ["local", "container"] },
                    "allowed_commands": { "type": "array", "items": { "type": "string" } }
                }
            },
            "container": {
                "type": "object",
                "properties": {
                    "image": { "type": "string" },
                    "name": { "type": "string" },
                    "network_mode": { "type": "string" },
                    "capabilities": { "type": "array", "items": { "type": "string" } },
                    "memory_limit_mb": { "type": "integer", "minimum": 64 }
                }
            },
            "audit": {
                "type": "object",
                "properties": {
                    "directory": { "type": "string" }
                }
            }
        },
        "$defs": {
            "llm": {
                "type": "object",
                "properties": {
                    "provider": { "type": "string" },
                    "model": { "type": "string" },
                    "api_key": { "type": "string" },
                    "base_url": { "type": "string" }
                }
            }
        }
    })
});
