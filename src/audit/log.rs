use std::path::{Path, PathBuf};
use chrono::Utc;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use crate::errors::WardenError;
use crate::models::ToolResult;
use crate::utils::truncation::truncate_output;

/// Append-only JSONL audit trail. Write failures are logged and swallowed;
/// auditing never fails a scan.
pub struct AuditLog {
    path: PathBuf,
    /// Serializes appends so lines never interleave.
    file: Mutex<tokio::fs::File>,
}

impl AuditLog {
    pub async fn open(dir: &Path) -> Result<Self, WardenError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join("audit.jsonl");
        let file = tokio::fs::OpenOptions::new()
            .create(true).append(true).open(&path).await?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(&self, event_type: &str, data: Value) {
        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event_type,
            "data": data,
        });
        if let Err(e) = self.append(&entry).await {
            warn!(path = %self.path.display(), event = event_type, error = %e, "Audit write failed");
        }
    }

    pub async fn record_tool_result(&self, scan_id: Option<&str>, result: &ToolResult) {
        self.record(
            "tool_result",
            json!({
                "scan_id": scan_id,
                "tool": result.tool,
                "argv": result.argv,
                "exit_code": result.exit_code,
                "started_at": result.started_at.to_rfc3339(),
                "finished_at": result.finished_at.to_rfc3339(),
                "duration_ms": result.duration_ms(),
                "stdout": truncate_output(&result.stdout),
                "stderr": truncate_output(&result.stderr),
            }),
        )
        .await;
    }

    async fn append(&self, entry: &Value) -> Result<(), WardenError> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ToolPayload;

    #[tokio::test]
    async fn test_records_are_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::open(dir.path()).await.unwrap();
        log.record("agent_session", json!({"complete": true})).await;
        let now = Utc::now();
        let result = ToolResult {
            tool: "nmap".into(),
            argv: vec!["nmap".into(), "10.0.0.1".into()],
            config: Value::Null,
            started_at: now,
            finished_at: now,
            exit_code: Some(0),
            stdout: "x".repeat(20_000),
            stderr: String::new(),
            payload: ToolPayload::default(),
        };
        log.record_tool_result(Some("scan-1"), &result).await;

        let content = tokio::fs::read_to_string(log.path()).await.unwrap();
        let lines: Vec<Value> = content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "agent_session");
        assert_eq!(lines[1]["data"]["scan_id"], "scan-1");
        assert!(lines[1]["data"]["stdout"].as_str().unwrap().contains("[truncated"));
    }
}
