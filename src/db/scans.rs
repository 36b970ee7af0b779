use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use crate::errors::WardenError;
use crate::models::{Scan, ScanStatus, ScanType, SeverityCounts};
use super::connection::db_err;
use super::Database;

const SCAN_COLUMNS: &str = "id, name, principal, targets, scan_type, status, progress_percent, \
    count_critical, count_high, count_medium, count_low, count_info, tools, tool_options, \
    tool_runs, error_message, created_at, started_at, completed_at, duration_secs";

/// Raw column values; decoded outside the rusqlite closure so JSON and enum
/// errors surface as `WardenError`.
struct ScanRow {
    id: String,
    name: String,
    principal: String,
    targets: String,
    scan_type: String,
    status: String,
    progress_percent: i64,
    counts: [i64; 5],
    tools: Option<String>,
    tool_options: String,
    tool_runs: String,
    error_message: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    duration_secs: Option<i64>,
}

impl ScanRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            principal: row.get(2)?,
            targets: row.get(3)?,
            scan_type: row.get(4)?,
            status: row.get(5)?,
            progress_percent: row.get(6)?,
            counts: [row.get(7)?, row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?],
            tools: row.get(12)?,
            tool_options: row.get(13)?,
            tool_runs: row.get(14)?,
            error_message: row.get(15)?,
            created_at: row.get(16)?,
            started_at: row.get(17)?,
            completed_at: row.get(18)?,
            duration_secs: row.get(19)?,
        })
    }

    fn into_scan(self) -> Result<Scan, WardenError> {
        let count = |i: usize| u32::try_from(self.counts[i]).unwrap_or(0);
        Ok(Scan {
            counts: SeverityCounts {
                critical: count(0),
                high: count(1),
                medium: count(2),
                low: count(3),
                info: count(4),
            },
            targets: serde_json::from_str(&self.targets)?,
            scan_type: ScanType::parse(&self.scan_type)?,
            status: ScanStatus::parse(&self.status)?,
            progress_percent: self.progress_percent.clamp(0, 100) as u8,
            tools: self.tools.as_deref().map(serde_json::from_str).transpose()?,
            tool_options: serde_json::from_str(&self.tool_options)?,
            tool_runs: serde_json::from_str(&self.tool_runs)?,
            created_at: parse_time(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_time).transpose()?,
            completed_at: self.completed_at.as_deref().map(parse_time).transpose()?,
            duration_secs: self.duration_secs,
            error_message: self.error_message,
            id: self.id,
            name: self.name,
            principal: self.principal,
        })
    }
}

pub(crate) fn parse_time(value: &str) -> Result<DateTime<Utc>, WardenError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| WardenError::Database(format!("Bad timestamp '{}': {}", value, e)))
}

impl Database {
    /// Insert or fully replace a scan row.
    pub fn put_scan(&self, scan: &Scan) -> Result<(), WardenError> {
        let targets = serde_json::to_string(&scan.targets)?;
        let tools = scan.tools.as_ref().map(serde_json::to_string).transpose()?;
        let tool_options = serde_json::to_string(&scan.tool_options)?;
        let tool_runs = serde_json::to_string(&scan.tool_runs)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO scans (id, name, principal, targets, scan_type, status, progress_percent, \
             count_critical, count_high, count_medium, count_low, count_info, tools, tool_options, \
             tool_runs, error_message, created_at, started_at, completed_at, duration_secs) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20) \
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, principal = excluded.principal, \
             targets = excluded.targets, scan_type = excluded.scan_type, status = excluded.status, \
             progress_percent = excluded.progress_percent, count_critical = excluded.count_critical, \
             count_high = excluded.count_high, count_medium = excluded.count_medium, \
             count_low = excluded.count_low, count_info = excluded.count_info, tools = excluded.tools, \
             tool_options = excluded.tool_options, tool_runs = excluded.tool_runs, \
             error_message = excluded.error_message, started_at = excluded.started_at, \
             completed_at = excluded.completed_at, duration_secs = excluded.duration_secs",
            params![
                scan.id,
                scan.name,
                scan.principal,
                targets,
                scan.scan_type.as_str(),
                scan.status.as_str(),
                scan.progress_percent,
                scan.counts.critical,
                scan.counts.high,
                scan.counts.medium,
                scan.counts.low,
                scan.counts.info,
                tools,
                tool_options,
                tool_runs,
                scan.error_message,
                scan.created_at.to_rfc3339(),
                scan.started_at.map(|t| t.to_rfc3339()),
                scan.completed_at.map(|t| t.to_rfc3339()),
                scan.duration_secs,
            ],
        )
        .map_err(db_err("Failed to save scan"))?;
        Ok(())
    }

    pub fn get_scan(&self, id: &str) -> Result<Option<Scan>, WardenError> {
        let row = {
            let conn = self.lock()?;
            conn.query_row(
                &format!("SELECT {} FROM scans WHERE id = ?1", SCAN_COLUMNS),
                params![id],
                ScanRow::from_row,
            )
            .optional()
            .map_err(db_err("Query error"))?
        };
        row.map(ScanRow::into_scan).transpose()
    }

    pub fn recent_scans(&self, limit: usize) -> Result<Vec<Scan>, WardenError> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM scans ORDER BY created_at DESC LIMIT ?1",
                    SCAN_COLUMNS
                ))
                .map_err(db_err("Query failed"))?;
            let rows = stmt
                .query_map(params![limit as i64], ScanRow::from_row)
                .map_err(db_err("Query error"))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err("Row error"))?
        };
        rows.into_iter().map(ScanRow::into_scan).collect()
    }

    pub fn active_scan_count(&self, principal: &str) -> Result<usize, WardenError> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM scans WHERE principal = ?1 \
                 AND status IN ('pending', 'running', 'cancelling')",
                params![principal],
                |row| row.get(0),
            )
            .map_err(db_err("Query error"))?;
        Ok(count.max(0) as usize)
    }

    pub fn delete_scan(&self, id: &str) -> Result<bool, WardenError> {
        let conn = self.lock()?;
        let affected = conn
            .execute("DELETE FROM scans WHERE id = ?1", params![id])
            .map_err(db_err("Delete failed"))?;
        Ok(affected > 0)
    }
}
