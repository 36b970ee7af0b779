use chrono::Utc;
use rusqlite::{params, Row};
use crate::errors::WardenError;
use crate::models::{Finding, FindingStatus, Severity};
use super::connection::db_err;
use super::scans::parse_time;
use super::Database;

struct FindingRow {
    id: String,
    scan_id: String,
    title: String,
    description: String,
    severity: String,
    status: String,
    target: String,
    cve_id: Option<String>,
    cvss_score: Option<f64>,
    port: Option<u16>,
    service: Option<String>,
    evidence: Option<String>,
    source_tool: String,
    raw_ref: Option<String>,
    dedup_key: String,
    related_finding_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl FindingRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            scan_id: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            severity: row.get(4)?,
            status: row.get(5)?,
            target: row.get(6)?,
            cve_id: row.get(7)?,
            cvss_score: row.get(8)?,
            port: row.get(9)?,
            service: row.get(10)?,
            evidence: row.get(11)?,
            source_tool: row.get(12)?,
            raw_ref: row.get(13)?,
            dedup_key: row.get(14)?,
            related_finding_id: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
        })
    }

    fn into_finding(self) -> Result<Finding, WardenError> {
        Ok(Finding {
            severity: Severity::from_label(&self.severity).unwrap_or(Severity::Info),
            status: FindingStatus::parse(&self.status).unwrap_or(FindingStatus::Open),
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            id: self.id,
            scan_id: self.scan_id,
            title: self.title,
            description: self.description,
            target: self.target,
            cve_id: self.cve_id,
            cvss_score: self.cvss_score,
            port: self.port,
            service: self.service,
            evidence: self.evidence,
            source_tool: self.source_tool,
            raw_ref: self.raw_ref,
            dedup_key: self.dedup_key,
            related_finding_id: self.related_finding_id,
        })
    }
}

impl Database {
    pub fn insert_finding(&self, finding: &Finding) -> Result<(), WardenError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO findings (id, scan_id, title, description, severity, status, target, cve_id, \
             cvss_score, port, service, evidence, source_tool, raw_ref, dedup_key, related_finding_id, \
             created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                finding.id,
                finding.scan_id,
                finding.title,
                finding.description,
                finding.severity.as_str(),
                finding.status.as_str(),
                finding.target,
                finding.cve_id,
                finding.cvss_score,
                finding.port,
                finding.service,
                finding.evidence,
                finding.source_tool,
                finding.raw_ref,
                finding.dedup_key,
                finding.related_finding_id,
                finding.created_at.to_rfc3339(),
                finding.updated_at.to_rfc3339(),
            ],
        )
        .map_err(db_err("Failed to insert finding"))?;
        Ok(())
    }

    pub fn set_finding_status(&self, id: &str, status: FindingStatus) -> Result<(), WardenError> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "UPDATE findings SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status.as_str(), Utc::now().to_rfc3339()],
            )
            .map_err(db_err("Update failed"))?;
        if affected == 0 {
            return Err(WardenError::NotFound(format!("finding {}", id)));
        }
        Ok(())
    }

    /// Findings of a scan, most severe first.
    pub fn get_findings(&self, scan_id: &str) -> Result<Vec<Finding>, WardenError> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(
                    "SELECT id, scan_id, title, description, severity, status, target, cve_id, cvss_score, \
                     port, service, evidence, source_tool, raw_ref, dedup_key, related_finding_id, \
                     created_at, updated_at FROM findings WHERE scan_id = ?1 \
                     ORDER BY CASE severity WHEN 'critical' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 \
                     WHEN 'low' THEN 3 WHEN 'info' THEN 4 ELSE 5 END, created_at",
                )
                .map_err(db_err("Query failed"))?;
            let rows = stmt
                .query_map(params![scan_id], FindingRow::from_row)
                .map_err(db_err("Query error"))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err("Row error"))?
        };
        rows.into_iter().map(FindingRow::into_finding).collect()
    }
}
