pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS scans (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    principal TEXT NOT NULL,
    targets TEXT NOT NULL,
    scan_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    progress_percent INTEGER NOT NULL DEFAULT 0,
    count_critical INTEGER NOT NULL DEFAULT 0,
    count_high INTEGER NOT NULL DEFAULT 0,
    count_medium INTEGER NOT NULL DEFAULT 0,
    count_low INTEGER NOT NULL DEFAULT 0,
    count_info INTEGER NOT NULL DEFAULT 0,
    tools TEXT,
    tool_options TEXT NOT NULL DEFAULT '{}',
    tool_runs TEXT NOT NULL DEFAULT '[]',
    error_message TEXT,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    duration_secs INTEGER
);

CREATE TABLE IF NOT EXISTS findings (
    id TEXT PRIMARY KEY,
    scan_id TEXT NOT NULL REFERENCES scans(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    severity TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    target TEXT NOT NULL,
    cve_id TEXT,
    cvss_score REAL,
    port INTEGER,
    service TEXT,
    evidence TEXT,
    source_tool TEXT NOT NULL,
    raw_ref TEXT,
    dedup_key TEXT NOT NULL,
    related_finding_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (scan_id, dedup_key)
);

CREATE TABLE IF NOT EXISTS assets (
    id TEXT PRIMARY KEY,
    identifier TEXT NOT NULL UNIQUE,
    name TEXT,
    asset_type TEXT NOT NULL,
    criticality TEXT NOT NULL DEFAULT 'unknown',
    discovered_by TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_findings_scan ON findings(scan_id);
CREATE INDEX IF NOT EXISTS idx_findings_severity ON findings(severity);
CREATE INDEX IF NOT EXISTS idx_scans_status ON scans(status);
CREATE INDEX IF NOT EXISTS idx_scans_principal ON scans(principal, status);
";
