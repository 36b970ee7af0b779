pub mod assets;
pub mod connection;
pub mod findings;
pub mod schema;
pub mod scans;

pub use connection::Database;

use async_trait::async_trait;
use crate::errors::WardenError;
use crate::models::{Asset, Finding, FindingStatus, Scan};
use crate::repository::Repository;

#[async_trait]
impl Repository for Database {
    async fn load_scan(&self, id: &str) -> Result<Scan, WardenError> {
        self.get_scan(id)?
            .ok_or_else(|| WardenError::NotFound(format!("scan {}", id)))
    }

    async fn save_scan(&self, scan: &Scan) -> Result<(), WardenError> {
        self.put_scan(scan)
    }

    async fn list_scans(&self, limit: usize) -> Result<Vec<Scan>, WardenError> {
        self.recent_scans(limit)
    }

    async fn count_active_scans(&self, principal: &str) -> Result<usize, WardenError> {
        self.active_scan_count(principal)
    }

    async fn append_finding(&self, finding: &Finding) -> Result<(), WardenError> {
        self.insert_finding(finding)
    }

    async fn update_finding_status(&self, id: &str, status: FindingStatus) -> Result<(), WardenError> {
        self.set_finding_status(id, status)
    }

    async fn list_findings(&self, scan_id: &str) -> Result<Vec<Finding>, WardenError> {
        self.get_findings(scan_id)
    }

    async fn upsert_asset(&self, asset: Asset) -> Result<Asset, WardenError> {
        self.merge_asset(asset)
    }

    async fn get_asset(&self, identifier: &str) -> Result<Option<Asset>, WardenError> {
        self.find_asset(identifier)
    }

    async fn list_assets(&self) -> Result<Vec<Asset>, WardenError> {
        self.all_assets()
    }
}
