use async_trait::async_trait;
use crate::errors::WardenError;
use crate::models::{Asset, Finding, FindingStatus, Scan};

/// Persistence collaborator for scans, findings and assets.
///
/// The engine, gate and aggregator depend only on this trait; `db::Database`
/// is the bundled SQLite implementation.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Load a scan, returning `NotFound` when the id is unknown.
    async fn load_scan(&self, id: &str) -> Result<Scan, WardenError>;

    /// Insert or replace the full scan record.
    async fn save_scan(&self, scan: &Scan) -> Result<(), WardenError>;

    async fn list_scans(&self, limit: usize) -> Result<Vec<Scan>, WardenError>;

    /// Scans of `principal` that are pending, running or cancelling.
    async fn count_active_scans(&self, principal: &str) -> Result<usize, WardenError>;

    async fn append_finding(&self, finding: &Finding) -> Result<(), WardenError>;

    async fn update_finding_status(&self, id: &str, status: FindingStatus) -> Result<(), WardenError>;

    async fn list_findings(&self, scan_id: &str) -> Result<Vec<Finding>, WardenError>;

    /// Insert, or merge into the stored asset with the same identifier.
    /// Returns the stored record after the merge.
    async fn upsert_asset(&self, asset: Asset) -> Result<Asset, WardenError>;

    async fn get_asset(&self, identifier: &str) -> Result<Option<Asset>, WardenError>;

    async fn list_assets(&self) -> Result<Vec<Asset>, WardenError>;
}
