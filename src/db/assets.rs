use rusqlite::{params, OptionalExtension, Row};
use crate::errors::WardenError;
use crate::models::{Asset, AssetCriticality, AssetType};
use super::connection::db_err;
use super::scans::parse_time;
use super::Database;

const ASSET_COLUMNS: &str =
    "id, identifier, name, asset_type, criticality, discovered_by, properties, first_seen, last_seen";

struct AssetRow {
    id: String,
    identifier: String,
    name: Option<String>,
    asset_type: String,
    criticality: String,
    discovered_by: String,
    properties: String,
    first_seen: String,
    last_seen: String,
}

impl AssetRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            identifier: row.get(1)?,
            name: row.get(2)?,
            asset_type: row.get(3)?,
            criticality: row.get(4)?,
            discovered_by: row.get(5)?,
            properties: row.get(6)?,
            first_seen: row.get(7)?,
            last_seen: row.get(8)?,
        })
    }

    fn into_asset(self) -> Result<Asset, WardenError> {
        Ok(Asset {
            asset_type: AssetType::parse(&self.asset_type),
            criticality: AssetCriticality::parse(&self.criticality),
            properties: serde_json::from_str(&self.properties)?,
            first_seen: parse_time(&self.first_seen)?,
            last_seen: parse_time(&self.last_seen)?,
            id: self.id,
            identifier: self.identifier,
            name: self.name,
            discovered_by: self.discovered_by,
        })
    }
}

impl Database {
    pub fn find_asset(&self, identifier: &str) -> Result<Option<Asset>, WardenError> {
        let row = {
            let conn = self.lock()?;
            conn.query_row(
                &format!("SELECT {} FROM assets WHERE identifier = ?1", ASSET_COLUMNS),
                params![identifier],
                AssetRow::from_row,
            )
            .optional()
            .map_err(db_err("Query error"))?
        };
        row.map(AssetRow::into_asset).transpose()
    }

    /// Merge `incoming` into the stored asset with the same identifier, or
    /// insert it. Read and write share one connection lock.
    pub fn merge_asset(&self, incoming: Asset) -> Result<Asset, WardenError> {
        let conn = self.lock()?;
        let existing = conn
            .query_row(
                &format!("SELECT {} FROM assets WHERE identifier = ?1", ASSET_COLUMNS),
                params![incoming.identifier],
                AssetRow::from_row,
            )
            .optional()
            .map_err(db_err("Query error"))?
            .map(AssetRow::into_asset)
            .transpose()?;

        let asset = match existing {
            Some(mut stored) => {
                stored.merge(incoming);
                stored
            }
            None => incoming,
        };

        conn.execute(
            "INSERT INTO assets (id, identifier, name, asset_type, criticality, discovered_by, properties, \
             first_seen, last_seen) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9) \
             ON CONFLICT(identifier) DO UPDATE SET name = excluded.name, asset_type = excluded.asset_type, \
             criticality = excluded.criticality, properties = excluded.properties, last_seen = excluded.last_seen",
            params![
                asset.id,
                asset.identifier,
                asset.name,
                asset.asset_type.as_str(),
                asset.criticality.as_str(),
                asset.discovered_by,
                serde_json::to_string(&asset.properties)?,
                asset.first_seen.to_rfc3339(),
                asset.last_seen.to_rfc3339(),
            ],
        )
        .map_err(db_err("Failed to upsert asset"))?;
        Ok(asset)
    }

    pub fn all_assets(&self) -> Result<Vec<Asset>, WardenError> {
        let rows = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare(&format!("SELECT {} FROM assets ORDER BY identifier", ASSET_COLUMNS))
                .map_err(db_err("Query failed"))?;
            let rows = stmt.query_map([], AssetRow::from_row).map_err(db_err("Query error"))?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err("Row error"))?
        };
        rows.into_iter().map(AssetRow::into_asset).collect()
    }
}
