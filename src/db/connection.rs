use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use rusqlite::Connection;
use crate::errors::WardenError;

/// Scans, tool results, findings and assets. One connection shared behind a
/// mutex; every call runs to completion while holding it.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(path: &str) -> Result<Self, WardenError> {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db_err("Failed to open database"))?;

        // `warden status` and `warden cancel` open the same file while a scan
        // process is writing to it
        conn.execute_batch("PRAGMA journal_mode=WAL;").map_err(db_err("Failed to enable WAL"))?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err("Failed to set busy timeout"))?;
        Self::prepare(conn)
    }

    pub fn in_memory() -> Result<Self, WardenError> {
        let conn = Connection::open_in_memory().map_err(db_err("Failed to open in-memory database"))?;
        Self::prepare(conn)
    }

    fn prepare(conn: Connection) -> Result<Self, WardenError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;").map_err(db_err("Failed to set pragmas"))?;
        conn.execute_batch(super::schema::CREATE_TABLES).map_err(db_err("Failed to create tables"))?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, WardenError> {
        self.conn
            .lock()
            .map_err(|_| WardenError::Database("database connection lock poisoned".into()))
    }
}

pub(crate) fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> WardenError + '_ {
    move |e| WardenError::Database(format!("{}: {}", context, e))
}
