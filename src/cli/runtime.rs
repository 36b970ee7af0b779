use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use crate::aggregator::ResultAggregator;
use crate::audit::AuditLog;
use crate::config::{self, ExecutionBackend, WardenConfig};
use crate::container::{ContainerBackend, ContainerManager};
use crate::db::Database;
use crate::errors::WardenError;
use crate::events::{ChannelNotifier, Notifier, ScanEvent};
use crate::pipeline::ScanEngine;
use crate::process::{CommandPolicy, LocalBackend, ProcessBackend, ProcessExecutor};
use crate::repository::Repository;
use crate::safety::{SafetyGate, SysinfoMonitor};
use crate::tools::ToolRegistry;
use super::commands::StoreArgs;

/// Everything a command needs to talk to the scan store and run tools.
pub struct Runtime {
    pub config: WardenConfig,
    pub db: Database,
    pub engine: Arc<ScanEngine>,
    pub notifier: Arc<dyn Notifier>,
    /// Taken by whichever command renders progress.
    pub events: Option<mpsc::UnboundedReceiver<ScanEvent>>,
}

impl Runtime {
    /// Open the database and build the engine. Process execution is only
    /// wired up when `with_backend` is set; `status` and `cancel` never
    /// launch a tool and should not need Docker.
    pub async fn open(store: &StoreArgs, with_backend: bool) -> Result<Self, WardenError> {
        let config = config::load_config(store.config.as_deref().map(Path::new)).await?;
        let db = Database::new(&store.db)?;
        debug!(db = %store.db, "Database opened");

        let execution = config.execution();
        let policy = match &execution.allowed_commands {
            Some(list) => CommandPolicy::new(list.iter().map(String::as_str)),
            None => CommandPolicy::default(),
        };
        let backend: Arc<dyn ProcessBackend> = if with_backend {
            build_backend(&config, execution.backend).await?
        } else {
            Arc::new(LocalBackend::new())
        };
        let executor = Arc::new(ProcessExecutor::new(policy, backend));
        debug!(backend = executor.backend_name(), "Process executor ready");

        let monitor = Arc::new(SysinfoMonitor::for_path(monitor_path(&store.db)));
        let gate = Arc::new(SafetyGate::new(config.safety(), monitor)?);

        let (notifier, events) = ChannelNotifier::new();
        let notifier: Arc<dyn Notifier> = Arc::new(notifier);
        let repo: Arc<dyn Repository> = Arc::new(db.clone());
        let aggregator = Arc::new(ResultAggregator::new(repo, notifier.clone()));

        let mut engine = ScanEngine::new(
            ToolRegistry::new(executor),
            gate,
            aggregator,
            notifier.clone(),
            config.engine(),
        );
        if let Some(dir) = config.audit.as_ref().and_then(|a| a.directory.as_deref()) {
            let audit = AuditLog::open(Path::new(dir)).await?;
            info!(path = %audit.path().display(), "Audit log enabled");
            engine = engine.with_audit(Arc::new(audit));
        }

        Ok(Self {
            config,
            db,
            engine: Arc::new(engine),
            notifier,
            events: Some(events),
        })
    }
}

async fn build_backend(config: &WardenConfig, kind: ExecutionBackend) -> Result<Arc<dyn ProcessBackend>, WardenError> {
    match kind {
        ExecutionBackend::Local => Ok(Arc::new(LocalBackend::new())),
        ExecutionBackend::Container => {
            let container = config.container.clone().unwrap_or_default();
            let manager = Arc::new(ContainerManager::new(&container)?);
            info!(container = manager.container_name(), "Using container execution backend");
            Ok(Arc::new(ContainerBackend::connect(manager).await?))
        }
    }
}

/// Free disk space is measured where the database lives.
fn monitor_path(db: &str) -> PathBuf {
    match Path::new(db).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_path_uses_db_directory() {
        assert_eq!(monitor_path("./data/warden.db"), PathBuf::from("./data"));
        assert_eq!(monitor_path("warden.db"), PathBuf::from("."));
    }

    #[tokio::test]
    async fn test_open_creates_database_without_backend() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("nested").join("warden.db");
        let store = StoreArgs { config: None, db: db.to_string_lossy().into_owned() };
        let runtime = Runtime::open(&store, false).await.unwrap();
        assert!(db.exists());
        assert!(runtime.events.is_some());
        assert!(runtime.engine.audit().is_none());
    }
}
