use std::path::PathBuf;
use std::time::Duration;
use async_trait::async_trait;
use serde::Serialize;
use sysinfo::{Disks, System};
use tracing::warn;
use crate::config::SafetyConfig;
use crate::errors::{Rejection, WardenError};

const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub disk_free_gb: f64,
}

/// Source of host load figures. Swapped for a fixed monitor in tests.
#[async_trait]
pub trait ResourceMonitor: Send + Sync {
    async fn sample(&self) -> Result<ResourceSnapshot, WardenError>;
}

/// Samples the local host with `sysinfo`.
pub struct SysinfoMonitor {
    /// Free space is measured on the disk holding this path.
    path: PathBuf,
}

impl SysinfoMonitor {
    pub fn new() -> Self {
        Self {
            path: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        }
    }

    pub fn for_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for SysinfoMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceMonitor for SysinfoMonitor {
    async fn sample(&self) -> Result<ResourceSnapshot, WardenError> {
        let mut sys = System::new();
        // CPU usage is a delta between two refreshes
        sys.refresh_cpu_all();
        tokio::time::sleep(CPU_SAMPLE_INTERVAL).await;
        sys.refresh_cpu_all();
        sys.refresh_memory();

        let total = sys.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (sys.used_memory() as f64 / total as f64 * 100.0) as f32
        };

        let disks = Disks::new_with_refreshed_list();
        let disk_free_gb = disks
            .list()
            .iter()
            .filter(|d| self.path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space() as f64 / BYTES_PER_GB)
            .unwrap_or_else(|| {
                // Some container filesystems are not listed; skip the disk check
                warn!(path = %self.path.display(), "No disk found for path, disk check skipped");
                f64::MAX
            });

        Ok(ResourceSnapshot {
            cpu_percent: sys.global_cpu_usage(),
            memory_percent,
            disk_free_gb,
        })
    }
}

/// Compare a snapshot with the configured thresholds, CPU first.
pub fn check_thresholds(snapshot: &ResourceSnapshot, config: &SafetyConfig) -> Result<(), Rejection> {
    if snapshot.cpu_percent > config.max_cpu_percent {
        return Err(Rejection::CpuExhausted {
            current: snapshot.cpu_percent,
            max: config.max_cpu_percent,
        });
    }
    if snapshot.memory_percent > config.max_memory_percent {
        return Err(Rejection::MemoryExhausted {
            current: snapshot.memory_percent,
            max: config.max_memory_percent,
        });
    }
    if snapshot.disk_free_gb < config.min_disk_gb {
        return Err(Rejection::DiskExhausted {
            free_gb: snapshot.disk_free_gb,
            min_gb: config.min_disk_gb,
        });
    }
    Ok(())
}
