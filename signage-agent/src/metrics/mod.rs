//! Resource metrics for heartbeat telemetry
//!
//! Provides the three figures the cloud tracks per player:
//! - CPU usage (global, percent)
//! - Memory usage (percent of total)
//! - Free storage on the system volume (MB)

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use sysinfo::{Disks, System};
use tracing::{debug, warn};

/// One reading of the device's resources
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ResourceMetrics {
    pub cpu_percent: f32,
    pub memory_percent: f32,
    pub storage_free_mb: u64,
}

/// Source of resource readings
#[async_trait]
pub trait MetricsProbe: Send + Sync {
    async fn sample(&self) -> ResourceMetrics;
}

/// sysinfo-backed probe.
///
/// The `System` is kept between samples so CPU usage is measured over the
/// interval since the previous heartbeat. Readings run on the blocking pool.
pub struct SystemProbe {
    system: Arc<Mutex<System>>,
}

impl SystemProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Arc::new(Mutex::new(system)),
        }
    }

    fn cpu_and_memory(system: &Mutex<System>) -> (f32, f32) {
        let mut sys = system.lock();
        sys.refresh_cpu();
        sys.refresh_memory();

        let cpu_percent = sys.global_cpu_info().cpu_usage();

        let total_bytes = sys.total_memory();
        let used_bytes = total_bytes.saturating_sub(sys.available_memory());
        let memory_percent = if total_bytes > 0 {
            (used_bytes as f32 / total_bytes as f32) * 100.0
        } else {
            0.0
        };

        (cpu_percent, memory_percent)
    }

    fn storage_free_mb() -> u64 {
        let disks = Disks::new_with_refreshed_list();
        let system_root = if cfg!(windows) { Path::new("C:\\") } else { Path::new("/") };

        // Prefer the system volume, otherwise report the roomiest disk
        let free_bytes = disks
            .list()
            .iter()
            .find(|d| d.mount_point() == system_root)
            .or_else(|| disks.list().iter().max_by_key(|d| d.available_space()))
            .map(|d| d.available_space())
            .unwrap_or(0);

        free_bytes / (1024 * 1024)
    }
}

impl Default for SystemProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsProbe for SystemProbe {
    async fn sample(&self) -> ResourceMetrics {
        let system = self.system.clone();
        let reading = tokio::task::spawn_blocking(move || {
            let (cpu_percent, memory_percent) = Self::cpu_and_memory(&system);
            (cpu_percent, memory_percent, Self::storage_free_mb())
        })
        .await;

        let (cpu_percent, memory_percent, storage_free_mb) = match reading {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Metrics reading failed: {}", e);
                return ResourceMetrics::default();
            }
        };

        debug!(
            "Metrics: cpu {:.1}%, memory {:.1}%, {} MB free",
            cpu_percent, memory_percent, storage_free_mb
        );

        ResourceMetrics {
            cpu_percent,
            memory_percent,
            storage_free_mb,
        }
    }
}
