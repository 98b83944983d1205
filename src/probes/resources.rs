use super::Probe;
use crate::config::ResourceThresholds;
use crate::domain::{ProbeKind, ProbeResult};
use crate::error::{Result, WatchdogError};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysinfo::{Components, CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};

/// One reading of host pressure
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    /// Hottest sensor, when the platform exposes any
    pub temperature_celsius: Option<f64>,
}

#[async_trait]
pub trait ResourceSampler: Send + Sync {
    async fn sample(&self) -> Result<ResourceSample>;
}

/// Samples the local host through sysinfo
pub struct SysinfoSampler {
    disk_path: PathBuf,
}

impl SysinfoSampler {
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        Self {
            disk_path: disk_path.into(),
        }
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    used as f64 / total as f64 * 100.0
}

/// Usage of the disk holding `path`: the longest mount point that prefixes it
fn disk_usage(disks: &Disks, path: &Path) -> Option<f64> {
    disks
        .list()
        .iter()
        .filter(|d| path.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .map(|d| percent(d.total_space().saturating_sub(d.available_space()), d.total_space()))
}

fn sample_blocking(disk_path: &Path) -> Result<ResourceSample> {
    let mut system = System::new_with_specifics(
        RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
            .with_memory(MemoryRefreshKind::nothing().with_ram()),
    );
    // CPU usage is a delta between two refreshes
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_cpu_usage();
    system.refresh_memory();

    let disks = Disks::new_with_refreshed_list();
    let disk_percent = disk_usage(&disks, disk_path).ok_or_else(|| {
        WatchdogError::probe("resources", format!("no disk mounted at {}", disk_path.display()))
    })?;

    let components = Components::new_with_refreshed_list();
    let temperature_celsius = components
        .list()
        .iter()
        .filter_map(|c| c.temperature())
        .filter(|t| t.is_finite())
        .map(f64::from)
        .reduce(f64::max);

    Ok(ResourceSample {
        cpu_percent: f64::from(system.global_cpu_usage()),
        memory_percent: percent(system.used_memory(), system.total_memory()),
        disk_percent,
        temperature_celsius,
    })
}

#[async_trait]
impl ResourceSampler for SysinfoSampler {
    async fn sample(&self) -> Result<ResourceSample> {
        let disk_path = self.disk_path.clone();
        tokio::task::spawn_blocking(move || sample_blocking(&disk_path))
            .await
            .map_err(|e| WatchdogError::Internal(format!("resource sampler panicked: {e}")))?
    }
}

/// Compare a sample against the thresholds.
///
/// Any metric at or above its limit fails the probe. Percentages inside the
/// warning band only add a warning.
pub fn evaluate(sample: &ResourceSample, limits: &ResourceThresholds) -> ProbeResult {
    let mut exceeded = Vec::new();
    let mut warnings = Vec::new();

    for (name, value, limit) in [
        ("cpu", sample.cpu_percent, limits.cpu_percent),
        ("memory", sample.memory_percent, limits.memory_percent),
        ("disk", sample.disk_percent, limits.disk_percent),
    ] {
        if value >= limit {
            exceeded.push(name);
            warnings.push(format!("{name} usage critical: {value:.1}% (limit {limit:.0}%)"));
        } else if value >= limits.warning_percent {
            warnings.push(format!("{name} usage high: {value:.1}%"));
        }
    }

    if let Some(temp) = sample.temperature_celsius {
        if temp >= limits.temperature_celsius {
            exceeded.push("temperature");
            warnings.push(format!(
                "temperature critical: {temp:.1}°C (limit {:.0}°C)",
                limits.temperature_celsius
            ));
        }
    }

    let detail = json!({
        "cpu_percent": sample.cpu_percent,
        "memory_percent": sample.memory_percent,
        "disk_percent": sample.disk_percent,
        "temperature_celsius": sample.temperature_celsius,
        "exceeded": exceeded,
        "warnings": warnings,
    });

    if exceeded.is_empty() {
        ProbeResult::pass(ProbeKind::Resources, detail)
    } else {
        ProbeResult::fail(ProbeKind::Resources, detail)
    }
}

pub struct ResourceProbe {
    sampler: Arc<dyn ResourceSampler>,
    limits: ResourceThresholds,
}

impl ResourceProbe {
    pub fn new(sampler: Arc<dyn ResourceSampler>, limits: ResourceThresholds) -> Self {
        Self { sampler, limits }
    }
}

#[async_trait]
impl Probe for ResourceProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::Resources
    }

    async fn check(&self) -> Result<ProbeResult> {
        let sample = self.sampler.sample().await?;
        Ok(evaluate(&sample, &self.limits))
    }
}
