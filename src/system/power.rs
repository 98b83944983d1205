use super::command::{CommandRunner, SystemCommand};
use crate::error::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[async_trait]
pub trait PowerControl: Send + Sync {
    /// Schedule a host reboot
    async fn reboot(&self, reason: &str) -> Result<()>;
}

/// Reboots through `shutdown -r +1`, leaving a marker for the next boot
pub struct HostPower {
    runner: Arc<dyn CommandRunner>,
    marker: PathBuf,
    timeout: Duration,
}

impl HostPower {
    pub fn new(runner: Arc<dyn CommandRunner>, marker: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            runner,
            marker: marker.into(),
            timeout,
        }
    }
}

#[async_trait]
impl PowerControl for HostPower {
    async fn reboot(&self, reason: &str) -> Result<()> {
        write_marker(&self.marker, reason).await?;

        error!(reason, "Rebooting system as last resort");
        // One minute of slack lets the log and history writers flush
        let cmd = SystemCommand::new("shutdown").args(["-r", "+1", reason]);
        if let Err(e) = self
            .runner
            .run(&cmd, self.timeout)
            .await
            .and_then(|output| output.check(&cmd))
        {
            let _ = tokio::fs::remove_file(&self.marker).await;
            return Err(e);
        }
        Ok(())
    }
}

/// Record that the next boot was caused by the watchdog
pub async fn write_marker(path: &Path, reason: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, format!("{}\t{}\n", Utc::now().to_rfc3339(), reason)).await?;
    Ok(())
}

/// Remove the reboot marker, returning its contents if it existed
pub async fn take_marker(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => {
            tokio::fs::remove_file(path).await?;
            info!(marker = %path.display(), "Reboot marker consumed");
            Ok(Some(contents.trim().to_string()))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
