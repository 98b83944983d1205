//! Fix dispatch
//!
//! Maps each [`FixKind`] onto the platform client that performs it.

use super::bluetooth::BluetoothControl;
use super::camera::CameraRefresher;
use super::network::NetworkControl;
use super::power::PowerControl;
use super::systemd::ServiceManager;
use crate::camera::SkipReason;
use crate::domain::{FixKind, FixOutcome};
use crate::error::{Result, WatchdogError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait FixExecutor: Send + Sync {
    /// Perform one remediation action.
    ///
    /// `Ok(Skipped)` means the action was deliberately not performed;
    /// errors mean it was attempted and failed.
    async fn apply(&self, kind: FixKind) -> Result<FixOutcome>;
}

/// Targets the fixes act on
#[derive(Debug, Clone)]
pub struct FixTargets {
    pub service_unit: String,
    pub interface: String,
    pub stream_port: u16,
}

/// Executes fixes against the local host
pub struct SystemFixExecutor {
    services: Arc<dyn ServiceManager>,
    network: Arc<dyn NetworkControl>,
    bluetooth: Arc<dyn BluetoothControl>,
    power: Arc<dyn PowerControl>,
    camera: Option<Arc<dyn CameraRefresher>>,
    targets: FixTargets,
}

impl SystemFixExecutor {
    pub fn new(
        services: Arc<dyn ServiceManager>,
        network: Arc<dyn NetworkControl>,
        bluetooth: Arc<dyn BluetoothControl>,
        power: Arc<dyn PowerControl>,
        targets: FixTargets,
    ) -> Self {
        Self {
            services,
            network,
            bluetooth,
            power,
            camera: None,
            targets,
        }
    }

    pub fn with_camera_refresher(mut self, camera: Arc<dyn CameraRefresher>) -> Self {
        self.camera = Some(camera);
        self
    }
}

#[async_trait]
impl FixExecutor for SystemFixExecutor {
    async fn apply(&self, kind: FixKind) -> Result<FixOutcome> {
        info!(fix = %kind, "Applying fix");
        match kind {
            FixKind::ServiceRestart => self.services.restart(&self.targets.service_unit).await?,
            FixKind::NetworkRestart => self.network.restart_networking().await?,
            FixKind::NetworkInterfaceBounce => {
                self.network.bounce_interface(&self.targets.interface).await?
            }
            FixKind::BluetoothRestart => self.bluetooth.restart_service().await?,
            FixKind::BluetoothReconnect => self.bluetooth.reconnect().await?,
            FixKind::FirewallRuleInsert => self.network.allow_port(self.targets.stream_port).await?,
            FixKind::FullReboot => {
                self.power
                    .reboot("HomePi watchdog initiated reboot")
                    .await?
            }
            FixKind::CameraRefresh => {
                let Some(camera) = &self.camera else {
                    return Ok(FixOutcome::skipped("in-process refresh unavailable"));
                };
                let report = camera
                    .request_refresh("watchdog: camera unreachable externally")
                    .await?;
                if let Some(error) = report.error {
                    return Err(WatchdogError::Camera(error));
                }
                if !report.performed {
                    let reason = match report.skipped_reason {
                        Some(SkipReason::Cooldown) => "in-process refresh in cooldown",
                        Some(SkipReason::NotStale) => "capture pipeline not stale",
                        None => "in-process refresh declined",
                    };
                    return Ok(FixOutcome::skipped(reason));
                }
            }
        }
        Ok(FixOutcome::Succeeded)
    }
}
