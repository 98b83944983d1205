use super::command::{CommandRunner, SystemCommand};
use crate::error::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Host network stack operations used by the network and camera ladders
#[async_trait]
pub trait NetworkControl: Send + Sync {
    /// Restart the networking subsystem
    async fn restart_networking(&self) -> Result<()>;
    /// Take the interface down, pause, and bring it back up
    async fn bounce_interface(&self, interface: &str) -> Result<()>;
    /// Accept inbound TCP on `port`, inserting the rule only if missing
    async fn allow_port(&self, port: u16) -> Result<()>;
}

pub struct HostNetwork {
    runner: Arc<dyn CommandRunner>,
    manager_unit: String,
    timeout: Duration,
    settle: Duration,
}

impl HostNetwork {
    pub fn new(runner: Arc<dyn CommandRunner>, manager_unit: &str, timeout: Duration) -> Self {
        Self {
            runner,
            manager_unit: manager_unit.to_string(),
            timeout,
            settle: Duration::from_secs(2),
        }
    }

    /// Pause between link down and link up
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    async fn run_checked(&self, cmd: SystemCommand) -> Result<()> {
        self.runner.run(&cmd, self.timeout).await?.check(&cmd)?;
        Ok(())
    }
}

#[async_trait]
impl NetworkControl for HostNetwork {
    async fn restart_networking(&self) -> Result<()> {
        info!(unit = %self.manager_unit, "Restarting networking");
        self.run_checked(
            SystemCommand::new("systemctl")
                .arg("restart")
                .arg(&self.manager_unit),
        )
        .await
    }

    async fn bounce_interface(&self, interface: &str) -> Result<()> {
        info!(interface, "Bouncing network interface");
        self.run_checked(SystemCommand::new("ip").args(["link", "set", interface, "down"]))
            .await?;
        tokio::time::sleep(self.settle).await;
        self.run_checked(SystemCommand::new("ip").args(["link", "set", interface, "up"]))
            .await
    }

    async fn allow_port(&self, port: u16) -> Result<()> {
        let rule = ["INPUT", "-p", "tcp", "--dport", &port.to_string(), "-j", "ACCEPT"]
            .map(str::to_string);

        let probe = SystemCommand::new("iptables").arg("-C").args(rule.clone());
        if self.runner.run(&probe, self.timeout).await?.success {
            debug!(port, "Firewall rule already present");
            return Ok(());
        }

        info!(port, "Inserting firewall rule for stream port");
        self.run_checked(SystemCommand::new("iptables").arg("-I").args(rule))
            .await
    }
}

/// Reads `<sysfs_root>/<interface>/operstate`
#[derive(Debug, Clone)]
pub struct InterfaceState {
    sysfs_root: PathBuf,
}

impl InterfaceState {
    pub fn new(sysfs_root: impl AsRef<Path>) -> Self {
        Self {
            sysfs_root: sysfs_root.as_ref().to_path_buf(),
        }
    }

    pub async fn operstate(&self, interface: &str) -> Result<String> {
        let path = self.sysfs_root.join(interface).join("operstate");
        let state = tokio::fs::read_to_string(path).await?;
        Ok(state.trim().to_string())
    }
}
