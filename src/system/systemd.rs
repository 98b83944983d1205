use super::command::{CommandRunner, SystemCommand};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Init-system client for named service units
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn is_active(&self, unit: &str) -> Result<bool>;
    async fn restart(&self, unit: &str) -> Result<()>;
}

/// `systemctl` backed service manager
pub struct Systemctl {
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl Systemctl {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    async fn unit_command(&self, verb: &str, unit: &str) -> Result<()> {
        let cmd = SystemCommand::new("systemctl").arg(verb).arg(unit);
        self.runner.run(&cmd, self.timeout).await?.check(&cmd)?;
        Ok(())
    }
}

#[async_trait]
impl ServiceManager for Systemctl {
    async fn is_active(&self, unit: &str) -> Result<bool> {
        // is-active exits non-zero for inactive units; the state word is what matters
        let cmd = SystemCommand::new("systemctl").arg("is-active").arg(unit);
        let output = self.runner.run(&cmd, self.timeout).await?;
        Ok(output.stdout.trim() == "active")
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        info!(unit, "Restarting service unit");
        self.unit_command("restart", unit).await
    }
}
