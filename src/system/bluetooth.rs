use super::command::{CommandRunner, SystemCommand};
use crate::config::BluetoothConfig;
use crate::error::{Result, WatchdogError};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Repair scripts rebuild the audio graph and can be slow
const FIX_SCRIPT_TIMEOUT: Duration = Duration::from_secs(120);

/// One line of `pactl list short sinks`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioSink {
    pub index: String,
    pub name: String,
    pub state: String,
}

impl AudioSink {
    pub fn is_suspended(&self) -> bool {
        self.state.eq_ignore_ascii_case("SUSPENDED")
    }
}

/// Parse the tab separated output of `pactl list short sinks`
pub fn parse_sinks(output: &str) -> Vec<AudioSink> {
    output
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 2 {
                return None;
            }
            Some(AudioSink {
                index: fields[0].to_string(),
                name: fields[1].to_string(),
                state: fields.last().copied().unwrap_or_default().to_string(),
            })
        })
        .collect()
}

/// Bluetooth daemon and audio session control
#[async_trait]
pub trait BluetoothControl: Send + Sync {
    /// Audio sinks currently known to the sound server
    async fn sinks(&self) -> Result<Vec<AudioSink>>;
    /// Restart the Bluetooth daemon and power-cycle adapters
    async fn restart_service(&self) -> Result<()>;
    /// Reconnect the known device and make its sink the default
    async fn reconnect(&self) -> Result<()>;
}

pub struct BluezControl {
    runner: Arc<dyn CommandRunner>,
    config: BluetoothConfig,
    timeout: Duration,
    settle: Duration,
}

impl BluezControl {
    pub fn new(runner: Arc<dyn CommandRunner>, config: BluetoothConfig, timeout: Duration) -> Self {
        Self {
            runner,
            config,
            timeout,
            settle: Duration::from_secs(2),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Sound server commands must run inside the desktop user's session
    fn pactl(&self, args: &[&str]) -> SystemCommand {
        let cmd = SystemCommand::new("pactl").args(args.iter().copied());
        match &self.config.audio_user {
            Some(user) => {
                let env: Vec<(String, String)> = self
                    .config
                    .pulse_runtime_path
                    .iter()
                    .map(|p| ("PULSE_RUNTIME_PATH".to_string(), p.clone()))
                    .collect();
                cmd.as_user(user, &env)
            }
            None => cmd,
        }
    }

    async fn run_checked(&self, cmd: SystemCommand) -> Result<String> {
        let output = self.runner.run(&cmd, self.timeout).await?.check(&cmd)?;
        Ok(output.stdout)
    }

    fn matching_sink<'a>(&self, sinks: &'a [AudioSink]) -> Option<&'a AudioSink> {
        sinks.iter().find(|s| s.name.contains(&self.config.sink_match))
    }
}

#[async_trait]
impl BluetoothControl for BluezControl {
    async fn sinks(&self) -> Result<Vec<AudioSink>> {
        let stdout = self.run_checked(self.pactl(&["list", "short", "sinks"])).await?;
        Ok(parse_sinks(&stdout))
    }

    async fn restart_service(&self) -> Result<()> {
        info!("Restarting bluetooth service");
        self.run_checked(SystemCommand::new("systemctl").args(["restart", "bluetooth"]))
            .await?;
        tokio::time::sleep(self.settle).await;

        for adapter in &self.config.adapters {
            // An adapter that refuses to cycle should not stop the others
            if let Err(e) = self
                .run_checked(SystemCommand::new("hciconfig").args([adapter.as_str(), "down"]))
                .await
            {
                warn!(adapter = %adapter, error = %e, "Adapter down failed");
            }
            tokio::time::sleep(self.settle).await;
            if let Err(e) = self
                .run_checked(SystemCommand::new("hciconfig").args([adapter.as_str(), "up"]))
                .await
            {
                warn!(adapter = %adapter, error = %e, "Adapter up failed");
            }
        }

        if let Some(script) = &self.config.fix_script {
            if tokio::fs::try_exists(script).await.unwrap_or(false) {
                info!(script = %script.display(), "Running bluetooth fix script");
                let cmd = SystemCommand::new("bash").arg(script.to_string_lossy());
                match self.runner.run(&cmd, FIX_SCRIPT_TIMEOUT).await.and_then(|o| o.check(&cmd)) {
                    Ok(_) => info!("Bluetooth fix script completed"),
                    Err(e) => warn!(error = %e, "Bluetooth fix script had issues"),
                }
            } else {
                warn!(script = %script.display(), "Bluetooth fix script not found");
            }
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        if let Some(device) = &self.config.device {
            info!(device = %device, "Reconnecting bluetooth device");
            self.run_checked(SystemCommand::new("bluetoothctl").args(["connect", device.as_str()]))
                .await?;
            tokio::time::sleep(self.settle).await;
        }

        let sinks = self.sinks().await?;
        let sink = self.matching_sink(&sinks).ok_or_else(|| {
            WatchdogError::remediation(
                "bluetooth-reconnect",
                format!("no sink matching '{}'", self.config.sink_match),
            )
        })?;

        info!(sink = %sink.name, "Setting bluetooth sink as default");
        self.run_checked(self.pactl(&["set-default-sink", sink.name.as_str()]))
            .await?;

        if let Some(volume) = self.config.volume_percent {
            let level = format!("{volume}%");
            if let Err(e) = self
                .run_checked(self.pactl(&["set-sink-volume", sink.name.as_str(), level.as_str()]))
                .await
            {
                warn!(sink = %sink.name, error = %e, "Could not reset sink volume");
            }
        }
        Ok(())
    }
}
