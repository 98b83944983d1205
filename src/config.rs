use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the static watchdog configuration
pub const DEFAULT_CONFIG_PATH: &str = "/etc/homepi/watchdog.json";

/// Main watchdog configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Seconds between monitoring cycles
    pub check_interval: u64,
    /// Consecutive failing cycles before remediation
    pub max_failures: u32,
    /// Per-probe deadline in seconds
    pub probe_timeout: u64,
    /// Init-system unit of the supervised service
    pub service_unit: String,
    /// Base URL of the supervised service
    pub app_url: String,
    /// Health endpoint path on the supervised service
    pub app_health_path: String,
    /// Deadline for the local HTTP health request
    pub app_timeout: u64,
    /// Seconds to wait after a service restart before re-probing
    pub restart_grace: u64,
    /// Minimum spacing between two applications of the same fix
    pub fix_cooldown: u64,
    pub enable_service_restart: bool,
    pub enable_network_fix: bool,
    pub enable_bluetooth_fix: bool,
    pub enable_camera_fix: bool,
    pub enable_system_reboot: bool,
    pub reboot_rate_limit_per_hour: u32,
    pub network: NetworkConfig,
    pub bluetooth: BluetoothConfig,
    pub camera: CameraConfig,
    pub resources: ResourceThresholds,
    pub status: StatusConfig,
    pub history: HistoryConfig,
    /// Directory holding the reboot window and the reboot marker
    pub state_dir: PathBuf,
    pub logging: LoggingConfig,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: 30,
            max_failures: 3,
            probe_timeout: 10,
            service_unit: "homepi.service".to_string(),
            app_url: "http://localhost:5000".to_string(),
            app_health_path: "/api/health".to_string(),
            app_timeout: 5,
            restart_grace: 10,
            fix_cooldown: 300,
            enable_service_restart: true,
            enable_network_fix: true,
            enable_bluetooth_fix: true,
            enable_camera_fix: true,
            enable_system_reboot: true,
            reboot_rate_limit_per_hour: 2,
            network: NetworkConfig::default(),
            bluetooth: BluetoothConfig::default(),
            camera: CameraConfig::default(),
            resources: ResourceThresholds::default(),
            status: StatusConfig::default(),
            history: HistoryConfig::default(),
            state_dir: PathBuf::from("/var/lib/homepi"),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Primary interface whose operstate must be "up"
    pub interface: String,
    /// TCP targets; one successful connect is enough
    pub targets: Vec<String>,
    /// Connect deadline per target in seconds
    pub timeout: u64,
    /// Root of the sysfs network class directory
    pub sysfs_root: PathBuf,
    /// Unit restarted by the network fix
    pub manager_unit: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            targets: vec!["8.8.8.8:53".to_string(), "1.1.1.1:53".to_string()],
            timeout: 5,
            sysfs_root: PathBuf::from("/sys/class/net"),
            manager_unit: "networking".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BluetoothConfig {
    pub enabled: bool,
    /// Substring identifying the audio sink in `pactl list short sinks`
    pub sink_match: String,
    /// MAC address of the known speaker, used for reconnects
    pub device: Option<String>,
    /// HCI adapters power-cycled during a fix
    pub adapters: Vec<String>,
    /// Desktop user owning the audio session
    pub audio_user: Option<String>,
    /// PulseAudio/PipeWire runtime path of that user
    pub pulse_runtime_path: Option<String>,
    /// Site-specific repair script run with `bash` after adapters are cycled
    pub fix_script: Option<PathBuf>,
    /// Volume applied to the sink after a reconnect
    pub volume_percent: Option<u8>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sink_match: "bluez".to_string(),
            device: None,
            adapters: vec!["hci0".to_string()],
            audio_user: None,
            pulse_runtime_path: None,
            fix_script: None,
            volume_percent: Some(70),
        }
    }
}

/// Remedies tried for camera reachability, in configured order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFixMethod {
    /// Ask the supervised process to reinitialize its capture pipeline
    Refresh,
    RestartService,
    Firewall,
    NetworkBounce,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CameraConfig {
    pub enabled: bool,
    /// Externally reachable host; resolved from the routing table when unset
    pub host: Option<String>,
    pub port: u16,
    /// Paths queried the way an external viewer would
    pub test_endpoints: Vec<String>,
    /// Endpoint reporting `frame_age`
    pub status_endpoint: String,
    /// In-process refresh endpoint of the supervised service
    pub refresh_endpoint: String,
    pub fix_methods: Vec<CameraFixMethod>,
    pub test_timeout: u64,
    /// Oldest acceptable frame, in seconds
    pub max_frame_age: f64,
    /// Warm-up allowed after an in-process refresh before re-probing
    pub refresh_settle: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: None,
            port: 5000,
            test_endpoints: vec!["/api/camera/status".to_string(), "/video_feed".to_string()],
            status_endpoint: "/api/camera/status".to_string(),
            refresh_endpoint: "/api/camera/refresh".to_string(),
            fix_methods: vec![
                CameraFixMethod::Refresh,
                CameraFixMethod::RestartService,
                CameraFixMethod::Firewall,
                CameraFixMethod::NetworkBounce,
            ],
            test_timeout: 10,
            max_frame_age: 1.5,
            refresh_settle: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResourceThresholds {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub temperature_celsius: f64,
    /// Start of the warning band for the percentage metrics
    pub warning_percent: f64,
    /// Mount point whose usage is checked
    pub disk_path: PathBuf,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 90.0,
            memory_percent: 90.0,
            disk_percent: 90.0,
            temperature_celsius: 75.0,
            warning_percent: 80.0,
            disk_path: PathBuf::from("/"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StatusConfig {
    pub bind: String,
    /// Fix history entries included in a status response
    pub recent_fixes: usize,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8090".to_string(),
            recent_fixes: 20,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Append-only JSON-lines log of fix attempts
    pub path: PathBuf,
    pub max_bytes: u64,
    pub max_files: u32,
    /// Attempts kept in memory for the status endpoint
    pub memory_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/homepi/fix-history.jsonl"),
            max_bytes: 1024 * 1024,
            max_files: 5,
            memory_entries: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` wins when set
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    pub dir: PathBuf,
    /// Size at which the log file rotates, whatever its age
    pub max_bytes: u64,
    /// Rotated files kept on disk
    pub max_files: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,homepi=debug".to_string(),
            json: false,
            dir: PathBuf::from("/var/log/homepi"),
            max_bytes: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

impl WatchdogConfig {
    /// Load configuration from a JSON file, then apply `HOMEPI__*` overrides
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let builder = Config::builder()
            .add_source(
                File::new(&path.to_string_lossy(), FileFormat::Json).required(path.exists()),
            )
            // Override with environment variables (HOMEPI__MAX_FAILURES, HOMEPI__CAMERA__PORT, ...)
            .add_source(
                Environment::with_prefix("HOMEPI")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_secs(self.restart_grace)
    }

    pub fn fix_cooldown(&self) -> Duration {
        Duration::from_secs(self.fix_cooldown)
    }

    pub fn app_health_url(&self) -> String {
        format!(
            "{}{}",
            self.app_url.trim_end_matches('/'),
            self.app_health_path
        )
    }

    pub fn reboot_marker_path(&self) -> PathBuf {
        self.state_dir.join("watchdog-reboot")
    }

    pub fn reboot_window_path(&self) -> PathBuf {
        self.state_dir.join("reboots.json")
    }

    /// Features switched off by configuration, for the one-time startup notice
    pub fn disabled_features(&self) -> Vec<&'static str> {
        let mut disabled = Vec::new();
        if !self.bluetooth.enabled {
            disabled.push("bluetooth probe");
        }
        if !self.camera.enabled {
            disabled.push("camera probe");
        }
        if !self.enable_service_restart {
            disabled.push("service restart fix");
        }
        if !self.enable_network_fix {
            disabled.push("network fix");
        }
        if !self.enable_bluetooth_fix {
            disabled.push("bluetooth fix");
        }
        if !self.enable_camera_fix {
            disabled.push("camera fix");
        }
        if !self.enable_system_reboot {
            disabled.push("system reboot");
        }
        disabled
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.check_interval == 0 {
            errors.push("check_interval must be at least 1 second".to_string());
        }
        if self.max_failures == 0 {
            errors.push("max_failures must be at least 1".to_string());
        }
        if self.probe_timeout == 0 || self.probe_timeout > self.check_interval {
            errors.push(format!(
                "probe_timeout ({}s) must be between 1 and check_interval ({}s)",
                self.probe_timeout, self.check_interval
            ));
        }
        if self.service_unit.trim().is_empty() {
            errors.push("service_unit must not be empty".to_string());
        }
        if reqwest::Url::parse(&self.app_health_url()).is_err() {
            errors.push(format!("app_url is not a valid URL: {}", self.app_url));
        }
        if self.enable_system_reboot && self.reboot_rate_limit_per_hour == 0 {
            errors.push(
                "reboot_rate_limit_per_hour must be at least 1 when enable_system_reboot is set"
                    .to_string(),
            );
        }

        if self.network.interface.trim().is_empty() {
            errors.push("network.interface must not be empty".to_string());
        }
        if self.network.targets.is_empty() {
            errors.push("network.targets must list at least one host:port".to_string());
        }
        for target in &self.network.targets {
            if target.parse::<SocketAddr>().is_err() {
                errors.push(format!("network.targets entry is not host:port: {target}"));
            }
        }

        if self.bluetooth.enabled && self.bluetooth.sink_match.trim().is_empty() {
            errors.push("bluetooth.sink_match must not be empty".to_string());
        }
        if self.bluetooth.volume_percent.is_some_and(|v| v > 100) {
            errors.push("bluetooth.volume_percent must be within [0, 100]".to_string());
        }

        if self.camera.enabled {
            if self.camera.test_endpoints.is_empty() {
                errors.push("camera.test_endpoints must not be empty".to_string());
            }
            for endpoint in &self.camera.test_endpoints {
                if !endpoint.starts_with('/') {
                    errors.push(format!("camera.test_endpoints entry must be a path: {endpoint}"));
                }
            }
            if self.camera.test_timeout == 0 {
                errors.push("camera.test_timeout must be at least 1 second".to_string());
            }
            if self.camera.max_frame_age <= 0.0 {
                errors.push("camera.max_frame_age must be positive".to_string());
            }
        }
        if self.enable_camera_fix && self.camera.fix_methods.is_empty() {
            errors.push("camera.fix_methods must not be empty when enable_camera_fix is set".to_string());
        }

        let r = &self.resources;
        for (name, value) in [
            ("cpu_percent", r.cpu_percent),
            ("memory_percent", r.memory_percent),
            ("disk_percent", r.disk_percent),
        ] {
            if value <= 0.0 || value > 100.0 {
                errors.push(format!("resources.{name} must be within (0, 100]"));
            } else if r.warning_percent > value {
                errors.push(format!(
                    "resources.warning_percent ({}) exceeds resources.{name} ({value})",
                    r.warning_percent
                ));
            }
        }

        if self.logging.max_bytes == 0 {
            errors.push("logging.max_bytes must be positive".to_string());
        }
        if self.history.max_bytes == 0 {
            errors.push("history.max_bytes must be positive".to_string());
        }
        if self.history.memory_entries == 0 {
            errors.push("history.memory_entries must be positive".to_string());
        }
        if self.status.bind.parse::<SocketAddr>().is_err() {
            errors.push(format!("status.bind is not host:port: {}", self.status.bind));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
