use homepi::clock::system_clock;
use homepi::config::{LoggingConfig, WatchdogConfig};
use homepi::error::{Result, WatchdogError};
use homepi::logging::RotatingLogFile;
use homepi::probes::{
    AppProbe, BluetoothProbe, CameraReachabilityProbe, HttpHealthCheck, NetworkProbe, ProcessProbe,
    ResourceProbe, SharedProbe, SysinfoSampler,
};
use homepi::services::StatusPublisher;
use homepi::supervisor::{
    FixHistory, HealthMonitor, MonitorSettings, RebootGuard, RecoveryEngine, RecoverySettings,
};
use homepi::system::{
    BluezControl, CommandRunner, FixTargets, HostNetwork, HostPower, HttpCameraRefresher,
    InterfaceState, Systemctl, SystemFixExecutor, TokioCommandRunner,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Deadline for remediation commands; restarts can take a while on a Pi
const FIX_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

const LOG_FILE_PREFIX: &str = "homepi-watchdog";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; hold it for the life
/// of the process.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info,homepi=debug"));

    let mut layers: Vec<BoxedLayer> = Vec::new();

    let console = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    layers.push(if config.json {
        console.json().boxed()
    } else {
        console.boxed()
    });

    // The appender fails on an unwritable directory, so preflight it and fall
    // back to console-only logging.
    let mut guard = None;
    match open_log_appender(config) {
        Ok(appender) => {
            let (writer, worker) = tracing_appender::non_blocking(appender);
            let file = fmt::layer()
                .with_writer(writer)
                .with_ansi(false) // No color codes in file
                .with_target(true);
            layers.push(if config.json {
                file.json().boxed()
            } else {
                file.boxed()
            });
            guard = Some(worker);
        }
        Err(reason) => {
            eprintln!(
                "Warning: Could not write to log directory {} ({}), file logging disabled",
                config.dir.display(),
                reason
            );
        }
    }

    let file_logging_enabled = guard.is_some();
    tracing_subscriber::registry().with(layers).with(filter).init();

    if file_logging_enabled {
        eprintln!("Logging to: {}/{}.log", config.dir.display(), LOG_FILE_PREFIX);
    }
    guard
}

fn open_log_appender(config: &LoggingConfig) -> std::result::Result<RotatingLogFile, String> {
    std::fs::create_dir_all(&config.dir).map_err(|e| e.to_string())?;

    let test_path = config.dir.join(".homepi_write_test");
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&test_path)
        .map_err(|e| e.to_string())?;
    let _ = std::fs::remove_file(&test_path);

    RotatingLogFile::open(
        &config.dir,
        LOG_FILE_PREFIX,
        config.max_bytes,
        config.max_files,
        system_clock(),
    )
    .map_err(|e| e.to_string())
}

pub fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

/// Load and validate; every problem is reported at once
pub fn load_config(path: &Path) -> Result<WatchdogConfig> {
    let config = WatchdogConfig::load_from(path)?;
    config.validate().map_err(WatchdogError::InvalidConfig)?;
    Ok(config)
}

#[cfg(unix)]
fn running_as_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}

/// One-time startup notices: disabled features and missing privileges
pub fn announce_startup(config: &WatchdogConfig) {
    info!(
        service_unit = %config.service_unit,
        check_interval_secs = config.check_interval,
        max_failures = config.max_failures,
        "HomePi watchdog starting"
    );

    let disabled = config.disabled_features();
    if !disabled.is_empty() {
        warn!(disabled = ?disabled, "Running with features disabled by configuration");
    }

    if !running_as_root() {
        warn!("Not running as root; service restarts, network fixes and reboots will likely fail");
    }
}

/// Register every enabled probe
fn build_probes(
    config: &WatchdogConfig,
    runner: Arc<dyn CommandRunner>,
    bluetooth: Arc<BluezControl>,
) -> Result<Vec<SharedProbe>> {
    let probe_timeout = config.probe_timeout();
    let app_timeout = Duration::from_secs(config.app_timeout);

    let mut probes: Vec<SharedProbe> = vec![
        Arc::new(ProcessProbe::new(
            Arc::new(Systemctl::new(runner, probe_timeout)),
            config.service_unit.clone(),
            HttpHealthCheck::new(config.app_health_url(), app_timeout)?,
        )),
        Arc::new(AppProbe::new(HttpHealthCheck::new(
            config.app_url.clone(),
            app_timeout,
        )?)),
        Arc::new(NetworkProbe::new(
            config.network.targets.clone(),
            Duration::from_secs(config.network.timeout),
            config.network.interface.clone(),
            InterfaceState::new(&config.network.sysfs_root),
        )),
    ];

    if config.bluetooth.enabled {
        probes.push(Arc::new(BluetoothProbe::new(
            bluetooth,
            config.bluetooth.sink_match.clone(),
        )));
    }
    if config.camera.enabled {
        probes.push(Arc::new(CameraReachabilityProbe::new(&config.camera)?));
    }

    probes.push(Arc::new(ResourceProbe::new(
        Arc::new(SysinfoSampler::new(config.resources.disk_path.clone())),
        config.resources.clone(),
    )));
    Ok(probes)
}

/// Wire probes, platform clients and the recovery engine into a monitor.
///
/// Returns the monitor and a handle on the status it publishes.
pub fn build_monitor(config: &WatchdogConfig) -> Result<(HealthMonitor, StatusPublisher)> {
    let clock = system_clock();
    let runner: Arc<dyn CommandRunner> = Arc::new(TokioCommandRunner);

    let bluetooth = Arc::new(BluezControl::new(
        runner.clone(),
        config.bluetooth.clone(),
        FIX_COMMAND_TIMEOUT,
    ));

    let mut executor = SystemFixExecutor::new(
        Arc::new(Systemctl::new(runner.clone(), FIX_COMMAND_TIMEOUT)),
        Arc::new(HostNetwork::new(
            runner.clone(),
            &config.network.manager_unit,
            FIX_COMMAND_TIMEOUT,
        )),
        bluetooth.clone(),
        Arc::new(HostPower::new(
            runner.clone(),
            config.reboot_marker_path(),
            FIX_COMMAND_TIMEOUT,
        )),
        FixTargets {
            service_unit: config.service_unit.clone(),
            interface: config.network.interface.clone(),
            stream_port: config.camera.port,
        },
    );
    if config.camera.enabled {
        let url = format!(
            "{}{}",
            config.app_url.trim_end_matches('/'),
            config.camera.refresh_endpoint
        );
        executor = executor
            .with_camera_refresher(Arc::new(HttpCameraRefresher::new(url, config.probe_timeout())?));
    }

    let probes = build_probes(config, runner, bluetooth)?;

    let reboot_guard = RebootGuard::load(
        config.reboot_rate_limit_per_hour,
        clock.clone(),
        config.reboot_window_path(),
    );
    let engine = RecoveryEngine::new(
        RecoverySettings::from_config(config),
        Arc::new(executor),
        reboot_guard,
        FixHistory::from_config(&config.history),
        clock.clone(),
    );

    let publisher = StatusPublisher::new(
        config.service_unit.clone(),
        config.check_interval,
        config.max_failures,
    );
    let monitor = HealthMonitor::new(
        MonitorSettings::from_config(config),
        config.max_failures,
        probes,
        engine,
        publisher.clone(),
        clock,
    );
    Ok((monitor, publisher))
}
