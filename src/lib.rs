pub mod camera;
pub mod cli;
pub mod clock;
pub mod config;
pub mod domain;
pub mod error;
pub mod logging;
pub mod probes;
pub mod services;
pub mod supervisor;
pub mod system;

pub use camera::{
    camera_router, gate_stream, CameraFreshnessGuard, CapturePipeline, FreshnessConfig,
    RefreshReport, RefreshRequest, SkipReason,
};
pub use clock::{system_clock, Clock, ManualClock, SharedClock, SystemClock};
pub use config::WatchdogConfig;
pub use domain::{FixAttempt, FixKind, FixOutcome, HealthSnapshot, ProbeKind, ProbeResult};
pub use error::{Result, WatchdogError};
pub use probes::{Probe, SharedProbe};
pub use services::{StatusPublisher, StatusServer};
pub use supervisor::{
    HealthMonitor, MonitorHandle, MonitorSettings, RebootGuard, RecoveryEngine, RecoverySettings,
    WatchdogEvent,
};
