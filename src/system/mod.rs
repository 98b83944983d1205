//! Platform primitives
//!
//! Thin clients over the init system, network stack, Bluetooth stack and power
//! management. Remediation code only sees the traits, so tests swap in fakes.

pub mod bluetooth;
pub mod camera;
pub mod command;
pub mod executor;
pub mod network;
pub mod power;
pub mod systemd;

pub use bluetooth::{AudioSink, BluetoothControl, BluezControl};
pub use camera::{CameraRefresher, HttpCameraRefresher};
pub use command::{CommandOutput, CommandRunner, SystemCommand, TokioCommandRunner};
pub use executor::{FixExecutor, FixTargets, SystemFixExecutor};
pub use network::{HostNetwork, InterfaceState, NetworkControl};
pub use power::{HostPower, PowerControl};
pub use systemd::{ServiceManager, Systemctl};
