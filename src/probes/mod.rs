//! Health probes
//!
//! Every probe answers one question about the host and returns a
//! [`ProbeResult`]. Probes never decide what to do about a failure.

pub mod bluetooth;
pub mod camera;
pub mod network;
pub mod process;
pub mod resources;

pub use bluetooth::BluetoothProbe;
pub use camera::CameraReachabilityProbe;
pub use network::NetworkProbe;
pub use process::{AppProbe, HttpHealthCheck, ProcessProbe};
pub use resources::{ResourceProbe, ResourceSample, ResourceSampler, SysinfoSampler};

use crate::domain::{ProbeKind, ProbeResult};
use crate::error::Result;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> ProbeKind;

    /// Run the check once. An `Err` is recorded as a failing result.
    async fn check(&self) -> Result<ProbeResult>;
}

pub type SharedProbe = Arc<dyn Probe>;

/// Run a probe under a deadline; timeouts, errors and panics become failing
/// results
pub async fn run_probe(probe: &dyn Probe, timeout: Duration) -> ProbeResult {
    let kind = probe.kind();
    let started = Instant::now();

    let checked = AssertUnwindSafe(probe.check()).catch_unwind();
    let result = match tokio::time::timeout(timeout, checked).await {
        Ok(Err(panic)) => {
            let message = panic_message(panic.as_ref());
            warn!(probe = %kind, panic = %message, "Probe panicked");
            ProbeResult::error(kind, "panicked")
        }
        Ok(Ok(Ok(result))) if result.kind == kind => result,
        Ok(Ok(Ok(result))) => {
            warn!(probe = %kind, reported = %result.kind, "Probe reported a foreign result");
            ProbeResult::error(kind, format!("probe returned a {} result", result.kind))
        }
        Ok(Ok(Err(e))) => {
            warn!(probe = %kind, error = %e, "Probe errored");
            ProbeResult::error(kind, e)
        }
        Err(_) => {
            warn!(probe = %kind, timeout_secs = timeout.as_secs(), "Probe timed out");
            ProbeResult::error(kind, format!("timed out after {}s", timeout.as_secs()))
        }
    };

    let elapsed = started.elapsed();
    debug!(probe = %kind, passed = result.passed, elapsed_ms = elapsed.as_millis() as u64, "Probe finished");
    result.with_duration_ms(elapsed.as_millis() as u64)
}

/// Owned variant of [`run_probe`] for futures that outlive the probe list
pub async fn run_shared_probe(probe: SharedProbe, timeout: Duration) -> ProbeResult {
    run_probe(probe.as_ref(), timeout).await
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
