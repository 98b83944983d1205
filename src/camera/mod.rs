//! Camera freshness guard
//!
//! Runs inside the supervised service. Tracks the age of the last captured frame
//! and rebuilds the capture pipeline in place when frames go stale.

pub mod freshness;
pub mod server;

pub use freshness::{CameraFreshnessGuard, CameraFreshnessState, CapturePipeline, FreshnessConfig};
pub use server::{camera_router, freshness_gate, gate_stream, CameraStatus};

use serde::{Deserialize, Serialize};

/// Body of a manual refresh request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshRequest {
    /// Ignore the cooldown
    pub force: bool,
    pub reason: Option<String>,
}

/// Why a refresh did not happen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Cooldown,
    NotStale,
}

/// Result of a refresh request or staleness check
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub performed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<SkipReason>,
    /// Pipeline error when the refresh was attempted but failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Frame age in seconds at the time of the request
    #[serde(default)]
    pub frame_age: Option<f64>,
}

impl RefreshReport {
    pub fn skipped(reason: SkipReason, frame_age: Option<f64>) -> Self {
        Self {
            performed: false,
            skipped_reason: Some(reason),
            error: None,
            frame_age,
        }
    }
}
