use super::{RefreshReport, RefreshRequest, SkipReason};
use crate::clock::SharedClock;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// The capture device and its frame loop
#[async_trait]
pub trait CapturePipeline: Send + Sync {
    /// Tear down and rebuild the capture pipeline
    async fn reinitialize(&self) -> Result<()>;
}

/// Configuration for the freshness guard
#[derive(Debug, Clone)]
pub struct FreshnessConfig {
    /// Frames older than this are stale (default: 1.5s)
    pub stale_after: Duration,
    /// Minimum spacing between refreshes (default: 60s)
    pub cooldown: Duration,
    /// Period of the background check (default: 60s)
    pub check_interval: Duration,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_millis(1500),
            cooldown: Duration::from_secs(60),
            check_interval: Duration::from_secs(60),
        }
    }
}

/// Freshness bookkeeping owned by the supervised process
#[derive(Debug, Clone, Default, Serialize)]
pub struct CameraFreshnessState {
    pub last_frame_timestamp: Option<DateTime<Utc>>,
    pub refresh_cooldown_until: Option<DateTime<Utc>>,
    pub last_refresh: Option<DateTime<Utc>>,
    pub refresh_count: u64,
    pub last_error: Option<String>,
}

pub struct CameraFreshnessGuard {
    config: FreshnessConfig,
    clock: SharedClock,
    pipeline: Arc<dyn CapturePipeline>,
    state: Mutex<CameraFreshnessState>,
    // Held across reinitialize so concurrent callers cannot double-refresh
    refresh_lock: tokio::sync::Mutex<()>,
}

impl CameraFreshnessGuard {
    pub fn new(config: FreshnessConfig, clock: SharedClock, pipeline: Arc<dyn CapturePipeline>) -> Self {
        Self {
            config,
            clock,
            pipeline,
            state: Mutex::new(CameraFreshnessState::default()),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CameraFreshnessState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Called by the capture loop for every frame
    pub fn record_frame(&self) {
        self.lock().last_frame_timestamp = Some(self.clock.now());
    }

    pub fn state(&self) -> CameraFreshnessState {
        self.lock().clone()
    }

    /// Age of the newest frame; `None` before the first frame
    pub fn frame_age(&self) -> Option<Duration> {
        let last = self.lock().last_frame_timestamp?;
        Some((self.clock.now() - last).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn frame_age_secs(&self) -> Option<f64> {
        self.frame_age().map(|age| age.as_secs_f64())
    }

    /// A pipeline that never produced a frame counts as stale
    pub fn is_stale(&self) -> bool {
        match self.frame_age() {
            Some(age) => age > self.config.stale_after,
            None => true,
        }
    }

    pub fn cooldown_remaining(&self) -> Duration {
        let now = self.clock.now();
        match self.lock().refresh_cooldown_until {
            Some(until) if until > now => (until - now).to_std().unwrap_or(Duration::ZERO),
            _ => Duration::ZERO,
        }
    }

    /// Staleness check used by the periodic task and the stream gate.
    /// Refreshes only when frames are stale and the cooldown has elapsed.
    pub async fn check(&self) -> RefreshReport {
        if !self.is_stale() {
            return RefreshReport::skipped(SkipReason::NotStale, self.frame_age_secs());
        }
        self.refresh_inner(false, "stale frames").await
    }

    /// Manual refresh: runs regardless of staleness, cooldown applies unless forced
    pub async fn refresh(&self, request: RefreshRequest) -> RefreshReport {
        let reason = request.reason.as_deref().unwrap_or("manual request");
        self.refresh_inner(request.force, reason).await
    }

    async fn refresh_inner(&self, force: bool, reason: &str) -> RefreshReport {
        let _serialized = self.refresh_lock.lock().await;
        let frame_age = self.frame_age_secs();

        {
            let now = self.clock.now();
            let mut state = self.lock();
            if let Some(until) = state.refresh_cooldown_until {
                if now < until && !force {
                    debug!(reason, "Camera refresh skipped, cooldown active");
                    return RefreshReport::skipped(SkipReason::Cooldown, frame_age);
                }
            }
            // Set before the attempt so a failing refresh is spaced out as well
            state.refresh_cooldown_until = Some(now + chrono::Duration::from_std(self.config.cooldown).unwrap_or_default());
            state.last_refresh = Some(now);
            state.refresh_count += 1;
        }

        info!(reason, force, frame_age = ?frame_age, "Reinitializing camera pipeline");
        let error = match self.pipeline.reinitialize().await {
            Ok(()) => None,
            Err(e) => {
                error!(error = %e, "Camera pipeline reinitialization failed");
                Some(e.to_string())
            }
        };
        self.lock().last_error = error.clone();

        RefreshReport {
            performed: true,
            skipped_reason: None,
            error,
            frame_age,
        }
    }

    /// Spawn the background staleness check
    pub fn spawn_periodic_check(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; give the camera one period to warm up
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let report = self.check().await;
                if report.performed {
                    warn!(frame_age = ?report.frame_age, "Periodic check refreshed stale camera");
                }
            }
        })
    }
}
