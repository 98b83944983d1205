#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use homepi::clock::ManualClock;
use homepi::config::{CameraConfig, WatchdogConfig};
use homepi::domain::{FixAttempt, FixKind, FixOutcome, ProbeKind, ProbeResult};
use homepi::error::{Result, WatchdogError};
use homepi::probes::{Probe, SharedProbe};
use homepi::services::StatusPublisher;
use homepi::supervisor::{
    FixHistory, HealthMonitor, MonitorSettings, RebootGuard, RecoveryEngine, RecoverySettings,
};
use homepi::system::FixExecutor;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Probe whose answer the test flips at will
pub struct FakeProbe {
    kind: ProbeKind,
    passing: AtomicBool,
    checks: AtomicUsize,
}

impl FakeProbe {
    pub fn new(kind: ProbeKind, passing: bool) -> Arc<Self> {
        Arc::new(Self {
            kind,
            passing: AtomicBool::new(passing),
            checks: AtomicUsize::new(0),
        })
    }

    pub fn set_passing(&self, passing: bool) {
        self.passing.store(passing, Ordering::SeqCst);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for FakeProbe {
    fn kind(&self) -> ProbeKind {
        self.kind
    }

    async fn check(&self) -> Result<ProbeResult> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(if self.passing.load(Ordering::SeqCst) {
            ProbeResult::pass(self.kind, json!({}))
        } else {
            ProbeResult::fail(self.kind, json!({ "reason": "scripted failure" }))
        })
    }
}

/// Records every fix it is asked to apply.
///
/// A fix can be wired to heal a probe, or scripted to fail.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<FixKind>>,
    heals: Mutex<HashMap<FixKind, Arc<FakeProbe>>>,
    failing: Mutex<Vec<FixKind>>,
}

impl RecordingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn heal_on(&self, kind: FixKind, probe: Arc<FakeProbe>) {
        self.heals.lock().unwrap().insert(kind, probe);
    }

    pub fn fail_on(&self, kind: FixKind) {
        self.failing.lock().unwrap().push(kind);
    }

    pub fn calls(&self) -> Vec<FixKind> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FixExecutor for RecordingExecutor {
    async fn apply(&self, kind: FixKind) -> Result<FixOutcome> {
        self.calls.lock().unwrap().push(kind);
        if self.failing.lock().unwrap().contains(&kind) {
            return Err(WatchdogError::remediation(kind.as_str(), "exit status 1"));
        }
        if let Some(probe) = self.heals.lock().unwrap().get(&kind) {
            probe.set_passing(true);
        }
        Ok(FixOutcome::Succeeded)
    }
}

/// Defaults with the settle delays removed so tests do not sleep
pub fn test_config() -> WatchdogConfig {
    WatchdogConfig {
        restart_grace: 0,
        camera: CameraConfig {
            refresh_settle: 0,
            ..CameraConfig::default()
        },
        ..WatchdogConfig::default()
    }
}

/// A monitor over fake probes, driven one cycle at a time
pub struct Harness {
    pub monitor: HealthMonitor,
    pub publisher: StatusPublisher,
    pub clock: ManualClock,
    interval_secs: i64,
}

impl Harness {
    pub fn new(config: &WatchdogConfig, probes: Vec<SharedProbe>, executor: Arc<dyn FixExecutor>) -> Self {
        Self::with_reboots(config, probes, executor, Vec::new(), ManualClock::starting_now())
    }

    /// Harness whose reboot window already holds `reboots`
    pub fn with_reboots(
        config: &WatchdogConfig,
        probes: Vec<SharedProbe>,
        executor: Arc<dyn FixExecutor>,
        reboots: Vec<DateTime<Utc>>,
        clock: ManualClock,
    ) -> Self {
        let shared = Arc::new(clock.clone());
        let guard = RebootGuard::new(config.reboot_rate_limit_per_hour, shared.clone()).with_history(reboots);
        let engine = RecoveryEngine::new(
            RecoverySettings::from_config(config),
            executor,
            guard,
            FixHistory::in_memory(config.history.memory_entries),
            shared.clone(),
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
            shared,
        );
        Self {
            monitor,
            publisher,
            clock,
            interval_secs: config.check_interval as i64,
        }
    }

    /// Run one cycle, then move the clock on by one interval
    pub async fn cycle(&mut self) -> homepi::domain::HealthSnapshot {
        let snapshot = self.monitor.run_cycle().await;
        self.clock.advance_secs(self.interval_secs);
        snapshot
    }

    pub async fn cycles(&mut self, n: usize) {
        for _ in 0..n {
            self.cycle().await;
        }
    }

    pub fn history(&self) -> Vec<FixAttempt> {
        self.monitor.engine().history().recent(usize::MAX)
    }
}
