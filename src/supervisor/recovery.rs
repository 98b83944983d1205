//! Recovery Engine
//!
//! Maps failing probes to an ordered ladder of fixes, applies them under
//! per-fix cooldowns, re-verifies, and escalates to a rate-limited reboot.

use super::cooldown::CooldownTracker;
use super::history::FixHistory;
use super::monitor::WatchdogEvent;
use super::reboot_guard::{RebootDecision, RebootGuard};
use crate::clock::SharedClock;
use crate::config::{CameraFixMethod, WatchdogConfig};
use crate::domain::{FixAttempt, FixKind, FixOutcome, ProbeKind};
use crate::probes::{run_probe, Probe};
use crate::system::FixExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// One rung of a remediation ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LadderStep {
    pub kind: FixKind,
    /// Re-probe after this step and stop the ladder on success
    pub verify: bool,
}

impl LadderStep {
    fn verified(kind: FixKind) -> Self {
        Self { kind, verify: true }
    }

    fn chained(kind: FixKind) -> Self {
        Self { kind, verify: false }
    }
}

/// Knobs the engine reads from configuration
#[derive(Debug, Clone)]
pub struct RecoverySettings {
    pub fix_cooldown: Duration,
    pub restart_grace: Duration,
    /// Capture warm-up after an in-process camera refresh
    pub camera_settle: Duration,
    pub probe_timeout: Duration,
    pub enable_service_restart: bool,
    pub enable_network_fix: bool,
    pub enable_bluetooth_fix: bool,
    pub enable_camera_fix: bool,
    pub enable_system_reboot: bool,
    pub camera_methods: Vec<CameraFixMethod>,
}

impl RecoverySettings {
    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self {
            fix_cooldown: config.fix_cooldown(),
            restart_grace: config.restart_grace(),
            camera_settle: Duration::from_secs(config.camera.refresh_settle),
            probe_timeout: config.probe_timeout(),
            enable_service_restart: config.enable_service_restart,
            enable_network_fix: config.enable_network_fix,
            enable_bluetooth_fix: config.enable_bluetooth_fix,
            enable_camera_fix: config.enable_camera_fix,
            enable_system_reboot: config.enable_system_reboot,
            camera_methods: config.camera.fix_methods.clone(),
        }
    }

    /// Wait before re-probing after `kind`
    fn settle_after(&self, kind: FixKind) -> Duration {
        match kind {
            FixKind::ServiceRestart => self.restart_grace,
            FixKind::CameraRefresh => self.camera_settle,
            _ => Duration::ZERO,
        }
    }

    fn enabled(&self, kind: FixKind) -> bool {
        match kind {
            FixKind::ServiceRestart => self.enable_service_restart,
            FixKind::NetworkRestart | FixKind::NetworkInterfaceBounce => self.enable_network_fix,
            FixKind::BluetoothRestart | FixKind::BluetoothReconnect => self.enable_bluetooth_fix,
            FixKind::CameraRefresh | FixKind::FirewallRuleInsert => self.enable_camera_fix,
            FixKind::FullReboot => self.enable_system_reboot,
        }
    }
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self::from_config(&WatchdogConfig::default())
    }
}

/// Ordered fixes for a probe, with disabled fixes removed
pub fn ladder_for(probe: ProbeKind, settings: &RecoverySettings) -> Vec<LadderStep> {
    let steps = match probe {
        ProbeKind::Service | ProbeKind::App => vec![LadderStep::verified(FixKind::ServiceRestart)],
        ProbeKind::Network => vec![
            LadderStep::chained(FixKind::NetworkRestart),
            LadderStep::verified(FixKind::NetworkInterfaceBounce),
        ],
        ProbeKind::Bluetooth => vec![
            LadderStep::chained(FixKind::BluetoothRestart),
            LadderStep::verified(FixKind::BluetoothReconnect),
        ],
        ProbeKind::Camera => {
            if !settings.enable_camera_fix {
                return Vec::new();
            }
            // Camera rungs are gated by the camera flag alone
            return settings
                .camera_methods
                .iter()
                .map(|method| match method {
                    CameraFixMethod::Refresh => FixKind::CameraRefresh,
                    CameraFixMethod::RestartService => FixKind::ServiceRestart,
                    CameraFixMethod::Firewall => FixKind::FirewallRuleInsert,
                    CameraFixMethod::NetworkBounce => FixKind::NetworkInterfaceBounce,
                })
                .map(LadderStep::verified)
                .collect();
        }
        ProbeKind::Resources => Vec::new(),
    };
    steps
        .into_iter()
        .filter(|step| settings.enabled(step.kind))
        .collect()
}

/// What one remediation pass did
#[derive(Debug, Clone, Default)]
pub struct RemediationReport {
    pub attempts: Vec<FixAttempt>,
    /// A verified step saw the probe pass again
    pub recovered: bool,
}

impl RemediationReport {
    pub fn performed(&self) -> usize {
        self.attempts.iter().filter(|a| !a.outcome.is_skipped()).count()
    }
}

pub struct RecoveryEngine {
    settings: RecoverySettings,
    executor: Arc<dyn FixExecutor>,
    cooldowns: CooldownTracker,
    reboot_guard: RebootGuard,
    history: FixHistory,
    clock: SharedClock,
    events: broadcast::Sender<WatchdogEvent>,
}

impl RecoveryEngine {
    pub fn new(
        settings: RecoverySettings,
        executor: Arc<dyn FixExecutor>,
        reboot_guard: RebootGuard,
        history: FixHistory,
        clock: SharedClock,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            cooldowns: CooldownTracker::new(settings.fix_cooldown, clock.clone()),
            settings,
            executor,
            reboot_guard,
            history,
            clock,
            events,
        }
    }

    /// Share the monitor's event channel
    pub fn with_events(mut self, events: broadcast::Sender<WatchdogEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn settings(&self) -> &RecoverySettings {
        &self.settings
    }

    pub fn history(&self) -> &FixHistory {
        &self.history
    }

    async fn record(&mut self, attempt: FixAttempt, report: &mut RemediationReport) {
        match &attempt.outcome {
            FixOutcome::Succeeded => info!(
                probe = %attempt.probe,
                fix = %attempt.kind,
                verified = ?attempt.verified,
                "Fix applied"
            ),
            FixOutcome::Failed { reason } => {
                error!(probe = %attempt.probe, fix = %attempt.kind, %reason, "Fix failed")
            }
            FixOutcome::Skipped { reason } => {
                debug!(probe = %attempt.probe, fix = %attempt.kind, %reason, "Fix skipped")
            }
        }
        let _ = self.events.send(WatchdogEvent::FixApplied {
            attempt: attempt.clone(),
        });
        self.history.record(attempt.clone()).await;
        report.attempts.push(attempt);
    }

    /// Walk the ladder for `probe`, stopping at the first verified recovery.
    ///
    /// A failing action does not abort the ladder; the next rung runs.
    pub async fn remediate(&mut self, probe: &dyn Probe) -> RemediationReport {
        let kind = probe.kind();
        let ladder = ladder_for(kind, &self.settings);
        let mut report = RemediationReport::default();

        if ladder.is_empty() {
            if kind == ProbeKind::Resources {
                warn!(probe = %kind, "Resource pressure persists; no automatic fix is attempted");
            } else {
                warn!(probe = %kind, "No enabled fixes for failing probe");
            }
            return report;
        }

        info!(probe = %kind, steps = ladder.len(), "Starting remediation ladder");
        for step in ladder {
            let remaining = self.cooldowns.remaining(step.kind);
            if !remaining.is_zero() {
                let attempt = FixAttempt::new(
                    kind,
                    step.kind,
                    self.clock.now(),
                    FixOutcome::skipped(format!("cooldown, {}s remaining", remaining.as_secs())),
                );
                self.record(attempt, &mut report).await;
                continue;
            }

            self.cooldowns.record(step.kind);
            let outcome = match self.executor.apply(step.kind).await {
                Ok(outcome) => outcome,
                Err(e) => FixOutcome::failed(e.to_string()),
            };
            let mut attempt = FixAttempt::new(kind, step.kind, self.clock.now(), outcome);

            if step.verify && !attempt.outcome.is_skipped() {
                let settle = self.settings.settle_after(step.kind);
                if !settle.is_zero() {
                    tokio::time::sleep(settle).await;
                }
                let result = run_probe(probe, self.settings.probe_timeout).await;
                let passed = result.passed;
                attempt = attempt.with_verification(passed, result.detail);
                self.record(attempt, &mut report).await;
                if passed {
                    info!(probe = %kind, fix = %step.kind, "Probe recovered after fix");
                    report.recovered = true;
                    break;
                }
            } else {
                self.record(attempt, &mut report).await;
            }
        }

        if !report.recovered {
            warn!(probe = %kind, attempts = report.attempts.len(), "Remediation ladder exhausted");
        }
        report
    }

    /// Last resort for a critical probe that stayed down after its ladder
    pub async fn request_reboot(&mut self, probe: ProbeKind) -> FixAttempt {
        let now = self.clock.now();
        let attempt = match self.reboot_guard.try_acquire().await {
            RebootDecision::RateLimited { recent, limit } => {
                let _ = self.events.send(WatchdogEvent::RebootSkipped { probe, recent });
                FixAttempt::new(
                    probe,
                    FixKind::FullReboot,
                    now,
                    FixOutcome::skipped(format!(
                        "skipped, rate-limited ({recent} reboots in the last hour, limit {limit})"
                    )),
                )
            }
            RebootDecision::Allowed => {
                warn!(probe = %probe, "Requesting full system reboot");
                let _ = self.events.send(WatchdogEvent::RebootRequested { probe });
                let outcome = match self.executor.apply(FixKind::FullReboot).await {
                    Ok(outcome) => outcome,
                    Err(e) => FixOutcome::failed(e.to_string()),
                };
                FixAttempt::new(probe, FixKind::FullReboot, now, outcome)
            }
        };
        let mut report = RemediationReport::default();
        self.record(attempt.clone(), &mut report).await;
        attempt
    }

    /// Probe still failing `max_failures` cycles after its ladder ran
    pub async fn escalate(&mut self, probe: &dyn Probe) -> RemediationReport {
        let kind = probe.kind();
        if kind.is_critical() && self.settings.enable_system_reboot {
            let attempt = self.request_reboot(kind).await;
            return RemediationReport {
                attempts: vec![attempt],
                recovered: false,
            };
        }
        debug!(probe = %kind, "Persisting failure without reboot escalation, re-running ladder");
        self.remediate(probe).await
    }
}
