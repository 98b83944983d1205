//! Health Monitor
//!
//! Runs every probe on a fixed period, folds the results into the failure
//! counters, and hands probes that crossed the threshold to the recovery
//! engine. The monitor task is the only writer of that state.

use super::failure::{Escalation, FailureTracker};
use super::recovery::{RecoveryEngine, RemediationReport};
use crate::clock::SharedClock;
use crate::config::WatchdogConfig;
use crate::domain::{FixAttempt, HealthSnapshot, ProbeKind, ProbeResult};
use crate::error::Result;
use crate::probes::{run_shared_probe, SharedProbe};
use crate::services::StatusPublisher;
use crate::system::power::take_marker;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Event emitted by the monitor and the recovery engine
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchdogEvent {
    CycleCompleted {
        timestamp: DateTime<Utc>,
        failing: Vec<ProbeKind>,
    },
    ProbeFailing {
        probe: ProbeKind,
        consecutive: u32,
    },
    ProbeRecovered {
        probe: ProbeKind,
    },
    /// Any recorded fix attempt, including skipped ones
    FixApplied {
        attempt: FixAttempt,
    },
    RebootRequested {
        probe: ProbeKind,
    },
    RebootSkipped {
        probe: ProbeKind,
        recent: usize,
    },
}

/// Configuration for the monitor loop
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    /// Period between cycles (default: 30s)
    pub check_interval: Duration,
    /// Deadline for a single probe (default: 10s)
    pub probe_timeout: Duration,
    /// Deadline for a whole cycle; never longer than the interval
    pub cycle_deadline: Duration,
    /// Probes run at once
    pub concurrency: usize,
    /// Fix history entries handed to the status publisher
    pub recent_fixes: usize,
}

impl MonitorSettings {
    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self {
            check_interval: config.check_interval(),
            probe_timeout: config.probe_timeout(),
            cycle_deadline: config.check_interval(),
            concurrency: 4,
            recent_fixes: config.status.recent_fixes,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from_config(&WatchdogConfig::default())
    }
}

pub struct HealthMonitor {
    settings: MonitorSettings,
    probes: Vec<SharedProbe>,
    failures: FailureTracker,
    engine: RecoveryEngine,
    publisher: StatusPublisher,
    clock: SharedClock,
    events: broadcast::Sender<WatchdogEvent>,
    running: Arc<AtomicBool>,
    stop: Arc<Notify>,
}

impl HealthMonitor {
    pub fn new(
        settings: MonitorSettings,
        max_failures: u32,
        probes: Vec<SharedProbe>,
        engine: RecoveryEngine,
        publisher: StatusPublisher,
        clock: SharedClock,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            settings,
            probes,
            failures: FailureTracker::new(max_failures),
            engine: engine.with_events(events.clone()),
            publisher,
            clock,
            events,
            running: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(Notify::new()),
        }
    }

    /// Subscribe to watchdog events
    pub fn subscribe(&self) -> broadcast::Receiver<WatchdogEvent> {
        self.events.subscribe()
    }

    pub fn registered(&self) -> Vec<ProbeKind> {
        self.probes.iter().map(|p| p.kind()).collect()
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    pub fn engine(&self) -> &RecoveryEngine {
        &self.engine
    }

    fn probe(&self, kind: ProbeKind) -> Option<SharedProbe> {
        self.probes.iter().find(|p| p.kind() == kind).cloned()
    }

    /// Run every probe once, concurrently, under the cycle deadline.
    ///
    /// At most `concurrency` probes are in flight. Probes still running at the
    /// deadline are abandoned and recorded as failed.
    pub async fn collect(&self) -> HealthSnapshot {
        let started = self.clock.now();
        let timeout = self.settings.probe_timeout;

        let mut queue = self.probes.clone().into_iter();
        let mut pending = FuturesUnordered::new();
        for probe in queue.by_ref().take(self.settings.concurrency.max(1)) {
            pending.push(run_shared_probe(probe, timeout));
        }

        let deadline = tokio::time::sleep(self.settings.cycle_deadline);
        tokio::pin!(deadline);

        let mut results: Vec<ProbeResult> = Vec::with_capacity(self.probes.len());
        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some(result) => {
                        results.push(result);
                        if let Some(probe) = queue.next() {
                            pending.push(run_shared_probe(probe, timeout));
                        }
                    }
                    None => break,
                },
                _ = &mut deadline => {
                    warn!(
                        deadline_secs = self.settings.cycle_deadline.as_secs(),
                        completed = results.len(),
                        "Cycle deadline exceeded, abandoning in-flight probes"
                    );
                    break;
                }
            }
        }
        drop(pending);

        let registered = self.registered();
        for kind in &registered {
            if !results.iter().any(|r| r.kind == *kind) {
                results.push(ProbeResult::error(*kind, "cycle deadline exceeded"));
            }
        }
        HealthSnapshot::assemble(started, &registered, results)
    }

    /// One full cycle: probe, count, remediate, publish
    pub async fn run_cycle(&mut self) -> HealthSnapshot {
        let snapshot = self.collect().await;

        let mut escalations = Vec::new();
        for result in snapshot.results.values() {
            let kind = result.kind;
            let before = self.failures.consecutive(kind);
            let consecutive = self.failures.record(kind, result.passed);

            if result.passed {
                if before > 0 {
                    info!(probe = %kind, after = before, "Probe recovered");
                    let _ = self.events.send(WatchdogEvent::ProbeRecovered { probe: kind });
                }
            } else {
                warn!(
                    probe = %kind,
                    consecutive,
                    max_failures = self.failures.max_failures(),
                    detail = %result.detail,
                    "Probe failing"
                );
                let _ = self.events.send(WatchdogEvent::ProbeFailing {
                    probe: kind,
                    consecutive,
                });
            }

            match self.failures.escalation(kind) {
                Escalation::Hold => {}
                escalation => escalations.push((kind, escalation)),
            }
        }

        for (kind, escalation) in escalations {
            self.handle_escalation(kind, escalation).await;
        }

        self.publisher.publish(
            snapshot.clone(),
            self.engine.history().recent(self.settings.recent_fixes),
            self.failures.all().clone(),
        );
        let failing = snapshot.failing();
        debug!(failing = ?failing, "Cycle complete");
        let _ = self.events.send(WatchdogEvent::CycleCompleted {
            timestamp: snapshot.timestamp,
            failing,
        });
        snapshot
    }

    async fn handle_escalation(&mut self, kind: ProbeKind, escalation: Escalation) {
        let Some(probe) = self.probe(kind) else {
            return;
        };
        let report: RemediationReport = match escalation {
            Escalation::Remediate => self.engine.remediate(probe.as_ref()).await,
            Escalation::Persisting => self.engine.escalate(probe.as_ref()).await,
            Escalation::Hold => return,
        };
        if report.recovered {
            self.failures.reset(kind);
        } else {
            self.failures.mark_exhausted(kind);
        }
    }

    /// Startup check after a watchdog-initiated reboot.
    ///
    /// Consumes the marker, runs one cycle immediately, and repairs Bluetooth
    /// without waiting for the threshold. Returns whether a marker was found.
    pub async fn post_reboot_check(&mut self, marker: &Path) -> Result<bool> {
        let Some(reason) = take_marker(marker).await? else {
            return Ok(false);
        };
        info!(marker = %reason, "Watchdog started after its own reboot, running post-reboot check");

        let snapshot = self.run_cycle().await;
        if snapshot.passed(ProbeKind::Bluetooth) == Some(false) {
            if let Some(probe) = self.probe(ProbeKind::Bluetooth) {
                info!("Bluetooth down after reboot, repairing immediately");
                if self.engine.remediate(probe.as_ref()).await.recovered {
                    self.failures.reset(ProbeKind::Bluetooth);
                }
            }
        }
        Ok(true)
    }

    /// Start the monitor loop on its own task
    pub fn start(mut self) -> MonitorHandle {
        let running = self.running.clone();
        let stop = self.stop.clone();
        let events = self.events.clone();
        let publisher = self.publisher.clone();

        running.store(true, Ordering::SeqCst);
        publisher.set_running(true);
        info!(
            interval_secs = self.settings.check_interval.as_secs(),
            probes = ?self.registered(),
            "Health monitor started"
        );

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.settings.check_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while self.running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = self.stop.notified() => break,
                }
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                self.run_cycle().await;
            }

            self.publisher.set_running(false);
            info!("Health monitor stopped");
        });

        MonitorHandle {
            running,
            stop,
            events,
            join,
        }
    }
}

/// Control handle for a started monitor
pub struct MonitorHandle {
    running: Arc<AtomicBool>,
    stop: Arc<Notify>,
    events: broadcast::Sender<WatchdogEvent>,
    join: JoinHandle<()>,
}

impl MonitorHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<WatchdogEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the loop to stop after the current cycle
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.stop.notify_one();
    }

    pub async fn join(self) {
        let _ = self.join.await;
    }
}
