//! Supervision and recovery
//!
//! - Monitor loop that runs probes and tracks consecutive failures
//! - Recovery engine with per-probe remediation ladders
//! - Cooldowns, reboot rate limiting and the fix history

pub mod cooldown;
pub mod failure;
pub mod history;
pub mod monitor;
pub mod reboot_guard;
pub mod recovery;

pub use cooldown::CooldownTracker;
pub use failure::{Escalation, FailureState, FailureTracker};
pub use history::{FixHistory, HistoryFile};
pub use monitor::{HealthMonitor, MonitorHandle, MonitorSettings, WatchdogEvent};
pub use reboot_guard::{RebootDecision, RebootGuard};
pub use recovery::{ladder_for, LadderStep, RecoveryEngine, RecoverySettings, RemediationReport};
