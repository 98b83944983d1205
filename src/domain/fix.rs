use super::ProbeKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Remediation actions the watchdog can apply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixKind {
    /// Restart the supervised service unit
    ServiceRestart,
    /// Restart the host networking subsystem
    NetworkRestart,
    /// Toggle the primary interface down and up
    NetworkInterfaceBounce,
    /// Restart the Bluetooth daemon and power-cycle adapters
    BluetoothRestart,
    /// Reconnect the known audio device
    BluetoothReconnect,
    /// Ask the supervised process to reinitialize its capture pipeline
    CameraRefresh,
    /// Allow inbound traffic to the stream port
    FirewallRuleInsert,
    /// Reboot the whole host
    FullReboot,
}

impl FixKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixKind::ServiceRestart => "service-restart",
            FixKind::NetworkRestart => "network-restart",
            FixKind::NetworkInterfaceBounce => "network-interface-bounce",
            FixKind::BluetoothRestart => "bluetooth-restart",
            FixKind::BluetoothReconnect => "bluetooth-reconnect",
            FixKind::CameraRefresh => "camera-refresh",
            FixKind::FirewallRuleInsert => "firewall-rule-insert",
            FixKind::FullReboot => "full-reboot",
        }
    }
}

impl fmt::Display for FixKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a remediation action ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FixOutcome {
    Succeeded,
    Failed { reason: String },
    /// Not executed: cooldown, rate limit, or unavailable
    Skipped { reason: String },
}

impl FixOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        FixOutcome::Failed {
            reason: reason.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        FixOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FixOutcome::Succeeded)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, FixOutcome::Skipped { .. })
    }
}

/// One remediation action, recorded after it ran (or was skipped)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub id: Uuid,
    pub probe: ProbeKind,
    pub kind: FixKind,
    pub timestamp: DateTime<Utc>,
    pub outcome: FixOutcome,
    /// Re-probe result after the action; `None` when no re-probe followed
    pub verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_detail: Option<Value>,
}

impl FixAttempt {
    pub fn new(probe: ProbeKind, kind: FixKind, timestamp: DateTime<Utc>, outcome: FixOutcome) -> Self {
        Self {
            id: Uuid::new_v4(),
            probe,
            kind,
            timestamp,
            outcome,
            verified: None,
            verification_detail: None,
        }
    }

    pub fn with_verification(mut self, passed: bool, detail: Value) -> Self {
        self.verified = Some(passed);
        self.verification_detail = Some(detail);
        self
    }
}
