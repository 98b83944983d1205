use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Health check families known to the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    /// Init-system unit is active and the local health endpoint answers
    Service,
    /// HTTP responsiveness of the supervised application
    App,
    /// Outbound reachability and primary interface state
    Network,
    /// Audio sink connected over Bluetooth
    Bluetooth,
    /// Live stream reachable on the externally visible address
    Camera,
    /// CPU, memory, disk and temperature pressure
    Resources,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 6] = [
        ProbeKind::Service,
        ProbeKind::App,
        ProbeKind::Network,
        ProbeKind::Bluetooth,
        ProbeKind::Camera,
        ProbeKind::Resources,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Service => "service",
            ProbeKind::App => "app",
            ProbeKind::Network => "network",
            ProbeKind::Bluetooth => "bluetooth",
            ProbeKind::Camera => "camera",
            ProbeKind::Resources => "resources",
        }
    }

    /// Failures of these probes mean the hub is unusable as a whole
    pub fn is_critical(&self) -> bool {
        matches!(self, ProbeKind::Service | ProbeKind::Network)
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single probe invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub kind: ProbeKind,
    pub passed: bool,
    /// Free-form diagnostics (current readings, which sub-check failed, warnings)
    pub detail: Value,
    pub duration_ms: u64,
}

impl ProbeResult {
    pub fn pass(kind: ProbeKind, detail: Value) -> Self {
        Self {
            kind,
            passed: true,
            detail,
            duration_ms: 0,
        }
    }

    pub fn fail(kind: ProbeKind, detail: Value) -> Self {
        Self {
            kind,
            passed: false,
            detail,
            duration_ms: 0,
        }
    }

    /// A probe that timed out or returned an error
    pub fn error(kind: ProbeKind, cause: impl fmt::Display) -> Self {
        Self::fail(kind, json!({ "error": format!("probe error: {cause}") }))
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Warnings reported in the detail payload, if any
    pub fn warnings(&self) -> Vec<String> {
        self.detail
            .get("warnings")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|w| w.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Immutable record of one monitoring cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub results: BTreeMap<ProbeKind, ProbeResult>,
}

impl HealthSnapshot {
    /// Build a snapshot holding exactly one result per registered probe.
    ///
    /// Results for unregistered probes are dropped, duplicates keep the first
    /// entry, and a registered probe without a result is recorded as failed.
    pub fn assemble(
        timestamp: DateTime<Utc>,
        registered: &[ProbeKind],
        results: impl IntoIterator<Item = ProbeResult>,
    ) -> Self {
        let mut collected: BTreeMap<ProbeKind, ProbeResult> = BTreeMap::new();
        for result in results {
            if registered.contains(&result.kind) {
                collected.entry(result.kind).or_insert(result);
            }
        }
        for kind in registered {
            collected
                .entry(*kind)
                .or_insert_with(|| ProbeResult::error(*kind, "no result recorded"));
        }
        Self {
            timestamp,
            results: collected,
        }
    }

    pub fn get(&self, kind: ProbeKind) -> Option<&ProbeResult> {
        self.results.get(&kind)
    }

    pub fn passed(&self, kind: ProbeKind) -> Option<bool> {
        self.results.get(&kind).map(|r| r.passed)
    }

    pub fn all_passed(&self) -> bool {
        self.results.values().all(|r| r.passed)
    }

    pub fn failing(&self) -> Vec<ProbeKind> {
        self.results
            .values()
            .filter(|r| !r.passed)
            .map(|r| r.kind)
            .collect()
    }

    /// All warnings across probes, prefixed by probe name
    pub fn warnings(&self) -> Vec<String> {
        self.results
            .values()
            .flat_map(|r| r.warnings().into_iter().map(move |w| format!("{}: {}", r.kind, w)))
            .collect()
    }

    /// Numeric reading from a probe's detail payload
    pub fn reading(&self, kind: ProbeKind, key: &str) -> Option<f64> {
        self.get(kind)
            .and_then(|r| r.detail.get(key))
            .and_then(Value::as_f64)
    }
}
