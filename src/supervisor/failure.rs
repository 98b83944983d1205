use crate::domain::ProbeKind;
use serde::Serialize;
use std::collections::BTreeMap;

/// Consecutive-failure bookkeeping for one probe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailureState {
    pub consecutive: u32,
    /// Counter value when the last remediation left the probe still failing
    pub exhausted_at: Option<u32>,
}

/// What the monitor should do about a probe this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Below threshold, or waiting out the post-remediation window
    Hold,
    /// Threshold reached for the first time: run the ladder
    Remediate,
    /// Still failing `max_failures` cycles after the ladder was exhausted
    Persisting,
}

/// Per-probe consecutive failure counters.
///
/// Owned by the monitor task; every mutation happens on that task.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    max_failures: u32,
    states: BTreeMap<ProbeKind, FailureState>,
}

impl FailureTracker {
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures: max_failures.max(1),
            states: BTreeMap::new(),
        }
    }

    pub fn max_failures(&self) -> u32 {
        self.max_failures
    }

    /// Fold one cycle's result in. Returns the updated consecutive count.
    pub fn record(&mut self, probe: ProbeKind, passed: bool) -> u32 {
        let state = self.states.entry(probe).or_default();
        if passed {
            *state = FailureState::default();
        } else {
            state.consecutive = state.consecutive.saturating_add(1);
        }
        state.consecutive
    }

    pub fn escalation(&self, probe: ProbeKind) -> Escalation {
        let Some(state) = self.states.get(&probe) else {
            return Escalation::Hold;
        };
        match state.exhausted_at {
            None if state.consecutive >= self.max_failures => Escalation::Remediate,
            Some(at) if state.consecutive.saturating_sub(at) >= self.max_failures => {
                Escalation::Persisting
            }
            _ => Escalation::Hold,
        }
    }

    /// Remediation ran and the probe is still failing; restart the window
    pub fn mark_exhausted(&mut self, probe: ProbeKind) {
        let state = self.states.entry(probe).or_default();
        state.exhausted_at = Some(state.consecutive);
    }

    /// A fix was verified; the probe starts from a clean slate
    pub fn reset(&mut self, probe: ProbeKind) {
        self.states.insert(probe, FailureState::default());
    }

    pub fn state(&self, probe: ProbeKind) -> FailureState {
        self.states.get(&probe).copied().unwrap_or_default()
    }

    pub fn consecutive(&self, probe: ProbeKind) -> u32 {
        self.state(probe).consecutive
    }

    pub fn all(&self) -> &BTreeMap<ProbeKind, FailureState> {
        &self.states
    }
}
