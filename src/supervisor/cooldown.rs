use crate::clock::SharedClock;
use crate::domain::FixKind;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Minimum spacing between repeated applications of the same fix
pub struct CooldownTracker {
    cooldown: Duration,
    clock: SharedClock,
    last_applied: HashMap<FixKind, DateTime<Utc>>,
}

impl CooldownTracker {
    pub fn new(cooldown: Duration, clock: SharedClock) -> Self {
        Self {
            cooldown,
            clock,
            last_applied: HashMap::new(),
        }
    }

    /// Time left before `kind` may run again
    pub fn remaining(&self, kind: FixKind) -> Duration {
        let Some(last) = self.last_applied.get(&kind) else {
            return Duration::ZERO;
        };
        let elapsed = (self.clock.now() - *last).to_std().unwrap_or(Duration::ZERO);
        self.cooldown.saturating_sub(elapsed)
    }

    pub fn ready(&self, kind: FixKind) -> bool {
        self.remaining(kind).is_zero()
    }

    /// Start the cooldown for `kind`, whatever the outcome of the attempt
    pub fn record(&mut self, kind: FixKind) {
        self.last_applied.insert(kind, self.clock.now());
    }
}
