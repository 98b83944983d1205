//! Reboot rate limiting
//!
//! A sliding one-hour window of performed reboots. The window is persisted so
//! it survives the reboot it just caused.

use crate::clock::SharedClock;
use crate::error::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Result of asking the guard for permission to reboot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebootDecision {
    Allowed,
    /// Window already holds `recent` reboots against a limit of `limit`
    RateLimited { recent: usize, limit: u32 },
}

pub struct RebootGuard {
    limit: u32,
    window: ChronoDuration,
    clock: SharedClock,
    reboots: VecDeque<DateTime<Utc>>,
    path: Option<PathBuf>,
}

impl RebootGuard {
    pub fn new(limit: u32, clock: SharedClock) -> Self {
        Self {
            limit,
            window: ChronoDuration::minutes(60),
            clock,
            reboots: VecDeque::new(),
            path: None,
        }
    }

    /// Guard backed by a JSON file of reboot timestamps.
    ///
    /// An unreadable file starts an empty window with a warning.
    pub fn load(limit: u32, clock: SharedClock, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut guard = Self::new(limit, clock);
        match read_window(&path) {
            Ok(reboots) => guard.reboots = reboots.into_iter().collect(),
            Err(e) => warn!(path = %path.display(), error = %e, "Could not read reboot window, starting empty"),
        }
        guard.path = Some(path);
        guard.prune();
        guard
    }

    pub fn with_history(mut self, reboots: impl IntoIterator<Item = DateTime<Utc>>) -> Self {
        self.reboots = reboots.into_iter().collect();
        self.reboots.make_contiguous().sort();
        self
    }

    fn prune(&mut self) {
        let cutoff = self.clock.now() - self.window;
        while self.reboots.front().is_some_and(|t| *t <= cutoff) {
            self.reboots.pop_front();
        }
    }

    /// Reboots performed in the trailing window
    pub fn recent(&mut self) -> usize {
        self.prune();
        self.reboots.len()
    }

    /// Take a slot in the window, or refuse when the window is full.
    ///
    /// The slot is taken and persisted before the reboot runs, so a failed
    /// reboot still counts against the limit.
    pub async fn try_acquire(&mut self) -> RebootDecision {
        let recent = self.recent();
        if recent >= self.limit as usize {
            warn!(recent, limit = self.limit, "Reboot skipped, rate-limited");
            return RebootDecision::RateLimited {
                recent,
                limit: self.limit,
            };
        }

        self.reboots.push_back(self.clock.now());
        info!(recent = recent + 1, limit = self.limit, "Reboot slot acquired");
        if let Err(e) = self.persist().await {
            warn!(error = %e, "Could not persist reboot window");
        }
        RebootDecision::Allowed
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.reboots.iter().copied().collect()
    }

    /// Write the window to a sibling temp file, then rename it over the
    /// state file so a reader never sees a partial window
    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(&self.timestamps())?;
        let staging = staging_path(path);
        let mut file = tokio::fs::File::create(&staging).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&staging, path).await?;
        Ok(())
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn read_window(path: &Path) -> Result<Vec<DateTime<Utc>>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read(path)?;
    let mut reboots: Vec<DateTime<Utc>> = serde_json::from_slice(&raw)?;
    reboots.sort();
    Ok(reboots)
}
