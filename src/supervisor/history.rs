use crate::config::HistoryConfig;
use crate::domain::FixAttempt;
use crate::error::Result;
use crate::logging::{numbered, rotate_numbered};
use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// JSON-lines file rotated by size into `.1 .. .N`
#[derive(Debug, Clone)]
pub struct HistoryFile {
    path: PathBuf,
    max_bytes: u64,
    max_files: u32,
}

impl HistoryFile {
    pub fn new(path: impl Into<PathBuf>, max_bytes: u64, max_files: u32) -> Self {
        Self {
            path: path.into(),
            max_bytes,
            max_files,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rotated(&self, n: u32) -> PathBuf {
        numbered(&self.path, n)
    }

    pub fn append(&self, attempt: &FixAttempt) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_vec(attempt)?;
        line.push(b'\n');

        let current = fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if current > 0 && current + line.len() as u64 > self.max_bytes {
            rotate_numbered(&self.path, self.max_files)?;
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }
}

/// Bounded in-memory fix log, mirrored to an optional file
pub struct FixHistory {
    entries: VecDeque<FixAttempt>,
    capacity: usize,
    file: Option<HistoryFile>,
}

impl FixHistory {
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            file: None,
        }
    }

    pub fn from_config(config: &HistoryConfig) -> Self {
        Self::in_memory(config.memory_entries).with_file(HistoryFile::new(
            &config.path,
            config.max_bytes,
            config.max_files,
        ))
    }

    pub fn with_file(mut self, file: HistoryFile) -> Self {
        self.file = Some(file);
        self
    }

    /// Keep `attempt` in memory and append it to the file off the runtime
    pub async fn record(&mut self, attempt: FixAttempt) {
        if let Some(file) = self.file.clone() {
            let path = file.path().to_path_buf();
            let line = attempt.clone();
            match tokio::task::spawn_blocking(move || file.append(&line)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Could not write fix history"),
                Err(e) => warn!(path = %path.display(), error = %e, "Fix history writer failed"),
            }
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(attempt);
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Vec<FixAttempt> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
