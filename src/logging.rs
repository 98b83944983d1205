//! Log file writer
//!
//! Rotates `<dir>/<prefix>.log` into `.1 .. .N` when it grows past a size cap
//! or when the UTC day changes. Handed to `tracing_appender::non_blocking`.

use crate::clock::SharedClock;
use chrono::NaiveDate;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// `path` with a `.n` suffix
pub(crate) fn numbered(path: &Path, n: u32) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{n}"));
    PathBuf::from(name)
}

/// Shift `path.1 .. path.{keep-1}` up by one and move `path` to `path.1`.
///
/// With `keep == 0` the current file is simply removed.
pub(crate) fn rotate_numbered(path: &Path, keep: u32) -> io::Result<()> {
    if keep == 0 {
        return fs::remove_file(path);
    }
    let oldest = numbered(path, keep);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }
    for n in (1..keep).rev() {
        let from = numbered(path, n);
        if from.exists() {
            fs::rename(&from, numbered(path, n + 1))?;
        }
    }
    fs::rename(path, numbered(path, 1))
}

pub struct RotatingLogFile {
    path: PathBuf,
    max_bytes: u64,
    keep: u32,
    clock: SharedClock,
    file: File,
    written: u64,
    opened_on: NaiveDate,
}

impl RotatingLogFile {
    pub fn open(
        dir: impl AsRef<Path>,
        prefix: &str,
        max_bytes: u64,
        keep: u32,
        clock: SharedClock,
    ) -> io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{prefix}.log"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let meta = file.metadata()?;
        // A file left over from an earlier day rotates on the first write
        let opened_on = meta
            .modified()
            .map(|t| chrono::DateTime::<chrono::Utc>::from(t).date_naive())
            .unwrap_or_else(|_| clock.now().date_naive());
        Ok(Self {
            path,
            max_bytes: max_bytes.max(1),
            keep,
            written: meta.len(),
            opened_on,
            clock,
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn rotate(&mut self, today: NaiveDate) -> io::Result<()> {
        self.file.flush()?;
        rotate_numbered(&self.path, self.keep)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.written = 0;
        self.opened_on = today;
        Ok(())
    }
}

impl Write for RotatingLogFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let today = self.clock.now().date_naive();
        let too_big = self.written > 0 && self.written + buf.len() as u64 > self.max_bytes;
        if too_big || (self.written > 0 && today != self.opened_on) {
            self.rotate(today)?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
