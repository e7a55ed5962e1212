// Peer config and completion marker on disk
//!
//! The generated peer config is read from the config directory, and the
//! bootstrap state is a marker file next to it: absent means pending, present
//! means completed. The marker is claimed with an exclusive create so two
//! racing requests cannot both serve the config.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;

/// Result of trying to write the completion marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// This call created the marker
    Claimed,
    /// The marker was already there
    AlreadyCompleted,
}

/// Filesystem operations the bootstrap gate depends on
pub trait BootstrapStore: Send + Sync {
    /// Whether the generated peer config is present
    fn peer_config_exists(&self) -> bool;

    /// Read the generated peer config
    fn load_peer_config(&self) -> io::Result<String>;

    /// Whether bootstrap has already completed
    fn marker_exists(&self) -> bool;

    /// Atomically create the completion marker
    fn write_marker(&self, at: DateTime<Utc>) -> io::Result<MarkOutcome>;
}

/// [`BootstrapStore`] backed by the config directory
#[derive(Debug, Clone)]
pub struct FsStore {
    peer_config: PathBuf,
    marker: PathBuf,
}

impl FsStore {
    pub fn new(peer_config: impl Into<PathBuf>, marker: impl Into<PathBuf>) -> Self {
        Self {
            peer_config: peer_config.into(),
            marker: marker.into(),
        }
    }

    pub fn peer_config_path(&self) -> &Path {
        &self.peer_config
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker
    }

    /// Poll until the peer config exists or `timeout` elapses.
    /// Returns true if the file showed up.
    pub async fn wait_for_peer_config(&self, timeout: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.peer_config_exists() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(poll).await;
        }
    }
}

impl BootstrapStore for FsStore {
    fn peer_config_exists(&self) -> bool {
        self.peer_config.exists()
    }

    fn load_peer_config(&self) -> io::Result<String> {
        fs::read_to_string(&self.peer_config)
    }

    fn marker_exists(&self) -> bool {
        self.marker.exists()
    }

    fn write_marker(&self, at: DateTime<Utc>) -> io::Result<MarkOutcome> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = match options.open(&self.marker) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Ok(MarkOutcome::AlreadyCompleted)
            }
            Err(e) => return Err(e),
        };

        file.write_all(at.to_rfc3339_opts(SecondsFormat::Secs, true).as_bytes())?;
        file.sync_all()?;
        Ok(MarkOutcome::Claimed)
    }
}

/// Read back the completion timestamp, if bootstrap has completed
pub fn read_marker(path: &Path) -> Result<Option<DateTime<Utc>>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).context("Failed to read bootstrap marker"),
    };

    let at = DateTime::parse_from_rfc3339(contents.trim())
        .context("Bootstrap marker does not hold an RFC 3339 timestamp")?;
    Ok(Some(at.with_timezone(&Utc)))
}
