// Shared configuration types

//! Shared data structures
//!
//! This module defines the immutable configuration values handed to the
//! bootstrap gate, the HTTP server and the activity monitor.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// File name of the completion marker inside the config directory
pub const MARKER_FILE_NAME: &str = "bootstrap_done";

/// How handshake timestamps are read from WireGuard
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum HandshakeBackend {
    /// Kernel module via netlink
    Kernel,
    /// Userspace implementation via its UAPI socket
    Userspace,
    /// `wg show <iface> latest-handshakes`
    Cli,
}

/// Public host and port a client should dial
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTarget {
    pub host: String,
    pub port: String,
}

impl EndpointTarget {
    /// Build a target, returning None if either half is empty
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Option<Self> {
        let host = host.into();
        let port = port.into();
        if host.is_empty() || port.is_empty() {
            return None;
        }
        Some(Self { host, port })
    }
}

impl fmt::Display for EndpointTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Timing constants for the keep-alive loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Delay between two ticks
    pub tick_interval: Duration,
    /// Pings are sent unconditionally while the process is younger than this
    pub startup_window: Duration,
    /// Idle time after which the session is considered over
    pub max_idle: Duration,
    /// Upper bound for a single ping or handshake poll
    pub ping_timeout: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(default_tick_interval_secs()),
            startup_window: Duration::from_secs(default_startup_secs()),
            max_idle: Duration::from_secs(default_max_idle_secs()),
            ping_timeout: Duration::from_secs(default_ping_timeout_secs()),
        }
    }
}

/// Keep-alive settings, present only when the monitor should run
#[derive(Debug, Clone)]
pub struct KeepAliveConfig {
    /// Wake endpoint pinged while a session is active
    pub url: String,
    pub wg_interface: String,
    pub backend: HandshakeBackend,
    pub timing: MonitorConfig,
}

/// Main configuration structure
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Optional one-time secret required on `/bootstrap`
    pub token: Option<String>,
    pub config_dir: PathBuf,
    pub peer_name: String,
    /// Endpoint written into the served config, if the public host is known
    pub endpoint: Option<EndpointTarget>,
    pub keepalive: Option<KeepAliveConfig>,
    /// How long the startup watcher waits for the peer config
    pub config_wait: Duration,
}

impl Config {
    /// Path of the generated peer configuration, `<dir>/<peer>/<peer>.conf`
    pub fn peer_config_path(&self) -> PathBuf {
        self.config_dir
            .join(&self.peer_name)
            .join(format!("{}.conf", self.peer_name))
    }

    /// Path of the completion marker
    pub fn marker_path(&self) -> PathBuf {
        self.config_dir.join(MARKER_FILE_NAME)
    }
}

// Default values for configuration
pub(crate) fn default_tick_interval_secs() -> u64 {
    30
}

pub(crate) fn default_startup_secs() -> u64 {
    120 // 2 minutes
}

pub(crate) fn default_max_idle_secs() -> u64 {
    300 // 5 minutes
}

pub(crate) fn default_ping_timeout_secs() -> u64 {
    5
}
