// WireGuard handshake polling

//! WireGuard handshake polling
//!
//! This module reads per-peer latest-handshake timestamps from a WireGuard
//! interface and reduces them to an [`ActivitySample`]: either no peer has
//! ever completed a handshake, or the time elapsed since the most recent one.

use crate::types::HandshakeBackend;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::process::Command;
use wireguard_control::{Backend, Device, InterfaceName};

/// Peer public key -> latest handshake as UNIX seconds, None if never
pub type HandshakeTable = BTreeMap<String, Option<u64>>;

/// Point-in-time reading of interface activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySample {
    /// No peer has completed a handshake since the interface came up
    NeverHandshaken,
    /// Time since the most recent handshake across all peers
    Idle(Duration),
}

impl ActivitySample {
    /// Reduce a handshake table against the wall clock `now`
    pub fn from_table(table: &HandshakeTable, now: SystemTime) -> Self {
        let latest = table.values().flatten().copied().filter(|&ts| ts > 0).max();

        match latest {
            None => ActivitySample::NeverHandshaken,
            Some(ts) => {
                let at = UNIX_EPOCH + Duration::from_secs(ts);
                // A handshake "in the future" (clock skew) counts as just now
                ActivitySample::Idle(now.duration_since(at).unwrap_or(Duration::ZERO))
            }
        }
    }
}

/// Source of handshake timestamps
#[async_trait]
pub trait HandshakeSource: Send + Sync {
    async fn latest_handshakes(&self) -> Result<HandshakeTable>;

    /// Poll and reduce to an [`ActivitySample`]
    async fn sample(&self) -> Result<ActivitySample> {
        let table = self.latest_handshakes().await?;
        Ok(ActivitySample::from_table(&table, SystemTime::now()))
    }
}

/// Validates that a name is safe to use in shell commands.
/// Only allows alphanumeric characters, hyphens, and underscores to prevent command injection.
fn validate_name(name: &str, field_name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("{} cannot be empty", field_name);
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        anyhow::bail!(
            "{} contains invalid characters: '{}'. Only alphanumeric, hyphens, and underscores are allowed",
            field_name,
            name
        );
    }

    Ok(())
}

/// Validate a WireGuard interface name.
///
/// # Errors
///
/// Returns an error if the interface name is empty or contains invalid characters.
/// Only alphanumeric characters, hyphens, and underscores are allowed.
pub fn validate_interface_name(name: &str) -> Result<()> {
    validate_name(name, "Interface name")
}

/// Reads handshakes from a live WireGuard interface
pub struct WgHandshakes {
    interface: String,
    backend: HandshakeBackend,
}

impl WgHandshakes {
    /// # Errors
    ///
    /// Returns an error if the interface name contains invalid characters.
    pub fn new(interface: String, backend: HandshakeBackend) -> Result<Self> {
        validate_interface_name(&interface)?;
        Ok(Self { interface, backend })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Parse `wg show <iface> latest-handshakes` output
    /// Format: "peer_pubkey\tunix_ts" (one line per peer, 0 = never)
    #[doc(hidden)]
    pub fn parse_latest_handshakes(output: &str) -> HandshakeTable {
        let mut table = HandshakeTable::new();

        for line in output.lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 2 {
                continue;
            }
            if let Ok(ts) = fields[1].parse::<u64>() {
                let ts = if ts == 0 { None } else { Some(ts) };
                table.insert(fields[0].to_string(), ts);
            }
        }

        table
    }

    /// Query the device through wireguard-control (netlink or UAPI socket)
    async fn device_handshakes(&self, backend: Backend) -> Result<HandshakeTable> {
        let iface_name: InterfaceName = self
            .interface
            .parse()
            .with_context(|| format!("Invalid interface name: {}", self.interface))?;

        // Device::get is a blocking call
        tokio::task::spawn_blocking(move || {
            let device = Device::get(&iface_name, backend)
                .context("Failed to get WireGuard device info")?;

            let table = device
                .peers
                .into_iter()
                .map(|peer| {
                    let ts = peer
                        .stats
                        .last_handshake_time
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_secs())
                        .filter(|&secs| secs > 0);
                    (peer.config.public_key.to_base64(), ts)
                })
                .collect();

            Ok::<HandshakeTable, anyhow::Error>(table)
        })
        .await
        .context("Netlink task panicked")?
    }

    async fn cli_handshakes(&self) -> Result<HandshakeTable> {
        let output = Command::new("wg")
            .args(["show", &self.interface, "latest-handshakes"])
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to execute wg show")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("wg show failed: {}", stderr.trim());
        }

        Ok(Self::parse_latest_handshakes(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }
}

#[async_trait]
impl HandshakeSource for WgHandshakes {
    async fn latest_handshakes(&self) -> Result<HandshakeTable> {
        match self.backend {
            HandshakeBackend::Kernel => self.device_handshakes(Backend::Kernel).await,
            HandshakeBackend::Userspace => self.device_handshakes(Backend::Userspace).await,
            HandshakeBackend::Cli => self.cli_handshakes().await,
        }
    }
}
