// Command line / environment configuration

//! Configuration parsing and validation
//!
//! Every setting is a command line flag with an environment variable fallback,
//! so the daemon can be configured entirely from a container environment.
//! [`Args`] is converted into an immutable [`Config`] by [`load_config`].

use crate::handshake::validate_interface_name;
use crate::types::{
    default_max_idle_secs, default_ping_timeout_secs, default_startup_secs,
    default_tick_interval_secs, Config, EndpointTarget, HandshakeBackend, KeepAliveConfig,
    MonitorConfig,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// Port the WireGuard server listens on when nothing else is configured
const DEFAULT_WG_PORT: &str = "51820";

#[derive(Parser, Debug, Clone)]
#[command(name = "wg-bootstrap")]
#[command(about = "One-time WireGuard peer config provisioning endpoint", long_about = None)]
pub struct Args {
    /// HTTP port to listen on
    #[arg(long, env = "BOOTSTRAP_PORT", default_value_t = 8081)]
    pub port: u16,

    /// Secret required as `?token=` on /bootstrap
    #[arg(long, env = "BOOTSTRAP_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Peer whose generated config is served
    #[arg(long, env = "BOOTSTRAP_PEER_NAME", default_value = "peer1")]
    pub peer_name: String,

    /// Directory holding generated peer configs and the completion marker
    #[arg(long, env = "BOOTSTRAP_CONFIG_DIR", default_value = "/config")]
    pub config_dir: PathBuf,

    /// Platform app name; the public host becomes `<app>.<domain-suffix>`
    #[arg(long, env = "FLY_APP_NAME")]
    pub app_name: Option<String>,

    /// Domain suffix appended to the app name
    #[arg(long, env = "BOOTSTRAP_DOMAIN_SUFFIX", default_value = "fly.dev")]
    pub domain_suffix: String,

    /// Full public hostname, overrides the app name
    #[arg(long, env = "BOOTSTRAP_ENDPOINT_HOST")]
    pub endpoint_host: Option<String>,

    /// Port written into the Endpoint line
    #[arg(long, env = "BOOTSTRAP_ENDPOINT_PORT")]
    pub endpoint_port: Option<String>,

    /// WireGuard server port, used when no endpoint port is given
    #[arg(long, env = "SERVERPORT", hide = true)]
    pub server_port: Option<String>,

    /// WireGuard interface to poll for handshakes
    #[arg(long, env = "WG_INTERFACE", default_value = "wg0")]
    pub wg_interface: String,

    /// How handshake timestamps are read
    #[arg(long, env = "WG_BACKEND", value_enum, default_value_t = HandshakeBackend::Kernel)]
    pub wg_backend: HandshakeBackend,

    /// Set to "false" to disable the keep-alive loop
    #[arg(long, env = "KEEPALIVE_ENABLED", default_value = "true")]
    pub keepalive_enabled: String,

    /// Wake endpoint, defaults to https://<public host>
    #[arg(long, env = "KEEPALIVE_URL")]
    pub keepalive_url: Option<String>,

    /// Seconds between keep-alive ticks
    #[arg(long, env = "KEEPALIVE_INTERVAL_SECS", default_value_t = default_tick_interval_secs())]
    pub keepalive_interval_secs: u64,

    /// Seconds after startup during which pings are unconditional
    #[arg(long, env = "KEEPALIVE_STARTUP_SECS", default_value_t = default_startup_secs())]
    pub keepalive_startup_secs: u64,

    /// Idle seconds after which the keep-alive loop stops
    #[arg(long, env = "KEEPALIVE_MAX_IDLE_SECS", default_value_t = default_max_idle_secs())]
    pub keepalive_max_idle_secs: u64,

    /// Timeout in seconds for a ping or a handshake poll
    #[arg(long, env = "KEEPALIVE_PING_TIMEOUT_SECS", default_value_t = default_ping_timeout_secs())]
    pub keepalive_ping_timeout_secs: u64,

    /// Seconds the startup watcher waits for the peer config to appear
    #[arg(long, env = "BOOTSTRAP_CONFIG_WAIT_SECS", default_value_t = 300)]
    pub config_wait_secs: u64,

    /// Default log filter (RUST_LOG takes precedence)
    #[arg(long, env = "BOOTSTRAP_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Treat unset and empty values the same way
fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl Args {
    /// Public hostname clients and the wake endpoint use, if known
    pub fn public_host(&self) -> Option<String> {
        if let Some(host) = non_empty(&self.endpoint_host) {
            return Some(host);
        }
        non_empty(&self.app_name).map(|app| format!("{}.{}", app, self.domain_suffix))
    }

    /// Port for the Endpoint rewrite
    pub fn endpoint_port(&self) -> String {
        non_empty(&self.endpoint_port)
            .or_else(|| non_empty(&self.server_port))
            .unwrap_or_else(|| DEFAULT_WG_PORT.to_string())
    }

    fn keepalive_enabled(&self) -> bool {
        !self.keepalive_enabled.trim().eq_ignore_ascii_case("false")
    }

    fn timing(&self) -> MonitorConfig {
        MonitorConfig {
            tick_interval: Duration::from_secs(self.keepalive_interval_secs),
            startup_window: Duration::from_secs(self.keepalive_startup_secs),
            max_idle: Duration::from_secs(self.keepalive_max_idle_secs),
            ping_timeout: Duration::from_secs(self.keepalive_ping_timeout_secs),
        }
    }
}

/// Build and validate the daemon configuration
pub fn load_config(args: &Args) -> Result<Config> {
    validate_args(args)?;

    let public_host = args.public_host();
    let endpoint = public_host
        .as_deref()
        .and_then(|host| EndpointTarget::new(host, args.endpoint_port()));

    let keepalive = match public_host {
        Some(host) if args.keepalive_enabled() => Some(KeepAliveConfig {
            url: non_empty(&args.keepalive_url).unwrap_or_else(|| format!("https://{}", host)),
            wg_interface: args.wg_interface.clone(),
            backend: args.wg_backend,
            timing: args.timing(),
        }),
        _ => None,
    };

    Ok(Config {
        port: args.port,
        token: non_empty(&args.token),
        config_dir: args.config_dir.clone(),
        peer_name: args.peer_name.clone(),
        endpoint,
        keepalive,
        config_wait: Duration::from_secs(args.config_wait_secs),
    })
}

/// Validate configuration values
fn validate_args(args: &Args) -> Result<()> {
    let peer = args.peer_name.as_str();
    if peer.is_empty() || peer == "." || peer == ".." || peer.contains(['/', '\\']) {
        anyhow::bail!("peer_name must be a single path component, got '{}'", peer);
    }

    validate_interface_name(&args.wg_interface).context("Invalid wg_interface")?;

    if args.keepalive_interval_secs == 0 {
        anyhow::bail!("keepalive interval must be > 0");
    }

    if args.keepalive_max_idle_secs == 0 {
        anyhow::bail!("keepalive max idle must be > 0");
    }

    if args.keepalive_ping_timeout_secs == 0 {
        anyhow::bail!("keepalive ping timeout must be > 0");
    }

    if let Some(port) = non_empty(&args.endpoint_port) {
        port.parse::<u16>()
            .with_context(|| format!("Invalid endpoint port: {}", port))?;
    }

    Ok(())
}
