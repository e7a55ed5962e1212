// One-time bootstrap gate

//! Bootstrap gate state machine
//!
//! The gate serves the peer config exactly once. Its state lives entirely in
//! the completion marker (see [`crate::store`]): pending while the marker is
//! absent, completed forever once it exists. Every request re-checks the
//! marker so restarts are tolerated.

use crate::endpoint::rewrite_endpoint;
use crate::page::render_page;
use crate::qr::QrEncoder;
use crate::store::{BootstrapStore, MarkOutcome};
use crate::types::EndpointTarget;
use axum::http::StatusCode;
use chrono::Utc;
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Why a bootstrap request was refused
#[derive(Debug, Error)]
pub enum GateError {
    /// Peer config missing or unreadable; retry later
    #[error("config not ready")]
    NotReady(#[source] io::Error),
    /// The config was already served; never recovers
    #[error("bootstrap already completed")]
    AlreadyCompleted,
    #[error("missing token")]
    MissingToken,
    #[error("invalid token")]
    InvalidToken,
    #[error("failed to generate qr")]
    Encoding(#[source] anyhow::Error),
    #[error("failed to finalize bootstrap")]
    Finalize(#[source] io::Error),
}

impl GateError {
    /// HTTP status surfaced to the client
    pub fn status(&self) -> StatusCode {
        match self {
            GateError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::AlreadyCompleted => StatusCode::GONE,
            GateError::MissingToken => StatusCode::UNAUTHORIZED,
            GateError::InvalidToken => StatusCode::FORBIDDEN,
            GateError::Encoding(_) | GateError::Finalize(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// What a successful bootstrap hands back
#[derive(Debug, Clone)]
pub struct BootstrapPage {
    /// Normalized config, also the QR payload
    pub config: String,
    pub html: String,
}

/// Guards the one-time exposure of the peer config
pub struct BootstrapGate {
    store: Arc<dyn BootstrapStore>,
    encoder: Arc<dyn QrEncoder>,
    token: Option<String>,
    endpoint: Option<EndpointTarget>,
}

impl BootstrapGate {
    pub fn new(
        store: Arc<dyn BootstrapStore>,
        encoder: Arc<dyn QrEncoder>,
        token: Option<String>,
        endpoint: Option<EndpointTarget>,
    ) -> Self {
        Self {
            store,
            encoder,
            token,
            endpoint,
        }
    }

    /// Health check: the peer config has been generated
    pub fn is_ready(&self) -> bool {
        self.store.peer_config_exists()
    }

    /// Whether the one-time page was already served
    pub fn is_completed(&self) -> bool {
        self.store.marker_exists()
    }

    fn check_token(&self, presented: Option<&str>) -> Result<(), GateError> {
        let Some(expected) = self.token.as_deref() else {
            return Ok(());
        };

        match presented.filter(|t| !t.is_empty()) {
            None => Err(GateError::MissingToken),
            Some(token) if token == expected => Ok(()),
            Some(_) => Err(GateError::InvalidToken),
        }
    }

    /// Run the gate once for a request carrying `token`.
    ///
    /// The marker is written only after the config was loaded and the page
    /// rendered, so a failure before that leaves bootstrap pending.
    pub fn bootstrap(&self, token: Option<&str>) -> Result<BootstrapPage, GateError> {
        if self.is_completed() {
            return Err(GateError::AlreadyCompleted);
        }

        self.check_token(token)?;

        let raw = self.store.load_peer_config().map_err(|e| {
            log::warn!("Failed to read peer config: {}", e);
            GateError::NotReady(e)
        })?;

        let config = rewrite_endpoint(&raw, self.endpoint.as_ref());

        let qr_png = self.encoder.encode(&config).map_err(|e| {
            log::error!("QR encode failed: {:#}", e);
            GateError::Encoding(e)
        })?;
        let html = render_page(&config, &qr_png);

        match self.store.write_marker(Utc::now()) {
            Ok(MarkOutcome::Claimed) => {}
            Ok(MarkOutcome::AlreadyCompleted) => {
                log::warn!("Lost bootstrap race to a concurrent request");
                return Err(GateError::AlreadyCompleted);
            }
            Err(e) => {
                log::error!("Failed to write bootstrap marker: {}", e);
                return Err(GateError::Finalize(e));
            }
        }

        log::info!("Bootstrap completed, peer config served");
        Ok(BootstrapPage { config, html })
    }
}
