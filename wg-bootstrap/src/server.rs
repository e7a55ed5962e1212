// HTTP server

//! HTTP surface of the bootstrap gate
//!
//! | Path | Success | Failure |
//! |---|---|---|
//! | `GET /` | 200 landing text | - |
//! | `GET /healthz` | 200 `ok` | 503 while the peer config is missing |
//! | `GET /bootstrap?token=T` | 200 HTML page | 410 / 401 / 403 / 503 / 500 |

use crate::gate::{BootstrapGate, GateError};
use crate::page::ROOT_TEXT;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// First `token` value of the query string, if any.
/// Repeated or unrelated parameters never reject the request.
fn first_token(query: Option<Query<Vec<(String, String)>>>) -> Option<String> {
    let Query(pairs) = query?;
    pairs
        .into_iter()
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value)
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Build the router over a shared gate
pub fn router(gate: Arc<BootstrapGate>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/healthz", get(healthz_handler))
        .route("/bootstrap", get(bootstrap_handler))
        .with_state(gate)
}

async fn root_handler() -> &'static str {
    ROOT_TEXT
}

async fn healthz_handler(State(gate): State<Arc<BootstrapGate>>) -> Response {
    let ready = tokio::task::spawn_blocking(move || gate.is_ready())
        .await
        .unwrap_or(false);

    if ready {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "config not ready").into_response()
    }
}

async fn bootstrap_handler(
    State(gate): State<Arc<BootstrapGate>>,
    query: Option<Query<Vec<(String, String)>>>,
) -> Response {
    let token = first_token(query);
    let result = tokio::task::spawn_blocking(move || gate.bootstrap(token.as_deref())).await;

    match result {
        Ok(Ok(page)) => ([(header::CACHE_CONTROL, "no-store")], Html(page.html)).into_response(),
        Ok(Err(e)) => {
            log::info!("Bootstrap refused: {} ({})", e, e.status());
            e.into_response()
        }
        Err(e) => {
            log::error!("Bootstrap task panicked: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serve until `cancel` fires
pub async fn serve(
    gate: Arc<BootstrapGate>,
    addr: SocketAddr,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("wg-bootstrap listening on {}", addr);

    axum::serve(listener, router(gate))
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await?;

    log::debug!("HTTP server stopped");
    Ok(())
}
