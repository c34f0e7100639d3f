//! HTTP API server.
//!
//! Provides the pairing endpoint, a health check, and the static frontend.

use crate::frontend;
use crate::session::{PairingOutcome, SessionManager};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use pairgate_core::config::Platform;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Message shown next to a fresh QR code.
pub const SCAN_MESSAGE: &str = "Scan with WhatsApp → Linked Devices";

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    sessions: Arc<SessionManager>,
    platform: Platform,
    api_key: Option<String>,
}

impl ApiState {
    pub fn new(sessions: Arc<SessionManager>, platform: Platform, api_key: &str) -> Self {
        let api_key = if api_key.is_empty() {
            None
        } else {
            Some(api_key.to_string())
        };
        Self {
            sessions,
            platform,
            api_key,
        }
    }
}

type ApiResponse = (StatusCode, Json<Value>);

/// Check bearer token auth. Returns `None` if authorized, `Some(response)` if rejected.
fn check_auth(headers: &HeaderMap, api_key: &Option<String>) -> Option<ApiResponse> {
    let key = api_key.as_ref()?;

    let header = match headers.get("authorization") {
        Some(h) => h,
        None => {
            return Some((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "missing Authorization header"})),
            ));
        }
    };

    let value = match header.to_str() {
        Ok(v) => v,
        Err(_) => {
            return Some((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid Authorization header"})),
            ));
        }
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if token == key => None,
        _ => Some((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid token"})),
        )),
    }
}

/// Map a pairing outcome to the response body the frontend expects.
fn outcome_response(outcome: PairingOutcome, timeout_secs: u64) -> ApiResponse {
    match outcome {
        PairingOutcome::Qr(qr) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "qr": qr,
                "message": SCAN_MESSAGE,
            })),
        ),
        PairingOutcome::Connected => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "qr": null,
                "connected": true,
                "message": "Session restored, WhatsApp is already linked",
            })),
        ),
        PairingOutcome::TimedOut => (
            StatusCode::REQUEST_TIMEOUT,
            Json(json!({
                "error": "QR timeout",
                "message": format!("WhatsApp servers took longer than {timeout_secs}s to respond"),
            })),
        ),
        PairingOutcome::Superseded => (
            StatusCode::REQUEST_TIMEOUT,
            Json(json!({
                "error": "QR timeout",
                "message": "Superseded by a newer pairing request",
            })),
        ),
    }
}

/// `POST /api/start`: open a fresh pairing session and return its QR code.
async fn start(headers: HeaderMap, State(state): State<ApiState>) -> ApiResponse {
    if let Some(err) = check_auth(&headers, &state.api_key) {
        return err;
    }

    info!("starting WhatsApp pairing on {}", state.platform.label());

    match state.sessions.start().await {
        Ok(outcome) => outcome_response(outcome, state.sessions.qr_timeout().as_secs()),
        Err(e) => {
            error!("pairing setup failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": format!("Setup failed: {e}")})),
            )
        }
    }
}

/// `GET /health`: liveness check.
async fn health(State(state): State<ApiState>) -> Json<Value> {
    let session = state.sessions.info().await.map(|info| {
        json!({
            "id": info.id.to_string(),
            "started_at": info.started_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "awaiting_reply": info.awaiting_reply,
        })
    });
    Json(json!({
        "status": "OK",
        "service": "pairgate",
        "platform": state.platform.label(),
        "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        "session": session,
    }))
}

/// `GET /`: pairing page.
async fn index(State(state): State<ApiState>) -> Html<String> {
    Html(frontend::render(state.platform, state.api_key.is_some()))
}

/// Build the axum router with shared state.
pub fn build_router(state: ApiState, serve_frontend: bool) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new()
        .route("/api/start", post(start))
        .route("/health", get(health));

    let router = if serve_frontend {
        router.route("/", get(index))
    } else {
        router
    };

    router.layer(cors).with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    addr: &str,
    state: ApiState,
    serve_frontend: bool,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind to {addr}: {e}"))?;
    serve_on(listener, state, serve_frontend, shutdown).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
///
/// In-flight requests are drained after `shutdown` completes.
pub async fn serve_on(
    listener: tokio::net::TcpListener,
    state: ApiState,
    serve_frontend: bool,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let platform = state.platform;
    let app = build_router(state, serve_frontend);

    match listener.local_addr() {
        Ok(addr) => info!("pairgate running on {} at http://{addr}", platform.label()),
        Err(_) => info!("pairgate running on {}", platform.label()),
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("API server error: {e}"))
}
