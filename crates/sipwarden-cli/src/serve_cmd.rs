use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use sipwarden_core::control::ControlCommand;
use sipwarden_core::error::SupervisorError;
use sipwarden_core::launcher::TransportKind;
use sipwarden_core::supervisor::Supervisor;

use crate::config::SipwardenConfig;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }
}

impl From<SupervisorError> for AppError {
    fn from(err: SupervisorError) -> Self {
        let status = match err {
            // Retryable: the watchdog restores readiness on its own.
            SupervisorError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    #[serde(default)]
    pub destination: String,
}

#[derive(Debug, Deserialize)]
pub struct DtmfRequest {
    #[serde(default)]
    pub digits: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub ready: bool,
    pub running: bool,
    pub pid: Option<u32>,
    pub extension: String,
    pub registrar: String,
    pub transport: TransportKind,
    pub started_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/call", post(call))
        .route("/hangup", post(hangup))
        .route("/dtmf", post(dtmf))
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .layer(CorsLayer::permissive())
        .with_state(supervisor)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(config: SipwardenConfig) -> Result<()> {
    let supervisor = Arc::new(Supervisor::new(config.params, config.transport));

    // The first launch is the startup gate: a worker that cannot come up
    // is fatal. Later deaths are the watchdog's problem.
    supervisor
        .launch()
        .await
        .context("initial worker launch failed")?;
    supervisor.start_watchdog();

    let app = build_router(Arc::clone(&supervisor));
    let addr: SocketAddr = format!("{}:{}", config.http_bind, config.http_port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", config.http_bind, config.http_port))?;
    tracing::info!("sipwarden serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    supervisor.shutdown().await;
    tracing::info!("sipwarden serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await;
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn call(
    State(supervisor): State<Arc<Supervisor>>,
    body: axum::body::Bytes,
) -> Result<axum::response::Response, AppError> {
    // A missing or malformed body is the same defect as an empty
    // destination; all of them are the caller's 400.
    let destination = serde_json::from_slice::<CallRequest>(&body)
        .map(|req| req.destination.trim().to_string())
        .unwrap_or_default();
    if destination.is_empty() {
        return Err(AppError::bad_request("destination is required"));
    }

    let registrar = supervisor.params().registrar.clone();
    supervisor
        .send_command(&ControlCommand::call(&destination, &registrar))
        .await?;

    Ok(Json(serde_json::json!({
        "status": "calling",
        "destination": destination,
    }))
    .into_response())
}

async fn hangup(
    State(supervisor): State<Arc<Supervisor>>,
) -> Result<axum::response::Response, AppError> {
    supervisor.send_command(&ControlCommand::hangup()).await?;
    Ok(Json(serde_json::json!({ "status": "hangup" })).into_response())
}

async fn dtmf(
    State(supervisor): State<Arc<Supervisor>>,
    body: axum::body::Bytes,
) -> Result<axum::response::Response, AppError> {
    let digits = serde_json::from_slice::<DtmfRequest>(&body)
        .map(|req| req.digits.trim().to_string())
        .unwrap_or_default();
    if digits.is_empty() {
        return Err(AppError::bad_request("digits are required"));
    }

    supervisor.send_command(&ControlCommand::dtmf(&digits)).await?;

    Ok(Json(serde_json::json!({
        "status": "sent",
        "digits": digits,
    }))
    .into_response())
}

/// Liveness endpoint: always 200, readiness carried in the body.
async fn healthz(State(supervisor): State<Arc<Supervisor>>) -> axum::response::Response {
    let ready = supervisor.is_ready().await;
    Json(serde_json::json!({ "ready": ready })).into_response()
}

async fn status(State(supervisor): State<Arc<Supervisor>>) -> axum::response::Response {
    let snapshot = supervisor.status().await;
    Json(StatusResponse {
        ready: snapshot.ready,
        running: snapshot.running,
        pid: snapshot.pid,
        extension: supervisor.params().extension.clone(),
        registrar: supervisor.params().registrar.clone(),
        transport: snapshot.transport,
        started_at: snapshot.started_at,
    })
    .into_response()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
