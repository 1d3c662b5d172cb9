//! Axum trigger endpoint for leetnote sync runs.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use leetnote_sync::Reconciler;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub mod auth;

pub use auth::Credentials;

pub const CRATE_NAME: &str = "leetnote-web";

pub const DEFAULT_PORT: u16 = 3333;

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub port: u16,
    pub auth_username: String,
    pub auth_password: String,
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("LEETNOTE_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PORT),
            auth_username: std::env::var("AUTH_USERNAME").unwrap_or_default(),
            auth_password: std::env::var("AUTH_PASSWORD").unwrap_or_default(),
        }
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(&self.auth_username, &self.auth_password)
    }
}

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    pub credentials: Credentials,
}

impl AppState {
    pub fn new(reconciler: Arc<Reconciler>, credentials: Credentials) -> Self {
        Self {
            reconciler,
            credentials,
        }
    }
}

pub fn app(state: AppState) -> Router {
    let state = Arc::new(state);
    Router::new()
        .route("/", any(sync_handler))
        .fallback(sync_handler)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_basic_auth,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn sync_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.reconciler.run_once().await {
        Ok(summary) => {
            info!(run_id = %summary.run_id, "sync request served");
            StatusCode::OK.into_response()
        }
        Err(err) => {
            error!(error = %err, "sync run failed");
            server_error(err)
        }
    }
}

fn server_error(err: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("sync failed: {err}"),
    )
        .into_response()
}

pub async fn serve(config: &WebConfig, reconciler: Arc<Reconciler>) -> anyhow::Result<()> {
    if config.auth_username.is_empty() || config.auth_password.is_empty() {
        tracing::warn!("AUTH_USERNAME or AUTH_PASSWORD is empty");
    }
    let state = AppState::new(reconciler, config.credentials());
    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("binding port {}", config.port))?;
    info!(port = config.port, "listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving http")?;
    info!("server closed");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
