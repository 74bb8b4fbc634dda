//! HTTP trigger for the result-table validation pass.
//!
//! `POST /hook/results` requires `Authorization: Bearer <WEBHOOK_SECRET>` and
//! answers with the validation report. `GET /health` is open.

pub mod auth;
pub mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use result_recorder::validation::{RESULTS_PATH_ENV, SCHEMA_PATH_ENV};
use result_recorder::ValidationOptions;
use tower_http::trace::TraceLayer;

pub const DEFAULT_PORT: u16 = 8080;

#[derive(Clone)]
pub struct AppState {
    /// SHA-256 hex digest of the shared secret.
    pub secret_hash: Option<String>,
    pub results_path: Option<PathBuf>,
    pub schema_path: Option<PathBuf>,
    pub options: ValidationOptions,
}

impl AppState {
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret_hash: secret.filter(|s| !s.is_empty()).map(auth::hash_key),
            results_path: None,
            schema_path: None,
            options: ValidationOptions::default(),
        }
    }

    pub fn with_paths(mut self, results: Option<PathBuf>, schema: Option<PathBuf>) -> Self {
        self.results_path = results;
        self.schema_path = schema;
        self
    }

    pub fn with_options(mut self, options: ValidationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn from_env() -> Self {
        let path = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        Self::new(std::env::var("WEBHOOK_SECRET").ok().as_deref())
            .with_paths(path(RESULTS_PATH_ENV), path(SCHEMA_PATH_ENV))
    }
}

pub fn router(state: AppState) -> Router {
    let hooks = Router::new()
        .route("/hook/results", post(routes::handle_results_hook))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    Router::new()
        .route("/health", get(routes::health))
        .merge(hooks)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server() -> anyhow::Result<()> {
    let state = AppState::from_env();
    if state.secret_hash.is_none() {
        tracing::warn!("WEBHOOK_SECRET is not set; every hook request will be rejected");
    }

    let port = match std::env::var("WEBHOOK_PORT") {
        Ok(raw) => raw.parse()?,
        Err(_) => DEFAULT_PORT,
    };
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Webhook receiver listening on {}", addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
