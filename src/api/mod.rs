pub mod accounts;
pub mod journal;
pub mod milestones;
mod state;
pub mod tasks;

pub use state::{AppState, Pool, DEFAULT_ANALYSIS_TIMEOUT};

use crate::error::AppError;
use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// JSON body extractor whose rejections render as `AppError::Validation`.
#[derive(Debug, Clone, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(accounts::create_router())
        .merge(journal::create_router())
        .merge(milestones::create_router())
        .merge(tasks::create_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr()?, "listening");
    axum::serve(listener, create_router(state)).await
}
