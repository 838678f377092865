pub mod auth;
pub mod journal;
pub mod milestones;

pub use crate::api::accounts::{LoginRequest, LoginResponse, RegisterRequest};
pub use crate::api::journal::{ClusterRequest, CreateEntryRequest, UpdateEntryRequest};
pub use crate::api::milestones::{CreateMilestoneRequest, UpdateMilestoneRequest};
pub use crate::api::tasks::{CreateTaskRequest, UpdateTaskRequest};
pub use auth::*;
pub use journal::*;
pub use milestones::*;

use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Rejected ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Sends the request with the bearer token and maps error statuses onto
/// [`ClientError`], using the server's `message` when it sent one.
pub(crate) async fn send(request: RequestBuilder, token: Option<&str>) -> Result<Response, ClientError> {
    let request = match token {
        Some(token) => request.bearer_auth(token),
        None => request,
    };
    let response = request.send().await?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|parsed| parsed.message)
        .unwrap_or(body);

    Err(match status {
        StatusCode::NOT_FOUND => ClientError::NotFound(message),
        StatusCode::UNAUTHORIZED => ClientError::Unauthorized(message),
        status => ClientError::Rejected { status, message },
    })
}
