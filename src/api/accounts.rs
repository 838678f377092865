use super::{AppJson, AppState};
use crate::auth::{issue_token, CurrentUser};
use crate::error::AppError;
use crate::tables::UserResponse;
use crate::users;
use crate::{AUTH_API, PROFILE_API};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub token_type: String,
    pub user: UserResponse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProfileRequest {
    pub username: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route(format!("/{AUTH_API}/register").as_str(), post(register))
        .route(format!("/{AUTH_API}/login").as_str(), post(login))
        .route(
            format!("/{PROFILE_API}").as_str(),
            axum::routing::get(get_profile)
                .put(update_profile)
                .delete(delete_profile),
        )
        .route(format!("/{PROFILE_API}/password").as_str(), put(change_password))
}

pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let mut conn = state.pool.get()?;
    let user = users::register(&mut conn, &payload.username, &payload.email, &payload.password)?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let mut conn = state.pool.get()?;
    let user = users::authenticate(&mut conn, &payload.username, &payload.password)?;
    let token = issue_token(&user, &state.auth)?;

    Ok(Json(LoginResponse {
        token,
        token_type: "Bearer".to_string(),
        user: user.into(),
    }))
}

pub async fn get_profile(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(user.into())
}

pub async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(payload): AppJson<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let mut conn = state.pool.get()?;
    let updated = users::update_profile(
        &mut conn,
        user.id,
        payload.username.as_deref(),
        payload.email.as_deref(),
    )?;
    Ok(Json(updated.into()))
}

pub async fn change_password(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(payload): AppJson<ChangePasswordRequest>,
) -> Result<StatusCode, AppError> {
    let mut conn = state.pool.get()?;
    users::change_password(
        &mut conn,
        user.id,
        &payload.current_password,
        &payload.new_password,
    )?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_profile(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<StatusCode, AppError> {
    let mut conn = state.pool.get()?;
    users::delete_user(&mut conn, user.id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_utils::test_state;
    use crate::auth::decode_token;

    #[tokio::test]
    async fn test_register_login_profile() {
        let state = test_state();

        let (status, Json(created)) = register(
            State(state.clone()),
            AppJson(RegisterRequest {
                username: "alice".to_string(),
                email: "alice@example.com".to_string(),
                password: "correct horse".to_string(),
            }),
        )
        .await
        .expect("Failed to register");
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.username, "alice");

        let Json(session) = login(
            State(state.clone()),
            AppJson(LoginRequest {
                username: "alice".to_string(),
                password: "correct horse".to_string(),
            }),
        )
        .await
        .expect("Failed to log in");
        assert_eq!(session.token_type, "Bearer");
        assert_eq!(session.user, created);
        let claims = decode_token(&session.token, &state.auth).unwrap();
        assert_eq!(claims.uid, created.id);

        let bad_login = login(
            State(state.clone()),
            AppJson(LoginRequest {
                username: "alice".to_string(),
                password: "wrong".to_string(),
            }),
        )
        .await;
        assert!(matches!(bad_login, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_duplicate_register_is_conflict() {
        let state = test_state();
        let request = RegisterRequest {
            username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            password: "pw-secret".to_string(),
        };

        register(State(state.clone()), AppJson(request.clone()))
            .await
            .expect("Failed to register");
        let again = register(State(state), AppJson(request)).await;
        assert_eq!(again.unwrap_err().status_code(), StatusCode::CONFLICT);
    }
}
