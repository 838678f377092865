use super::{send, ClientError, LoginRequest, LoginResponse, RegisterRequest};
use crate::tables::UserResponse;
use crate::{AUTH_API, PROFILE_API};

pub async fn register(base_url: &str, request: &RegisterRequest) -> Result<UserResponse, ClientError> {
    let url = format!("{base_url}/{AUTH_API}/register");
    let response = send(reqwest::Client::new().post(url).json(request), None).await?;
    Ok(response.json().await?)
}

pub async fn login(base_url: &str, username: &str, password: &str) -> Result<LoginResponse, ClientError> {
    let url = format!("{base_url}/{AUTH_API}/login");
    let request = LoginRequest {
        username: username.to_string(),
        password: password.to_string(),
    };
    let response = send(reqwest::Client::new().post(url).json(&request), None).await?;
    Ok(response.json().await?)
}

pub async fn fetch_profile(base_url: &str, token: &str) -> Result<UserResponse, ClientError> {
    let url = format!("{base_url}/{PROFILE_API}");
    let response = send(reqwest::Client::new().get(url), Some(token)).await?;
    Ok(response.json().await?)
}
