use super::{AppJson, AppState};
use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::goals::{self, Milestone, MilestoneChanges};
use crate::tables::MilestoneStatus;
use crate::MILESTONES_API;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMilestoneRequest {
    pub title: String,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMilestoneRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub status: Option<MilestoneStatus>,
}

impl From<UpdateMilestoneRequest> for MilestoneChanges {
    fn from(request: UpdateMilestoneRequest) -> Self {
        Self {
            title: request.title,
            description: request.description,
            due_date: request.due_date,
            status: request.status,
        }
    }
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route(
            format!("/{MILESTONES_API}").as_str(),
            get(list_milestones).post(create_milestone),
        )
        .route(
            format!("/{MILESTONES_API}/:id").as_str(),
            get(get_milestone)
                .put(update_milestone)
                .delete(delete_milestone),
        )
}

pub async fn list_milestones(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Milestone>>, AppError> {
    let mut conn = state.pool.get()?;
    Ok(Json(goals::list_milestones(&mut conn, user.id)?))
}

pub async fn create_milestone(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    AppJson(payload): AppJson<CreateMilestoneRequest>,
) -> Result<(StatusCode, Json<Milestone>), AppError> {
    let mut conn = state.pool.get()?;
    let milestone = goals::create_milestone(
        &mut conn,
        user.id,
        &payload.title,
        payload.description.as_deref(),
        payload.due_date,
    )?;
    Ok((StatusCode::CREATED, Json(milestone)))
}

pub async fn get_milestone(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(milestone_id): Path<i32>,
) -> Result<Json<Milestone>, AppError> {
    let mut conn = state.pool.get()?;
    Ok(Json(goals::get_milestone(&mut conn, user.id, milestone_id)?))
}

pub async fn update_milestone(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(milestone_id): Path<i32>,
    AppJson(payload): AppJson<UpdateMilestoneRequest>,
) -> Result<Json<Milestone>, AppError> {
    let mut conn = state.pool.get()?;

    // A bare status change is a direct transition, not a field edit.
    let milestone = match payload {
        UpdateMilestoneRequest {
            title: None,
            description: None,
            due_date: None,
            status: Some(status),
        } => goals::update_milestone_status(&mut conn, user.id, milestone_id, status)?,
        payload => goals::update_milestone(&mut conn, user.id, milestone_id, payload.into())?,
    };
    Ok(Json(milestone))
}

pub async fn delete_milestone(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(milestone_id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let mut conn = state.pool.get()?;
    goals::delete_milestone(&mut conn, user.id, milestone_id)?;
    Ok(StatusCode::NO_CONTENT)
}
