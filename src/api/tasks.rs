use super::{AppJson, AppState};
use crate::auth::CurrentUser;
use crate::error::AppError;
use crate::goals::{self, TaskChanges};
use crate::tables::{Task, TaskStatus};
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
pub struct CreateTaskRequest {
    pub description: String,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub status: Option<TaskStatus>,
}

impl From<UpdateTaskRequest> for TaskChanges {
    fn from(request: UpdateTaskRequest) -> Self {
        Self {
            description: request.description,
            due_date: request.due_date,
            status: request.status,
        }
    }
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route(
            format!("/{MILESTONES_API}/:id/tasks").as_str(),
            get(list_tasks).post(create_task),
        )
        .route(
            format!("/{MILESTONES_API}/:id/tasks/:task_id").as_str(),
            get(get_task).put(update_task).delete(delete_task),
        )
}

pub async fn list_tasks(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(milestone_id): Path<i32>,
) -> Result<Json<Vec<Task>>, AppError> {
    let mut conn = state.pool.get()?;
    Ok(Json(goals::list_tasks(&mut conn, user.id, milestone_id)?))
}

pub async fn create_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(milestone_id): Path<i32>,
    AppJson(payload): AppJson<CreateTaskRequest>,
) -> Result<(StatusCode, Json<Task>), AppError> {
    let mut conn = state.pool.get()?;
    let task = goals::add_task(
        &mut conn,
        user.id,
        milestone_id,
        &payload.description,
        payload.due_date,
    )?;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn get_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((milestone_id, task_id)): Path<(i32, i32)>,
) -> Result<Json<Task>, AppError> {
    let mut conn = state.pool.get()?;
    Ok(Json(goals::get_task(&mut conn, user.id, milestone_id, task_id)?))
}

pub async fn update_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((milestone_id, task_id)): Path<(i32, i32)>,
    AppJson(payload): AppJson<UpdateTaskRequest>,
) -> Result<Json<Task>, AppError> {
    let mut conn = state.pool.get()?;

    let task = match payload {
        UpdateTaskRequest {
            description: None,
            due_date: None,
            status: Some(status),
        } => {
            goals::get_task(&mut conn, user.id, milestone_id, task_id)?;
            goals::update_task_status(&mut conn, user.id, task_id, status)?
        }
        payload => goals::update_task(&mut conn, user.id, milestone_id, task_id, payload.into())?,
    };
    Ok(Json(task))
}

pub async fn delete_task(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((milestone_id, task_id)): Path<(i32, i32)>,
) -> Result<StatusCode, AppError> {
    let mut conn = state.pool.get()?;
    goals::delete_task(&mut conn, user.id, milestone_id, task_id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::milestones::{create_milestone, get_milestone, CreateMilestoneRequest};
    use crate::api::test_utils::{login_as, test_state};
    use crate::tables::MilestoneStatus;

    #[tokio::test]
    async fn test_task_crud_updates_progress() {
        let state = test_state();
        let alice = login_as(&state, "alice");

        let (_, Json(milestone)) = create_milestone(
            State(state.clone()),
            alice.clone(),
            AppJson(CreateMilestoneRequest {
                title: "Cook at home".to_string(),
                description: None,
                due_date: None,
            }),
        )
        .await
        .expect("Failed to create milestone");

        let mut ids = Vec::new();
        for step in ["Plan meals", "Shop", "Cook", "Clean up"] {
            let (status, Json(task)) = create_task(
                State(state.clone()),
                alice.clone(),
                Path(milestone.id),
                AppJson(CreateTaskRequest {
                    description: step.to_string(),
                    due_date: None,
                }),
            )
            .await
            .expect("Failed to create task");
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(task.status, TaskStatus::Pending);
            ids.push(task.id);
        }

        let Json(done) = update_task(
            State(state.clone()),
            alice.clone(),
            Path((milestone.id, ids[0])),
            AppJson(UpdateTaskRequest {
                status: Some(TaskStatus::Completed),
                ..Default::default()
            }),
        )
        .await
        .expect("Failed to update task");
        assert_eq!(done.status, TaskStatus::Completed);

        let Json(progress) = get_milestone(State(state.clone()), alice.clone(), Path(milestone.id))
            .await
            .expect("Failed to get milestone");
        assert_eq!(progress.completion_percentage, 25.0);
        assert_eq!(progress.status, MilestoneStatus::InProgress);

        let deleted = delete_task(
            State(state.clone()),
            alice.clone(),
            Path((milestone.id, ids[3])),
        )
        .await
        .expect("Failed to delete task");
        assert_eq!(deleted, StatusCode::NO_CONTENT);

        let Json(remaining) = list_tasks(State(state.clone()), alice.clone(), Path(milestone.id))
            .await
            .expect("Failed to list tasks");
        assert_eq!(
            remaining.iter().map(|t| t.id).collect::<Vec<_>>(),
            ids[..3].to_vec()
        );

        let missing = get_task(State(state), alice, Path((milestone.id, ids[3]))).await;
        assert!(matches!(missing, Err(AppError::NotFound("task"))));
    }

    #[tokio::test]
    async fn test_foreign_milestone_tasks_are_hidden() {
        let state = test_state();
        let alice = login_as(&state, "alice");
        let mallory = login_as(&state, "mallory");

        let (_, Json(milestone)) = create_milestone(
            State(state.clone()),
            alice,
            AppJson(CreateMilestoneRequest {
                title: "Private".to_string(),
                description: None,
                due_date: None,
            }),
        )
        .await
        .expect("Failed to create milestone");

        let listed = list_tasks(State(state.clone()), mallory.clone(), Path(milestone.id)).await;
        assert!(matches!(listed, Err(AppError::NotFound("milestone"))));

        let added = create_task(
            State(state),
            mallory,
            Path(milestone.id),
            AppJson(CreateTaskRequest {
                description: "Sneaky".to_string(),
                due_date: None,
            }),
        )
        .await;
        assert_eq!(added.unwrap_err().status_code(), StatusCode::NOT_FOUND);
    }
}
