use super::{
    send, ClientError, CreateMilestoneRequest, CreateTaskRequest, UpdateMilestoneRequest,
    UpdateTaskRequest,
};
use crate::goals::Milestone;
use crate::tables::Task;
use crate::MILESTONES_API;

pub async fn create_milestone(
    base_url: &str,
    token: &str,
    request: &CreateMilestoneRequest,
) -> Result<Milestone, ClientError> {
    let url = format!("{base_url}/{MILESTONES_API}");
    let response = send(reqwest::Client::new().post(url).json(request), Some(token)).await?;
    Ok(response.json().await?)
}

pub async fn fetch_milestones(base_url: &str, token: &str) -> Result<Vec<Milestone>, ClientError> {
    let url = format!("{base_url}/{MILESTONES_API}");
    Ok(send(reqwest::Client::new().get(url), Some(token)).await?.json().await?)
}

pub async fn fetch_milestone(base_url: &str, token: &str, id: i32) -> Result<Milestone, ClientError> {
    let url = format!("{base_url}/{MILESTONES_API}/{id}");
    Ok(send(reqwest::Client::new().get(url), Some(token)).await?.json().await?)
}

pub async fn update_milestone(
    base_url: &str,
    token: &str,
    id: i32,
    request: &UpdateMilestoneRequest,
) -> Result<Milestone, ClientError> {
    let url = format!("{base_url}/{MILESTONES_API}/{id}");
    let response = send(reqwest::Client::new().put(url).json(request), Some(token)).await?;
    Ok(response.json().await?)
}

pub async fn delete_milestone(base_url: &str, token: &str, id: i32) -> Result<(), ClientError> {
    let url = format!("{base_url}/{MILESTONES_API}/{id}");
    send(reqwest::Client::new().delete(url), Some(token)).await?;
    Ok(())
}

pub async fn create_task(
    base_url: &str,
    token: &str,
    milestone_id: i32,
    request: &CreateTaskRequest,
) -> Result<Task, ClientError> {
    let url = format!("{base_url}/{MILESTONES_API}/{milestone_id}/tasks");
    let response = send(reqwest::Client::new().post(url).json(request), Some(token)).await?;
    Ok(response.json().await?)
}

pub async fn fetch_tasks(
    base_url: &str,
    token: &str,
    milestone_id: i32,
) -> Result<Vec<Task>, ClientError> {
    let url = format!("{base_url}/{MILESTONES_API}/{milestone_id}/tasks");
    Ok(send(reqwest::Client::new().get(url), Some(token)).await?.json().await?)
}

pub async fn update_task(
    base_url: &str,
    token: &str,
    milestone_id: i32,
    task_id: i32,
    request: &UpdateTaskRequest,
) -> Result<Task, ClientError> {
    let url = format!("{base_url}/{MILESTONES_API}/{milestone_id}/tasks/{task_id}");
    let response = send(reqwest::Client::new().put(url).json(request), Some(token)).await?;
    Ok(response.json().await?)
}

pub async fn delete_task(
    base_url: &str,
    token: &str,
    milestone_id: i32,
    task_id: i32,
) -> Result<(), ClientError> {
    let url = format!("{base_url}/{MILESTONES_API}/{milestone_id}/tasks/{task_id}");
    send(reqwest::Client::new().delete(url), Some(token)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_utils::test_state;
    use crate::client::test_utils::spawn_server;
    use crate::client::{login, register, RegisterRequest};
    use crate::tables::{MilestoneStatus, TaskStatus};

    #[tokio::test]
    async fn test_milestone_client_round_trip() {
        let base_url = spawn_server(test_state()).await;
        register(
            &base_url,
            &RegisterRequest {
                username: "bob".to_string(),
                email: "bob@example.com".to_string(),
                password: "pw-bob".to_string(),
            },
        )
        .await
        .expect("Failed to register");
        let token = login(&base_url, "bob", "pw-bob").await.unwrap().token;

        let milestone = create_milestone(
            &base_url,
            &token,
            &CreateMilestoneRequest {
                title: "Learn to swim".to_string(),
                description: None,
                due_date: None,
            },
        )
        .await
        .expect("Failed to create milestone");

        let first = create_task(
            &base_url,
            &token,
            milestone.id,
            &CreateTaskRequest {
                description: "Book a lesson".to_string(),
                due_date: None,
            },
        )
        .await
        .expect("Failed to create task");
        create_task(
            &base_url,
            &token,
            milestone.id,
            &CreateTaskRequest {
                description: "Swim a length".to_string(),
                due_date: None,
            },
        )
        .await
        .expect("Failed to create task");

        update_task(
            &base_url,
            &token,
            milestone.id,
            first.id,
            &UpdateTaskRequest {
                status: Some(TaskStatus::Completed),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to update task");

        let fetched = fetch_milestone(&base_url, &token, milestone.id)
            .await
            .expect("Failed to fetch milestone");
        assert_eq!(fetched.completion_percentage, 50.0);
        assert_eq!(fetched.status, MilestoneStatus::InProgress);
        assert_eq!(fetch_tasks(&base_url, &token, milestone.id).await.unwrap().len(), 2);

        delete_milestone(&base_url, &token, milestone.id)
            .await
            .expect("Failed to delete milestone");
        assert!(fetch_milestones(&base_url, &token).await.unwrap().is_empty());
        assert!(matches!(
            fetch_tasks(&base_url, &token, milestone.id).await,
            Err(ClientError::NotFound(_))
        ));
    }
}
