use crate::auth::require_owner;
use crate::error::{validate_not_blank, AppError};
use crate::schema::{milestones, tasks};
use crate::tables::{MilestoneRow, MilestoneStatus, NewMilestone, NewTask, Task, TaskStatus};
use chrono::NaiveDate;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// A milestone with its tasks in creation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: i32,
    pub user_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub creation_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub status: MilestoneStatus,
    pub tasks: Vec<Task>,
    pub completion_percentage: f64,
}

impl Milestone {
    fn assemble(row: MilestoneRow, tasks: Vec<Task>) -> Self {
        let completion_percentage = percentage_completed(&tasks);
        Self {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            description: row.description,
            creation_date: row.creation_date,
            due_date: row.due_date,
            status: row.status,
            tasks,
            completion_percentage,
        }
    }
}

/// Partial milestone update; `None` leaves a column alone.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = milestones)]
pub struct MilestoneChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub status: Option<MilestoneStatus>,
}

impl MilestoneChanges {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.due_date.is_none()
            && self.status.is_none()
    }
}

/// Partial task update; `None` leaves a column alone.
#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = tasks)]
pub struct TaskChanges {
    pub description: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub status: Option<TaskStatus>,
}

impl TaskChanges {
    fn is_empty(&self) -> bool {
        self.description.is_none() && self.due_date.is_none() && self.status.is_none()
    }
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn percentage_completed(tasks: &[Task]) -> f64 {
    if tasks.is_empty() {
        return 0.0;
    }
    let completed = tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Completed)
        .count();
    completed as f64 / tasks.len() as f64 * 100.0
}

/// Completed tasks over total tasks, times 100. Zero when there are no tasks.
pub fn completion_percentage(milestone: &Milestone) -> f64 {
    percentage_completed(&milestone.tasks)
}

/// The status a milestone should carry given its tasks and due date.
/// `CANCELLED` is a user decision and is never overridden.
pub fn derive_status(
    current: MilestoneStatus,
    tasks: &[Task],
    due_date: Option<NaiveDate>,
    today: NaiveDate,
) -> MilestoneStatus {
    if current == MilestoneStatus::Cancelled {
        return current;
    }

    let completed = tasks
        .iter()
        .filter(|task| task.status == TaskStatus::Completed)
        .count();
    let progress = match completed {
        _ if tasks.is_empty() => MilestoneStatus::Pending,
        n if n == tasks.len() => MilestoneStatus::Completed,
        0 => MilestoneStatus::Pending,
        _ => MilestoneStatus::InProgress,
    };

    match due_date {
        Some(due) if due < today && progress != MilestoneStatus::Completed => {
            MilestoneStatus::Overdue
        }
        _ => progress,
    }
}

fn load_owned_row(
    conn: &mut SqliteConnection,
    owner_id: i32,
    milestone_id: i32,
) -> Result<MilestoneRow, AppError> {
    let row = milestones::table
        .find(milestone_id)
        .select(MilestoneRow::as_select())
        .first(conn)
        .map_err(AppError::from_query("milestone"))?;
    require_owner(owner_id, row.user_id, "milestone")?;
    Ok(row)
}

fn load_tasks(conn: &mut SqliteConnection, milestone_id: i32) -> Result<Vec<Task>, AppError> {
    Ok(tasks::table
        .filter(tasks::milestone_id.eq(milestone_id))
        .select(Task::as_select())
        .order((tasks::creation_timestamp.asc(), tasks::id.asc()))
        .load(conn)?)
}

/// A task together with the owner of its milestone.
fn load_owned_task(
    conn: &mut SqliteConnection,
    owner_id: i32,
    task_id: i32,
) -> Result<Task, AppError> {
    let (task, milestone_owner) = tasks::table
        .inner_join(milestones::table)
        .filter(tasks::id.eq(task_id))
        .select((Task::as_select(), milestones::user_id))
        .first::<(Task, i32)>(conn)
        .map_err(AppError::from_query("task"))?;
    require_owner(owner_id, milestone_owner, "task")?;
    Ok(task)
}

fn load_task_in_milestone(
    conn: &mut SqliteConnection,
    owner_id: i32,
    milestone_id: i32,
    task_id: i32,
) -> Result<Task, AppError> {
    let task = load_owned_task(conn, owner_id, task_id)?;
    if task.milestone_id != milestone_id {
        return Err(AppError::NotFound("task"));
    }
    Ok(task)
}

/// Re-derives and stores the status of `milestone_id` from its current tasks.
fn refresh_status(conn: &mut SqliteConnection, milestone_id: i32) -> Result<(), AppError> {
    let row = milestones::table
        .find(milestone_id)
        .select(MilestoneRow::as_select())
        .first(conn)
        .map_err(AppError::from_query("milestone"))?;
    let tasks = load_tasks(conn, milestone_id)?;

    let derived = derive_status(row.status, &tasks, row.due_date, today());
    if derived != row.status {
        diesel::update(milestones::table.find(milestone_id))
            .set(milestones::status.eq(derived))
            .execute(conn)?;
        info!(milestone_id, from = %row.status, to = %derived, "milestone status refreshed");
    }
    Ok(())
}

pub fn create_milestone(
    conn: &mut SqliteConnection,
    owner_id: i32,
    title: &str,
    description: Option<&str>,
    due_date: Option<NaiveDate>,
) -> Result<Milestone, AppError> {
    validate_not_blank(title, "title")?;
    if let Some(description) = description {
        validate_not_blank(description, "description")?;
    }

    let new_milestone = NewMilestone {
        user_id: owner_id,
        title,
        description,
        creation_date: today(),
        due_date,
        status: MilestoneStatus::Pending,
    };

    let row = diesel::insert_into(milestones::table)
        .values(&new_milestone)
        .returning(MilestoneRow::as_returning())
        .get_result(conn)?;

    info!(milestone_id = row.id, user_id = owner_id, "milestone created");
    Ok(Milestone::assemble(row, Vec::new()))
}

pub fn get_milestone(
    conn: &mut SqliteConnection,
    owner_id: i32,
    milestone_id: i32,
) -> Result<Milestone, AppError> {
    let row = load_owned_row(conn, owner_id, milestone_id)?;
    let tasks = load_tasks(conn, milestone_id)?;
    Ok(Milestone::assemble(row, tasks))
}

/// The owner's milestones, newest creation date first.
pub fn list_milestones(
    conn: &mut SqliteConnection,
    owner_id: i32,
) -> Result<Vec<Milestone>, AppError> {
    let rows = milestones::table
        .filter(milestones::user_id.eq(owner_id))
        .select(MilestoneRow::as_select())
        .order((milestones::creation_date.desc(), milestones::id.desc()))
        .load(conn)?;

    let ids: Vec<i32> = rows.iter().map(|row| row.id).collect();
    let all_tasks = tasks::table
        .filter(tasks::milestone_id.eq_any(ids))
        .select(Task::as_select())
        .order((tasks::creation_timestamp.asc(), tasks::id.asc()))
        .load(conn)?;

    let mut by_milestone: HashMap<i32, Vec<Task>> = HashMap::new();
    for task in all_tasks {
        by_milestone.entry(task.milestone_id).or_default().push(task);
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let tasks = by_milestone.remove(&row.id).unwrap_or_default();
            Milestone::assemble(row, tasks)
        })
        .collect())
}

/// Applies the given fields. Without an explicit status the derived status
/// is recomputed, since the due date may have moved.
pub fn update_milestone(
    conn: &mut SqliteConnection,
    owner_id: i32,
    milestone_id: i32,
    changes: MilestoneChanges,
) -> Result<Milestone, AppError> {
    if let Some(title) = &changes.title {
        validate_not_blank(title, "title")?;
    }
    if let Some(description) = &changes.description {
        validate_not_blank(description, "description")?;
    }

    conn.transaction::<_, AppError, _>(|conn| {
        load_owned_row(conn, owner_id, milestone_id)?;
        let explicit_status = changes.status.is_some();
        if !changes.is_empty() {
            diesel::update(milestones::table.find(milestone_id))
                .set(&changes)
                .execute(conn)?;
        }
        if !explicit_status {
            refresh_status(conn, milestone_id)?;
        }
        get_milestone(conn, owner_id, milestone_id)
    })
}

pub fn update_milestone_status(
    conn: &mut SqliteConnection,
    owner_id: i32,
    milestone_id: i32,
    status: MilestoneStatus,
) -> Result<Milestone, AppError> {
    load_owned_row(conn, owner_id, milestone_id)?;
    diesel::update(milestones::table.find(milestone_id))
        .set(milestones::status.eq(status))
        .execute(conn)?;
    info!(milestone_id, %status, "milestone status set");
    get_milestone(conn, owner_id, milestone_id)
}

/// Removes the milestone and all of its tasks, or nothing at all.
pub fn delete_milestone(
    conn: &mut SqliteConnection,
    owner_id: i32,
    milestone_id: i32,
) -> Result<(), AppError> {
    conn.transaction::<_, AppError, _>(|conn| {
        load_owned_row(conn, owner_id, milestone_id)?;
        let removed_tasks = diesel::delete(tasks::table.filter(tasks::milestone_id.eq(milestone_id)))
            .execute(conn)?;
        diesel::delete(milestones::table.find(milestone_id)).execute(conn)?;
        info!(milestone_id, removed_tasks, "milestone deleted");
        Ok(())
    })
}

/// Appends a PENDING task to the milestone.
pub fn add_task(
    conn: &mut SqliteConnection,
    owner_id: i32,
    milestone_id: i32,
    description: &str,
    due_date: Option<NaiveDate>,
) -> Result<Task, AppError> {
    validate_not_blank(description, "description")?;

    conn.transaction::<_, AppError, _>(|conn| {
        load_owned_row(conn, owner_id, milestone_id)?;
        let new_task = NewTask {
            milestone_id,
            description,
            creation_timestamp: chrono::Utc::now().naive_utc(),
            due_date,
            status: TaskStatus::Pending,
        };
        let task = diesel::insert_into(tasks::table)
            .values(&new_task)
            .returning(Task::as_returning())
            .get_result(conn)?;
        refresh_status(conn, milestone_id)?;
        info!(task_id = task.id, milestone_id, "task added");
        Ok(task)
    })
}

pub fn list_tasks(
    conn: &mut SqliteConnection,
    owner_id: i32,
    milestone_id: i32,
) -> Result<Vec<Task>, AppError> {
    load_owned_row(conn, owner_id, milestone_id)?;
    load_tasks(conn, milestone_id)
}

pub fn get_task(
    conn: &mut SqliteConnection,
    owner_id: i32,
    milestone_id: i32,
    task_id: i32,
) -> Result<Task, AppError> {
    load_task_in_milestone(conn, owner_id, milestone_id, task_id)
}

pub fn update_task_status(
    conn: &mut SqliteConnection,
    owner_id: i32,
    task_id: i32,
    status: TaskStatus,
) -> Result<Task, AppError> {
    conn.transaction::<_, AppError, _>(|conn| {
        let task = load_owned_task(conn, owner_id, task_id)?;
        let updated = diesel::update(tasks::table.find(task_id))
            .set(tasks::status.eq(status))
            .returning(Task::as_returning())
            .get_result(conn)?;
        refresh_status(conn, task.milestone_id)?;
        Ok(updated)
    })
}

pub fn update_task(
    conn: &mut SqliteConnection,
    owner_id: i32,
    milestone_id: i32,
    task_id: i32,
    changes: TaskChanges,
) -> Result<Task, AppError> {
    if let Some(description) = &changes.description {
        validate_not_blank(description, "description")?;
    }

    conn.transaction::<_, AppError, _>(|conn| {
        let task = load_task_in_milestone(conn, owner_id, milestone_id, task_id)?;
        if changes.is_empty() {
            return Ok(task);
        }
        let updated = diesel::update(tasks::table.find(task_id))
            .set(&changes)
            .returning(Task::as_returning())
            .get_result(conn)?;
        refresh_status(conn, milestone_id)?;
        Ok(updated)
    })
}

pub fn delete_task(
    conn: &mut SqliteConnection,
    owner_id: i32,
    milestone_id: i32,
    task_id: i32,
) -> Result<(), AppError> {
    conn.transaction::<_, AppError, _>(|conn| {
        load_task_in_milestone(conn, owner_id, milestone_id, task_id)?;
        diesel::delete(tasks::table.find(task_id)).execute(conn)?;
        refresh_status(conn, milestone_id)?;
        info!(task_id, milestone_id, "task deleted");
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::test_pool;
    use crate::users::test_utils::insert_user;
    use chrono::Duration;

    fn task_with(status: TaskStatus) -> Task {
        Task {
            id: 1,
            milestone_id: 1,
            description: "step".to_string(),
            creation_timestamp: chrono::Utc::now().naive_utc(),
            due_date: None,
            status,
        }
    }

    #[test]
    fn test_completion_percentage() {
        let percentage = |completed: usize, total: usize| {
            let tasks: Vec<Task> = (0..total)
                .map(|i| {
                    task_with(if i < completed {
                        TaskStatus::Completed
                    } else {
                        TaskStatus::Pending
                    })
                })
                .collect();
            percentage_completed(&tasks)
        };

        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(0, 5), 0.0);
        assert_eq!(percentage(1, 4), 25.0);
        assert_eq!(percentage(3, 4), 75.0);
        assert_eq!(percentage(7, 7), 100.0);
        assert!((percentage(1, 3) - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_derive_status() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let yesterday = today - Duration::days(1);
        let done = task_with(TaskStatus::Completed);
        let open = task_with(TaskStatus::Pending);
        let pending = MilestoneStatus::Pending;

        assert_eq!(derive_status(pending, &[], None, today), MilestoneStatus::Pending);
        assert_eq!(
            derive_status(pending, &[done.clone(), done.clone()], None, today),
            MilestoneStatus::Completed
        );
        assert_eq!(
            derive_status(pending, &[done.clone(), open.clone()], None, today),
            MilestoneStatus::InProgress
        );
        assert_eq!(
            derive_status(MilestoneStatus::InProgress, &[open.clone()], None, today),
            MilestoneStatus::Pending
        );
        assert_eq!(
            derive_status(pending, &[open.clone()], Some(yesterday), today),
            MilestoneStatus::Overdue
        );
        assert_eq!(
            derive_status(pending, &[open.clone()], Some(today), today),
            MilestoneStatus::Pending
        );
        assert_eq!(
            derive_status(pending, &[done], Some(yesterday), today),
            MilestoneStatus::Completed
        );
        assert_eq!(
            derive_status(MilestoneStatus::Cancelled, &[open], Some(yesterday), today),
            MilestoneStatus::Cancelled
        );
    }

    #[test]
    fn test_milestone_with_tasks() {
        let pool = test_pool();
        let conn = &mut pool.get().unwrap();

        conn.test_transaction::<_, AppError, _>(|conn| {
            let user = insert_user(conn, "alice");
            let milestone = create_milestone(conn, user.id, "Run a 10k", Some("Spring race"), None)?;
            assert_eq!(milestone.status, MilestoneStatus::Pending);
            assert_eq!(milestone.creation_date, today());
            assert!(milestone.tasks.is_empty());
            assert_eq!(completion_percentage(&milestone), 0.0);

            let first = add_task(conn, user.id, milestone.id, "Buy shoes", None)?;
            let mut ids = vec![first.id];
            for step in ["Run 3k", "Run 5k", "Run 8k"] {
                ids.push(add_task(conn, user.id, milestone.id, step, None)?.id);
            }
            assert_eq!(first.status, TaskStatus::Pending);

            update_task_status(conn, user.id, first.id, TaskStatus::Completed)?;

            let milestone = get_milestone(conn, user.id, milestone.id)?;
            assert_eq!(milestone.tasks.iter().map(|t| t.id).collect::<Vec<_>>(), ids);
            assert_eq!(milestone.completion_percentage, 25.0);
            assert_eq!(completion_percentage(&milestone), 25.0);
            assert_eq!(milestone.status, MilestoneStatus::InProgress);

            for id in &ids[1..] {
                update_task_status(conn, user.id, *id, TaskStatus::Completed)?;
            }
            let milestone = get_milestone(conn, user.id, milestone.id)?;
            assert_eq!(milestone.completion_percentage, 100.0);
            assert_eq!(milestone.status, MilestoneStatus::Completed);
            Ok(())
        });
    }

    #[test]
    fn test_delete_milestone_removes_tasks() {
        let pool = test_pool();
        let conn = &mut pool.get().unwrap();

        conn.test_transaction::<_, AppError, _>(|conn| {
            let user = insert_user(conn, "alice");
            let milestone = create_milestone(conn, user.id, "Read more", None, None)?;
            let task = add_task(conn, user.id, milestone.id, "Pick a book", None)?;
            add_task(conn, user.id, milestone.id, "Read chapter one", None)?;

            delete_milestone(conn, user.id, milestone.id)?;

            let remaining: i64 = tasks::table
                .filter(tasks::milestone_id.eq(milestone.id))
                .count()
                .get_result(conn)?;
            assert_eq!(remaining, 0);
            assert!(matches!(
                get_milestone(conn, user.id, milestone.id),
                Err(AppError::NotFound("milestone"))
            ));
            assert!(matches!(
                update_task_status(conn, user.id, task.id, TaskStatus::Completed),
                Err(AppError::NotFound("task"))
            ));
            Ok(())
        });
    }

    #[test]
    fn test_other_users_cannot_touch_goals() {
        let pool = test_pool();
        let conn = &mut pool.get().unwrap();

        conn.test_transaction::<_, AppError, _>(|conn| {
            let alice = insert_user(conn, "alice");
            let mallory = insert_user(conn, "mallory");
            let milestone = create_milestone(conn, alice.id, "Private goal", None, None)?;
            let task = add_task(conn, alice.id, milestone.id, "Private step", None)?;

            assert!(matches!(
                get_milestone(conn, mallory.id, milestone.id),
                Err(AppError::NotFound(_))
            ));
            assert!(matches!(
                add_task(conn, mallory.id, milestone.id, "Sneaky", None),
                Err(AppError::NotFound(_))
            ));
            assert!(matches!(
                update_task_status(conn, mallory.id, task.id, TaskStatus::Completed),
                Err(AppError::NotFound(_))
            ));
            assert!(matches!(
                delete_milestone(conn, mallory.id, milestone.id),
                Err(AppError::NotFound(_))
            ));
            assert!(list_milestones(conn, mallory.id)?.is_empty());

            let intact = get_milestone(conn, alice.id, milestone.id)?;
            assert_eq!(intact.tasks.len(), 1);
            assert_eq!(intact.tasks[0].status, TaskStatus::Pending);
            Ok(())
        });
    }

    #[test]
    fn test_task_must_belong_to_milestone_in_path() {
        let pool = test_pool();
        let conn = &mut pool.get().unwrap();

        conn.test_transaction::<_, AppError, _>(|conn| {
            let user = insert_user(conn, "alice");
            let first = create_milestone(conn, user.id, "First", None, None)?;
            let second = create_milestone(conn, user.id, "Second", None, None)?;
            let task = add_task(conn, user.id, first.id, "Step", None)?;

            assert!(matches!(
                get_task(conn, user.id, second.id, task.id),
                Err(AppError::NotFound("task"))
            ));
            assert_eq!(get_task(conn, user.id, first.id, task.id)?, task);
            Ok(())
        });
    }

    #[test]
    fn test_partial_updates_and_task_delete() {
        let pool = test_pool();
        let conn = &mut pool.get().unwrap();

        conn.test_transaction::<_, AppError, _>(|conn| {
            let user = insert_user(conn, "alice");
            let milestone = create_milestone(conn, user.id, "Sleep better", None, None)?;
            let task = add_task(conn, user.id, milestone.id, "No screens", None)?;
            let other = add_task(conn, user.id, milestone.id, "Same bedtime", None)?;

            let renamed = update_milestone(
                conn,
                user.id,
                milestone.id,
                MilestoneChanges {
                    title: Some("Sleep well".to_string()),
                    ..Default::default()
                },
            )?;
            assert_eq!(renamed.title, "Sleep well");
            assert_eq!(renamed.description, None);

            let past = today() - Duration::days(3);
            let overdue = update_milestone(
                conn,
                user.id,
                milestone.id,
                MilestoneChanges {
                    due_date: Some(past),
                    ..Default::default()
                },
            )?;
            assert_eq!(overdue.status, MilestoneStatus::Overdue);

            let cancelled =
                update_milestone_status(conn, user.id, milestone.id, MilestoneStatus::Cancelled)?;
            assert_eq!(cancelled.status, MilestoneStatus::Cancelled);

            let edited = update_task(
                conn,
                user.id,
                milestone.id,
                task.id,
                TaskChanges {
                    description: Some("No screens after 10".to_string()),
                    status: Some(TaskStatus::Completed),
                    ..Default::default()
                },
            )?;
            assert_eq!(edited.description, "No screens after 10");
            assert_eq!(edited.status, TaskStatus::Completed);
            assert_eq!(edited.creation_timestamp, task.creation_timestamp);

            delete_task(conn, user.id, milestone.id, other.id)?;
            let milestone = get_milestone(conn, user.id, milestone.id)?;
            assert_eq!(milestone.tasks.len(), 1);
            assert_eq!(milestone.completion_percentage, 100.0);
            assert_eq!(milestone.status, MilestoneStatus::Cancelled);
            Ok(())
        });
    }

    #[test]
    fn test_blank_inputs_are_rejected() {
        let pool = test_pool();
        let conn = &mut pool.get().unwrap();

        conn.test_transaction::<_, AppError, _>(|conn| {
            let user = insert_user(conn, "alice");
            assert!(matches!(
                create_milestone(conn, user.id, " ", None, None),
                Err(AppError::Validation(_))
            ));
            let milestone = create_milestone(conn, user.id, "Goal", None, None)?;
            assert!(matches!(
                add_task(conn, user.id, milestone.id, "", None),
                Err(AppError::Validation(_))
            ));
            assert!(list_tasks(conn, user.id, milestone.id)?.is_empty());
            Ok(())
        });
    }
}
