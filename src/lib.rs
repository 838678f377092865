pub mod analysis;
pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod goals;
pub mod journal_entries;
pub mod schema;
pub mod tables;
pub mod users;

pub const BASE_URL: &str = "http://localhost:37240";
pub const AUTH_API: &str = "api/auth";
pub const PROFILE_API: &str = "api/users/profile";
pub const JOURNAL_API: &str = "api/journal";
pub const MILESTONES_API: &str = "api/milestones";

pub use crate::error::AppError;
pub use crate::goals::Milestone;
pub use crate::journal_entries::{Annotations, JournalEntry};
pub use crate::tables::{MilestoneStatus, Role, Task, TaskStatus};
