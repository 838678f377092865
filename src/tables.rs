use crate::schema::*;
use chrono::{NaiveDate, NaiveDateTime};
use diesel::deserialize::{self, FromSql};
use diesel::prelude::*;
use diesel::serialize::{self, IsNull, Output, ToSql};
use diesel::sql_types::Text;
use diesel::backend::Backend;
use diesel::sqlite::Sqlite;
use diesel::{AsExpression, FromSqlRow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown {kind} value '{value}'")]
pub struct StatusParseError {
    kind: &'static str,
    value: String,
}

// Enums persisted as their upper-case name in a TEXT column.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = StatusParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(StatusParseError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl ToSql<Text, Sqlite> for $name {
            fn to_sql<'b>(&'b self, out: &mut Output<'b, '_, Sqlite>) -> serialize::Result {
                out.set_value(self.as_str());
                Ok(IsNull::No)
            }
        }

        impl FromSql<Text, Sqlite> for $name {
            fn from_sql(bytes: <Sqlite as Backend>::RawValue<'_>) -> deserialize::Result<Self> {
                let text = <String as FromSql<Text, Sqlite>>::from_sql(bytes)?;
                Ok(text.parse()?)
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize, Deserialize)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    User,
    Admin,
}

text_enum!(Role, "role", { User => "USER", Admin => "ADMIN" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize, Deserialize)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneStatus {
    Pending,
    InProgress,
    Completed,
    Overdue,
    Cancelled,
}

text_enum!(MilestoneStatus, "milestone status", {
    Pending => "PENDING",
    InProgress => "IN_PROGRESS",
    Completed => "COMPLETED",
    Overdue => "OVERDUE",
    Cancelled => "CANCELLED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, AsExpression, FromSqlRow, Serialize, Deserialize)]
#[diesel(sql_type = Text)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Completed,
    Overdue,
    Cancelled,
}

text_enum!(TaskStatus, "task status", {
    Pending => "PENDING",
    Completed => "COMPLETED",
    Overdue => "OVERDUE",
    Cancelled => "CANCELLED",
});

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(Sqlite))]
pub struct User {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = users)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: Role,
    pub created_at: NaiveDateTime,
}

/// A user as exposed over the API; never carries the password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: NaiveDateTime,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
            created_at: user.created_at,
        }
    }
}

/// Row shape of `journal_entries`. List-valued annotations are stored as JSON
/// text and decoded by [`crate::journal_entries::JournalEntry`].
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = journal_entries)]
#[diesel(check_for_backend(Sqlite))]
pub struct JournalEntryRow {
    pub id: i32,
    pub user_id: i32,
    pub entry_date: NaiveDate,
    pub creation_timestamp: NaiveDateTime,
    pub raw_text: String,
    pub mood_score: Option<f64>,
    pub emotions: Option<String>,
    pub core_concerns: Option<String>,
    pub summary: Option<String>,
    pub growth_tips: Option<String>,
    pub key_phrases: Option<String>,
    pub cluster_id: Option<i32>,
}

#[derive(Insertable)]
#[diesel(table_name = journal_entries)]
pub struct NewJournalEntry<'a> {
    pub user_id: i32,
    pub entry_date: NaiveDate,
    pub creation_timestamp: NaiveDateTime,
    pub raw_text: &'a str,
}

/// The full annotation column set, written in a single UPDATE.
#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = journal_entries, treat_none_as_null = true)]
pub struct AnnotationChanges {
    pub mood_score: Option<f64>,
    pub emotions: Option<String>,
    pub core_concerns: Option<String>,
    pub summary: Option<String>,
    pub growth_tips: Option<String>,
    pub key_phrases: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = milestones)]
#[diesel(check_for_backend(Sqlite))]
pub struct MilestoneRow {
    pub id: i32,
    pub user_id: i32,
    pub title: String,
    pub description: Option<String>,
    pub creation_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub status: MilestoneStatus,
}

#[derive(Insertable)]
#[diesel(table_name = milestones)]
pub struct NewMilestone<'a> {
    pub user_id: i32,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub creation_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub status: MilestoneStatus,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(Sqlite))]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i32,
    pub milestone_id: i32,
    pub description: String,
    pub creation_timestamp: NaiveDateTime,
    pub due_date: Option<NaiveDate>,
    pub status: TaskStatus,
}

#[derive(Insertable)]
#[diesel(table_name = tasks)]
pub struct NewTask<'a> {
    pub milestone_id: i32,
    pub description: &'a str,
    pub creation_timestamp: NaiveDateTime,
    pub due_date: Option<NaiveDate>,
    pub status: TaskStatus,
}
