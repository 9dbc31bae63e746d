use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Lifecycle state of a task.
///
/// ```text
/// PENDING → IN_PROGRESS → REVIEW → DONE
///               ↑           │        │
///               └───────────┘        │   (sent back)
///               ↑                    │
///               └────────────────────┘   (reopen)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Review,
    /// Terminal until explicitly reopened.
    Done,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::InProgress,
        TaskStatus::Review,
        TaskStatus::Done,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Review => "REVIEW",
            TaskStatus::Done => "DONE",
        }
    }

    pub fn parse(s: &str) -> Option<TaskStatus> {
        match s {
            "PENDING" => Some(TaskStatus::Pending),
            "IN_PROGRESS" => Some(TaskStatus::InProgress),
            "REVIEW" => Some(TaskStatus::Review),
            "DONE" => Some(TaskStatus::Done),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done)
    }

    /// Checks the transition table. Staying in the same state is not a transition.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        matches!(
            (self, target),
            (TaskStatus::Pending, TaskStatus::InProgress)
                | (TaskStatus::InProgress, TaskStatus::Review)
                | (TaskStatus::Review, TaskStatus::Done)
                | (TaskStatus::Review, TaskStatus::InProgress)
                | (TaskStatus::Done, TaskStatus::InProgress)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown task status: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "LOW",
            TaskPriority::Medium => "MEDIUM",
            TaskPriority::High => "HIGH",
        }
    }

    pub fn parse(s: &str) -> Option<TaskPriority> {
        match s {
            "LOW" => Some(TaskPriority::Low),
            "MEDIUM" => Some(TaskPriority::Medium),
            "HIGH" => Some(TaskPriority::High),
            _ => None,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown task priority: {s}"))
    }
}

/// Distinguishes an absent field from an explicit `null` in update payloads.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// Entities

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    pub created_by_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskComment {
    pub id: String,
    pub task_id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub id: String,
    pub resource: String,
    pub action: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user watching (or otherwise attached to) a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserTask {
    pub user_id: String,
    pub task_id: String,
    pub created_at: DateTime<Utc>,
}

/// Role membership edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRole {
    pub user_id: String,
    pub role_id: String,
    pub created_at: DateTime<Utc>,
}

/// Permission grant edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: String,
    pub permission_id: String,
    pub created_at: DateTime<Utc>,
}

// Inserts

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    /// Already hashed; the store treats it as opaque.
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    pub assignee_id: Option<String>,
    pub created_by_id: String,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewComment {
    pub task_id: String,
    pub user_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRole {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewPermission {
    pub resource: String,
    pub action: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUserTask {
    pub user_id: String,
    pub task_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUserRole {
    pub user_id: String,
    pub role_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRolePermission {
    pub role_id: String,
    pub permission_id: String,
}

// Updates: `None` leaves a field untouched, `Some(None)` clears a nullable field.

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<DateTime<Utc>>>,
    /// Accepted only when equal to the stored value.
    pub created_by_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommentUpdate {
    pub content: Option<String>,
    /// Accepted only when equal to the stored value.
    pub task_id: Option<String>,
    /// Accepted only when equal to the stored value.
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionUpdate {
    pub resource: Option<String>,
    pub action: Option<String>,
}

// Filters

#[derive(Debug, Clone, Default)]
pub struct UserFilter {
    pub ids: Option<Vec<String>>,
    pub email: Option<String>,
    pub email_contains: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub ids: Option<Vec<String>>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    /// `Some(None)` selects unassigned tasks.
    pub assignee_id: Option<Option<String>>,
    pub created_by_id: Option<String>,
    pub title_contains: Option<String>,
    pub due_before: Option<DateTime<Utc>>,
    /// Tasks with a UserTask row for this user.
    pub watched_by: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CommentFilter {
    pub ids: Option<Vec<String>>,
    pub task_id: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RoleFilter {
    pub ids: Option<Vec<String>>,
    pub name: Option<String>,
    pub name_contains: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PermissionFilter {
    pub ids: Option<Vec<String>>,
    pub resource: Option<String>,
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserTaskFilter {
    pub user_id: Option<String>,
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UserRoleFilter {
    pub user_id: Option<String>,
    pub role_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RolePermissionFilter {
    pub role_ids: Option<Vec<String>>,
    pub permission_id: Option<String>,
}

// Sortable fields

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserOrderField {
    Email,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOrderField {
    Title,
    Status,
    Priority,
    DueDate,
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentOrderField {
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleOrderField {
    Name,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOrderField {
    Resource,
    Action,
    CreatedAt,
}

/// Join rows only sort by insertion time; the composite key breaks ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOrderField {
    CreatedAt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        use TaskStatus::*;

        let allowed = [
            (Pending, InProgress),
            (InProgress, Review),
            (Review, Done),
            (Review, InProgress),
            (Done, InProgress),
        ];

        for from in TaskStatus::ALL {
            for to in TaskStatus::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_done_does_not_go_back_to_review() {
        assert!(!TaskStatus::Done.can_transition_to(TaskStatus::Review));
        assert!(TaskStatus::Done.is_terminal());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(TaskStatus::parse("IN_PROGRESS"), Some(TaskStatus::InProgress));
        assert_eq!(TaskStatus::parse("in_progress"), None);
        assert_eq!("REVIEW".parse::<TaskStatus>(), Ok(TaskStatus::Review));
        assert_eq!(TaskPriority::parse("HIGH"), Some(TaskPriority::High));
    }

    #[test]
    fn test_status_serde_matches_storage() {
        for status in TaskStatus::ALL {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        let json = serde_json::to_string(&TaskPriority::Low).unwrap();
        assert_eq!(json, "\"LOW\"");
    }

    #[test]
    fn test_task_update_distinguishes_null_from_absent() {
        let update: TaskUpdate = serde_json::from_str(r#"{"assignee_id": null}"#).unwrap();
        assert_eq!(update.assignee_id, Some(None));
        assert_eq!(update.due_date, None);

        let update: TaskUpdate = serde_json::from_str(r#"{"assignee_id": "u1"}"#).unwrap();
        assert_eq!(update.assignee_id, Some(Some("u1".to_string())));

        let update: TaskUpdate = serde_json::from_str("{}").unwrap();
        assert_eq!(update.assignee_id, None);
    }

    #[test]
    fn test_password_not_serialized() {
        let user = User {
            id: "u1".to_string(),
            email: "a@example.com".to_string(),
            password: "$argon2id$secret".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2id"));
    }
}
