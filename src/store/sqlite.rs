use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, Row, TransactionBehavior, params};
use uuid::Uuid;

use super::query::{
    self, Assignments, OrderField, Predicates, Table, ToPredicates, key_predicates,
};
use super::schema::SCHEMA;
use super::tx::{IsolationLevel, OpContext, TxOptions};
use super::{
    CommentQuery, PermissionQuery, Repository, RolePermissionQuery, RoleQuery, Store, TaskQuery,
    UserQuery, UserRoleQuery, UserTaskQuery,
};
use crate::config::DatabaseConfig;
use crate::error::{Error, Result};
use crate::types::*;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of SQLite VM instructions between deadline checks.
const PROGRESS_INTERVAL: i32 = 1_000;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        Self::configure(Connection::open(db_path)?, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::configure(Connection::open_in_memory()?, DEFAULT_BUSY_TIMEOUT)
    }

    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        let conn = match &config.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };
        Self::configure(conn, Duration::from_millis(config.busy_timeout_ms))
    }

    fn configure(conn: Connection, busy_timeout: Duration) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "sqlite connection configured");
        conn.busy_timeout(busy_timeout)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns a guard to the underlying database connection.
    /// This allows consuming applications to execute custom SQL.
    pub fn connection(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn()
    }

    fn run<T>(
        conn: &mut Connection,
        options: &TxOptions,
        body: impl FnOnce(&dyn Repository) -> Result<T>,
    ) -> Result<T> {
        let behavior = match options.isolation {
            IsolationLevel::ReadCommitted => TransactionBehavior::Deferred,
            IsolationLevel::Serializable => TransactionBehavior::Immediate,
        };
        let tx = conn.transaction_with_behavior(behavior)?;
        let value = body(&SqliteRepository { conn: &tx })?;

        // Dropping the transaction rolls it back.
        options.context.check()?;
        tx.commit()?;
        Ok(value)
    }
}

/// Aborts the running statement once `context` expires.
fn install_interrupt(conn: &Connection, context: &OpContext) {
    let context = AssertUnwindSafe(context.clone());
    conn.progress_handler(PROGRESS_INTERVAL, Some(move || context.is_expired()));
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

/// Fixed-width RFC 3339 so that text order matches time order.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

fn opt_text(s: &Option<String>) -> Value {
    s.as_ref().map_or(Value::Null, |s| Value::Text(s.clone()))
}

fn opt_datetime(dt: &Option<DateTime<Utc>>) -> Value {
    dt.as_ref()
        .map_or(Value::Null, |dt| Value::Text(format_datetime(dt)))
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn id_predicates(id: &str) -> Predicates {
    let mut preds = Predicates::new();
    preds.eq("id", text(id));
    preds
}

fn insert_verb(skip_duplicates: bool) -> &'static str {
    if skip_duplicates {
        " ON CONFLICT DO NOTHING"
    } else {
        ""
    }
}

impl ToSql for TaskStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TaskStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        TaskStatus::parse(s).ok_or_else(|| FromSqlError::Other(format!("invalid task status: {s}").into()))
    }
}

impl ToSql for TaskPriority {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for TaskPriority {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        TaskPriority::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("invalid task priority: {s}").into()))
    }
}

// Row mapping

impl Table for User {
    const NAME: &'static str = "users";
    const COLUMNS: &'static str = "id, email, password, created_at, updated_at";
    const KEY: &'static [&'static str] = &["id"];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            password: row.get(2)?,
            created_at: parse_datetime(&row.get::<_, String>(3)?),
            updated_at: parse_datetime(&row.get::<_, String>(4)?),
        })
    }
}

impl Table for Task {
    const NAME: &'static str = "tasks";
    const COLUMNS: &'static str = "id, title, description, status, priority, assignee_id, created_by_id, due_date, created_at, updated_at";
    const KEY: &'static [&'static str] = &["id"];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Task {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            status: row.get(3)?,
            priority: row.get(4)?,
            assignee_id: row.get(5)?,
            created_by_id: row.get(6)?,
            due_date: row.get::<_, Option<String>>(7)?.map(|s| parse_datetime(&s)),
            created_at: parse_datetime(&row.get::<_, String>(8)?),
            updated_at: parse_datetime(&row.get::<_, String>(9)?),
        })
    }
}

impl Table for TaskComment {
    const NAME: &'static str = "task_comments";
    const COLUMNS: &'static str = "id, task_id, user_id, content, created_at, updated_at";
    const KEY: &'static [&'static str] = &["id"];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(TaskComment {
            id: row.get(0)?,
            task_id: row.get(1)?,
            user_id: row.get(2)?,
            content: row.get(3)?,
            created_at: parse_datetime(&row.get::<_, String>(4)?),
            updated_at: parse_datetime(&row.get::<_, String>(5)?),
        })
    }
}

impl Table for Role {
    const NAME: &'static str = "roles";
    const COLUMNS: &'static str = "id, name, description, created_at, updated_at";
    const KEY: &'static [&'static str] = &["id"];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Role {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            created_at: parse_datetime(&row.get::<_, String>(3)?),
            updated_at: parse_datetime(&row.get::<_, String>(4)?),
        })
    }
}

impl Table for Permission {
    const NAME: &'static str = "permissions";
    const COLUMNS: &'static str = "id, resource, action, created_at, updated_at";
    const KEY: &'static [&'static str] = &["id"];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Permission {
            id: row.get(0)?,
            resource: row.get(1)?,
            action: row.get(2)?,
            created_at: parse_datetime(&row.get::<_, String>(3)?),
            updated_at: parse_datetime(&row.get::<_, String>(4)?),
        })
    }
}

impl Table for UserTask {
    const NAME: &'static str = "user_tasks";
    const COLUMNS: &'static str = "user_id, task_id, created_at";
    const KEY: &'static [&'static str] = &["user_id", "task_id"];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(UserTask {
            user_id: row.get(0)?,
            task_id: row.get(1)?,
            created_at: parse_datetime(&row.get::<_, String>(2)?),
        })
    }
}

impl Table for UserRole {
    const NAME: &'static str = "user_roles";
    const COLUMNS: &'static str = "user_id, role_id, created_at";
    const KEY: &'static [&'static str] = &["user_id", "role_id"];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(UserRole {
            user_id: row.get(0)?,
            role_id: row.get(1)?,
            created_at: parse_datetime(&row.get::<_, String>(2)?),
        })
    }
}

impl Table for RolePermission {
    const NAME: &'static str = "role_permissions";
    const COLUMNS: &'static str = "role_id, permission_id, created_at";
    const KEY: &'static [&'static str] = &["role_id", "permission_id"];

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RolePermission {
            role_id: row.get(0)?,
            permission_id: row.get(1)?,
            created_at: parse_datetime(&row.get::<_, String>(2)?),
        })
    }
}

// Ordering

impl OrderField for UserOrderField {
    fn expr(self) -> &'static str {
        match self {
            UserOrderField::Email => "email",
            UserOrderField::CreatedAt => "created_at",
        }
    }
}

impl OrderField for TaskOrderField {
    fn expr(self) -> &'static str {
        match self {
            TaskOrderField::Title => "title",
            TaskOrderField::Status => {
                "CASE status WHEN 'PENDING' THEN 0 WHEN 'IN_PROGRESS' THEN 1 WHEN 'REVIEW' THEN 2 ELSE 3 END"
            }
            TaskOrderField::Priority => {
                "CASE priority WHEN 'LOW' THEN 0 WHEN 'MEDIUM' THEN 1 ELSE 2 END"
            }
            TaskOrderField::DueDate => "COALESCE(due_date, '')",
            TaskOrderField::CreatedAt => "created_at",
            TaskOrderField::UpdatedAt => "updated_at",
        }
    }
}

impl OrderField for CommentOrderField {
    fn expr(self) -> &'static str {
        match self {
            CommentOrderField::CreatedAt => "created_at",
        }
    }
}

impl OrderField for RoleOrderField {
    fn expr(self) -> &'static str {
        match self {
            RoleOrderField::Name => "name",
            RoleOrderField::CreatedAt => "created_at",
        }
    }
}

impl OrderField for PermissionOrderField {
    fn expr(self) -> &'static str {
        match self {
            PermissionOrderField::Resource => "resource",
            PermissionOrderField::Action => "action",
            PermissionOrderField::CreatedAt => "created_at",
        }
    }
}

impl OrderField for JoinOrderField {
    fn expr(self) -> &'static str {
        match self {
            JoinOrderField::CreatedAt => "created_at",
        }
    }
}

// Filters

impl ToPredicates for UserFilter {
    fn predicates(&self) -> Predicates {
        let mut preds = Predicates::new();
        if let Some(ids) = &self.ids {
            preds.in_list("id", ids);
        }
        if let Some(email) = &self.email {
            preds.eq("email", text(email));
        }
        if let Some(needle) = &self.email_contains {
            preds.contains("email", needle);
        }
        preds
    }
}

impl ToPredicates for TaskFilter {
    fn predicates(&self) -> Predicates {
        let mut preds = Predicates::new();
        if let Some(ids) = &self.ids {
            preds.in_list("id", ids);
        }
        if let Some(status) = self.status {
            preds.eq("status", text(status.as_str()));
        }
        if let Some(priority) = self.priority {
            preds.eq("priority", text(priority.as_str()));
        }
        match &self.assignee_id {
            Some(Some(assignee)) => {
                preds.eq("assignee_id", text(assignee));
            }
            Some(None) => {
                preds.is_null("assignee_id");
            }
            None => {}
        }
        if let Some(creator) = &self.created_by_id {
            preds.eq("created_by_id", text(creator));
        }
        if let Some(needle) = &self.title_contains {
            preds.contains("title", needle);
        }
        if let Some(due) = &self.due_before {
            preds.lt("due_date", Value::Text(format_datetime(due)));
        }
        if let Some(watcher) = &self.watched_by {
            preds.raw(
                "id IN (SELECT task_id FROM user_tasks WHERE user_id = ?)",
                vec![text(watcher)],
            );
        }
        preds
    }
}

impl ToPredicates for CommentFilter {
    fn predicates(&self) -> Predicates {
        let mut preds = Predicates::new();
        if let Some(ids) = &self.ids {
            preds.in_list("id", ids);
        }
        if let Some(task_id) = &self.task_id {
            preds.eq("task_id", text(task_id));
        }
        if let Some(user_id) = &self.user_id {
            preds.eq("user_id", text(user_id));
        }
        preds
    }
}

impl ToPredicates for RoleFilter {
    fn predicates(&self) -> Predicates {
        let mut preds = Predicates::new();
        if let Some(ids) = &self.ids {
            preds.in_list("id", ids);
        }
        if let Some(name) = &self.name {
            preds.eq("name", text(name));
        }
        if let Some(needle) = &self.name_contains {
            preds.contains("name", needle);
        }
        preds
    }
}

impl ToPredicates for PermissionFilter {
    fn predicates(&self) -> Predicates {
        let mut preds = Predicates::new();
        if let Some(ids) = &self.ids {
            preds.in_list("id", ids);
        }
        if let Some(resource) = &self.resource {
            preds.eq("resource", text(resource));
        }
        if let Some(action) = &self.action {
            preds.eq("action", text(action));
        }
        preds
    }
}

impl ToPredicates for UserTaskFilter {
    fn predicates(&self) -> Predicates {
        let mut preds = Predicates::new();
        if let Some(user_id) = &self.user_id {
            preds.eq("user_id", text(user_id));
        }
        if let Some(task_id) = &self.task_id {
            preds.eq("task_id", text(task_id));
        }
        preds
    }
}

impl ToPredicates for UserRoleFilter {
    fn predicates(&self) -> Predicates {
        let mut preds = Predicates::new();
        if let Some(user_id) = &self.user_id {
            preds.eq("user_id", text(user_id));
        }
        if let Some(role_id) = &self.role_id {
            preds.eq("role_id", text(role_id));
        }
        preds
    }
}

impl ToPredicates for RolePermissionFilter {
    fn predicates(&self) -> Predicates {
        let mut preds = Predicates::new();
        if let Some(role_ids) = &self.role_ids {
            preds.in_list("role_id", role_ids);
        }
        if let Some(permission_id) = &self.permission_id {
            preds.eq("permission_id", text(permission_id));
        }
        preds
    }
}

// Update payloads

fn user_assignments(data: &UserUpdate) -> Assignments {
    let mut set = Assignments::new();
    set.set_opt("email", &data.email)
        .set_opt("password", &data.password)
        .set("updated_at", format_datetime(&Utc::now()));
    set
}

fn task_assignments(data: &TaskUpdate) -> Assignments {
    let mut set = Assignments::new();
    set.set_opt("title", &data.title)
        .set_opt("description", &data.description);
    if let Some(status) = data.status {
        set.set("status", text(status.as_str()));
    }
    if let Some(priority) = data.priority {
        set.set("priority", text(priority.as_str()));
    }
    if let Some(assignee) = &data.assignee_id {
        set.set("assignee_id", opt_text(assignee));
    }
    if let Some(due) = &data.due_date {
        set.set("due_date", opt_datetime(due));
    }
    set.set("updated_at", format_datetime(&Utc::now()));
    set
}

fn comment_assignments(data: &CommentUpdate) -> Assignments {
    let mut set = Assignments::new();
    set.set_opt("content", &data.content)
        .set("updated_at", format_datetime(&Utc::now()));
    set
}

fn role_assignments(data: &RoleUpdate) -> Assignments {
    let mut set = Assignments::new();
    set.set_opt("name", &data.name)
        .set_opt("description", &data.description)
        .set("updated_at", format_datetime(&Utc::now()));
    set
}

fn permission_assignments(data: &PermissionUpdate) -> Assignments {
    let mut set = Assignments::new();
    set.set_opt("resource", &data.resource)
        .set_opt("action", &data.action)
        .set("updated_at", format_datetime(&Utc::now()));
    set
}

/// Repository over one open transaction.
struct SqliteRepository<'c> {
    conn: &'c Connection,
}

impl SqliteRepository<'_> {
    fn insert_user(&self, data: &NewUser, skip_duplicates: bool) -> Result<(User, usize)> {
        let now = Utc::now();
        let user = User {
            id: new_id(),
            email: data.email.clone(),
            password: data.password.clone(),
            created_at: now,
            updated_at: now,
        };
        let sql = format!(
            "INSERT INTO users (id, email, password, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5){}",
            insert_verb(skip_duplicates)
        );
        let rows = self.conn.execute(
            &sql,
            params![
                user.id,
                user.email,
                user.password,
                format_datetime(&user.created_at),
                format_datetime(&user.updated_at),
            ],
        )?;
        Ok((user, rows))
    }

    fn insert_task(&self, data: &NewTask, skip_duplicates: bool) -> Result<(Task, usize)> {
        let now = Utc::now();
        let task = Task {
            id: new_id(),
            title: data.title.clone(),
            description: data.description.clone(),
            status: data.status,
            priority: data.priority,
            assignee_id: data.assignee_id.clone(),
            created_by_id: data.created_by_id.clone(),
            due_date: data.due_date,
            created_at: now,
            updated_at: now,
        };
        let sql = format!(
            "INSERT INTO tasks (id, title, description, status, priority, assignee_id, created_by_id, due_date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10){}",
            insert_verb(skip_duplicates)
        );
        let rows = self.conn.execute(
            &sql,
            params![
                task.id,
                task.title,
                task.description,
                task.status,
                task.priority,
                task.assignee_id,
                task.created_by_id,
                task.due_date.as_ref().map(format_datetime),
                format_datetime(&task.created_at),
                format_datetime(&task.updated_at),
            ],
        )?;
        Ok((task, rows))
    }

    fn insert_comment(&self, data: &NewComment, skip_duplicates: bool) -> Result<(TaskComment, usize)> {
        let now = Utc::now();
        let comment = TaskComment {
            id: new_id(),
            task_id: data.task_id.clone(),
            user_id: data.user_id.clone(),
            content: data.content.clone(),
            created_at: now,
            updated_at: now,
        };
        let sql = format!(
            "INSERT INTO task_comments (id, task_id, user_id, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6){}",
            insert_verb(skip_duplicates)
        );
        let rows = self.conn.execute(
            &sql,
            params![
                comment.id,
                comment.task_id,
                comment.user_id,
                comment.content,
                format_datetime(&comment.created_at),
                format_datetime(&comment.updated_at),
            ],
        )?;
        Ok((comment, rows))
    }

    fn insert_role(&self, data: &NewRole, skip_duplicates: bool) -> Result<(Role, usize)> {
        let now = Utc::now();
        let role = Role {
            id: new_id(),
            name: data.name.clone(),
            description: data.description.clone(),
            created_at: now,
            updated_at: now,
        };
        let sql = format!(
            "INSERT INTO roles (id, name, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5){}",
            insert_verb(skip_duplicates)
        );
        let rows = self.conn.execute(
            &sql,
            params![
                role.id,
                role.name,
                role.description,
                format_datetime(&role.created_at),
                format_datetime(&role.updated_at),
            ],
        )?;
        Ok((role, rows))
    }

    fn insert_permission(
        &self,
        data: &NewPermission,
        skip_duplicates: bool,
    ) -> Result<(Permission, usize)> {
        let now = Utc::now();
        let permission = Permission {
            id: new_id(),
            resource: data.resource.clone(),
            action: data.action.clone(),
            created_at: now,
            updated_at: now,
        };
        let sql = format!(
            "INSERT INTO permissions (id, resource, action, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5){}",
            insert_verb(skip_duplicates)
        );
        let rows = self.conn.execute(
            &sql,
            params![
                permission.id,
                permission.resource,
                permission.action,
                format_datetime(&permission.created_at),
                format_datetime(&permission.updated_at),
            ],
        )?;
        Ok((permission, rows))
    }

    /// Inserts a join row; `columns` names the two key columns.
    fn insert_join(
        &self,
        table: &str,
        columns: (&str, &str),
        key: (&str, &str),
        skip_duplicates: bool,
    ) -> Result<(DateTime<Utc>, usize)> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO {table} ({}, {}, created_at) VALUES (?1, ?2, ?3){}",
            columns.0,
            columns.1,
            insert_verb(skip_duplicates)
        );
        let rows = self
            .conn
            .execute(&sql, params![key.0, key.1, format_datetime(&now)])?;
        Ok((now, rows))
    }
}

impl Repository for SqliteRepository<'_> {
    // User operations

    fn find_user(&self, id: &str) -> Result<Option<User>> {
        query::select_one(self.conn, &id_predicates(id))
    }

    fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let mut preds = Predicates::new();
        preds.eq("email", text(email));
        query::select_one(self.conn, &preds)
    }

    fn find_many_users(&self, query: &UserQuery) -> Result<Vec<User>> {
        query::select_many(self.conn, query)
    }

    fn count_users(&self, filter: &UserFilter) -> Result<u64> {
        query::count::<User>(self.conn, &filter.predicates())
    }

    fn create_user(&self, data: &NewUser) -> Result<User> {
        Ok(self.insert_user(data, false)?.0)
    }

    fn create_many_users(&self, data: &[NewUser], skip_duplicates: bool) -> Result<usize> {
        data.iter().try_fold(0, |n, item| {
            Ok(n + self.insert_user(item, skip_duplicates)?.1)
        })
    }

    fn update_user(&self, id: &str, data: &UserUpdate) -> Result<User> {
        let rows = user_assignments(data).execute(self.conn, User::NAME, &id_predicates(id))?;
        if rows == 0 {
            return Err(Error::not_found("user", id));
        }
        self.find_user(id)?
            .ok_or_else(|| Error::not_found("user", id))
    }

    fn update_many_users(&self, filter: &UserFilter, data: &UserUpdate) -> Result<usize> {
        user_assignments(data).execute(self.conn, User::NAME, &filter.predicates())
    }

    fn delete_user(&self, id: &str) -> Result<bool> {
        let rows = query::delete::<User>(self.conn, &id_predicates(id)).map_err(|e| match e {
            Error::ReferentialViolation(_) => Error::ReferentialViolation(format!(
                "user {id} is the creator of existing tasks"
            )),
            other => other,
        })?;
        Ok(rows > 0)
    }

    fn delete_many_users(&self, filter: &UserFilter) -> Result<usize> {
        query::delete::<User>(self.conn, &filter.predicates())
    }

    // Task operations

    fn find_task(&self, id: &str) -> Result<Option<Task>> {
        query::select_one(self.conn, &id_predicates(id))
    }

    fn find_many_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        query::select_many(self.conn, query)
    }

    fn count_tasks(&self, filter: &TaskFilter) -> Result<u64> {
        query::count::<Task>(self.conn, &filter.predicates())
    }

    fn create_task(&self, data: &NewTask) -> Result<Task> {
        Ok(self.insert_task(data, false)?.0)
    }

    fn create_many_tasks(&self, data: &[NewTask], skip_duplicates: bool) -> Result<usize> {
        data.iter().try_fold(0, |n, item| {
            Ok(n + self.insert_task(item, skip_duplicates)?.1)
        })
    }

    fn update_task(&self, id: &str, data: &TaskUpdate) -> Result<Task> {
        let current = self
            .find_task(id)?
            .ok_or_else(|| Error::not_found("task", id))?;
        if data
            .created_by_id
            .as_ref()
            .is_some_and(|c| *c != current.created_by_id)
        {
            return Err(Error::ImmutableFieldViolation("created_by_id"));
        }

        task_assignments(data).execute(self.conn, Task::NAME, &id_predicates(id))?;
        self.find_task(id)?
            .ok_or_else(|| Error::not_found("task", id))
    }

    fn update_many_tasks(&self, filter: &TaskFilter, data: &TaskUpdate) -> Result<usize> {
        if data.created_by_id.is_some() {
            return Err(Error::ImmutableFieldViolation("created_by_id"));
        }
        task_assignments(data).execute(self.conn, Task::NAME, &filter.predicates())
    }

    fn delete_task(&self, id: &str) -> Result<bool> {
        Ok(query::delete::<Task>(self.conn, &id_predicates(id))? > 0)
    }

    fn delete_many_tasks(&self, filter: &TaskFilter) -> Result<usize> {
        query::delete::<Task>(self.conn, &filter.predicates())
    }

    // Comment operations

    fn find_comment(&self, id: &str) -> Result<Option<TaskComment>> {
        query::select_one(self.conn, &id_predicates(id))
    }

    fn find_many_comments(&self, query: &CommentQuery) -> Result<Vec<TaskComment>> {
        query::select_many(self.conn, query)
    }

    fn count_comments(&self, filter: &CommentFilter) -> Result<u64> {
        query::count::<TaskComment>(self.conn, &filter.predicates())
    }

    fn create_comment(&self, data: &NewComment) -> Result<TaskComment> {
        Ok(self.insert_comment(data, false)?.0)
    }

    fn create_many_comments(&self, data: &[NewComment], skip_duplicates: bool) -> Result<usize> {
        data.iter().try_fold(0, |n, item| {
            Ok(n + self.insert_comment(item, skip_duplicates)?.1)
        })
    }

    fn update_comment(&self, id: &str, data: &CommentUpdate) -> Result<TaskComment> {
        let current = self
            .find_comment(id)?
            .ok_or_else(|| Error::not_found("comment", id))?;
        if data.task_id.as_ref().is_some_and(|t| *t != current.task_id) {
            return Err(Error::ImmutableFieldViolation("task_id"));
        }
        if data.user_id.as_ref().is_some_and(|u| *u != current.user_id) {
            return Err(Error::ImmutableFieldViolation("user_id"));
        }

        comment_assignments(data).execute(self.conn, TaskComment::NAME, &id_predicates(id))?;
        self.find_comment(id)?
            .ok_or_else(|| Error::not_found("comment", id))
    }

    fn update_many_comments(&self, filter: &CommentFilter, data: &CommentUpdate) -> Result<usize> {
        if data.task_id.is_some() {
            return Err(Error::ImmutableFieldViolation("task_id"));
        }
        if data.user_id.is_some() {
            return Err(Error::ImmutableFieldViolation("user_id"));
        }
        comment_assignments(data).execute(self.conn, TaskComment::NAME, &filter.predicates())
    }

    fn delete_comment(&self, id: &str) -> Result<bool> {
        Ok(query::delete::<TaskComment>(self.conn, &id_predicates(id))? > 0)
    }

    fn delete_many_comments(&self, filter: &CommentFilter) -> Result<usize> {
        query::delete::<TaskComment>(self.conn, &filter.predicates())
    }

    // Role operations

    fn find_role(&self, id: &str) -> Result<Option<Role>> {
        query::select_one(self.conn, &id_predicates(id))
    }

    fn find_role_by_name(&self, name: &str) -> Result<Option<Role>> {
        let mut preds = Predicates::new();
        preds.eq("name", text(name));
        query::select_one(self.conn, &preds)
    }

    fn find_many_roles(&self, query: &RoleQuery) -> Result<Vec<Role>> {
        query::select_many(self.conn, query)
    }

    fn count_roles(&self, filter: &RoleFilter) -> Result<u64> {
        query::count::<Role>(self.conn, &filter.predicates())
    }

    fn create_role(&self, data: &NewRole) -> Result<Role> {
        Ok(self.insert_role(data, false)?.0)
    }

    fn create_many_roles(&self, data: &[NewRole], skip_duplicates: bool) -> Result<usize> {
        data.iter().try_fold(0, |n, item| {
            Ok(n + self.insert_role(item, skip_duplicates)?.1)
        })
    }

    fn update_role(&self, id: &str, data: &RoleUpdate) -> Result<Role> {
        let rows = role_assignments(data).execute(self.conn, Role::NAME, &id_predicates(id))?;
        if rows == 0 {
            return Err(Error::not_found("role", id));
        }
        self.find_role(id)?
            .ok_or_else(|| Error::not_found("role", id))
    }

    fn update_many_roles(&self, filter: &RoleFilter, data: &RoleUpdate) -> Result<usize> {
        role_assignments(data).execute(self.conn, Role::NAME, &filter.predicates())
    }

    fn delete_role(&self, id: &str) -> Result<bool> {
        let rows = query::delete::<Role>(self.conn, &id_predicates(id)).map_err(|e| match e {
            Error::ReferentialViolation(_) => Error::ReferentialViolation(format!(
                "role {id} is still held by users or grants permissions"
            )),
            other => other,
        })?;
        Ok(rows > 0)
    }

    fn delete_many_roles(&self, filter: &RoleFilter) -> Result<usize> {
        query::delete::<Role>(self.conn, &filter.predicates())
    }

    // Permission operations

    fn find_permission(&self, id: &str) -> Result<Option<Permission>> {
        query::select_one(self.conn, &id_predicates(id))
    }

    fn find_permission_by_pair(&self, resource: &str, action: &str) -> Result<Option<Permission>> {
        let mut preds = Predicates::new();
        preds.eq("resource", text(resource)).eq("action", text(action));
        query::select_one(self.conn, &preds)
    }

    fn find_many_permissions(&self, query: &PermissionQuery) -> Result<Vec<Permission>> {
        query::select_many(self.conn, query)
    }

    fn count_permissions(&self, filter: &PermissionFilter) -> Result<u64> {
        query::count::<Permission>(self.conn, &filter.predicates())
    }

    fn create_permission(&self, data: &NewPermission) -> Result<Permission> {
        Ok(self.insert_permission(data, false)?.0)
    }

    fn create_many_permissions(
        &self,
        data: &[NewPermission],
        skip_duplicates: bool,
    ) -> Result<usize> {
        data.iter().try_fold(0, |n, item| {
            Ok(n + self.insert_permission(item, skip_duplicates)?.1)
        })
    }

    fn update_permission(&self, id: &str, data: &PermissionUpdate) -> Result<Permission> {
        let rows =
            permission_assignments(data).execute(self.conn, Permission::NAME, &id_predicates(id))?;
        if rows == 0 {
            return Err(Error::not_found("permission", id));
        }
        self.find_permission(id)?
            .ok_or_else(|| Error::not_found("permission", id))
    }

    fn update_many_permissions(
        &self,
        filter: &PermissionFilter,
        data: &PermissionUpdate,
    ) -> Result<usize> {
        permission_assignments(data).execute(self.conn, Permission::NAME, &filter.predicates())
    }

    fn delete_permission(&self, id: &str) -> Result<bool> {
        let rows =
            query::delete::<Permission>(self.conn, &id_predicates(id)).map_err(|e| match e {
                Error::ReferentialViolation(_) => Error::ReferentialViolation(format!(
                    "permission {id} is still granted to roles"
                )),
                other => other,
            })?;
        Ok(rows > 0)
    }

    fn delete_many_permissions(&self, filter: &PermissionFilter) -> Result<usize> {
        query::delete::<Permission>(self.conn, &filter.predicates())
    }

    // User-Task M2M operations

    fn find_user_task(&self, user_id: &str, task_id: &str) -> Result<Option<UserTask>> {
        query::select_one(self.conn, &key_predicates::<UserTask>(&[text(user_id), text(task_id)]))
    }

    fn find_many_user_tasks(&self, query: &UserTaskQuery) -> Result<Vec<UserTask>> {
        query::select_many(self.conn, query)
    }

    fn count_user_tasks(&self, filter: &UserTaskFilter) -> Result<u64> {
        query::count::<UserTask>(self.conn, &filter.predicates())
    }

    fn create_user_task(&self, data: &NewUserTask) -> Result<UserTask> {
        let (created_at, _) = self.insert_join(
            UserTask::NAME,
            ("user_id", "task_id"),
            (&data.user_id, &data.task_id),
            false,
        )?;
        Ok(UserTask {
            user_id: data.user_id.clone(),
            task_id: data.task_id.clone(),
            created_at,
        })
    }

    fn create_many_user_tasks(&self, data: &[NewUserTask], skip_duplicates: bool) -> Result<usize> {
        data.iter().try_fold(0, |n, item| {
            let (_, rows) = self.insert_join(
                UserTask::NAME,
                ("user_id", "task_id"),
                (&item.user_id, &item.task_id),
                skip_duplicates,
            )?;
            Ok(n + rows)
        })
    }

    fn delete_user_task(&self, user_id: &str, task_id: &str) -> Result<bool> {
        let preds = key_predicates::<UserTask>(&[text(user_id), text(task_id)]);
        Ok(query::delete::<UserTask>(self.conn, &preds)? > 0)
    }

    fn delete_many_user_tasks(&self, filter: &UserTaskFilter) -> Result<usize> {
        query::delete::<UserTask>(self.conn, &filter.predicates())
    }

    // User-Role M2M operations

    fn find_user_role(&self, user_id: &str, role_id: &str) -> Result<Option<UserRole>> {
        query::select_one(self.conn, &key_predicates::<UserRole>(&[text(user_id), text(role_id)]))
    }

    fn find_many_user_roles(&self, query: &UserRoleQuery) -> Result<Vec<UserRole>> {
        query::select_many(self.conn, query)
    }

    fn count_user_roles(&self, filter: &UserRoleFilter) -> Result<u64> {
        query::count::<UserRole>(self.conn, &filter.predicates())
    }

    fn create_user_role(&self, data: &NewUserRole) -> Result<UserRole> {
        let (created_at, _) = self.insert_join(
            UserRole::NAME,
            ("user_id", "role_id"),
            (&data.user_id, &data.role_id),
            false,
        )?;
        Ok(UserRole {
            user_id: data.user_id.clone(),
            role_id: data.role_id.clone(),
            created_at,
        })
    }

    fn create_many_user_roles(&self, data: &[NewUserRole], skip_duplicates: bool) -> Result<usize> {
        data.iter().try_fold(0, |n, item| {
            let (_, rows) = self.insert_join(
                UserRole::NAME,
                ("user_id", "role_id"),
                (&item.user_id, &item.role_id),
                skip_duplicates,
            )?;
            Ok(n + rows)
        })
    }

    fn delete_user_role(&self, user_id: &str, role_id: &str) -> Result<bool> {
        let preds = key_predicates::<UserRole>(&[text(user_id), text(role_id)]);
        Ok(query::delete::<UserRole>(self.conn, &preds)? > 0)
    }

    fn delete_many_user_roles(&self, filter: &UserRoleFilter) -> Result<usize> {
        query::delete::<UserRole>(self.conn, &filter.predicates())
    }

    // Role-Permission M2M operations

    fn find_role_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<Option<RolePermission>> {
        let preds = key_predicates::<RolePermission>(&[text(role_id), text(permission_id)]);
        query::select_one(self.conn, &preds)
    }

    fn find_many_role_permissions(
        &self,
        query: &RolePermissionQuery,
    ) -> Result<Vec<RolePermission>> {
        query::select_many(self.conn, query)
    }

    fn count_role_permissions(&self, filter: &RolePermissionFilter) -> Result<u64> {
        query::count::<RolePermission>(self.conn, &filter.predicates())
    }

    fn create_role_permission(&self, data: &NewRolePermission) -> Result<RolePermission> {
        let (created_at, _) = self.insert_join(
            RolePermission::NAME,
            ("role_id", "permission_id"),
            (&data.role_id, &data.permission_id),
            false,
        )?;
        Ok(RolePermission {
            role_id: data.role_id.clone(),
            permission_id: data.permission_id.clone(),
            created_at,
        })
    }

    fn create_many_role_permissions(
        &self,
        data: &[NewRolePermission],
        skip_duplicates: bool,
    ) -> Result<usize> {
        data.iter().try_fold(0, |n, item| {
            let (_, rows) = self.insert_join(
                RolePermission::NAME,
                ("role_id", "permission_id"),
                (&item.role_id, &item.permission_id),
                skip_duplicates,
            )?;
            Ok(n + rows)
        })
    }

    fn delete_role_permission(&self, role_id: &str, permission_id: &str) -> Result<bool> {
        let preds = key_predicates::<RolePermission>(&[text(role_id), text(permission_id)]);
        Ok(query::delete::<RolePermission>(self.conn, &preds)? > 0)
    }

    fn delete_many_role_permissions(&self, filter: &RolePermissionFilter) -> Result<usize> {
        query::delete::<RolePermission>(self.conn, &filter.predicates())
    }
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    fn with_transaction(
        &self,
        options: &TxOptions,
        body: &mut dyn FnMut(&dyn Repository) -> Result<()>,
    ) -> Result<()> {
        let mut conn = self.conn();
        options.context.check()?;

        install_interrupt(&conn, &options.context);
        let result = Self::run(&mut conn, options, |repo| body(repo));
        conn.progress_handler(0, None::<fn() -> bool>);

        result
    }

    fn close(&self) -> Result<()> {
        self.conn().execute_batch("PRAGMA optimize;")?;
        Ok(())
    }
}
