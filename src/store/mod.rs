pub mod query;
mod schema;
mod sqlite;
mod tx;

pub use query::{Direction, FindMany, OrderField, RowKey};
pub use sqlite::SqliteStore;
pub use tx::{IsolationLevel, OpContext, TxOptions};

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::*;

pub type UserQuery = FindMany<UserFilter, UserOrderField>;
pub type TaskQuery = FindMany<TaskFilter, TaskOrderField>;
pub type CommentQuery = FindMany<CommentFilter, CommentOrderField>;
pub type RoleQuery = FindMany<RoleFilter, RoleOrderField>;
pub type PermissionQuery = FindMany<PermissionFilter, PermissionOrderField>;
pub type UserTaskQuery = FindMany<UserTaskFilter, JoinOrderField, (String, String)>;
pub type UserRoleQuery = FindMany<UserRoleFilter, JoinOrderField, (String, String)>;
pub type RolePermissionQuery = FindMany<RolePermissionFilter, JoinOrderField, (String, String)>;

/// Entity access inside a transaction.
///
/// Every call runs inside the transaction that produced the repository; a failing
/// call leaves the transaction to be rolled back by the caller's `?`.
pub trait Repository {
    // User operations
    fn find_user(&self, id: &str) -> Result<Option<User>>;
    fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    fn find_many_users(&self, query: &UserQuery) -> Result<Vec<User>>;
    fn count_users(&self, filter: &UserFilter) -> Result<u64>;
    fn create_user(&self, data: &NewUser) -> Result<User>;
    fn create_many_users(&self, data: &[NewUser], skip_duplicates: bool) -> Result<usize>;
    fn update_user(&self, id: &str, data: &UserUpdate) -> Result<User>;
    fn update_many_users(&self, filter: &UserFilter, data: &UserUpdate) -> Result<usize>;
    fn delete_user(&self, id: &str) -> Result<bool>;
    fn delete_many_users(&self, filter: &UserFilter) -> Result<usize>;

    // Task operations
    fn find_task(&self, id: &str) -> Result<Option<Task>>;
    fn find_many_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>>;
    fn count_tasks(&self, filter: &TaskFilter) -> Result<u64>;
    fn create_task(&self, data: &NewTask) -> Result<Task>;
    fn create_many_tasks(&self, data: &[NewTask], skip_duplicates: bool) -> Result<usize>;
    fn update_task(&self, id: &str, data: &TaskUpdate) -> Result<Task>;
    fn update_many_tasks(&self, filter: &TaskFilter, data: &TaskUpdate) -> Result<usize>;
    fn delete_task(&self, id: &str) -> Result<bool>;
    fn delete_many_tasks(&self, filter: &TaskFilter) -> Result<usize>;

    // Comment operations
    fn find_comment(&self, id: &str) -> Result<Option<TaskComment>>;
    fn find_many_comments(&self, query: &CommentQuery) -> Result<Vec<TaskComment>>;
    fn count_comments(&self, filter: &CommentFilter) -> Result<u64>;
    fn create_comment(&self, data: &NewComment) -> Result<TaskComment>;
    fn create_many_comments(&self, data: &[NewComment], skip_duplicates: bool) -> Result<usize>;
    fn update_comment(&self, id: &str, data: &CommentUpdate) -> Result<TaskComment>;
    fn update_many_comments(&self, filter: &CommentFilter, data: &CommentUpdate) -> Result<usize>;
    fn delete_comment(&self, id: &str) -> Result<bool>;
    fn delete_many_comments(&self, filter: &CommentFilter) -> Result<usize>;

    // Role operations
    fn find_role(&self, id: &str) -> Result<Option<Role>>;
    fn find_role_by_name(&self, name: &str) -> Result<Option<Role>>;
    fn find_many_roles(&self, query: &RoleQuery) -> Result<Vec<Role>>;
    fn count_roles(&self, filter: &RoleFilter) -> Result<u64>;
    fn create_role(&self, data: &NewRole) -> Result<Role>;
    fn create_many_roles(&self, data: &[NewRole], skip_duplicates: bool) -> Result<usize>;
    fn update_role(&self, id: &str, data: &RoleUpdate) -> Result<Role>;
    fn update_many_roles(&self, filter: &RoleFilter, data: &RoleUpdate) -> Result<usize>;
    fn delete_role(&self, id: &str) -> Result<bool>;
    fn delete_many_roles(&self, filter: &RoleFilter) -> Result<usize>;

    // Permission operations
    fn find_permission(&self, id: &str) -> Result<Option<Permission>>;
    fn find_permission_by_pair(&self, resource: &str, action: &str) -> Result<Option<Permission>>;
    fn find_many_permissions(&self, query: &PermissionQuery) -> Result<Vec<Permission>>;
    fn count_permissions(&self, filter: &PermissionFilter) -> Result<u64>;
    fn create_permission(&self, data: &NewPermission) -> Result<Permission>;
    fn create_many_permissions(&self, data: &[NewPermission], skip_duplicates: bool)
    -> Result<usize>;
    fn update_permission(&self, id: &str, data: &PermissionUpdate) -> Result<Permission>;
    fn update_many_permissions(
        &self,
        filter: &PermissionFilter,
        data: &PermissionUpdate,
    ) -> Result<usize>;
    fn delete_permission(&self, id: &str) -> Result<bool>;
    fn delete_many_permissions(&self, filter: &PermissionFilter) -> Result<usize>;

    // User-Task M2M operations
    fn find_user_task(&self, user_id: &str, task_id: &str) -> Result<Option<UserTask>>;
    fn find_many_user_tasks(&self, query: &UserTaskQuery) -> Result<Vec<UserTask>>;
    fn count_user_tasks(&self, filter: &UserTaskFilter) -> Result<u64>;
    fn create_user_task(&self, data: &NewUserTask) -> Result<UserTask>;
    fn create_many_user_tasks(&self, data: &[NewUserTask], skip_duplicates: bool) -> Result<usize>;
    fn delete_user_task(&self, user_id: &str, task_id: &str) -> Result<bool>;
    fn delete_many_user_tasks(&self, filter: &UserTaskFilter) -> Result<usize>;

    // User-Role M2M operations
    fn find_user_role(&self, user_id: &str, role_id: &str) -> Result<Option<UserRole>>;
    fn find_many_user_roles(&self, query: &UserRoleQuery) -> Result<Vec<UserRole>>;
    fn count_user_roles(&self, filter: &UserRoleFilter) -> Result<u64>;
    fn create_user_role(&self, data: &NewUserRole) -> Result<UserRole>;
    fn create_many_user_roles(&self, data: &[NewUserRole], skip_duplicates: bool) -> Result<usize>;
    fn delete_user_role(&self, user_id: &str, role_id: &str) -> Result<bool>;
    fn delete_many_user_roles(&self, filter: &UserRoleFilter) -> Result<usize>;

    // Role-Permission M2M operations
    fn find_role_permission(
        &self,
        role_id: &str,
        permission_id: &str,
    ) -> Result<Option<RolePermission>>;
    fn find_many_role_permissions(&self, query: &RolePermissionQuery)
    -> Result<Vec<RolePermission>>;
    fn count_role_permissions(&self, filter: &RolePermissionFilter) -> Result<u64>;
    fn create_role_permission(&self, data: &NewRolePermission) -> Result<RolePermission>;
    fn create_many_role_permissions(
        &self,
        data: &[NewRolePermission],
        skip_duplicates: bool,
    ) -> Result<usize>;
    fn delete_role_permission(&self, role_id: &str, permission_id: &str) -> Result<bool>;
    fn delete_many_role_permissions(&self, filter: &RolePermissionFilter) -> Result<usize>;
}

/// Store defines the database interface: schema setup and transactional access.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    /// Runs `body` in one transaction. Commits only if `body` succeeds and the
    /// operation context has not expired; otherwise everything is rolled back.
    fn with_transaction(
        &self,
        options: &TxOptions,
        body: &mut dyn FnMut(&dyn Repository) -> Result<()>,
    ) -> Result<()>;

    fn close(&self) -> Result<()>;
}

impl<'a> dyn Store + 'a {
    /// Typed wrapper over [`Store::with_transaction`].
    pub fn transaction<T, F>(&self, options: &TxOptions, body: F) -> Result<T>
    where
        F: FnOnce(&dyn Repository) -> Result<T>,
    {
        let mut body = Some(body);
        let mut output = None;
        self.with_transaction(options, &mut |repo| {
            let body = body
                .take()
                .ok_or_else(|| Error::Internal("transaction body ran twice".to_string()))?;
            output = Some(body(repo)?);
            Ok(())
        })?;
        output.ok_or_else(|| Error::Internal("transaction produced no result".to_string()))
    }
}

/// Runs a transaction on the blocking pool so async callers never block a runtime worker.
pub(crate) async fn run_transaction<T, F>(
    store: Arc<dyn Store>,
    options: TxOptions,
    body: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn Repository) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || store.as_ref().transaction(&options, body))
        .await
        .map_err(|e| Error::Internal(format!("store task failed: {e}")))?
}
