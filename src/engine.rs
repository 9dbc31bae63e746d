use std::sync::Arc;

use crate::admin::AdminService;
use crate::comments::CommentService;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::rbac::{Authorizer, NoopPermissionCache, PermissionCache, TtlPermissionCache};
use crate::store::{OpContext, SqliteStore, Store};
use crate::tasks::{CreateTask, TaskService};
use crate::types::{PermissionSet, Task, TaskComment, TaskStatus};

/// Entry point for callers: owns the store, the permission cache and the services.
///
/// Each operation has a `_with` variant taking an [`OpContext`] for deadlines and
/// cancellation; the plain variant uses the configured default timeout.
pub struct Engine {
    store: Arc<dyn Store>,
    config: EngineConfig,
    authorizer: Arc<Authorizer>,
    tasks: TaskService,
    comments: CommentService,
    admin: AdminService,
}

impl Engine {
    /// Opens the configured SQLite database and creates the schema if needed.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let store = SqliteStore::from_config(&config.database)?;
        store.initialize()?;
        tracing::info!(path = ?config.database.path, "store initialized");
        Ok(Self::new(Arc::new(store), config))
    }

    /// Builds an engine over an already initialized store.
    pub fn new(store: Arc<dyn Store>, config: EngineConfig) -> Self {
        let cache: Arc<dyn PermissionCache> = if config.cache.enabled {
            Arc::new(TtlPermissionCache::new(config.cache.ttl()))
        } else {
            Arc::new(NoopPermissionCache)
        };
        Self::with_cache(store, cache, config)
    }

    pub fn with_cache(
        store: Arc<dyn Store>,
        cache: Arc<dyn PermissionCache>,
        config: EngineConfig,
    ) -> Self {
        let timeout = config.operation_timeout();
        let authorizer = Arc::new(Authorizer::new(Arc::clone(&store), Arc::clone(&cache)));

        Self {
            tasks: TaskService::new(Arc::clone(&store), Arc::clone(&authorizer), timeout),
            comments: CommentService::new(Arc::clone(&store), Arc::clone(&authorizer), timeout),
            admin: AdminService::new(Arc::clone(&store), cache, timeout),
            store,
            config,
            authorizer,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn tasks(&self) -> &TaskService {
        &self.tasks
    }

    pub fn comments(&self) -> &CommentService {
        &self.comments
    }

    pub fn admin(&self) -> &AdminService {
        &self.admin
    }

    pub fn cache(&self) -> &Arc<dyn PermissionCache> {
        self.authorizer.cache()
    }

    fn context(&self, context: OpContext) -> OpContext {
        context.or_timeout(self.config.operation_timeout())
    }

    pub fn close(&self) -> Result<()> {
        self.store.close()
    }

    pub async fn resolve_permissions(&self, user_id: &str) -> Result<PermissionSet> {
        self.resolve_permissions_with(user_id, OpContext::new()).await
    }

    pub async fn resolve_permissions_with(
        &self,
        user_id: &str,
        context: OpContext,
    ) -> Result<PermissionSet> {
        self.authorizer
            .permissions(user_id, self.context(context))
            .await
    }

    pub async fn authorize(&self, user_id: &str, resource: &str, action: &str) -> Result<bool> {
        self.authorize_with(user_id, resource, action, OpContext::new())
            .await
    }

    pub async fn authorize_with(
        &self,
        user_id: &str,
        resource: &str,
        action: &str,
        context: OpContext,
    ) -> Result<bool> {
        self.authorizer
            .authorize(user_id, resource, action, self.context(context))
            .await
    }

    pub async fn create_task(&self, acting_user_id: &str, data: CreateTask) -> Result<Task> {
        self.create_task_with(acting_user_id, data, OpContext::new())
            .await
    }

    pub async fn create_task_with(
        &self,
        acting_user_id: &str,
        data: CreateTask,
        context: OpContext,
    ) -> Result<Task> {
        self.tasks.create_task(acting_user_id, data, context).await
    }

    pub async fn transition_task(
        &self,
        acting_user_id: &str,
        task_id: &str,
        to: TaskStatus,
    ) -> Result<Task> {
        self.transition_task_with(acting_user_id, task_id, to, OpContext::new())
            .await
    }

    pub async fn transition_task_with(
        &self,
        acting_user_id: &str,
        task_id: &str,
        to: TaskStatus,
        context: OpContext,
    ) -> Result<Task> {
        self.tasks
            .transition_task(acting_user_id, task_id, to, context)
            .await
    }

    pub async fn assign_task(
        &self,
        acting_user_id: &str,
        task_id: &str,
        assignee_id: Option<&str>,
    ) -> Result<Task> {
        self.assign_task_with(acting_user_id, task_id, assignee_id, OpContext::new())
            .await
    }

    pub async fn assign_task_with(
        &self,
        acting_user_id: &str,
        task_id: &str,
        assignee_id: Option<&str>,
        context: OpContext,
    ) -> Result<Task> {
        self.tasks
            .assign_task(
                acting_user_id,
                task_id,
                assignee_id.map(str::to_string),
                context,
            )
            .await
    }

    pub async fn add_comment(
        &self,
        acting_user_id: &str,
        task_id: &str,
        content: &str,
    ) -> Result<TaskComment> {
        self.add_comment_with(acting_user_id, task_id, content, OpContext::new())
            .await
    }

    pub async fn add_comment_with(
        &self,
        acting_user_id: &str,
        task_id: &str,
        content: &str,
        context: OpContext,
    ) -> Result<TaskComment> {
        self.comments
            .add_comment(acting_user_id, task_id, content, context)
            .await
    }

    pub async fn edit_comment(
        &self,
        acting_user_id: &str,
        comment_id: &str,
        content: &str,
    ) -> Result<TaskComment> {
        self.edit_comment_with(acting_user_id, comment_id, content, OpContext::new())
            .await
    }

    pub async fn edit_comment_with(
        &self,
        acting_user_id: &str,
        comment_id: &str,
        content: &str,
        context: OpContext,
    ) -> Result<TaskComment> {
        self.comments
            .edit_comment(acting_user_id, comment_id, content, context)
            .await
    }
}
