use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::rbac::Authorizer;
use crate::store::{self, CommentQuery, Direction, OpContext, Repository, Store, TxOptions};
use crate::types::{CommentFilter, CommentOrderField, CommentUpdate, NewComment, TaskComment};

const RESOURCE: &str = "comment";

/// Comments on tasks. Authors manage their own comments; acting on someone else's
/// needs the matching `comment` permission.
pub struct CommentService {
    store: Arc<dyn Store>,
    authorizer: Arc<Authorizer>,
    timeout: Option<Duration>,
}

impl CommentService {
    pub fn new(store: Arc<dyn Store>, authorizer: Arc<Authorizer>, timeout: Option<Duration>) -> Self {
        Self {
            store,
            authorizer,
            timeout,
        }
    }

    async fn run<T, F>(&self, context: OpContext, body: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Repository, &Authorizer) -> Result<T> + Send + 'static,
    {
        let options = TxOptions::new(context.or_timeout(self.timeout));
        let authorizer = Arc::clone(&self.authorizer);
        store::run_transaction(Arc::clone(&self.store), options, move |repo| {
            body(repo, &authorizer)
        })
        .await
    }

    pub async fn add_comment(
        &self,
        acting_user_id: &str,
        task_id: &str,
        content: &str,
        context: OpContext,
    ) -> Result<TaskComment> {
        let acting = acting_user_id.to_string();
        let task_id = task_id.to_string();
        let content = content.to_string();
        let comment = self
            .run(context, move |repo, auth| {
                if repo.find_task(&task_id)?.is_none() {
                    return Err(Error::not_found("task", task_id));
                }
                auth.require_in(repo, &acting, RESOURCE, "create")?;
                repo.create_comment(&NewComment {
                    task_id,
                    user_id: acting,
                    content,
                })
            })
            .await?;

        tracing::info!(comment_id = %comment.id, task_id = %comment.task_id, "comment added");
        Ok(comment)
    }

    pub async fn edit_comment(
        &self,
        acting_user_id: &str,
        comment_id: &str,
        content: &str,
        context: OpContext,
    ) -> Result<TaskComment> {
        let data = CommentUpdate {
            content: Some(content.to_string()),
            ..Default::default()
        };
        self.update_comment(acting_user_id, comment_id, data, context)
            .await
    }

    /// Only `content` can change; rebinding the comment to another task or author
    /// fails with [`Error::ImmutableFieldViolation`].
    pub async fn update_comment(
        &self,
        acting_user_id: &str,
        comment_id: &str,
        data: CommentUpdate,
        context: OpContext,
    ) -> Result<TaskComment> {
        let acting = acting_user_id.to_string();
        let id = comment_id.to_string();
        let comment = self
            .run(context, move |repo, auth| {
                let current = find_comment(repo, &id)?;
                if current.user_id != acting {
                    auth.require_in(repo, &acting, RESOURCE, "update")?;
                }
                repo.update_comment(&id, &data)
            })
            .await?;

        tracing::info!(comment_id, user_id = acting_user_id, "comment edited");
        Ok(comment)
    }

    pub async fn delete_comment(
        &self,
        acting_user_id: &str,
        comment_id: &str,
        context: OpContext,
    ) -> Result<()> {
        let acting = acting_user_id.to_string();
        let id = comment_id.to_string();
        self.run(context, move |repo, auth| {
            let current = find_comment(repo, &id)?;
            if current.user_id != acting {
                auth.require_in(repo, &acting, RESOURCE, "delete")?;
            }
            repo.delete_comment(&id)?;
            Ok(())
        })
        .await?;

        tracing::info!(comment_id, user_id = acting_user_id, "comment deleted");
        Ok(())
    }

    /// Comments of a task, oldest first.
    pub async fn list_comments(&self, task_id: &str, context: OpContext) -> Result<Vec<TaskComment>> {
        let task_id = task_id.to_string();
        self.run(context, move |repo, _| {
            if repo.find_task(&task_id)?.is_none() {
                return Err(Error::not_found("task", task_id));
            }
            let query = CommentQuery::new(CommentFilter {
                task_id: Some(task_id),
                ..Default::default()
            })
            .order_by(CommentOrderField::CreatedAt, Direction::Asc);
            repo.find_many_comments(&query)
        })
        .await
    }
}

fn find_comment(repo: &dyn Repository, id: &str) -> Result<TaskComment> {
    repo.find_comment(id)?
        .ok_or_else(|| Error::not_found("comment", id))
}
