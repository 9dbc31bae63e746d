//! Task lifecycle: creation, status transitions, assignment and watchers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::rbac::Authorizer;
use crate::store::{self, OpContext, Repository, Store, TaskQuery, TxOptions, UserTaskQuery};
use crate::types::{
    NewTask, NewUserTask, Task, TaskPriority, TaskStatus, TaskUpdate, UserTask, UserTaskFilter,
};

const RESOURCE: &str = "task";

/// Payload for [`TaskService::create_task`]. The creator is the acting user and the
/// initial status is always [`TaskStatus::Pending`]; a `status` given here is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
    /// Users to register as watchers in the same transaction.
    #[serde(default)]
    pub watchers: Vec<String>,
}

impl CreateTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

pub struct TaskService {
    store: Arc<dyn Store>,
    authorizer: Arc<Authorizer>,
    timeout: Option<Duration>,
}

impl TaskService {
    pub fn new(store: Arc<dyn Store>, authorizer: Arc<Authorizer>, timeout: Option<Duration>) -> Self {
        Self {
            store,
            authorizer,
            timeout,
        }
    }

    async fn run<T, F>(&self, options: TxOptions, body: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Repository, &Authorizer) -> Result<T> + Send + 'static,
    {
        let options = TxOptions {
            context: options.context.or_timeout(self.timeout),
            ..options
        };
        let authorizer = Arc::clone(&self.authorizer);
        store::run_transaction(Arc::clone(&self.store), options, move |repo| {
            body(repo, &authorizer)
        })
        .await
    }

    pub async fn create_task(
        &self,
        acting_user_id: &str,
        data: CreateTask,
        context: OpContext,
    ) -> Result<Task> {
        let acting = acting_user_id.to_string();
        let task = self
            .run(TxOptions::new(context), move |repo, auth| {
                auth.require_in(repo, &acting, RESOURCE, "create")?;

                if data.status.is_some_and(|s| s != TaskStatus::Pending) {
                    tracing::debug!(user_id = %acting, "ignoring initial status, tasks start as PENDING");
                }
                if let Some(assignee) = &data.assignee_id {
                    ensure_user_exists(repo, assignee)?;
                }

                let task = repo.create_task(&NewTask {
                    title: data.title,
                    description: data.description,
                    status: TaskStatus::Pending,
                    priority: data.priority,
                    assignee_id: data.assignee_id,
                    created_by_id: acting.clone(),
                    due_date: data.due_date,
                })?;

                let mut watchers = data.watchers;
                watchers.sort();
                watchers.dedup();
                let rows: Vec<NewUserTask> = watchers
                    .into_iter()
                    .map(|user_id| NewUserTask {
                        user_id,
                        task_id: task.id.clone(),
                    })
                    .collect();
                repo.create_many_user_tasks(&rows, false)?;

                Ok(task)
            })
            .await?;

        tracing::info!(task_id = %task.id, user_id = acting_user_id, "task created");
        Ok(task)
    }

    /// Moves a task along the lifecycle: PENDING → IN_PROGRESS → REVIEW → DONE, with
    /// REVIEW and DONE able to reopen to IN_PROGRESS.
    pub async fn transition_task(
        &self,
        acting_user_id: &str,
        task_id: &str,
        to: TaskStatus,
        context: OpContext,
    ) -> Result<Task> {
        let acting = acting_user_id.to_string();
        let id = task_id.to_string();
        let task = self
            .run(TxOptions::new(context).serializable(), move |repo, auth| {
                auth.require_in(repo, &acting, RESOURCE, "update")?;
                let current = find_task(repo, &id)?;
                check_transition(current.status, to)?;
                repo.update_task(
                    &id,
                    &TaskUpdate {
                        status: Some(to),
                        ..Default::default()
                    },
                )
            })
            .await?;

        tracing::info!(task_id, status = %task.status, "task transitioned");
        Ok(task)
    }

    /// Sets or clears the assignee. Clearing an unassigned task succeeds without a write.
    pub async fn assign_task(
        &self,
        acting_user_id: &str,
        task_id: &str,
        assignee_id: Option<String>,
        context: OpContext,
    ) -> Result<Task> {
        let acting = acting_user_id.to_string();
        let id = task_id.to_string();
        let task = self
            .run(TxOptions::new(context).serializable(), move |repo, auth| {
                auth.require_in(repo, &acting, RESOURCE, "update")?;
                let current = find_task(repo, &id)?;
                if current.assignee_id == assignee_id {
                    return Ok(current);
                }
                if let Some(assignee) = &assignee_id {
                    ensure_user_exists(repo, assignee)?;
                }
                repo.update_task(
                    &id,
                    &TaskUpdate {
                        assignee_id: Some(assignee_id),
                        ..Default::default()
                    },
                )
            })
            .await?;

        tracing::info!(task_id, assignee_id = ?task.assignee_id, "task assignment updated");
        Ok(task)
    }

    /// General update. A status in the payload must be a legal transition and
    /// `created_by_id` may only repeat its current value.
    pub async fn update_task(
        &self,
        acting_user_id: &str,
        task_id: &str,
        data: TaskUpdate,
        context: OpContext,
    ) -> Result<Task> {
        let acting = acting_user_id.to_string();
        let id = task_id.to_string();
        let task = self
            .run(TxOptions::new(context).serializable(), move |repo, auth| {
                auth.require_in(repo, &acting, RESOURCE, "update")?;
                let current = find_task(repo, &id)?;
                if let Some(to) = data.status {
                    check_transition(current.status, to)?;
                }
                if let Some(Some(assignee)) = &data.assignee_id {
                    ensure_user_exists(repo, assignee)?;
                }
                repo.update_task(&id, &data)
            })
            .await?;

        tracing::info!(task_id, "task updated");
        Ok(task)
    }

    /// Deletes a task with its watchers and comments.
    pub async fn delete_task(
        &self,
        acting_user_id: &str,
        task_id: &str,
        context: OpContext,
    ) -> Result<()> {
        let acting = acting_user_id.to_string();
        let id = task_id.to_string();
        self.run(TxOptions::new(context), move |repo, auth| {
            auth.require_in(repo, &acting, RESOURCE, "delete")?;
            if !repo.delete_task(&id)? {
                return Err(Error::not_found("task", id));
            }
            Ok(())
        })
        .await?;

        tracing::info!(task_id, user_id = acting_user_id, "task deleted");
        Ok(())
    }

    /// Registers `watcher_id` as a watcher. Watching twice is a no-op.
    pub async fn watch_task(
        &self,
        acting_user_id: &str,
        task_id: &str,
        watcher_id: &str,
        context: OpContext,
    ) -> Result<UserTask> {
        let acting = acting_user_id.to_string();
        let task_id = task_id.to_string();
        let watcher_id = watcher_id.to_string();
        self.run(TxOptions::new(context), move |repo, auth| {
            auth.require_in(repo, &acting, RESOURCE, "update")?;
            find_task(repo, &task_id)?;
            if let Some(existing) = repo.find_user_task(&watcher_id, &task_id)? {
                return Ok(existing);
            }
            ensure_user_exists(repo, &watcher_id)?;
            repo.create_user_task(&NewUserTask {
                user_id: watcher_id,
                task_id,
            })
        })
        .await
    }

    /// Returns whether a watcher row was removed.
    pub async fn unwatch_task(
        &self,
        acting_user_id: &str,
        task_id: &str,
        watcher_id: &str,
        context: OpContext,
    ) -> Result<bool> {
        let acting = acting_user_id.to_string();
        let task_id = task_id.to_string();
        let watcher_id = watcher_id.to_string();
        self.run(TxOptions::new(context), move |repo, auth| {
            auth.require_in(repo, &acting, RESOURCE, "update")?;
            repo.delete_user_task(&watcher_id, &task_id)
        })
        .await
    }

    pub async fn get_task(&self, task_id: &str, context: OpContext) -> Result<Task> {
        let id = task_id.to_string();
        self.run(TxOptions::new(context), move |repo, _| find_task(repo, &id))
            .await
    }

    pub async fn list_tasks(&self, query: TaskQuery, context: OpContext) -> Result<Vec<Task>> {
        self.run(TxOptions::new(context), move |repo, _| repo.find_many_tasks(&query))
            .await
    }

    pub async fn watchers(&self, task_id: &str, context: OpContext) -> Result<Vec<UserTask>> {
        let id = task_id.to_string();
        self.run(TxOptions::new(context), move |repo, _| {
            find_task(repo, &id)?;
            repo.find_many_user_tasks(&UserTaskQuery::new(UserTaskFilter {
                user_id: None,
                task_id: Some(id.clone()),
            }))
        })
        .await
    }
}

fn find_task(repo: &dyn Repository, id: &str) -> Result<Task> {
    repo.find_task(id)?
        .ok_or_else(|| Error::not_found("task", id))
}

fn ensure_user_exists(repo: &dyn Repository, user_id: &str) -> Result<()> {
    if repo.find_user(user_id)?.is_none() {
        return Err(Error::ReferentialViolation(format!(
            "user {user_id} does not exist"
        )));
    }
    Ok(())
}

fn check_transition(from: TaskStatus, to: TaskStatus) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition { from, to })
    }
}
