mod common;

use chrono::{TimeZone, Utc};
use common::TestEngine;
use taskforge::Error;
use taskforge::store::{Direction, OpContext, TaskQuery};
use taskforge::tasks::CreateTask;
use taskforge::types::{TaskFilter, TaskOrderField, TaskPriority, TaskStatus, TaskUpdate};

#[tokio::test]
async fn create_requires_permission_then_starts_pending() {
    let t = TestEngine::start();
    let user = t.user("u1@example.com");

    let err = t
        .engine
        .create_task(&user.id, CreateTask::new("Draft"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden { ref resource, ref action } if resource == "task" && action == "create"));
    assert!(
        t.engine
            .tasks()
            .list_tasks(TaskQuery::default(), OpContext::new())
            .await
            .unwrap()
            .is_empty()
    );

    t.grant_role(&user.id, "admin", &[("task", "create")]).await;
    let task = t
        .engine
        .create_task(&user.id, CreateTask::new("Draft"))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.created_by_id, user.id);
}

#[tokio::test]
async fn create_ignores_requested_status() {
    let t = TestEngine::start();
    let user = t.task_admin("status@example.com").await;

    let data = CreateTask {
        status: Some(TaskStatus::Done),
        ..CreateTask::new("Already done?")
    };
    let task = t.engine.create_task(&user.id, data).await.unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
}

#[tokio::test]
async fn created_task_round_trips() {
    let t = TestEngine::start();
    let creator = t.task_admin("creator@example.com").await;
    let assignee = t.user("assignee@example.com");
    let due = Utc.with_ymd_and_hms(2030, 5, 17, 12, 30, 0).unwrap();

    let created = t
        .engine
        .create_task(
            &creator.id,
            CreateTask {
                description: "Longer text".to_string(),
                priority: TaskPriority::High,
                assignee_id: Some(assignee.id.clone()),
                due_date: Some(due),
                ..CreateTask::new("Round trip")
            },
        )
        .await
        .unwrap();

    let fetched = t
        .engine
        .tasks()
        .get_task(&created.id, OpContext::new())
        .await
        .unwrap();
    assert_eq!(fetched, created);
    assert_eq!(fetched.title, "Round trip");
    assert_eq!(fetched.description, "Longer text");
    assert_eq!(fetched.priority, TaskPriority::High);
    assert_eq!(fetched.assignee_id.as_deref(), Some(assignee.id.as_str()));
    assert_eq!(fetched.due_date, Some(due));
}

#[tokio::test]
async fn create_with_watchers_is_atomic() {
    let t = TestEngine::start();
    let creator = t.task_admin("watch-creator@example.com").await;
    let watcher = t.user("watcher@example.com");

    let task = t
        .engine
        .create_task(
            &creator.id,
            CreateTask {
                watchers: vec![watcher.id.clone(), watcher.id.clone()],
                ..CreateTask::new("Watched")
            },
        )
        .await
        .unwrap();
    let watchers = t
        .engine
        .tasks()
        .watchers(&task.id, OpContext::new())
        .await
        .unwrap();
    assert_eq!(watchers.len(), 1);
    assert_eq!(watchers[0].user_id, watcher.id);

    let err = t
        .engine
        .create_task(
            &creator.id,
            CreateTask {
                watchers: vec!["ghost".to_string()],
                ..CreateTask::new("Orphan watchers")
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReferentialViolation(_)));

    let titled = t
        .engine
        .tasks()
        .list_tasks(
            TaskQuery::new(TaskFilter {
                title_contains: Some("Orphan".to_string()),
                ..Default::default()
            }),
            OpContext::new(),
        )
        .await
        .unwrap();
    assert!(titled.is_empty());
}

#[tokio::test]
async fn lifecycle_walk_and_rejected_transition() {
    let t = TestEngine::start();
    let user = t.task_admin("walk@example.com").await;
    let task = t
        .engine
        .create_task(&user.id, CreateTask::new("Lifecycle"))
        .await
        .unwrap();

    for status in [TaskStatus::InProgress, TaskStatus::Review, TaskStatus::Done] {
        let updated = t
            .engine
            .transition_task(&user.id, &task.id, status)
            .await
            .unwrap();
        assert_eq!(updated.status, status);
    }

    let err = t
        .engine
        .transition_task(&user.id, &task.id, TaskStatus::Pending)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InvalidTransition {
            from: TaskStatus::Done,
            to: TaskStatus::Pending
        }
    ));

    let err = t
        .engine
        .transition_task(&user.id, &task.id, TaskStatus::Review)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    let current = t
        .engine
        .tasks()
        .get_task(&task.id, OpContext::new())
        .await
        .unwrap();
    assert_eq!(current.status, TaskStatus::Done);

    let reopened = t
        .engine
        .transition_task(&user.id, &task.id, TaskStatus::InProgress)
        .await
        .unwrap();
    assert_eq!(reopened.status, TaskStatus::InProgress);
}

#[tokio::test]
async fn transition_requires_update_permission() {
    let t = TestEngine::start();
    let admin = t.task_admin("owner@example.com").await;
    let outsider = t.user("outsider@example.com");
    let task = t
        .engine
        .create_task(&admin.id, CreateTask::new("Guarded"))
        .await
        .unwrap();

    let err = t
        .engine
        .transition_task(&outsider.id, &task.id, TaskStatus::InProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden { .. }));

    let err = t
        .engine
        .transition_task(&admin.id, "missing", TaskStatus::InProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { entity: "task", .. }));
}

#[tokio::test]
async fn assignment_rules() {
    let t = TestEngine::start();
    let admin = t.task_admin("assigner@example.com").await;
    let dev = t.user("dev@example.com");
    let task = t
        .engine
        .create_task(&admin.id, CreateTask::new("Assign me"))
        .await
        .unwrap();

    let assigned = t
        .engine
        .assign_task(&admin.id, &task.id, Some(&dev.id))
        .await
        .unwrap();
    assert_eq!(assigned.assignee_id.as_deref(), Some(dev.id.as_str()));

    let err = t
        .engine
        .assign_task(&admin.id, &task.id, Some("ghost"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReferentialViolation(_)));

    let first = t.engine.assign_task(&admin.id, &task.id, None).await.unwrap();
    assert!(first.assignee_id.is_none());
    let second = t.engine.assign_task(&admin.id, &task.id, None).await.unwrap();
    assert!(second.assignee_id.is_none());
    assert_eq!(second.updated_at, first.updated_at);
}

#[tokio::test]
async fn update_enforces_creator_immutability_and_transitions() {
    let t = TestEngine::start();
    let admin = t.task_admin("updater@example.com").await;
    let other = t.user("other@example.com");
    let task = t
        .engine
        .create_task(&admin.id, CreateTask::new("Edit me"))
        .await
        .unwrap();
    let tasks = t.engine.tasks();

    let err = tasks
        .update_task(
            &admin.id,
            &task.id,
            TaskUpdate {
                created_by_id: Some(other.id.clone()),
                ..Default::default()
            },
            OpContext::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ImmutableFieldViolation("created_by_id")));

    let err = tasks
        .update_task(
            &admin.id,
            &task.id,
            TaskUpdate {
                status: Some(TaskStatus::Done),
                ..Default::default()
            },
            OpContext::new(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));

    let updated = tasks
        .update_task(
            &admin.id,
            &task.id,
            TaskUpdate {
                title: Some("Edited".to_string()),
                priority: Some(TaskPriority::Low),
                status: Some(TaskStatus::InProgress),
                created_by_id: Some(admin.id.clone()),
                ..Default::default()
            },
            OpContext::new(),
        )
        .await
        .unwrap();
    assert_eq!(updated.title, "Edited");
    assert_eq!(updated.priority, TaskPriority::Low);
    assert_eq!(updated.status, TaskStatus::InProgress);
    assert_eq!(updated.created_by_id, admin.id);
}

#[tokio::test]
async fn delete_cascades_watchers_and_comments() {
    let t = TestEngine::start();
    let admin = t.task_admin("deleter@example.com").await;
    let task = t
        .engine
        .create_task(
            &admin.id,
            CreateTask {
                watchers: vec![admin.id.clone()],
                ..CreateTask::new("Doomed")
            },
        )
        .await
        .unwrap();
    t.engine
        .add_comment(&admin.id, &task.id, "last words")
        .await
        .unwrap();

    let tasks = t.engine.tasks();
    tasks
        .delete_task(&admin.id, &task.id, OpContext::new())
        .await
        .unwrap();

    let err = tasks.get_task(&task.id, OpContext::new()).await.unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));

    let (watchers, comments) = t
        .store()
        .transaction(&Default::default(), |repo| {
            Ok((
                repo.count_user_tasks(&Default::default())?,
                repo.count_comments(&Default::default())?,
            ))
        })
        .unwrap();
    assert_eq!(watchers, 0);
    assert_eq!(comments, 0);

    let err = tasks
        .delete_task(&admin.id, &task.id, OpContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { .. }));
}

#[tokio::test]
async fn watch_and_unwatch() {
    let t = TestEngine::start();
    let admin = t.task_admin("watcher-admin@example.com").await;
    let fan = t.user("fan@example.com");
    let task = t
        .engine
        .create_task(&admin.id, CreateTask::new("Popular"))
        .await
        .unwrap();
    let tasks = t.engine.tasks();

    let first = tasks
        .watch_task(&admin.id, &task.id, &fan.id, OpContext::new())
        .await
        .unwrap();
    let again = tasks
        .watch_task(&admin.id, &task.id, &fan.id, OpContext::new())
        .await
        .unwrap();
    assert_eq!(first, again);

    let watched = tasks
        .list_tasks(
            TaskQuery::new(TaskFilter {
                watched_by: Some(fan.id.clone()),
                ..Default::default()
            }),
            OpContext::new(),
        )
        .await
        .unwrap();
    assert_eq!(watched.len(), 1);

    assert!(
        tasks
            .unwatch_task(&admin.id, &task.id, &fan.id, OpContext::new())
            .await
            .unwrap()
    );
    assert!(
        !tasks
            .unwatch_task(&admin.id, &task.id, &fan.id, OpContext::new())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn list_tasks_orders_and_pages() {
    let t = TestEngine::start();
    let admin = t.task_admin("lister@example.com").await;
    for (title, priority) in [
        ("a", TaskPriority::Low),
        ("b", TaskPriority::High),
        ("c", TaskPriority::Medium),
        ("d", TaskPriority::High),
    ] {
        t.engine
            .create_task(
                &admin.id,
                CreateTask {
                    priority,
                    ..CreateTask::new(title)
                },
            )
            .await
            .unwrap();
    }
    let tasks = t.engine.tasks();

    let by_priority = tasks
        .list_tasks(
            TaskQuery::default()
                .order_by(TaskOrderField::Priority, Direction::Desc)
                .order_by(TaskOrderField::Title, Direction::Asc),
            OpContext::new(),
        )
        .await
        .unwrap();
    let titles: Vec<&str> = by_priority.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, ["b", "d", "c", "a"]);

    let (b, d) = (&by_priority[0], &by_priority[1]);
    let forward = tasks
        .list_tasks(
            TaskQuery::default()
                .order_by(TaskOrderField::Title, Direction::Asc)
                .cursor(b.id.clone())
                .skip(1)
                .take(2),
            OpContext::new(),
        )
        .await
        .unwrap();
    let titles: Vec<&str> = forward.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, ["c", "d"]);

    let backward = tasks
        .list_tasks(
            TaskQuery::default()
                .order_by(TaskOrderField::Title, Direction::Asc)
                .cursor(d.id.clone())
                .skip(1)
                .take(-2),
            OpContext::new(),
        )
        .await
        .unwrap();
    let titles: Vec<&str> = backward.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, ["b", "c"]);
}
