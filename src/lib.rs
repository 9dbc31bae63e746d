//! # Taskforge
//!
//! Role-based authorization and task lifecycle management over an embedded SQLite store.
//!
//! Users hold roles, roles grant `(resource, action)` permissions, and every mutating
//! task or comment operation is checked against the acting user's effective
//! permissions before anything is written.
//!
//! ## Library Usage
//!
//! ```rust,ignore
//! use taskforge::config::EngineConfig;
//! use taskforge::engine::Engine;
//! use taskforge::store::OpContext;
//! use taskforge::tasks::CreateTask;
//! use taskforge::types::TaskStatus;
//!
//! let engine = Engine::open(EngineConfig::load("taskforge.toml")?)?;
//! let admin = engine.admin();
//!
//! let user = admin.register_user("ana@example.com", "s3cret", OpContext::new()).await?;
//! let role = admin.create_role("maintainer", "", OpContext::new()).await?;
//! let create = admin.ensure_permission("task", "create", OpContext::new()).await?;
//! admin.grant_permission(&role.id, &create.id, OpContext::new()).await?;
//! admin.assign_role(&user.id, &role.id, OpContext::new()).await?;
//!
//! let task = engine.create_task(&user.id, CreateTask::new("Ship it")).await?;
//! assert_eq!(task.status, TaskStatus::Pending);
//! ```

pub mod admin;
pub mod auth;
pub mod comments;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod rbac;
pub mod store;
pub mod tasks;
pub mod types;

pub use engine::Engine;
pub use error::{Error, Result};
