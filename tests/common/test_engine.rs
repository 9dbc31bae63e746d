use std::sync::Arc;

use taskforge::Engine;
use taskforge::config::EngineConfig;
use taskforge::rbac::{NoopPermissionCache, PermissionCache};
use taskforge::store::{OpContext, Store, TxOptions};
use taskforge::types::{NewUser, Role, User};
use tempfile::TempDir;

/// File-backed engine in a temporary directory, removed on drop.
pub struct TestEngine {
    pub temp_dir: TempDir,
    pub engine: Engine,
}

impl TestEngine {
    pub fn start() -> Self {
        Self::start_with(|_| {})
    }

    pub fn start_with(configure: impl FnOnce(&mut EngineConfig)) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let mut config = EngineConfig::with_data_dir(temp_dir.path());
        configure(&mut config);
        let engine = Engine::open(config).expect("open engine");
        Self { temp_dir, engine }
    }

    /// Engine whose permission checks always hit the store.
    pub fn uncached() -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let config = EngineConfig::with_data_dir(temp_dir.path());
        let store = taskforge::store::SqliteStore::from_config(&config.database)
            .expect("open store");
        store.initialize().expect("initialize store");
        let cache: Arc<dyn PermissionCache> = Arc::new(NoopPermissionCache);
        let engine = Engine::with_cache(Arc::new(store), cache, config);
        Self { temp_dir, engine }
    }

    pub fn store(&self) -> &dyn Store {
        self.engine.store().as_ref()
    }

    /// Inserts a user directly; password hashing is covered by the admin tests.
    pub fn user(&self, email: &str) -> User {
        let data = NewUser {
            email: email.to_string(),
            password: "$argon2id$placeholder".to_string(),
        };
        self.store()
            .transaction(&TxOptions::default(), |repo| repo.create_user(&data))
            .expect("create user")
    }

    /// Creates `role_name` with the given grants and assigns it to `user_id`.
    pub async fn grant_role(&self, user_id: &str, role_name: &str, grants: &[(&str, &str)]) -> Role {
        let admin = self.engine.admin();
        let role = admin
            .create_role(role_name, "", OpContext::new())
            .await
            .expect("create role");
        for (resource, action) in grants {
            let permission = admin
                .ensure_permission(resource, action, OpContext::new())
                .await
                .expect("ensure permission");
            admin
                .grant_permission(&role.id, &permission.id, OpContext::new())
                .await
                .expect("grant permission");
        }
        admin
            .assign_role(user_id, &role.id, OpContext::new())
            .await
            .expect("assign role");
        role
    }

    /// A user holding every task and comment permission.
    pub async fn task_admin(&self, email: &str) -> User {
        let user = self.user(email);
        self.grant_role(
            &user.id,
            &format!("admin-{email}"),
            &[
                ("task", "create"),
                ("task", "update"),
                ("task", "delete"),
                ("comment", "create"),
                ("comment", "update"),
                ("comment", "delete"),
            ],
        )
        .await;
        user
    }
}
