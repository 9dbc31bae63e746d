use std::sync::Arc;

use super::cache::PermissionCache;
use super::resolver::PermissionResolver;
use crate::error::{Error, Result};
use crate::store::{self, OpContext, Repository, Store, TxOptions};
use crate::types::PermissionSet;

/// Answers `authorize(user, resource, action)` from cached or freshly resolved
/// permission sets. A deny is `Ok(false)`; errors are reserved for store failures.
pub struct Authorizer {
    store: Arc<dyn Store>,
    cache: Arc<dyn PermissionCache>,
}

impl Authorizer {
    pub fn new(store: Arc<dyn Store>, cache: Arc<dyn PermissionCache>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &Arc<dyn PermissionCache> {
        &self.cache
    }

    /// Permission set for `user_id`, read through `repo` on a cache miss.
    pub fn permissions_in(&self, repo: &dyn Repository, user_id: &str) -> Result<PermissionSet> {
        if let Some(cached) = self.cache.get(user_id) {
            tracing::debug!(user_id, "permission cache hit");
            return Ok(cached);
        }

        let epoch = self.cache.epoch();
        let permissions = PermissionResolver::resolve_in(repo, user_id)?;
        self.cache.put(user_id, permissions.clone(), epoch);
        Ok(permissions)
    }

    pub fn authorize_in(
        &self,
        repo: &dyn Repository,
        user_id: &str,
        resource: &str,
        action: &str,
    ) -> Result<bool> {
        Ok(self.permissions_in(repo, user_id)?.has(resource, action))
    }

    /// Like [`authorize_in`](Self::authorize_in) but a deny becomes [`Error::Forbidden`].
    pub fn require_in(
        &self,
        repo: &dyn Repository,
        user_id: &str,
        resource: &str,
        action: &str,
    ) -> Result<()> {
        if self.authorize_in(repo, user_id, resource, action)? {
            return Ok(());
        }
        tracing::warn!(user_id, resource, action, "permission denied");
        Err(Error::forbidden(resource, action))
    }

    pub async fn permissions(
        self: &Arc<Self>,
        user_id: &str,
        context: OpContext,
    ) -> Result<PermissionSet> {
        let this = Arc::clone(self);
        let user_id = user_id.to_string();
        store::run_transaction(Arc::clone(&self.store), TxOptions::new(context), move |repo| {
            this.permissions_in(repo, &user_id)
        })
        .await
    }

    pub async fn authorize(
        self: &Arc<Self>,
        user_id: &str,
        resource: &str,
        action: &str,
        context: OpContext,
    ) -> Result<bool> {
        Ok(self.permissions(user_id, context).await?.has(resource, action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rbac::{NoopPermissionCache, TtlPermissionCache};
    use crate::store::SqliteStore;
    use crate::types::*;
    use std::time::Duration;

    struct Fixture {
        store: Arc<dyn Store>,
        user_id: String,
        role_id: String,
    }

    fn fixture() -> Fixture {
        let store = SqliteStore::open_in_memory().unwrap();
        store.initialize().unwrap();
        let store: Arc<dyn Store> = Arc::new(store);

        let (user_id, role_id) = store
            .as_ref()
            .transaction(&TxOptions::default(), |repo| {
                let user = repo.create_user(&NewUser {
                    email: "guard@example.com".to_string(),
                    password: "hash".to_string(),
                })?;
                let role = repo.create_role(&NewRole {
                    name: "editor".to_string(),
                    description: String::new(),
                })?;
                let permission = repo.create_permission(&NewPermission {
                    resource: "task".to_string(),
                    action: "update".to_string(),
                })?;
                repo.create_role_permission(&NewRolePermission {
                    role_id: role.id.clone(),
                    permission_id: permission.id,
                })?;
                Ok((user.id, role.id))
            })
            .unwrap();

        Fixture {
            store,
            user_id,
            role_id,
        }
    }

    fn set_membership(fixture: &Fixture, member: bool) {
        fixture
            .store
            .as_ref()
            .transaction(&TxOptions::default(), |repo| {
                if member {
                    repo.create_user_role(&NewUserRole {
                        user_id: fixture.user_id.clone(),
                        role_id: fixture.role_id.clone(),
                    })?;
                } else {
                    repo.delete_user_role(&fixture.user_id, &fixture.role_id)?;
                }
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_roles_denies_everything() {
        let fixture = fixture();
        let authorizer = Arc::new(Authorizer::new(
            Arc::clone(&fixture.store),
            Arc::new(NoopPermissionCache),
        ));

        let permissions = authorizer
            .permissions(&fixture.user_id, OpContext::new())
            .await
            .unwrap();
        assert!(permissions.is_empty());
        assert!(
            !authorizer
                .authorize(&fixture.user_id, "task", "update", OpContext::new())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_unknown_user_is_denied_not_error() {
        let fixture = fixture();
        let authorizer = Arc::new(Authorizer::new(
            Arc::clone(&fixture.store),
            Arc::new(NoopPermissionCache),
        ));
        let allowed = authorizer
            .authorize("nobody", "task", "update", OpContext::new())
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn test_require_maps_deny_to_forbidden() {
        let fixture = fixture();
        let authorizer = Authorizer::new(Arc::clone(&fixture.store), Arc::new(NoopPermissionCache));

        let err = fixture
            .store
            .as_ref()
            .transaction(&TxOptions::default(), |repo| {
                authorizer.require_in(repo, &fixture.user_id, "task", "update")
            })
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));

        set_membership(&fixture, true);
        fixture
            .store
            .as_ref()
            .transaction(&TxOptions::default(), |repo| {
                authorizer.require_in(repo, &fixture.user_id, "task", "update")
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_cached_result_survives_until_invalidated() {
        let fixture = fixture();
        let cache = Arc::new(TtlPermissionCache::new(Duration::from_secs(60)));
        let authorizer = Arc::new(Authorizer::new(Arc::clone(&fixture.store), cache.clone()));

        set_membership(&fixture, true);
        assert!(
            authorizer
                .authorize(&fixture.user_id, "task", "update", OpContext::new())
                .await
                .unwrap()
        );

        // Direct store write: only the cache lifetime or an explicit invalidation hides it.
        set_membership(&fixture, false);
        assert!(
            authorizer
                .authorize(&fixture.user_id, "task", "update", OpContext::new())
                .await
                .unwrap()
        );

        cache.invalidate_user(&fixture.user_id);
        assert!(
            !authorizer
                .authorize(&fixture.user_id, "task", "update", OpContext::new())
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_ttl_bounds_staleness() {
        let fixture = fixture();
        let cache = Arc::new(TtlPermissionCache::new(Duration::from_millis(30)));
        let authorizer = Arc::new(Authorizer::new(Arc::clone(&fixture.store), cache));

        set_membership(&fixture, true);
        assert!(
            authorizer
                .authorize(&fixture.user_id, "task", "update", OpContext::new())
                .await
                .unwrap()
        );

        set_membership(&fixture, false);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(
            !authorizer
                .authorize(&fixture.user_id, "task", "update", OpContext::new())
                .await
                .unwrap()
        );
    }
}
