//! Access administration: users, roles, permissions and who holds what.
//!
//! Every write that can change a user's effective permissions invalidates the
//! affected cache entries once the transaction has committed.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::PasswordHasher;
use crate::error::{Error, Result};
use crate::rbac::PermissionCache;
use crate::store::{
    self, OpContext, Repository, RoleQuery, Store, TxOptions, UserQuery, UserRoleQuery,
};
use crate::types::{
    NewPermission, NewRole, NewRolePermission, NewUser, NewUserRole, Permission, Role,
    RoleFilter, RolePermission, User, UserRole, UserRoleFilter, UserUpdate,
};

pub struct AdminService {
    store: Arc<dyn Store>,
    cache: Arc<dyn PermissionCache>,
    hasher: Arc<PasswordHasher>,
    timeout: Option<Duration>,
}

impl AdminService {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn PermissionCache>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            store,
            cache,
            hasher: Arc::new(PasswordHasher::new()),
            timeout,
        }
    }

    async fn run<T, F>(&self, context: OpContext, body: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Repository) -> Result<T> + Send + 'static,
    {
        let options = TxOptions::new(context.or_timeout(self.timeout));
        store::run_transaction(Arc::clone(&self.store), options, body).await
    }

    async fn hash_password(&self, password: &str) -> Result<String> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&password))
            .await
            .map_err(|e| Error::Internal(format!("password hashing task failed: {e}")))?
    }

    // Users

    pub async fn register_user(&self, email: &str, password: &str, context: OpContext) -> Result<User> {
        let hash = self.hash_password(password).await?;
        let data = NewUser {
            email: email.to_string(),
            password: hash,
        };
        let user = self.run(context, move |repo| repo.create_user(&data)).await?;

        tracing::info!(user_id = %user.id, "user registered");
        Ok(user)
    }

    /// Returns the user when `password` matches the stored hash.
    pub async fn authenticate(
        &self,
        email: &str,
        password: &str,
        context: OpContext,
    ) -> Result<Option<User>> {
        let email = email.to_string();
        let Some(user) = self
            .run(context, move |repo| repo.find_user_by_email(&email))
            .await?
        else {
            return Ok(None);
        };

        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        let stored = user.password.clone();
        let valid = tokio::task::spawn_blocking(move || hasher.verify(&password, &stored))
            .await
            .map_err(|e| Error::Internal(format!("password verification task failed: {e}")))??;

        if !valid {
            tracing::warn!(user_id = %user.id, "password mismatch");
        }
        Ok(valid.then_some(user))
    }

    pub async fn change_password(
        &self,
        user_id: &str,
        password: &str,
        context: OpContext,
    ) -> Result<User> {
        let hash = self.hash_password(password).await?;
        let id = user_id.to_string();
        let user = self
            .run(context, move |repo| {
                repo.update_user(
                    &id,
                    &UserUpdate {
                        password: Some(hash),
                        ..Default::default()
                    },
                )
            })
            .await?;

        tracing::info!(user_id, "password changed");
        Ok(user)
    }

    /// Fails with [`Error::ReferentialViolation`] while the user created any task.
    pub async fn delete_user(&self, user_id: &str, context: OpContext) -> Result<()> {
        let id = user_id.to_string();
        self.run(context, move |repo| {
            if !repo.delete_user(&id)? {
                return Err(Error::not_found("user", id));
            }
            Ok(())
        })
        .await?;

        self.cache.invalidate_user(user_id);
        tracing::info!(user_id, "user deleted");
        Ok(())
    }

    pub async fn list_users(&self, query: UserQuery, context: OpContext) -> Result<Vec<User>> {
        self.run(context, move |repo| repo.find_many_users(&query)).await
    }

    // Roles

    pub async fn create_role(&self, name: &str, description: &str, context: OpContext) -> Result<Role> {
        let data = NewRole {
            name: name.to_string(),
            description: description.to_string(),
        };
        let role = self.run(context, move |repo| repo.create_role(&data)).await?;

        tracing::info!(role_id = %role.id, name = %role.name, "role created");
        Ok(role)
    }

    /// Fails with [`Error::ReferentialViolation`] while the role is held or grants
    /// permissions.
    pub async fn delete_role(&self, role_id: &str, context: OpContext) -> Result<()> {
        let id = role_id.to_string();
        let holders = self
            .run(context, move |repo| {
                let holders = role_holders(repo, &id)?;
                if !repo.delete_role(&id)? {
                    return Err(Error::not_found("role", id));
                }
                Ok(holders)
            })
            .await?;

        self.cache.invalidate_users(&holders);
        tracing::info!(role_id, "role deleted");
        Ok(())
    }

    pub async fn find_role_by_name(&self, name: &str, context: OpContext) -> Result<Option<Role>> {
        let name = name.to_string();
        self.run(context, move |repo| repo.find_role_by_name(&name))
            .await
    }

    pub async fn list_roles(&self, query: RoleQuery, context: OpContext) -> Result<Vec<Role>> {
        self.run(context, move |repo| repo.find_many_roles(&query)).await
    }

    /// Roles held by a user.
    pub async fn user_roles(&self, user_id: &str, context: OpContext) -> Result<Vec<Role>> {
        let id = user_id.to_string();
        self.run(context, move |repo| {
            let memberships = repo.find_many_user_roles(&UserRoleQuery::new(UserRoleFilter {
                user_id: Some(id),
                role_id: None,
            }))?;
            let ids = memberships.into_iter().map(|m| m.role_id).collect();
            repo.find_many_roles(&RoleQuery::new(RoleFilter {
                ids: Some(ids),
                ..Default::default()
            }))
        })
        .await
    }

    // Permissions

    pub async fn create_permission(
        &self,
        resource: &str,
        action: &str,
        context: OpContext,
    ) -> Result<Permission> {
        let data = NewPermission {
            resource: resource.to_string(),
            action: action.to_string(),
        };
        let permission = self.run(context, move |repo| repo.create_permission(&data)).await?;

        tracing::info!(permission_id = %permission.id, resource, action, "permission created");
        Ok(permission)
    }

    /// Returns the existing `(resource, action)` permission or creates it.
    pub async fn ensure_permission(
        &self,
        resource: &str,
        action: &str,
        context: OpContext,
    ) -> Result<Permission> {
        let data = NewPermission {
            resource: resource.to_string(),
            action: action.to_string(),
        };
        self.run(context, move |repo| {
            if let Some(existing) = repo.find_permission_by_pair(&data.resource, &data.action)? {
                return Ok(existing);
            }
            repo.create_permission(&data)
        })
        .await
    }

    /// Fails with [`Error::ReferentialViolation`] while any role grants it.
    pub async fn delete_permission(&self, permission_id: &str, context: OpContext) -> Result<()> {
        let id = permission_id.to_string();
        self.run(context, move |repo| {
            if !repo.delete_permission(&id)? {
                return Err(Error::not_found("permission", id));
            }
            Ok(())
        })
        .await?;

        // Grants written directly to the store may still be cached.
        self.cache.invalidate_all();
        tracing::info!(permission_id, "permission deleted");
        Ok(())
    }

    // Memberships and grants

    /// Gives a user a role. Assigning a held role is a no-op.
    pub async fn assign_role(&self, user_id: &str, role_id: &str, context: OpContext) -> Result<UserRole> {
        let data = NewUserRole {
            user_id: user_id.to_string(),
            role_id: role_id.to_string(),
        };
        let membership = self
            .run(context, move |repo| {
                if let Some(existing) = repo.find_user_role(&data.user_id, &data.role_id)? {
                    return Ok(existing);
                }
                repo.create_user_role(&data)
            })
            .await?;

        self.cache.invalidate_user(user_id);
        tracing::info!(user_id, role_id, "role assigned");
        Ok(membership)
    }

    pub async fn revoke_role(&self, user_id: &str, role_id: &str, context: OpContext) -> Result<bool> {
        let (uid, rid) = (user_id.to_string(), role_id.to_string());
        let removed = self
            .run(context, move |repo| repo.delete_user_role(&uid, &rid))
            .await?;

        self.cache.invalidate_user(user_id);
        tracing::info!(user_id, role_id, removed, "role revoked");
        Ok(removed)
    }

    /// Grants a permission to a role. Granting twice is a no-op.
    pub async fn grant_permission(
        &self,
        role_id: &str,
        permission_id: &str,
        context: OpContext,
    ) -> Result<RolePermission> {
        let data = NewRolePermission {
            role_id: role_id.to_string(),
            permission_id: permission_id.to_string(),
        };
        let (grant, holders) = self
            .run(context, move |repo| {
                let grant = match repo.find_role_permission(&data.role_id, &data.permission_id)? {
                    Some(existing) => existing,
                    None => repo.create_role_permission(&data)?,
                };
                Ok((grant, role_holders(repo, &data.role_id)?))
            })
            .await?;

        self.cache.invalidate_users(&holders);
        tracing::info!(role_id, permission_id, "permission granted");
        Ok(grant)
    }

    pub async fn revoke_permission(
        &self,
        role_id: &str,
        permission_id: &str,
        context: OpContext,
    ) -> Result<bool> {
        let (rid, pid) = (role_id.to_string(), permission_id.to_string());
        let (removed, holders) = self
            .run(context, move |repo| {
                let removed = repo.delete_role_permission(&rid, &pid)?;
                Ok((removed, role_holders(repo, &rid)?))
            })
            .await?;

        self.cache.invalidate_users(&holders);
        tracing::info!(role_id, permission_id, removed, "permission revoked");
        Ok(removed)
    }
}

fn role_holders(repo: &dyn Repository, role_id: &str) -> Result<Vec<String>> {
    let memberships = repo.find_many_user_roles(&UserRoleQuery::new(UserRoleFilter {
        user_id: None,
        role_id: Some(role_id.to_string()),
    }))?;
    Ok(memberships.into_iter().map(|m| m.user_id).collect())
}
