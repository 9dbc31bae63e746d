use std::sync::Arc;

use crate::error::Result;
use crate::store::{
    self, OpContext, PermissionQuery, Repository, RolePermissionQuery, Store, TxOptions,
    UserRoleQuery,
};
use crate::types::{Grant, PermissionFilter, PermissionSet, RolePermissionFilter, UserRoleFilter};

/// Computes effective permissions by walking user roles, role grants and permissions.
#[derive(Clone)]
pub struct PermissionResolver {
    store: Arc<dyn Store>,
}

impl PermissionResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Resolves inside an existing transaction. An unknown user has no roles and
    /// therefore an empty set.
    pub fn resolve_in(repo: &dyn Repository, user_id: &str) -> Result<PermissionSet> {
        let memberships = repo.find_many_user_roles(&UserRoleQuery::new(UserRoleFilter {
            user_id: Some(user_id.to_string()),
            role_id: None,
        }))?;
        if memberships.is_empty() {
            tracing::debug!(user_id, "user holds no roles");
            return Ok(PermissionSet::empty());
        }

        let role_ids: Vec<String> = memberships.into_iter().map(|m| m.role_id).collect();
        let grants = repo.find_many_role_permissions(&RolePermissionQuery::new(
            RolePermissionFilter {
                role_ids: Some(role_ids.clone()),
                permission_id: None,
            },
        ))?;

        let mut permission_ids: Vec<String> = grants.into_iter().map(|g| g.permission_id).collect();
        permission_ids.sort();
        permission_ids.dedup();
        if permission_ids.is_empty() {
            return Ok(PermissionSet::empty());
        }

        let permissions = repo.find_many_permissions(&PermissionQuery::new(PermissionFilter {
            ids: Some(permission_ids),
            ..Default::default()
        }))?;

        let set: PermissionSet = permissions
            .into_iter()
            .map(|p| Grant::new(p.resource, p.action))
            .collect();
        tracing::debug!(user_id, roles = role_ids.len(), permissions = %set, "resolved permissions");
        Ok(set)
    }

    pub async fn resolve(&self, user_id: &str, context: OpContext) -> Result<PermissionSet> {
        let user_id = user_id.to_string();
        store::run_transaction(Arc::clone(&self.store), TxOptions::new(context), move |repo| {
            Self::resolve_in(repo, &user_id)
        })
        .await
    }
}
