//! Role-based access control: users hold roles, roles grant `(resource, action)`
//! permissions, and a user is authorized for exactly the union of those grants.

mod cache;
mod guard;
mod resolver;

pub use cache::{NoopPermissionCache, PermissionCache, TtlPermissionCache};
pub use guard::Authorizer;
pub use resolver::PermissionResolver;
