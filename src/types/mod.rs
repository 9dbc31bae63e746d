mod grant;
mod models;

pub use grant::{Grant, PermissionSet};
pub use models::*;
