//! Role-based authorization for task mutations.
//!
//! Roles map to permission patterns (`resource:action[:qualifier]` with `*`
//! wildcards). Every mutating call names the concrete permission it needs
//! and is checked against the caller's role before any write.

pub mod actions;
mod permission;
mod roles;

pub use actions::required_permission;
pub use permission::{Permission, PermissionMatcher, SEPARATOR, WILDCARD};
pub use roles::{require_permission, Role, RoleCatalog, RoleSource};
