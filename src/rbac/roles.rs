//! Role catalog.
//!
//! Roles are a closed set. The catalog is built once per process, validated
//! at construction, and read-only afterwards, so it can be shared between
//! agents behind an `Arc` without locking.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::rbac::permission::{Permission, PermissionMatcher};

/// A named capability bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Role {
    Developer,
    PM,
    ProductAnalyst,
    QA,
    Designer,
    DevOps,
    Admin,
}

impl Role {
    pub const ALL: [Role; 7] = [
        Role::Developer,
        Role::PM,
        Role::ProductAnalyst,
        Role::QA,
        Role::Designer,
        Role::DevOps,
        Role::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Developer => "Developer",
            Role::PM => "PM",
            Role::ProductAnalyst => "ProductAnalyst",
            Role::QA => "QA",
            Role::Designer => "Designer",
            Role::DevOps => "DevOps",
            Role::Admin => "Admin",
        }
    }

    /// Permissions granted when no configuration overrides the role.
    fn builtin_permissions(&self) -> &'static [&'static str] {
        const CONTRIBUTOR: &[&str] = &[
            "tasks:read",
            "tasks:claim",
            "tasks:start",
            "tasks:submit",
            "tasks:abandon",
        ];
        match self {
            Role::Admin => &["*"],
            Role::PM => &["tasks:*", "projects:*"],
            Role::QA => &["tasks:claim", "tasks:review:*"],
            Role::DevOps => &[
                "tasks:read",
                "tasks:claim",
                "tasks:start",
                "tasks:submit",
                "tasks:abandon",
                "deployments:*",
            ],
            Role::Developer | Role::Designer | Role::ProductAnalyst => CONTRIBUTOR,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "developer" | "dev" => Ok(Role::Developer),
            "pm" | "productmanager" => Ok(Role::PM),
            "productanalyst" | "analyst" => Ok(Role::ProductAnalyst),
            "qa" => Ok(Role::QA),
            "designer" => Ok(Role::Designer),
            "devops" => Ok(Role::DevOps),
            "admin" => Ok(Role::Admin),
            _ => Err(Error::UnknownRole(s.to_string())),
        }
    }
}

/// Source of role permissions consulted before every mutation.
pub trait RoleSource: Send + Sync {
    /// Permission patterns held by `role`, or `None` if the role is not
    /// configured.
    fn permissions(&self, role: Role) -> Option<&[Permission]>;
}

/// Check that `role` holds `requested` according to `source`.
///
/// # Errors
/// - [`Error::InvalidPermission`] if `requested` contains a wildcard segment
/// - [`Error::PermissionDenied`] if no held pattern grants it
pub fn require_permission<S>(source: &S, role: Role, requested: &str) -> Result<()>
where
    S: RoleSource + ?Sized,
{
    PermissionMatcher::validate_request(requested)?;
    let held = source.permissions(role).unwrap_or(&[]);
    if PermissionMatcher::check(held, requested) {
        Ok(())
    } else {
        Err(Error::PermissionDenied {
            role,
            requested: requested.to_string(),
        })
    }
}

/// Immutable mapping from role to permission patterns.
#[derive(Debug, Clone)]
pub struct RoleCatalog {
    roles: HashMap<Role, Vec<Permission>>,
}

impl RoleCatalog {
    /// The built-in catalog covering every role.
    pub fn builtin() -> Self {
        let roles = Role::ALL
            .iter()
            .map(|role| {
                let permissions = role
                    .builtin_permissions()
                    .iter()
                    .filter_map(|p| Permission::parse(p).ok())
                    .collect();
                (*role, permissions)
            })
            .collect();
        Self { roles }
    }

    /// Build a catalog from explicit role assignments.
    ///
    /// # Errors
    /// Returns [`Error::InvalidPermission`] for any malformed pattern.
    pub fn from_patterns<I, P>(roles: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Role, Vec<P>)>,
        P: AsRef<str>,
    {
        let mut catalog = HashMap::new();
        for (role, patterns) in roles {
            let parsed = patterns
                .iter()
                .map(|p| Permission::parse(p.as_ref()))
                .collect::<Result<Vec<_>>>()?;
            catalog.insert(role, parsed);
        }
        Ok(Self { roles: catalog })
    }

    /// The built-in catalog with some roles replaced.
    ///
    /// Keys are role names as accepted by `Role::from_str`.
    ///
    /// # Errors
    /// - [`Error::UnknownRole`] for an unrecognised role name
    /// - [`Error::InvalidPermission`] for any malformed pattern
    pub fn with_overrides(overrides: &BTreeMap<String, Vec<String>>) -> Result<Self> {
        let mut catalog = Self::builtin();
        for (name, patterns) in overrides {
            let role: Role = name.parse()?;
            let parsed = patterns
                .iter()
                .map(|p| Permission::parse(p))
                .collect::<Result<Vec<_>>>()?;
            catalog.roles.insert(role, parsed);
        }
        Ok(catalog)
    }

    /// Permissions of `role`; empty if the role is not configured.
    pub fn permissions_of(&self, role: Role) -> &[Permission] {
        self.roles.get(&role).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn roles(&self) -> impl Iterator<Item = Role> + '_ {
        self.roles.keys().copied()
    }

    /// Shorthand for [`require_permission`] against this catalog.
    pub fn require(&self, role: Role, requested: &str) -> Result<()> {
        require_permission(self, role, requested)
    }
}

impl Default for RoleCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RoleSource for RoleCatalog {
    fn permissions(&self, role: Role) -> Option<&[Permission]> {
        self.roles.get(&role).map(Vec::as_slice)
    }
}
