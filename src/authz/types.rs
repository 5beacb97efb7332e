use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type RoleId = String;
pub type PermissionId = String;
pub type PrincipalId = String;

/// Value stored in a grant-table cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Setting {
    Allow,
    Deny,
    /// Allow on the object where it is set, never on its descendants.
    AllowSingle,
    Unset,
}

/// Position of an object relative to the object a check started on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Object,
    Ancestor,
}

impl Setting {
    /// Effect of this setting when found at `level`: `Some(true)` grants,
    /// `Some(false)` denies, `None` leaves the decision to the next level.
    pub fn resolve(self, level: Level) -> Option<bool> {
        match self {
            Setting::Allow => Some(true),
            Setting::Deny => Some(false),
            Setting::AllowSingle => (level == Level::Object).then_some(true),
            Setting::Unset => None,
        }
    }
}

impl std::fmt::Display for Setting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Setting::Allow => "Allow",
            Setting::Deny => "Deny",
            Setting::AllowSingle => "AllowSingle",
            Setting::Unset => "Unset",
        };
        f.write_str(name)
    }
}

/// Stable handle of a resource, e.g. its persisted unique id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ResourceId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Only local roles may be granted on individual resources.
    pub local: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

pub const ANONYMOUS_PRINCIPAL: &str = "Anonymous User";

/// An authenticated user or a group, with its own global roles and permissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: PrincipalId,
    #[serde(default)]
    pub roles: BTreeMap<RoleId, Setting>,
    #[serde(default)]
    pub permissions: BTreeMap<PermissionId, Setting>,
    #[serde(default)]
    pub groups: Vec<PrincipalId>,
}

impl Principal {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// The identity used for unauthenticated requests.
    pub fn anonymous() -> Self {
        let mut principal = Self::new(ANONYMOUS_PRINCIPAL);
        principal
            .roles
            .insert(crate::authz::ANONYMOUS_ROLE.to_string(), Setting::Allow);
        principal
    }

    pub fn with_role(mut self, role: &str, setting: Setting) -> Self {
        self.roles.insert(role.to_string(), setting);
        self
    }

    pub fn with_permission(mut self, permission: &str, setting: Setting) -> Self {
        self.permissions.insert(permission.to_string(), setting);
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.groups.push(group.to_string());
        self
    }
}

/// One identity acting in a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Participation {
    /// Internal system identity; passes every check.
    System,
    Principal(Principal),
}

impl Participation {
    pub fn principal_id(&self) -> Option<&str> {
        match self {
            Participation::System => None,
            Participation::Principal(p) => Some(&p.id),
        }
    }
}

// ---------- API request/response types ----------

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    /// Already authenticated identity; absent means anonymous.
    #[serde(default)]
    pub principal: Option<Principal>,
    /// e.g. "ViewContent"
    pub permission: PermissionId,
    /// e.g. "site-docs"
    pub resource: ResourceId,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct AccessRequest {
    pub permission: PermissionId,
    pub resource: ResourceId,
}

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub roles: Vec<RoleId>,
    pub principals: Vec<PrincipalId>,
}

#[derive(Debug, Deserialize)]
pub struct CreateResourceRequest {
    pub id: ResourceId,
    #[serde(default)]
    pub parent: Option<ResourceId>,
    /// Set when the node is a view rendered on behalf of another resource.
    #[serde(default)]
    pub view_of: Option<ResourceId>,
}
