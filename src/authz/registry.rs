use std::collections::BTreeMap;

use crate::authz::errors::AuthzError;
use crate::authz::types::{Permission, PermissionId, Role, RoleId};

/// Named roles and permissions known to the process.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    roles: BTreeMap<RoleId, Role>,
    permissions: BTreeMap<PermissionId, Permission>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a role; a later definition with the same id replaces it.
    pub fn define_role(&mut self, role: Role) {
        self.roles.insert(role.id.clone(), role);
    }

    pub fn define_permission(&mut self, permission: Permission) {
        self.permissions.insert(permission.id.clone(), permission);
    }

    pub fn role(&self, id: &str) -> Option<&Role> {
        self.roles.get(id)
    }

    pub fn permission(&self, id: &str) -> Option<&Permission> {
        self.permissions.get(id)
    }

    pub fn ensure_role(&self, id: &str) -> Result<&Role, AuthzError> {
        self.roles
            .get(id)
            .ok_or_else(|| AuthzError::UndefinedRole(id.to_string()))
    }

    pub fn ensure_permission(&self, id: &str) -> Result<&Permission, AuthzError> {
        self.permissions
            .get(id)
            .ok_or_else(|| AuthzError::UndefinedPermission(id.to_string()))
    }

    /// Fails unless `id` names a role that may be granted on a resource.
    pub fn ensure_local_role(&self, id: &str) -> Result<&Role, AuthzError> {
        let role = self.ensure_role(id)?;
        if !role.local {
            return Err(AuthzError::NonLocalRole(id.to_string()));
        }
        Ok(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    pub fn permissions(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.values()
    }

    pub fn local_roles(&self) -> Vec<RoleId> {
        self.roles
            .values()
            .filter(|r| r.local)
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn global_roles(&self) -> Vec<RoleId> {
        self.roles
            .values()
            .filter(|r| !r.local)
            .map(|r| r.id.clone())
            .collect()
    }

    pub fn all_permissions(&self) -> Vec<PermissionId> {
        self.permissions.keys().cloned().collect()
    }

    pub fn role_count(&self) -> usize {
        self.roles.len()
    }

    pub fn permission_count(&self) -> usize {
        self.permissions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(id: &str, local: bool) -> Role {
        Role {
            id: id.into(),
            title: id.into(),
            description: String::new(),
            local,
        }
    }

    #[test]
    fn test_local_and_global_roles() {
        let mut reg = Registry::new();
        reg.define_role(role("Editor", true));
        reg.define_role(role("Manager", false));
        reg.define_role(role("Reader", true));

        assert_eq!(reg.local_roles(), vec!["Editor", "Reader"]);
        assert_eq!(reg.global_roles(), vec!["Manager"]);
    }

    #[test]
    fn test_ensure_local_role() {
        let mut reg = Registry::new();
        reg.define_role(role("Manager", false));

        assert!(matches!(
            reg.ensure_local_role("Manager").unwrap_err(),
            AuthzError::NonLocalRole(_)
        ));
        assert!(matches!(
            reg.ensure_local_role("Ghost").unwrap_err(),
            AuthzError::UndefinedRole(_)
        ));
    }

    #[test]
    fn test_redefinition_replaces() {
        let mut reg = Registry::new();
        reg.define_permission(Permission {
            id: "ViewContent".into(),
            title: "View".into(),
            description: String::new(),
        });
        reg.define_permission(Permission {
            id: "ViewContent".into(),
            title: "View content".into(),
            description: "read access".into(),
        });
        assert_eq!(reg.permission_count(), 1);
        assert_eq!(reg.permission("ViewContent").unwrap().title, "View content");
        assert!(reg.ensure_permission("Nope").is_err());
    }
}
