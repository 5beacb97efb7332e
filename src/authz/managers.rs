use serde::{Deserialize, Serialize};

use crate::authz::errors::AuthzError;
use crate::authz::registry::Registry;
use crate::authz::securitymap::SecurityMap;
use crate::authz::types::{PermissionId, PrincipalId, RoleId, Setting};

/// Roles are the rows, principals the columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalRoleMap(SecurityMap<RoleId, PrincipalId>);

impl PrincipalRoleMap {
    pub fn assign_role_to_principal(&mut self, role: &str, principal: &str) -> bool {
        self.set(role, principal, Setting::Allow)
    }

    pub fn assign_role_to_principal_no_inherit(&mut self, role: &str, principal: &str) -> bool {
        self.set(role, principal, Setting::AllowSingle)
    }

    pub fn remove_role_from_principal(&mut self, role: &str, principal: &str) -> bool {
        self.set(role, principal, Setting::Deny)
    }

    pub fn unset_role_for_principal(&mut self, role: &str, principal: &str) -> bool {
        self.set(role, principal, Setting::Unset)
    }

    /// Write or clear one cell. Returns whether the table changed.
    pub fn set(&mut self, role: &str, principal: &str, setting: Setting) -> bool {
        match setting {
            Setting::Unset => self.0.del_cell(role, principal),
            Setting::Allow | Setting::Deny | Setting::AllowSingle => {
                self.0
                    .add_cell(role.to_string(), principal.to_string(), setting)
            }
        }
    }

    pub fn get_principals_for_role(&self, role: &str) -> Vec<(PrincipalId, Setting)> {
        self.0.get_row(role)
    }

    pub fn get_roles_for_principal(&self, principal: &str) -> Vec<(RoleId, Setting)> {
        self.0.get_col(principal)
    }

    pub fn get_setting(&self, role: &str, principal: &str) -> Setting {
        self.0.query_cell(role, principal, Setting::Unset)
    }

    pub fn get_principals_and_roles(&self) -> Vec<(RoleId, PrincipalId, Setting)> {
        self.0.get_all_cells()
    }

    pub fn map(&self) -> &SecurityMap<RoleId, PrincipalId> {
        &self.0
    }
}

/// Permissions are the rows, principals the columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalPermissionMap(SecurityMap<PermissionId, PrincipalId>);

impl PrincipalPermissionMap {
    pub fn grant_permission_to_principal(&mut self, permission: &str, principal: &str) -> bool {
        self.set(permission, principal, Setting::Allow)
    }

    pub fn grant_permission_to_principal_no_inherit(
        &mut self,
        permission: &str,
        principal: &str,
    ) -> bool {
        self.set(permission, principal, Setting::AllowSingle)
    }

    pub fn deny_permission_to_principal(&mut self, permission: &str, principal: &str) -> bool {
        self.set(permission, principal, Setting::Deny)
    }

    pub fn unset_permission_for_principal(&mut self, permission: &str, principal: &str) -> bool {
        self.set(permission, principal, Setting::Unset)
    }

    pub fn set(&mut self, permission: &str, principal: &str, setting: Setting) -> bool {
        match setting {
            Setting::Unset => self.0.del_cell(permission, principal),
            Setting::Allow | Setting::Deny | Setting::AllowSingle => {
                self.0
                    .add_cell(permission.to_string(), principal.to_string(), setting)
            }
        }
    }

    pub fn get_principals_for_permission(&self, permission: &str) -> Vec<(PrincipalId, Setting)> {
        self.0.get_row(permission)
    }

    pub fn get_permissions_for_principal(&self, principal: &str) -> Vec<(PermissionId, Setting)> {
        self.0.get_col(principal)
    }

    pub fn get_setting(&self, permission: &str, principal: &str) -> Setting {
        self.0.query_cell(permission, principal, Setting::Unset)
    }

    pub fn get_principals_and_permissions(&self) -> Vec<(PermissionId, PrincipalId, Setting)> {
        self.0.get_all_cells()
    }

    pub fn map(&self) -> &SecurityMap<PermissionId, PrincipalId> {
        &self.0
    }
}

/// Permissions are the rows, roles the columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RolePermissionMap(SecurityMap<PermissionId, RoleId>);

impl RolePermissionMap {
    pub fn grant_permission_to_role(&mut self, permission: &str, role: &str) -> bool {
        self.set(permission, role, Setting::Allow)
    }

    pub fn grant_permission_to_role_no_inherit(&mut self, permission: &str, role: &str) -> bool {
        self.set(permission, role, Setting::AllowSingle)
    }

    pub fn deny_permission_to_role(&mut self, permission: &str, role: &str) -> bool {
        self.set(permission, role, Setting::Deny)
    }

    pub fn unset_permission_from_role(&mut self, permission: &str, role: &str) -> bool {
        self.set(permission, role, Setting::Unset)
    }

    pub fn set(&mut self, permission: &str, role: &str, setting: Setting) -> bool {
        match setting {
            Setting::Unset => self.0.del_cell(permission, role),
            Setting::Allow | Setting::Deny | Setting::AllowSingle => {
                self.0
                    .add_cell(permission.to_string(), role.to_string(), setting)
            }
        }
    }

    pub fn get_roles_for_permission(&self, permission: &str) -> Vec<(RoleId, Setting)> {
        self.0.get_row(permission)
    }

    pub fn get_permissions_for_role(&self, role: &str) -> Vec<(PermissionId, Setting)> {
        self.0.get_col(role)
    }

    pub fn get_setting(&self, permission: &str, role: &str) -> Setting {
        self.0.query_cell(permission, role, Setting::Unset)
    }

    pub fn get_roles_and_permissions(&self) -> Vec<(PermissionId, RoleId, Setting)> {
        self.0.get_all_cells()
    }

    pub fn map(&self) -> &SecurityMap<PermissionId, RoleId> {
        &self.0
    }
}

/// Code-level grants shared by the whole process.
///
/// Writes validate ids against the [`Registry`]; clearing a cell never does,
/// so grants left behind by a removed role or permission can still be unset.
#[derive(Debug, Clone, Default)]
pub struct GlobalGrants {
    pub prinrole: PrincipalRoleMap,
    pub prinperm: PrincipalPermissionMap,
    pub roleperm: RolePermissionMap,
}

fn reject_single(setting: Setting) -> Result<(), AuthzError> {
    match setting {
        Setting::AllowSingle => Err(AuthzError::UnsupportedSetting(setting.to_string())),
        Setting::Allow | Setting::Deny | Setting::Unset => Ok(()),
    }
}

impl GlobalGrants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_principal_role(
        &mut self,
        registry: &Registry,
        role: &str,
        principal: &str,
        setting: Setting,
    ) -> Result<bool, AuthzError> {
        reject_single(setting)?;
        if setting != Setting::Unset {
            registry.ensure_role(role)?;
        }
        Ok(self.prinrole.set(role, principal, setting))
    }

    pub fn set_principal_permission(
        &mut self,
        registry: &Registry,
        permission: &str,
        principal: &str,
        setting: Setting,
    ) -> Result<bool, AuthzError> {
        reject_single(setting)?;
        if setting != Setting::Unset {
            registry.ensure_permission(permission)?;
        }
        Ok(self.prinperm.set(permission, principal, setting))
    }

    pub fn set_role_permission(
        &mut self,
        registry: &Registry,
        permission: &str,
        role: &str,
        setting: Setting,
    ) -> Result<bool, AuthzError> {
        reject_single(setting)?;
        if setting != Setting::Unset {
            registry.ensure_permission(permission)?;
            registry.ensure_role(role)?;
        }
        Ok(self.roleperm.set(permission, role, setting))
    }

    pub fn assign_role_to_principal(
        &mut self,
        registry: &Registry,
        role: &str,
        principal: &str,
    ) -> Result<(), AuthzError> {
        self.set_principal_role(registry, role, principal, Setting::Allow)
            .map(drop)
    }

    pub fn remove_role_from_principal(
        &mut self,
        registry: &Registry,
        role: &str,
        principal: &str,
    ) -> Result<(), AuthzError> {
        self.set_principal_role(registry, role, principal, Setting::Deny)
            .map(drop)
    }

    pub fn unset_role_for_principal(&mut self, role: &str, principal: &str) -> bool {
        self.prinrole.unset_role_for_principal(role, principal)
    }

    pub fn grant_permission_to_principal(
        &mut self,
        registry: &Registry,
        permission: &str,
        principal: &str,
    ) -> Result<(), AuthzError> {
        self.set_principal_permission(registry, permission, principal, Setting::Allow)
            .map(drop)
    }

    pub fn deny_permission_to_principal(
        &mut self,
        registry: &Registry,
        permission: &str,
        principal: &str,
    ) -> Result<(), AuthzError> {
        self.set_principal_permission(registry, permission, principal, Setting::Deny)
            .map(drop)
    }

    pub fn unset_permission_for_principal(&mut self, permission: &str, principal: &str) -> bool {
        self.prinperm
            .unset_permission_for_principal(permission, principal)
    }

    pub fn grant_permission_to_role(
        &mut self,
        registry: &Registry,
        permission: &str,
        role: &str,
    ) -> Result<(), AuthzError> {
        self.set_role_permission(registry, permission, role, Setting::Allow)
            .map(drop)
    }

    pub fn deny_permission_to_role(
        &mut self,
        registry: &Registry,
        permission: &str,
        role: &str,
    ) -> Result<(), AuthzError> {
        self.set_role_permission(registry, permission, role, Setting::Deny)
            .map(drop)
    }

    pub fn unset_permission_from_role(&mut self, permission: &str, role: &str) -> bool {
        self.roleperm.unset_permission_from_role(permission, role)
    }

    /// Allow every registered permission to `role`.
    pub fn grant_all_permissions_to_role(
        &mut self,
        registry: &Registry,
        role: &str,
    ) -> Result<(), AuthzError> {
        registry.ensure_role(role)?;
        for permission in registry.all_permissions() {
            self.roleperm.grant_permission_to_role(&permission, role);
        }
        Ok(())
    }

    /// Allow every registered permission to `principal`.
    pub fn grant_all_permissions_to_principal(&mut self, registry: &Registry, principal: &str) {
        for permission in registry.all_permissions() {
            self.prinperm
                .grant_permission_to_principal(&permission, principal);
        }
    }

    pub fn grant_count(&self) -> usize {
        self.prinrole.map().get_all_cells().len()
            + self.prinperm.map().get_all_cells().len()
            + self.roleperm.map().get_all_cells().len()
    }
}

/// Grant tables stored on a single resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalAcl {
    #[serde(default)]
    pub prinperm: PrincipalPermissionMap,
    #[serde(default)]
    pub prinrole: PrincipalRoleMap,
    #[serde(default)]
    pub roleperm: RolePermissionMap,
}

/// Validated write access to one resource's [`LocalAcl`].
///
/// The ACL is created on the first write. [`LocalAclEditor::changed`] tells
/// the owner whether the resource has to be saved.
pub struct LocalAclEditor<'a> {
    acl: &'a mut Option<LocalAcl>,
    registry: &'a Registry,
    changed: bool,
}

impl<'a> LocalAclEditor<'a> {
    pub fn new(acl: &'a mut Option<LocalAcl>, registry: &'a Registry) -> Self {
        Self {
            acl,
            registry,
            changed: false,
        }
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    pub fn acl(&self) -> Option<&LocalAcl> {
        self.acl.as_ref()
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    fn write(&mut self, setting: Setting, apply: impl FnOnce(&mut LocalAcl) -> bool) -> bool {
        if setting == Setting::Unset && self.acl.is_none() {
            return false;
        }
        let acl = self.acl.get_or_insert_with(LocalAcl::default);
        let changed = apply(acl);
        self.changed |= changed;
        changed
    }

    pub fn set_principal_permission(
        &mut self,
        permission: &str,
        principal: &str,
        setting: Setting,
    ) -> Result<bool, AuthzError> {
        if setting != Setting::Unset {
            self.registry.ensure_permission(permission)?;
        }
        Ok(self.write(setting, |acl| acl.prinperm.set(permission, principal, setting)))
    }

    pub fn set_principal_role(
        &mut self,
        role: &str,
        principal: &str,
        setting: Setting,
    ) -> Result<bool, AuthzError> {
        if setting != Setting::Unset {
            self.registry.ensure_local_role(role)?;
        }
        Ok(self.write(setting, |acl| acl.prinrole.set(role, principal, setting)))
    }

    pub fn set_role_permission(
        &mut self,
        permission: &str,
        role: &str,
        setting: Setting,
    ) -> Result<bool, AuthzError> {
        if setting != Setting::Unset {
            self.registry.ensure_permission(permission)?;
            self.registry.ensure_role(role)?;
        }
        Ok(self.write(setting, |acl| acl.roleperm.set(permission, role, setting)))
    }
}
