//! Sharing view and batch edits of a resource's local grants.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::authz::engine::Interaction;
use crate::authz::errors::AuthzError;
use crate::authz::hierarchy::Hierarchy;
use crate::authz::managers::{
    LocalAclEditor, PrincipalPermissionMap, PrincipalRoleMap, RolePermissionMap,
};
use crate::authz::types::{
    Participation, PermissionId, Principal, PrincipalId, ResourceId, RoleId, Setting,
};
use crate::authz::AuthzState;

/// Name of the level holding the code-level grants.
pub const SYSTEM_LEVEL: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinPermEntry {
    pub principal: PrincipalId,
    pub permission: PermissionId,
    pub setting: Setting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrinRoleEntry {
    pub principal: PrincipalId,
    pub role: RoleId,
    pub setting: Setting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermEntry {
    pub role: RoleId,
    pub permission: PermissionId,
    pub setting: Setting,
}

/// Grants stored at one level of the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LevelSettings {
    pub name: String,
    pub prinperm: Vec<PrinPermEntry>,
    pub prinrole: Vec<PrinRoleEntry>,
    pub roleperm: Vec<RolePermEntry>,
}

impl LevelSettings {
    fn from_maps(
        name: String,
        prinperm: &PrincipalPermissionMap,
        prinrole: &PrincipalRoleMap,
        roleperm: &RolePermissionMap,
    ) -> Self {
        Self {
            name,
            prinperm: prinperm
                .get_principals_and_permissions()
                .into_iter()
                .map(|(permission, principal, setting)| PrinPermEntry {
                    principal,
                    permission,
                    setting,
                })
                .collect(),
            prinrole: prinrole
                .get_principals_and_roles()
                .into_iter()
                .map(|(role, principal, setting)| PrinRoleEntry {
                    principal,
                    role,
                    setting,
                })
                .collect(),
            roleperm: roleperm
                .get_roles_and_permissions()
                .into_iter()
                .map(|(permission, role, setting)| RolePermEntry {
                    role,
                    permission,
                    setting,
                })
                .collect(),
        }
    }
}

/// A batch of local grant edits, as posted by a sharing form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SharingChanges {
    #[serde(default)]
    pub prinperm: Vec<PrinPermEntry>,
    #[serde(default)]
    pub prinrole: Vec<PrinRoleEntry>,
    #[serde(default)]
    pub roleperm: Vec<RolePermEntry>,
}

/// Grants stored on `id` and each of its ancestors, target first, followed
/// by the code-level grants under [`SYSTEM_LEVEL`].
pub fn settings_for_object<H: Hierarchy + ?Sized>(
    tree: &H,
    state: &AuthzState,
    id: &ResourceId,
) -> Vec<LevelSettings> {
    let mut levels = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(tree.view_owner(id).unwrap_or(id));

    while let Some(node) = current {
        if !seen.insert(node) {
            tracing::warn!(resource = %id, at = %node, "cycle in resource parents");
            break;
        }
        let level = match tree.acl(node) {
            Some(acl) => LevelSettings::from_maps(
                node.to_string(),
                &acl.prinperm,
                &acl.prinrole,
                &acl.roleperm,
            ),
            None => LevelSettings {
                name: node.to_string(),
                ..Default::default()
            },
        };
        levels.push(level);
        current = tree.parent(node);
    }

    let grants = &state.grants;
    levels.push(LevelSettings::from_maps(
        SYSTEM_LEVEL.to_string(),
        &grants.prinperm,
        &grants.prinrole,
        &grants.roleperm,
    ));
    levels
}

/// Apply `changes` to one resource's local grants.
///
/// The whole batch is validated before anything is written, so a rejected
/// batch leaves the ACL untouched. Returns whether any cell changed.
pub fn apply_sharing(
    editor: &mut LocalAclEditor<'_>,
    changes: &SharingChanges,
) -> Result<bool, AuthzError> {
    validate(editor, changes)?;

    let mut changed = false;
    for entry in &changes.prinperm {
        changed |=
            editor.set_principal_permission(&entry.permission, &entry.principal, entry.setting)?;
    }
    for entry in &changes.prinrole {
        changed |= editor.set_principal_role(&entry.role, &entry.principal, entry.setting)?;
    }
    for entry in &changes.roleperm {
        changed |= editor.set_role_permission(&entry.permission, &entry.role, entry.setting)?;
    }
    Ok(changed)
}

fn validate(editor: &LocalAclEditor<'_>, changes: &SharingChanges) -> Result<(), AuthzError> {
    let registry = editor.registry();
    for entry in &changes.prinperm {
        match entry.setting {
            Setting::Unset => {}
            Setting::Allow | Setting::Deny | Setting::AllowSingle => {
                registry.ensure_permission(&entry.permission)?;
            }
        }
    }
    for entry in &changes.prinrole {
        match entry.setting {
            Setting::Unset => {}
            Setting::Allow | Setting::Deny | Setting::AllowSingle => {
                registry.ensure_local_role(&entry.role)?;
            }
        }
    }
    for entry in &changes.roleperm {
        match entry.setting {
            Setting::Unset => {}
            Setting::Allow | Setting::Deny | Setting::AllowSingle => {
                registry.ensure_permission(&entry.permission)?;
                registry.ensure_role(&entry.role)?;
            }
        }
    }
    Ok(())
}

/// Every registered permission `principal` holds on `resource`.
pub fn all_permissions<H: Hierarchy + ?Sized>(
    state: Arc<AuthzState>,
    tree: &H,
    resource: &ResourceId,
    principal: Principal,
) -> Vec<PermissionId> {
    Interaction::for_request(state, vec![Participation::Principal(principal)])
        .all_permissions(tree, resource)
}
