use std::path::Path;

use crate::authz::errors::AuthzError;
use crate::authz::groups::StaticGroups;
use crate::authz::managers::GlobalGrants;
use crate::authz::policy::{parse_kdl_document, GrantDirective, GrantTarget, ParsedPolicy};
use crate::authz::registry::Registry;
use crate::authz::types::{Principal, Setting};
use crate::authz::AuthzState;

/// Identities and grants every deployment starts from.
const BUILTIN_POLICY: &str = include_str!("builtin.kdl");

/// Parse the embedded base policy.
pub fn builtin_policy() -> Result<ParsedPolicy, AuthzError> {
    parse_kdl_document(BUILTIN_POLICY)
}

/// Load all `.kdl` policy files from the given directory and compile them
/// into a single immutable `AuthzState`. Files apply in path order, after the
/// built-in policy when `include_builtin` is set.
pub fn load_policies(dir: &Path, include_builtin: bool) -> Result<AuthzState, AuthzError> {
    if !dir.is_dir() {
        return Err(AuthzError::InvalidPolicy(format!(
            "policies directory `{}` does not exist or is not a directory",
            dir.display()
        )));
    }

    let mut all_parsed = Vec::new();
    if include_builtin {
        all_parsed.push(builtin_policy()?);
    }

    let mut entries: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.path()
                .extension()
                .map(|ext| ext == "kdl")
                .unwrap_or(false)
        })
        .collect();
    entries.sort_by_key(|e| e.path());

    let mut file_count = 0;
    for entry in entries {
        let path = entry.path();
        let contents =
            std::fs::read_to_string(&path).map_err(|source| AuthzError::PolicyLoadError {
                path: path.display().to_string(),
                source,
            })?;
        let parsed = parse_kdl_document(&contents)?;
        tracing::debug!(path = %path.display(), "parsed policy file");
        all_parsed.push(parsed);
        file_count += 1;
    }

    let state = compile_policies(all_parsed)?;

    tracing::info!(
        files = file_count,
        builtin = include_builtin,
        permissions = state.registry.permission_count(),
        roles = state.registry.role_count(),
        groups = state.groups.len(),
        grants = state.grants.grant_count(),
        "Loaded authorization policies"
    );

    Ok(state)
}

/// Merge and compile all parsed policies into a single `AuthzState`.
///
/// Every definition is registered before any grant is applied, so a grant may
/// name a role or permission declared in a later file.
pub fn compile_policies(parsed: Vec<ParsedPolicy>) -> Result<AuthzState, AuthzError> {
    let mut registry = Registry::new();
    for p in &parsed {
        for permission in &p.permissions {
            registry.define_permission(permission.clone());
        }
        for role in &p.roles {
            registry.define_role(role.clone());
        }
    }

    let mut grants = GlobalGrants::new();
    let mut groups = StaticGroups::new();
    for p in parsed {
        for directive in &p.grants {
            apply_grant(&mut grants, &registry, directive)?;
        }
        for group in p.groups {
            let mut principal = Principal::new(group.id);
            for role in &group.roles {
                registry.ensure_role(role)?;
                principal = principal.with_role(role, Setting::Allow);
            }
            for permission in &group.permissions {
                registry.ensure_permission(permission)?;
                principal = principal.with_permission(permission, Setting::Allow);
            }
            groups.insert(principal, &group.members);
        }
    }

    Ok(AuthzState {
        registry,
        grants,
        groups,
    })
}

fn apply_grant(
    grants: &mut GlobalGrants,
    registry: &Registry,
    directive: &GrantDirective,
) -> Result<(), AuthzError> {
    let setting = directive.setting;
    match &directive.target {
        GrantTarget::PrincipalRole { principal, role } => {
            grants.set_principal_role(registry, role, principal, setting)?;
        }
        GrantTarget::PrincipalPermissions {
            principal,
            permissions,
        } => {
            for permission in permissions {
                grants.set_principal_permission(registry, permission, principal, setting)?;
            }
        }
        GrantTarget::RolePermissions { role, permissions } => {
            for permission in permissions {
                grants.set_role_permission(registry, permission, role, setting)?;
            }
        }
        GrantTarget::AllToRole(role) => grants.grant_all_permissions_to_role(registry, role)?,
        GrantTarget::AllToPrincipal(principal) => {
            grants.grant_all_permissions_to_principal(registry, principal)
        }
    }
    Ok(())
}
