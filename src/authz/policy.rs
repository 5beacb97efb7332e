use crate::authz::errors::AuthzError;
use crate::authz::types::{Permission, PermissionId, PrincipalId, Role, RoleId, Setting};
use kdl::KdlDocument;

/// What a `grant`, `deny` or `grant-all` node writes to the code-level tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantTarget {
    PrincipalRole {
        principal: PrincipalId,
        role: RoleId,
    },
    PrincipalPermissions {
        principal: PrincipalId,
        permissions: Vec<PermissionId>,
    },
    RolePermissions {
        role: RoleId,
        permissions: Vec<PermissionId>,
    },
    AllToRole(RoleId),
    AllToPrincipal(PrincipalId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantDirective {
    pub target: GrantTarget,
    /// `Allow` for `grant`/`grant-all`, `Deny` for `deny`
    pub setting: Setting,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupDef {
    pub id: PrincipalId,
    pub roles: Vec<RoleId>,
    pub permissions: Vec<PermissionId>,
    pub members: Vec<PrincipalId>,
}

/// Intermediate result from parsing a single KDL file.
#[derive(Debug, Clone, Default)]
pub struct ParsedPolicy {
    pub permissions: Vec<Permission>,
    pub roles: Vec<Role>,
    pub groups: Vec<GroupDef>,
    pub grants: Vec<GrantDirective>,
}

/// Parse a KDL document string into typed policy structs.
pub fn parse_kdl_document(source: &str) -> Result<ParsedPolicy, AuthzError> {
    let doc: KdlDocument = source
        .parse()
        .map_err(|e: kdl::KdlError| AuthzError::KdlParse(e.to_string()))?;

    let mut policy = ParsedPolicy::default();

    for node in doc.nodes() {
        match node.name().value() {
            "permission" => {
                let id = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidPolicy(
                        "permission node requires a string argument (e.g. permission \"ViewContent\")"
                            .into(),
                    )
                })?;
                policy.permissions.push(Permission {
                    title: string_prop(node, "title").unwrap_or_else(|| id.clone()),
                    description: string_prop(node, "description").unwrap_or_default(),
                    id,
                });
            }
            "role" => {
                let id = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidPolicy(
                        "role node requires a string argument (e.g. role \"Editor\")".into(),
                    )
                })?;
                let local = match node.get("local") {
                    None => true,
                    Some(value) => value.as_bool().ok_or_else(|| {
                        AuthzError::InvalidPolicy(format!(
                            "`local` on role `{id}` must be #true or #false"
                        ))
                    })?,
                };
                policy.roles.push(Role {
                    title: string_prop(node, "title").unwrap_or_else(|| id.clone()),
                    description: string_prop(node, "description").unwrap_or_default(),
                    local,
                    id,
                });
            }
            "group" => {
                let id = first_string_arg(node).ok_or_else(|| {
                    AuthzError::InvalidPolicy(
                        "group node requires a string argument (e.g. group \"editors\")".into(),
                    )
                })?;

                let mut group = GroupDef {
                    id,
                    ..Default::default()
                };
                if let Some(children) = node.children() {
                    for child in children.nodes() {
                        match child.name().value() {
                            "roles" => group.roles = dash_list(child),
                            "permissions" => group.permissions = dash_list(child),
                            "members" => group.members = dash_list(child),
                            other => {
                                return Err(AuthzError::InvalidPolicy(format!(
                                    "unexpected child `{other}` in group `{}` (expected `roles`, `permissions` or `members`)",
                                    group.id
                                )));
                            }
                        }
                    }
                }
                policy.groups.push(group);
            }
            "grant" => policy.grants.push(parse_grant(node, Setting::Allow)?),
            "deny" => policy.grants.push(parse_grant(node, Setting::Deny)?),
            "grant-all" => {
                let target = match (string_prop(node, "role"), string_prop(node, "principal")) {
                    (Some(role), None) => GrantTarget::AllToRole(role),
                    (None, Some(principal)) => GrantTarget::AllToPrincipal(principal),
                    _ => {
                        return Err(AuthzError::InvalidPolicy(
                            "grant-all requires exactly one of `role` or `principal`".into(),
                        ))
                    }
                };
                policy.grants.push(GrantDirective {
                    target,
                    setting: Setting::Allow,
                });
            }
            other => {
                tracing::warn!("ignoring unknown top-level KDL node `{other}`");
            }
        }
    }

    Ok(policy)
}

/// `grant`/`deny` take exactly two of principal, role and permission(s).
/// Several permissions can be listed in a `permissions` child block.
fn parse_grant(node: &kdl::KdlNode, setting: Setting) -> Result<GrantDirective, AuthzError> {
    let principal = string_prop(node, "principal");
    let role = string_prop(node, "role");
    let mut permissions: Vec<String> = string_prop(node, "permission").into_iter().collect();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "permissions" => permissions.extend(dash_list(child)),
                other => {
                    return Err(AuthzError::InvalidPolicy(format!(
                        "unexpected child `{other}` in {} (expected `permissions`)",
                        node.name().value()
                    )));
                }
            }
        }
    }

    let target = match (principal, role, permissions.is_empty()) {
        (Some(principal), Some(role), true) => GrantTarget::PrincipalRole { principal, role },
        (Some(principal), None, false) => GrantTarget::PrincipalPermissions {
            principal,
            permissions,
        },
        (None, Some(role), false) => GrantTarget::RolePermissions { role, permissions },
        _ => {
            return Err(AuthzError::InvalidPolicy(format!(
                "{} needs exactly two of `principal`, `role` and `permission` (e.g. grant permission=\"ViewContent\" role=\"Reader\")",
                node.name().value()
            )));
        }
    };
    Ok(GrantDirective { target, setting })
}

/// Extract the first string argument from a KDL node.
fn first_string_arg(node: &kdl::KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn string_prop(node: &kdl::KdlNode, key: &str) -> Option<String> {
    node.get(key)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

/// Extract dash-list children: nodes named "-" whose first argument is a string.
/// Example KDL:
/// ```kdl
/// roles {
///     - "Editor"
///     - "Reader"
/// }
/// ```
fn dash_list(node: &kdl::KdlNode) -> Vec<String> {
    let Some(children) = node.children() else {
        return Vec::new();
    };
    children
        .nodes()
        .iter()
        .filter(|n| n.name().value() == "-")
        .filter_map(first_string_arg)
        .collect()
}
