use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::authz::types::{Principal, PrincipalId};

/// Looks up the global roles and permissions attached to a group id.
pub trait GroupResolver {
    /// Unknown ids resolve to an empty group, never to an error.
    fn get_principal(&self, group_id: &str) -> Cow<'_, Principal>;
}

/// Resolver for deployments without group data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoGroups;

impl GroupResolver for NoGroups {
    fn get_principal(&self, group_id: &str) -> Cow<'_, Principal> {
        Cow::Owned(Principal::new(group_id))
    }
}

/// Groups declared in policy files.
#[derive(Debug, Clone, Default)]
pub struct StaticGroups {
    groups: BTreeMap<PrincipalId, Principal>,
    /// principal id -> ids of the groups listing it as a member
    memberships: BTreeMap<PrincipalId, Vec<PrincipalId>>,
}

impl StaticGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group; `members` are principal ids that belong to it.
    pub fn insert(&mut self, group: Principal, members: &[PrincipalId]) {
        for member in members {
            let entry = self.memberships.entry(member.clone()).or_default();
            if !entry.contains(&group.id) {
                entry.push(group.id.clone());
            }
        }
        self.groups.insert(group.id.clone(), group);
    }

    /// Ids of the declared groups listing `principal` as a member.
    pub fn groups_of(&self, principal: &str) -> &[PrincipalId] {
        self.memberships
            .get(principal)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl GroupResolver for StaticGroups {
    fn get_principal(&self, group_id: &str) -> Cow<'_, Principal> {
        match self.groups.get(group_id) {
            Some(group) => Cow::Borrowed(group),
            None => {
                tracing::debug!(group = group_id, "unknown group resolved to empty stub");
                Cow::Owned(Principal::new(group_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::types::Setting;

    #[test]
    fn test_unknown_group_is_empty_stub() {
        let groups = StaticGroups::new();
        let stub = groups.get_principal("ghosts");
        assert_eq!(stub.id, "ghosts");
        assert!(stub.roles.is_empty());
        assert!(stub.permissions.is_empty());

        assert!(NoGroups.get_principal("any").roles.is_empty());
    }

    #[test]
    fn test_known_group_and_memberships() {
        let mut groups = StaticGroups::new();
        groups.insert(
            Principal::new("editors").with_role("Editor", Setting::Allow),
            &["bob".to_string(), "carol".to_string()],
        );
        groups.insert(Principal::new("reviewers"), &["bob".to_string()]);

        assert_eq!(
            groups.get_principal("editors").roles.get("Editor"),
            Some(&Setting::Allow)
        );
        assert_eq!(groups.groups_of("bob"), ["editors", "reviewers"]);
        assert!(groups.groups_of("dave").is_empty());
        assert_eq!(groups.len(), 2);
    }
}
