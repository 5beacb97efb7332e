use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use crate::authz::groups::GroupResolver;
use crate::authz::hierarchy::Hierarchy;
use crate::authz::managers::{LocalAcl, PrincipalPermissionMap};
use crate::authz::types::{
    Level, Participation, PermissionId, Principal, PrincipalId, ResourceId, RoleId, Setting,
};
use crate::authz::{AuthzState, ANONYMOUS_ROLE, PUBLIC_PERMISSION};

/// Longest parent chain walked before a check fails closed.
pub const MAX_DEPTH: usize = 256;

/// Memo slot owner: a resource, or the code-level grants above every root.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Root,
    Object(ResourceId),
}

/// Memoized results for one cache key. Apart from `decision`, every map
/// holds the value as seen from a descendant.
#[derive(Debug, Default)]
struct CacheEntry {
    decision: HashMap<(PrincipalId, PermissionId), bool>,
    principal_permission: HashMap<(PrincipalId, PermissionId), Option<bool>>,
    roles_for_permission: HashMap<PermissionId, BTreeSet<RoleId>>,
    principal_roles: HashMap<PrincipalId, BTreeSet<RoleId>>,
    principals_for_permission: HashMap<(PermissionId, Vec<RoleId>), BTreeSet<PrincipalId>>,
}

fn roles_slot(entry: &mut CacheEntry) -> &mut HashMap<PermissionId, BTreeSet<RoleId>> {
    &mut entry.roles_for_permission
}

fn principal_roles_slot(entry: &mut CacheEntry) -> &mut HashMap<PrincipalId, BTreeSet<RoleId>> {
    &mut entry.principal_roles
}

fn principals_slot(
    entry: &mut CacheEntry,
) -> &mut HashMap<(PermissionId, Vec<RoleId>), BTreeSet<PrincipalId>> {
    &mut entry.principals_for_permission
}

/// One step of the ancestor chain, target first.
struct Link<'t> {
    key: CacheKey,
    acl: Option<&'t LocalAcl>,
}

fn level_at(index: usize) -> Level {
    if index == 0 {
        Level::Object
    } else {
        Level::Ancestor
    }
}

/// Apply one level of grants to an inherited set: allows add, denies remove,
/// anything that does not resolve at `level` leaves the set alone.
fn fold<'x>(
    set: &mut BTreeSet<String>,
    entries: impl IntoIterator<Item = (&'x String, Setting)>,
    level: Level,
) {
    for (id, setting) in entries {
        match setting.resolve(level) {
            Some(true) => {
                set.insert(id.clone());
            }
            Some(false) => {
                set.remove(id);
            }
            None => {}
        }
    }
}

/// First decisive principal-permission setting for the principal, then for
/// each of its groups.
fn principal_decision(
    map: &PrincipalPermissionMap,
    principal: &Principal,
    permission: &str,
    level: Level,
) -> Option<bool> {
    std::iter::once(principal.id.as_str())
        .chain(principal.groups.iter().map(String::as_str))
        .find_map(|id| map.get_setting(permission, id).resolve(level))
}

/// Collect the target and its ancestors. `None` when the chain loops or is
/// deeper than `max_depth`; callers then deny.
fn lineage<'t, H: Hierarchy + ?Sized>(
    tree: &'t H,
    target: &ResourceId,
    max_depth: usize,
) -> Option<Vec<Link<'t>>> {
    let mut links = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(target);

    while let Some(id) = current {
        if !seen.insert(id) {
            tracing::warn!(resource = %target, looped_at = %id, "parent chain loops");
            return None;
        }
        if links.len() >= max_depth {
            tracing::warn!(resource = %target, max_depth, "parent chain too deep");
            return None;
        }
        links.push(Link {
            key: CacheKey::Object(id.clone()),
            acl: tree.acl(id),
        });
        current = tree.parent(id);
    }
    Some(links)
}

/// Grant resolution and its per-request memo.
struct Resolver {
    state: Arc<AuthzState>,
    groups: Arc<dyn GroupResolver + Send + Sync>,
    cache: HashMap<CacheKey, CacheEntry>,
    generation: Option<u64>,
    max_depth: usize,
}

impl Resolver {
    fn entry(&mut self, key: &CacheKey) -> &mut CacheEntry {
        self.cache.entry(key.clone()).or_default()
    }

    fn sync<H: Hierarchy + ?Sized>(&mut self, tree: &H) {
        let current = tree.generation();
        if self.generation != Some(current) {
            if self.generation.is_some() {
                tracing::trace!(generation = current, "grants changed, dropping memo");
            }
            self.cache.clear();
            self.generation = Some(current);
        }
    }

    fn decision(&mut self, chain: &[Link<'_>], principal: &Principal, permission: &str) -> bool {
        let target = chain
            .first()
            .map(|l| l.key.clone())
            .unwrap_or(CacheKey::Root);
        let memo = (principal.id.clone(), permission.to_string());
        if let Some(decision) = self.entry(&target).decision.get(&memo) {
            return *decision;
        }

        let decision = match self.principal_permission(chain, principal, permission) {
            // A deny on the checked object itself is final.
            Some((false, Level::Object)) => false,
            Some((true, _)) => true,
            _ => {
                let needed = self.roles_for_permission(chain, permission);
                !needed.is_empty() && {
                    let held = self.principal_roles(chain, principal);
                    needed.iter().any(|role| held.contains(role))
                }
            }
        };

        self.entry(&target).decision.insert(memo, decision);
        decision
    }

    /// Direct path: the closest decisive principal-permission setting, and
    /// the level it was found at.
    fn principal_permission(
        &mut self,
        chain: &[Link<'_>],
        principal: &Principal,
        permission: &str,
    ) -> Option<(bool, Level)> {
        let memo = (principal.id.clone(), permission.to_string());
        let mut pending = Vec::new();
        let mut inherited = None;

        for (index, link) in chain.iter().enumerate() {
            let level = level_at(index);
            if level == Level::Ancestor {
                if let Some(hit) = self.entry(&link.key).principal_permission.get(&memo) {
                    inherited = Some(*hit);
                    break;
                }
            }

            let local = link
                .acl
                .and_then(|acl| principal_decision(&acl.prinperm, principal, permission, level));
            match (local, level) {
                (Some(allowed), Level::Object) => return Some((allowed, Level::Object)),
                (Some(allowed), Level::Ancestor) => {
                    pending.push(link.key.clone());
                    inherited = Some(Some(allowed));
                    break;
                }
                (None, Level::Ancestor) => pending.push(link.key.clone()),
                (None, Level::Object) => {}
            }
        }

        let inherited = match inherited {
            Some(found) => found,
            None => self.global_principal_permission(principal, permission),
        };
        for key in pending {
            self.entry(&key)
                .principal_permission
                .insert(memo.clone(), inherited);
        }
        inherited.map(|allowed| (allowed, Level::Ancestor))
    }

    /// Root of the direct path: the principal's own global permissions, its
    /// groups' global permissions, then the code-level table.
    fn global_principal_permission(
        &mut self,
        principal: &Principal,
        permission: &str,
    ) -> Option<bool> {
        let memo = (principal.id.clone(), permission.to_string());
        if let Some(hit) = self.entry(&CacheKey::Root).principal_permission.get(&memo) {
            return *hit;
        }

        let groups = Arc::clone(&self.groups);
        let state = Arc::clone(&self.state);
        let global = |p: &Principal| {
            p.permissions
                .get(permission)
                .and_then(|s| s.resolve(Level::Ancestor))
        };
        let result = global(principal)
            .or_else(|| {
                principal
                    .groups
                    .iter()
                    .find_map(|g| global(&*groups.get_principal(g)))
            })
            .or_else(|| {
                principal_decision(&state.grants.prinperm, principal, permission, Level::Ancestor)
            });

        self.entry(&CacheKey::Root)
            .principal_permission
            .insert(memo, result);
        result
    }

    /// Walk down from the closest memoized ancestor (or the root), folding
    /// each level's grants and memoizing the result on every ancestor.
    fn fold_chain<K, R, F>(
        &mut self,
        chain: &[Link<'_>],
        slot: fn(&mut CacheEntry) -> &mut HashMap<K, BTreeSet<String>>,
        key: &K,
        root: R,
        fold_link: F,
    ) -> BTreeSet<String>
    where
        K: Hash + Eq + Clone,
        R: FnOnce(&mut Self) -> BTreeSet<String>,
        F: Fn(&mut BTreeSet<String>, &LocalAcl, Level),
    {
        let mut start = chain.len();
        let mut inherited = None;
        for (index, link) in chain.iter().enumerate().skip(1) {
            if let Some(hit) = slot(self.entry(&link.key)).get(key) {
                inherited = Some(hit.clone());
                start = index;
                break;
            }
        }

        let mut set = match inherited {
            Some(set) => set,
            None => root(self),
        };
        let ancestors = chain.get(1..start).unwrap_or(&[]);
        for link in ancestors.iter().rev() {
            if let Some(acl) = link.acl {
                fold_link(&mut set, acl, Level::Ancestor);
            }
            slot(self.entry(&link.key)).insert(key.clone(), set.clone());
        }
        if let Some(acl) = chain.first().and_then(|target| target.acl) {
            fold_link(&mut set, acl, Level::Object);
        }
        set
    }

    /// Roles that carry `permission` at the target.
    fn roles_for_permission(&mut self, chain: &[Link<'_>], permission: &str) -> BTreeSet<RoleId> {
        self.fold_chain(
            chain,
            roles_slot,
            &permission.to_string(),
            |this| this.global_roles_for_permission(permission),
            |set, acl, level| fold(set, acl.roleperm.map().row_iter(permission), level),
        )
    }

    fn global_roles_for_permission(&mut self, permission: &str) -> BTreeSet<RoleId> {
        if let Some(hit) = self
            .entry(&CacheKey::Root)
            .roles_for_permission
            .get(permission)
        {
            return hit.clone();
        }
        let roles: BTreeSet<RoleId> = self
            .state
            .grants
            .roleperm
            .map()
            .row_iter(permission)
            .filter(|(_, setting)| *setting == Setting::Allow)
            .map(|(role, _)| role.clone())
            .collect();
        self.entry(&CacheKey::Root)
            .roles_for_permission
            .insert(permission.to_string(), roles.clone());
        roles
    }

    /// Roles the principal (or one of its groups) holds at the target.
    fn principal_roles(&mut self, chain: &[Link<'_>], principal: &Principal) -> BTreeSet<RoleId> {
        let ids: Vec<&str> = std::iter::once(principal.id.as_str())
            .chain(principal.groups.iter().map(String::as_str))
            .collect();
        self.fold_chain(
            chain,
            principal_roles_slot,
            &principal.id,
            |this| this.global_principal_roles(principal),
            |set, acl, level| {
                for id in &ids {
                    fold(set, acl.prinrole.map().col_iter(*id), level);
                }
            },
        )
    }

    fn global_principal_roles(&mut self, principal: &Principal) -> BTreeSet<RoleId> {
        if let Some(hit) = self
            .entry(&CacheKey::Root)
            .principal_roles
            .get(&principal.id)
        {
            return hit.clone();
        }

        let state = Arc::clone(&self.state);
        let groups = Arc::clone(&self.groups);
        let code = state.grants.prinrole.map();

        let mut roles = BTreeSet::new();
        fold(&mut roles, code.col_iter(&principal.id), Level::Ancestor);
        for group in &principal.groups {
            fold(&mut roles, code.col_iter(group), Level::Ancestor);
        }
        roles.insert(ANONYMOUS_ROLE.to_string());
        fold(
            &mut roles,
            principal.roles.iter().map(|(r, s)| (r, *s)),
            Level::Ancestor,
        );
        for group in &principal.groups {
            let group = groups.get_principal(group);
            fold(
                &mut roles,
                group.roles.iter().map(|(r, s)| (r, *s)),
                Level::Ancestor,
            );
        }

        self.entry(&CacheKey::Root)
            .principal_roles
            .insert(principal.id.clone(), roles.clone());
        roles
    }

    /// Registered roles that carry `permission` at the target.
    fn roles_with_access(&mut self, chain: &[Link<'_>], permission: &str) -> Vec<RoleId> {
        let state = Arc::clone(&self.state);
        self.roles_for_permission(chain, permission)
            .into_iter()
            .filter(|role| state.registry.role(role).is_some())
            .collect()
    }

    /// Principals granted `permission` directly or through one of `roles`.
    fn principals_with_access(
        &mut self,
        chain: &[Link<'_>],
        permission: &str,
        roles: &[RoleId],
    ) -> BTreeSet<PrincipalId> {
        let key = (permission.to_string(), roles.to_vec());
        self.fold_chain(
            chain,
            principals_slot,
            &key,
            |this| {
                let mut principals = BTreeSet::new();
                let grants = &this.state.grants;
                fold(
                    &mut principals,
                    grants.prinperm.map().row_iter(permission),
                    Level::Ancestor,
                );
                for role in roles {
                    fold(
                        &mut principals,
                        grants.prinrole.map().row_iter(role.as_str()),
                        Level::Ancestor,
                    );
                }
                principals
            },
            |set, acl, level| {
                fold(set, acl.prinperm.map().row_iter(permission), level);
                for role in roles {
                    fold(set, acl.prinrole.map().row_iter(role.as_str()), level);
                }
            },
        )
    }
}

/// Security context of one request.
///
/// Holds the identities acting in the request and memoizes resolution
/// results for its lifetime. Never shared between requests.
pub struct Interaction {
    participations: Vec<Participation>,
    resolver: Resolver,
}

impl Interaction {
    /// An interaction with no participations: only `Public` passes.
    pub fn new(state: Arc<AuthzState>) -> Self {
        let groups: Arc<dyn GroupResolver + Send + Sync> = state.clone();
        Self {
            participations: Vec::new(),
            resolver: Resolver {
                state,
                groups,
                cache: HashMap::new(),
                generation: None,
                max_depth: MAX_DEPTH,
            },
        }
    }

    /// Interaction for an inbound request. Unauthenticated requests act as
    /// the anonymous principal.
    pub fn for_request(state: Arc<AuthzState>, participations: Vec<Participation>) -> Self {
        let mut interaction = Self::new(state);
        if participations.is_empty() {
            interaction.add(Participation::Principal(Principal::anonymous()));
        }
        for participation in participations {
            interaction.add(participation);
        }
        interaction
    }

    /// Resolve group ids through `groups` instead of the policy's groups.
    pub fn with_groups(mut self, groups: Arc<dyn GroupResolver + Send + Sync>) -> Self {
        self.resolver.groups = groups;
        self.resolver.cache.clear();
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.resolver.max_depth = max_depth;
        self
    }

    /// Memos are keyed by principal id, so they are dropped whenever the set
    /// of participations changes.
    pub fn add(&mut self, participation: Participation) {
        self.participations.push(participation);
        self.resolver.cache.clear();
    }

    /// Remove the participation of `principal_id`, handing it back.
    pub fn remove(&mut self, principal_id: &str) -> Option<Participation> {
        let index = self
            .participations
            .iter()
            .position(|p| p.principal_id() == Some(principal_id))?;
        self.resolver.cache.clear();
        Some(self.participations.remove(index))
    }

    pub fn participations(&self) -> &[Participation] {
        &self.participations
    }

    pub fn invalidate_cache(&mut self) {
        self.resolver.cache.clear();
    }

    /// Whether any participation holds `permission` on `resource`.
    pub fn check_permission<H: Hierarchy + ?Sized>(
        &mut self,
        permission: &str,
        tree: &H,
        resource: &ResourceId,
    ) -> bool {
        if permission == PUBLIC_PERMISSION {
            return true;
        }
        if self.has_system() {
            return true;
        }
        self.resolver.sync(tree);

        let target = tree.view_owner(resource).unwrap_or(resource);
        let Some(chain) = lineage(tree, target, self.resolver.max_depth) else {
            return false;
        };
        self.decide(&chain, permission, target.as_str())
    }

    /// Check against code-level grants only, outside any resource.
    pub fn check_global(&mut self, permission: &str) -> bool {
        if permission == PUBLIC_PERMISSION || self.has_system() {
            return true;
        }
        self.decide(&[], permission, "(root)")
    }

    fn has_system(&self) -> bool {
        self.participations
            .iter()
            .any(|p| matches!(p, Participation::System))
    }

    fn decide(&mut self, chain: &[Link<'_>], permission: &str, resource: &str) -> bool {
        let mut seen = HashSet::new();
        for participation in &self.participations {
            let Participation::Principal(principal) = participation else {
                continue;
            };
            if !seen.insert(principal.id.as_str()) {
                continue;
            }
            if self.resolver.decision(chain, principal, permission) {
                return true;
            }
        }
        tracing::debug!(permission, resource, "permission denied");
        false
    }

    /// Registered roles carrying `permission` on `resource`.
    pub fn roles_with_access<H: Hierarchy + ?Sized>(
        &mut self,
        tree: &H,
        resource: &ResourceId,
        permission: &str,
    ) -> Vec<RoleId> {
        self.resolver.sync(tree);
        let target = tree.view_owner(resource).unwrap_or(resource);
        match lineage(tree, target, self.resolver.max_depth) {
            Some(chain) => self.resolver.roles_with_access(&chain, permission),
            None => Vec::new(),
        }
    }

    /// Principals (users or groups) granted `permission` on `resource`,
    /// directly or through a role, without a specific principal in hand.
    pub fn principals_with_access<H: Hierarchy + ?Sized>(
        &mut self,
        tree: &H,
        resource: &ResourceId,
        permission: &str,
    ) -> Vec<PrincipalId> {
        self.resolver.sync(tree);
        let target = tree.view_owner(resource).unwrap_or(resource);
        let Some(chain) = lineage(tree, target, self.resolver.max_depth) else {
            return Vec::new();
        };
        let roles = self.resolver.roles_with_access(&chain, permission);
        self.resolver
            .principals_with_access(&chain, permission, &roles)
            .into_iter()
            .collect()
    }

    /// Every registered permission the participations hold on `resource`.
    pub fn all_permissions<H: Hierarchy + ?Sized>(
        &mut self,
        tree: &H,
        resource: &ResourceId,
    ) -> Vec<PermissionId> {
        let permissions = self.resolver.state.registry.all_permissions();
        permissions
            .into_iter()
            .filter(|permission| self.check_permission(permission, tree, resource))
            .collect()
    }
}
