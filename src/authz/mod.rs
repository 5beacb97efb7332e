pub mod engine;
pub mod errors;
pub mod groups;
pub mod hierarchy;
pub mod loader;
pub mod managers;
pub mod policy;
pub mod registry;
pub mod securitymap;
pub mod sharing;
pub mod types;
pub mod web;

use std::borrow::Cow;

use groups::{GroupResolver, StaticGroups};
use managers::GlobalGrants;
use registry::Registry;
use types::Principal;

/// Granted to everybody on every resource.
pub const PUBLIC_PERMISSION: &str = "Public";
/// Held implicitly by every participation, authenticated or not.
pub const ANONYMOUS_ROLE: &str = "Anonymous";
/// Added to every principal the web layer receives.
pub const AUTHENTICATED_ROLE: &str = "Authenticated";

/// Fully compiled authorization state, loaded from KDL policy files.
/// Immutable after construction: configuration changes require a service reload.
#[derive(Debug, Default)]
pub struct AuthzState {
    /// Every role and permission id that may appear in a grant
    pub registry: Registry,
    /// Code-level principal/role/permission tables
    pub grants: GlobalGrants,
    /// Groups declared in policy files, with their members
    pub groups: StaticGroups,
}

impl GroupResolver for AuthzState {
    fn get_principal(&self, group_id: &str) -> Cow<'_, Principal> {
        self.groups.get_principal(group_id)
    }
}
