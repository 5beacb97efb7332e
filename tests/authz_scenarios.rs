mod helpers;

use std::sync::Arc;

use helpers::{PolicyBuilder, TreeBuilder};
use latchkey::authz::engine::Interaction;
use latchkey::authz::hierarchy::{Hierarchy, ResourceTree};
use latchkey::authz::securitymap::SecurityMap;
use latchkey::authz::types::{Participation, Principal, ResourceId, Setting};
use latchkey::authz::{AuthzState, PUBLIC_PERMISSION};

const SITE_POLICY: &str = r#"
permission "ViewContent" title="View content"
permission "ModifyContent" title="Modify content"
permission "ManageSite" title="Manage site"

role "Manager" title="Site manager" local=#false
role "Editor" title="Editor" local=#true
role "Reader" title="Reader" local=#true

grant permission="ViewContent" role="Manager"
grant role="Manager" principal="alice"
grant permission="ViewContent" role="Reader"

group "editors" {
    roles {
        - "Editor"
    }
    members {
        - "bob"
    }
}
"#;

fn site() -> Arc<AuthzState> {
    PolicyBuilder::new().with_kdl(SITE_POLICY).build()
}

fn user(state: &Arc<AuthzState>, principal: Principal) -> Interaction {
    Interaction::for_request(state.clone(), vec![Participation::Principal(principal)])
}

fn id(path: &str) -> ResourceId {
    ResourceId::from(path)
}

#[test]
fn test_global_role_grants_everywhere() {
    let state = site();
    let tree = TreeBuilder::new().with_path("/a/b/c").with_path("/z").build();
    let mut alice = user(&state, Principal::new("alice"));

    for path in ["/a", "/a/b", "/a/b/c", "/z"] {
        assert!(alice.check_permission("ViewContent", &tree, &id(path)), "{path}");
    }
    assert!(alice.check_global("ViewContent"));
}

#[test]
fn test_local_deny_on_object_only() {
    let state = site();
    let mut tree = TreeBuilder::new().with_path("/a/b").build();
    tree.update_acl(&id("/a"), &state.registry, |acl| {
        acl.set_principal_permission("ViewContent", "alice", Setting::Deny)
    })
    .unwrap();

    let mut alice = user(&state, Principal::new("alice"));
    assert!(!alice.check_permission("ViewContent", &tree, &id("/a")));
    assert!(alice.check_permission("ViewContent", &tree, &id("/a/b")));
}

#[test]
fn test_group_role_with_local_role_grant() {
    let state = site();
    let mut tree = TreeBuilder::new().with_path("/x/y").with_path("/w").build();
    tree.update_acl(&id("/x"), &state.registry, |acl| {
        acl.set_role_permission("ModifyContent", "Editor", Setting::Allow)
    })
    .unwrap();

    let bob = Principal::new("bob").with_group("editors");
    let mut interaction = user(&state, bob);
    assert!(interaction.check_permission("ModifyContent", &tree, &id("/x")));
    assert!(interaction.check_permission("ModifyContent", &tree, &id("/x/y")));
    assert!(!interaction.check_permission("ModifyContent", &tree, &id("/w")));

    // without the group, no path to the role
    let mut plain = user(&state, Principal::new("bob"));
    assert!(!plain.check_permission("ModifyContent", &tree, &id("/x")));
}

#[test]
fn test_never_granted_permission_is_denied() {
    let state = site();
    let tree = TreeBuilder::new().with_path("/a/b").build();

    let mut alice = user(&state, Principal::new("alice"));
    assert!(!alice.check_permission("ManageSite", &tree, &id("/a/b")));

    let powerful = Principal::new("carol")
        .with_role("Manager", Setting::Allow)
        .with_role("Editor", Setting::Allow)
        .with_group("editors");
    let mut carol = user(&state, powerful);
    assert!(!carol.check_permission("ManageSite", &tree, &id("/a")));
    assert!(!carol.check_global("ManageSite"));
}

#[test]
fn test_deny_overrides_ancestor_allow() {
    let state = site();
    let mut tree = TreeBuilder::new().with_path("/a/b").build();
    tree.update_acl(&id("/a"), &state.registry, |acl| {
        acl.set_principal_permission("ModifyContent", "dave", Setting::Allow)
    })
    .unwrap();
    tree.update_acl(&id("/a/b"), &state.registry, |acl| {
        acl.set_principal_permission("ModifyContent", "dave", Setting::Deny)
    })
    .unwrap();

    let mut dave = user(&state, Principal::new("dave"));
    assert!(dave.check_permission("ModifyContent", &tree, &id("/a")));
    assert!(!dave.check_permission("ModifyContent", &tree, &id("/a/b")));
}

#[test]
fn test_allow_single_stays_on_object() {
    let state = site();
    let mut tree = TreeBuilder::new().with_path("/a/b/c").build();
    tree.update_acl(&id("/a"), &state.registry, |acl| {
        acl.set_principal_role("Reader", "erin", Setting::AllowSingle)
    })
    .unwrap();

    let mut erin = user(&state, Principal::new("erin"));
    assert!(erin.check_permission("ViewContent", &tree, &id("/a")));
    assert!(!erin.check_permission("ViewContent", &tree, &id("/a/b")));
    assert!(!erin.check_permission("ViewContent", &tree, &id("/a/b/c")));
}

#[test]
fn test_role_transitivity_across_levels() {
    let state = site();
    let mut tree = TreeBuilder::new().with_path("/a/b/c").build();
    // role held at one level, granted the permission at another
    tree.update_acl(&id("/a"), &state.registry, |acl| {
        acl.set_principal_role("Editor", "frank", Setting::Allow)
    })
    .unwrap();
    tree.update_acl(&id("/a/b"), &state.registry, |acl| {
        acl.set_role_permission("ModifyContent", "Editor", Setting::Allow)
    })
    .unwrap();

    let mut frank = user(&state, Principal::new("frank"));
    assert!(!frank.check_permission("ModifyContent", &tree, &id("/a")));
    assert!(frank.check_permission("ModifyContent", &tree, &id("/a/b")));
    assert!(frank.check_permission("ModifyContent", &tree, &id("/a/b/c")));
}

#[test]
fn test_public_bypass() {
    let state = site();
    let tree = TreeBuilder::new().with_path("/a/b").build();

    let mut nobody = Interaction::new(state.clone());
    assert!(nobody.participations().is_empty());
    assert!(nobody.check_permission(PUBLIC_PERMISSION, &tree, &id("/a/b")));
    assert!(!nobody.check_permission("ViewContent", &tree, &id("/a/b")));

    // the anonymous participation gets what the built-in policy grants it
    let mut anon = Interaction::for_request(state, Vec::new());
    assert!(anon.check_permission("AccessPreflight", &tree, &id("/a")));
    assert!(!anon.check_permission("ViewContent", &tree, &id("/a")));
}

#[test]
fn test_system_participation_passes_everything() {
    let state = site();
    let tree = TreeBuilder::new().with_path("/a").build();
    let mut system = Interaction::for_request(state, vec![Participation::System]);
    assert!(system.check_permission("ManageSite", &tree, &id("/a")));
}

#[test]
fn test_inversions_follow_local_grants() {
    let state = site();
    let mut tree = TreeBuilder::new().with_path("/a/b").build();
    tree.update_acl(&id("/a"), &state.registry, |acl| {
        acl.set_principal_role("Reader", "gina", Setting::Allow)
    })
    .unwrap();

    let mut interaction = Interaction::new(state);
    assert_eq!(
        interaction.roles_with_access(&tree, &id("/a/b"), "ViewContent"),
        vec!["Manager", "Reader"]
    );
    assert_eq!(
        interaction.principals_with_access(&tree, &id("/a/b"), "ViewContent"),
        vec!["alice", "gina"]
    );
}

#[test]
fn test_mutation_visible_to_same_interaction() {
    let state = site();
    let mut tree: ResourceTree = TreeBuilder::new().with_path("/a").build();
    let mut gina = user(&state, Principal::new("gina"));
    assert!(!gina.check_permission("ViewContent", &tree, &id("/a")));

    let generation = tree.generation();
    tree.update_acl(&id("/a"), &state.registry, |acl| {
        acl.set_principal_role("Reader", "gina", Setting::Allow)
    })
    .unwrap();
    assert_ne!(tree.generation(), generation);
    assert!(gina.check_permission("ViewContent", &tree, &id("/a")));
}

#[test]
fn test_security_map_mirrors_after_edits() {
    let mut map: SecurityMap<String, String> = SecurityMap::new();
    let edits = [
        ("View", "alice", Some(Setting::Allow)),
        ("View", "bob", Some(Setting::Deny)),
        ("Edit", "alice", Some(Setting::AllowSingle)),
        ("View", "alice", None),
        ("Edit", "bob", Some(Setting::Allow)),
        ("Edit", "alice", Some(Setting::Deny)),
        ("View", "bob", None),
    ];
    for (row, col, setting) in edits {
        match setting {
            Some(value) => {
                map.add_cell(row.to_string(), col.to_string(), value);
            }
            None => {
                map.del_cell(row, col);
            }
        }
    }

    for (row, col, value) in map.get_all_cells() {
        assert!(map.get_col(&col).contains(&(row.clone(), value)));
        assert!(map.get_row(&row).contains(&(col.clone(), value)));
    }
    assert_eq!(map.get_all_cells().len(), 2);
    assert!(map.get_row("View").is_empty());
    assert_eq!(map.get_col("alice"), vec![("Edit".to_string(), Setting::Deny)]);

    assert!(!map.add_cell("Edit".into(), "bob".into(), Setting::Allow));
    assert!(map.add_cell("Edit".into(), "bob".into(), Setting::Deny));
}

#[test]
fn test_shipped_site_policy() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("policies");
    let state = Arc::new(latchkey::authz::loader::load_policies(&dir, true).unwrap());
    let mut tree = TreeBuilder::new().with_path("/docs/handbook").build();
    tree.update_acl(&id("/docs"), &state.registry, |acl| {
        acl.set_principal_role("Editor", "kim", Setting::Allow)
    })
    .unwrap();

    let admin = Principal::new("admin").with_group("site-admins");
    let mut admin = user(&state, admin);
    assert!(admin.check_permission("ChangePermissions", &tree, &id("/docs/handbook")));

    let mut kim = user(&state, Principal::new("kim"));
    assert!(kim.check_permission("ModifyContent", &tree, &id("/docs/handbook")));
    assert!(!kim.check_permission("DeleteContent", &tree, &id("/docs/handbook")));
}
