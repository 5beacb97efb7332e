use std::collections::{BTreeSet, HashMap};

use crate::authz::errors::AuthzError;
use crate::authz::managers::{LocalAcl, LocalAclEditor};
use crate::authz::registry::Registry;
use crate::authz::types::ResourceId;

/// Read access to the resource tree the engine walks.
///
/// Everything a check needs must already be resident: implementations are
/// called synchronously from inside the resolution loop.
pub trait Hierarchy {
    /// `None` at the root.
    fn parent(&self, id: &ResourceId) -> Option<&ResourceId>;

    fn acl(&self, id: &ResourceId) -> Option<&LocalAcl>;

    /// For view-like nodes, the resource the view renders.
    fn view_owner(&self, _id: &ResourceId) -> Option<&ResourceId> {
        None
    }

    /// Changes whenever any local ACL changes; cached decisions taken under
    /// another generation are discarded.
    fn generation(&self) -> u64 {
        0
    }
}

#[derive(Debug, Clone, Default)]
struct Node {
    parent: Option<ResourceId>,
    view_of: Option<ResourceId>,
    acl: Option<LocalAcl>,
}

/// In-memory resource tree with dirty tracking for the persistence layer.
#[derive(Debug, Clone, Default)]
pub struct ResourceTree {
    nodes: HashMap<ResourceId, Node>,
    dirty: BTreeSet<ResourceId>,
    generation: u64,
}

impl ResourceTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource under `parent` (or at the top when `None`). Existing
    /// ids are rejected; their grants stay in place.
    pub fn insert(
        &mut self,
        id: impl Into<ResourceId>,
        parent: Option<ResourceId>,
    ) -> Result<(), AuthzError> {
        let id = id.into();
        self.ensure_absent(&id)?;
        if let Some(parent) = &parent {
            self.ensure_exists(parent)?;
        }
        self.nodes.insert(
            id,
            Node {
                parent,
                ..Default::default()
            },
        );
        Ok(())
    }

    /// Add a view node rendering `owner`.
    pub fn insert_view(
        &mut self,
        id: impl Into<ResourceId>,
        owner: ResourceId,
    ) -> Result<(), AuthzError> {
        let id = id.into();
        self.ensure_absent(&id)?;
        self.ensure_exists(&owner)?;
        self.nodes.insert(
            id,
            Node {
                parent: Some(owner.clone()),
                view_of: Some(owner),
                acl: None,
            },
        );
        Ok(())
    }

    /// Replace the stored ACL, e.g. when loading a resource from storage.
    pub fn set_acl(&mut self, id: &ResourceId, acl: Option<LocalAcl>) -> Result<(), AuthzError> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| AuthzError::UnknownResource(id.to_string()))?;
        node.acl = acl;
        self.generation += 1;
        Ok(())
    }

    /// Edit a resource's local grants. When any cell actually changed the
    /// resource is marked dirty and the generation moves on.
    pub fn update_acl<T, F>(
        &mut self,
        id: &ResourceId,
        registry: &Registry,
        f: F,
    ) -> Result<T, AuthzError>
    where
        F: FnOnce(&mut LocalAclEditor<'_>) -> Result<T, AuthzError>,
    {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| AuthzError::UnknownResource(id.to_string()))?;
        let mut editor = LocalAclEditor::new(&mut node.acl, registry);
        let result = f(&mut editor);

        if editor.changed() {
            self.mark_dirty(id);
        }
        result
    }

    fn mark_dirty(&mut self, id: &ResourceId) {
        self.generation += 1;
        self.dirty.insert(id.clone());
        tracing::debug!(resource = %id, generation = self.generation, "local grants changed");
    }

    /// Resources whose ACL changed since the last call.
    pub fn take_dirty(&mut self) -> Vec<ResourceId> {
        std::mem::take(&mut self.dirty).into_iter().collect()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn ensure_exists(&self, id: &ResourceId) -> Result<(), AuthzError> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(AuthzError::UnknownResource(id.to_string()))
        }
    }

    fn ensure_absent(&self, id: &ResourceId) -> Result<(), AuthzError> {
        if self.contains(id) {
            Err(AuthzError::ResourceExists(id.to_string()))
        } else {
            Ok(())
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Hierarchy for ResourceTree {
    fn parent(&self, id: &ResourceId) -> Option<&ResourceId> {
        self.nodes.get(id).and_then(|n| n.parent.as_ref())
    }

    fn acl(&self, id: &ResourceId) -> Option<&LocalAcl> {
        self.nodes.get(id).and_then(|n| n.acl.as_ref())
    }

    fn view_owner(&self, id: &ResourceId) -> Option<&ResourceId> {
        self.nodes.get(id).and_then(|n| n.view_of.as_ref())
    }

    fn generation(&self) -> u64 {
        self.generation
    }
}
