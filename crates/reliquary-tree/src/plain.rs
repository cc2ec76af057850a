//! The plain hierarchical binding.
//!
//! Walks primary children only, never versions structurally, and rejects
//! layered nodes: layering is a virtual-filesystem concept.

use crate::cascade::{propagate, update_changed_acls, CascadeMode};
use crate::dao::NodeAclDao;
use crate::migrate::{migrate_all, MigrationReport};
use crate::node::{NodeTree, TreeCapabilities};
use reliquary_acl::{Ace, AclEntryView, AclService};
use reliquary_core::{AclId, ChangeRecord, NodeId, RepoError, Result};
use std::sync::Arc;

/// Per-node ACL access over a plain hierarchical tree.
#[derive(Debug)]
pub struct PlainAclDao<T: NodeTree> {
    tree: T,
    acl: AclService,
}

impl<T: NodeTree> PlainAclDao<T> {
    /// Bind a tree and an ACL service.
    pub fn new(tree: T, acl: AclService) -> Self {
        Self { tree, acl }
    }

    /// The underlying tree.
    pub fn tree(&self) -> &T {
        &self.tree
    }

    /// The underlying ACL service.
    pub fn acl(&self) -> &AclService {
        &self.acl
    }

    /// Mutable access to the underlying ACL service.
    pub fn acl_mut(&mut self) -> &mut AclService {
        &mut self.acl
    }

    /// Take the bound parts back.
    pub fn into_parts(self) -> (T, AclService) {
        (self.tree, self.acl)
    }

    fn writable(&self, node: NodeId) -> Result<()> {
        let descriptor = self.tree.lookup(node)?;
        if descriptor.read_only {
            return Err(RepoError::invalid_reference(format!(
                "{node} is a historical version and cannot be mutated"
            )));
        }
        if descriptor.is_layered {
            return Err(RepoError::illegal_state(format!(
                "layered node {node} is not supported by this tree driver"
            )));
        }
        Ok(())
    }
}

impl<T: NodeTree> NodeAclDao for PlainAclDao<T> {
    fn node_acl(&self, node: NodeId) -> Result<Option<Arc<Vec<AclEntryView>>>> {
        match self.tree.node_acl(node)? {
            Some(id) => Ok(Some(self.acl.get_acl(id)?)),
            None => Ok(None),
        }
    }

    fn node_acl_id(&self, node: NodeId) -> Result<Option<AclId>> {
        self.tree.node_acl(node)
    }

    fn set_node_acl(&mut self, node: NodeId, acl: AclId) -> Result<Vec<ChangeRecord>> {
        self.writable(node)?;
        self.acl.get_acl_properties(acl)?;
        self.tree.set_node_acl(node, Some(acl))?;
        let mut changes = Vec::new();
        if let Some(source) = self.acl.get_inherited_acl(acl)? {
            propagate(
                &mut self.tree,
                &mut self.acl,
                node,
                source,
                CascadeMode::AllDescendants,
                TreeCapabilities::plain(),
                &mut changes,
            )?;
        }
        update_changed_acls(&mut self.tree, node, &changes)?;
        Ok(changes)
    }

    fn inherited_acl(&mut self, node: NodeId) -> Result<Option<AclId>> {
        match self.tree.node_acl(node)? {
            Some(id) => self.acl.get_inherited_acl(id),
            None => Ok(None),
        }
    }

    fn indirect_acl(&mut self, _node: NodeId) -> Result<Option<AclId>> {
        Err(RepoError::unsupported(
            "indirection lookups on a plain hierarchical tree",
        ))
    }

    fn set_inheritance_for_children(
        &mut self,
        node: NodeId,
        source: AclId,
    ) -> Result<Vec<ChangeRecord>> {
        self.writable(node)?;
        let mut changes = Vec::new();
        propagate(
            &mut self.tree,
            &mut self.acl,
            node,
            source,
            CascadeMode::AllDescendants,
            TreeCapabilities::plain(),
            &mut changes,
        )?;
        update_changed_acls(&mut self.tree, node, &changes)?;
        Ok(changes)
    }

    fn update_changed_acls(&mut self, node: NodeId, changes: &[ChangeRecord]) -> Result<()> {
        update_changed_acls(&mut self.tree, node, changes)
    }

    fn force_copy(&mut self, _node: NodeId) -> Result<()> {
        // Plain trees do not version structurally.
        Ok(())
    }

    fn patch_acls(&mut self, defaults: &[Ace]) -> Result<MigrationReport> {
        migrate_all(&mut self.tree, &mut self.acl, defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTree;
    use assert_matches::assert_matches;
    use crate::node::{Indirection, NodePath};
    use reliquary_acl::{AclProperties, PermissionRef};
    use reliquary_core::{QName, StoreId};

    fn read() -> PermissionRef {
        PermissionRef::new(QName::new("model", "content"), "Read")
    }

    #[test]
    fn assignment_cascades_to_descendants() {
        let mut tree = MemoryTree::plain();
        let root = tree.add_store("main");
        let folder = tree.add_child(root, "folder", true);
        let file = tree.add_child(folder, "file", false);

        let mut acl = AclService::new();
        let defining = acl
            .create_acl_with(
                AclProperties::defining(),
                vec![Ace::allow("alice", read())],
                None,
            )
            .unwrap();

        let mut dao = PlainAclDao::new(tree, acl);
        dao.set_node_acl(root, defining).unwrap();

        // Children without a list of their own ride on the shared list.
        let shared = dao.node_acl_id(folder).unwrap().unwrap();
        assert_eq!(dao.node_acl_id(file).unwrap(), Some(shared));
        let view = dao.node_acl(file).unwrap().unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].authority, "alice");
        assert_eq!(view[0].position, 1);
    }

    #[test]
    fn defining_children_merge_rather_than_overwrite() {
        let mut tree = MemoryTree::plain();
        let root = tree.add_store("main");
        let folder = tree.add_child(root, "folder", true);

        let mut acl = AclService::new();
        let top = acl
            .create_acl_with(
                AclProperties::defining(),
                vec![Ace::allow("alice", read())],
                None,
            )
            .unwrap();
        let own = acl
            .create_acl_with(
                AclProperties::defining(),
                vec![Ace::allow("bob", read())],
                None,
            )
            .unwrap();

        let mut dao = PlainAclDao::new(tree, acl);
        dao.tree.set_node_acl(folder, Some(own)).unwrap();
        dao.set_node_acl(root, top).unwrap();

        // The folder kept its own list, now inheriting from above.
        assert_eq!(dao.node_acl_id(folder).unwrap(), Some(own));
        let view = dao.node_acl(folder).unwrap().unwrap();
        let rendered: Vec<(&str, u32)> = view
            .iter()
            .map(|entry| (entry.authority.as_str(), entry.position))
            .collect();
        assert_eq!(rendered, vec![("bob", 0), ("alice", 1)]);
    }

    #[test]
    fn non_primary_children_are_not_cascaded() {
        let mut tree = MemoryTree::plain();
        let root = tree.add_store("main");
        let folder = tree.add_child(root, "folder", true);
        let referenced = tree.add_child(folder, "referenced", false);
        tree.link_child(root, "reference", referenced, false);

        let mut acl = AclService::new();
        let defining = acl
            .create_acl_with(
                AclProperties::defining(),
                vec![Ace::allow("alice", read())],
                None,
            )
            .unwrap();

        let mut dao = PlainAclDao::new(tree, acl);
        dao.set_node_acl(root, defining).unwrap();

        // Reached through its primary parent, not through the reference.
        assert!(dao.node_acl_id(referenced).unwrap().is_some());
    }

    #[test]
    fn layered_children_are_rejected() {
        // A tree that hosts a layered node, driven by the plain binding.
        let mut tree = MemoryTree::layered();
        let root = tree.add_store("main");
        let target = tree.add_child(root, "target", true);
        let store = StoreId::new("main");
        tree.add_layered(
            root,
            "mirror",
            Indirection::head(NodePath::new(&store, &["target"])),
        );
        let _ = target;

        let mut acl = AclService::new();
        let defining = acl
            .create_acl_with(
                AclProperties::defining(),
                vec![Ace::allow("alice", read())],
                None,
            )
            .unwrap();

        let mut dao = PlainAclDao::new(tree, acl);
        assert_matches!(
            dao.set_node_acl(root, defining),
            Err(RepoError::IllegalState { .. })
        );
    }

    #[test]
    fn indirection_is_unsupported() {
        let mut tree = MemoryTree::plain();
        let root = tree.add_store("main");
        let mut dao = PlainAclDao::new(tree, AclService::new());
        assert_matches!(
            dao.indirect_acl(root),
            Err(RepoError::Unsupported { .. })
        );
    }
}
