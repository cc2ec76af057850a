//! The layered/versioned binding.
//!
//! Adds what the virtual filesystem needs on top of the plain walk:
//! structural copy-on-write ahead of ACL writes, rejection of historical
//! read-only nodes, direct-children-only propagation, and indirection
//! retargeting: a permission change on a node forces every live layered
//! reference to it to fork its list and re-merge, across every head path.

use crate::cascade::{propagate, update_changed_acls, CascadeMode};
use crate::dao::NodeAclDao;
use crate::migrate::{migrate_all, MigrationReport};
use crate::node::{NodePath, NodeTree};
use reliquary_acl::{Ace, AclCopyMode, AclEntryView, AclService};
use reliquary_core::{AclId, AclType, ChangeRecord, NodeId, RepoError, Result};
use std::sync::Arc;
use tracing::debug;

/// Per-node ACL access over a layered, versioned tree.
#[derive(Debug)]
pub struct LayeredAclDao<T: NodeTree> {
    tree: T,
    acl: AclService,
}

impl<T: NodeTree> LayeredAclDao<T> {
    /// Bind a layered tree and an ACL service. The tree must support
    /// layering.
    pub fn new(tree: T, acl: AclService) -> Result<Self> {
        if !tree.capabilities().supports_layering {
            return Err(RepoError::illegal_state(
                "the layered driver needs a tree with layering support",
            ));
        }
        Ok(Self { tree, acl })
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
        if self.tree.lookup(node)?.read_only {
            return Err(RepoError::invalid_reference(format!(
                "{node} is a historical version and cannot be mutated"
            )));
        }
        Ok(())
    }

    /// Hand `source` to the subtree under `node`, with the walk depth
    /// chosen by `mode`.
    pub fn propagate_children(
        &mut self,
        node: NodeId,
        source: AclId,
        mode: CascadeMode,
    ) -> Result<Vec<ChangeRecord>> {
        self.writable(node)?;
        let caps = self.tree.capabilities();
        let mut changes = Vec::new();
        propagate(
            &mut self.tree,
            &mut self.acl,
            node,
            source,
            mode,
            caps,
            &mut changes,
        )?;
        update_changed_acls(&mut self.tree, node, &changes)?;
        Ok(changes)
    }

    /// Every node whose indirection points at one of `targets`, across
    /// every store.
    fn layered_references(&self, targets: &[NodePath]) -> Result<Vec<NodeId>> {
        let mut found = Vec::new();
        for store in self.tree.stores() {
            let root = self.tree.root_node(&store)?;
            self.collect_references(root, targets, &mut found)?;
        }
        Ok(found)
    }

    fn collect_references(
        &self,
        node: NodeId,
        targets: &[NodePath],
        found: &mut Vec<NodeId>,
    ) -> Result<()> {
        for child in self.tree.children(node)? {
            if let Some(indirection) = &child.indirection {
                if targets.contains(&indirection.to_path) && !found.contains(&child.id) {
                    found.push(child.id);
                }
            }
            if child.is_primary {
                self.collect_references(child.id, targets, found)?;
            }
        }
        Ok(())
    }

    /// A permission change landed on the node behind `targets`: force
    /// every live layered reference to fork its list and re-merge from
    /// `target_acl`.
    fn retarget_layered_references(
        &mut self,
        targets: &[NodePath],
        target_acl: AclId,
    ) -> Result<Vec<ChangeRecord>> {
        let mut changes = Vec::new();
        let mut processed = std::collections::HashSet::new();
        for reference in self.layered_references(targets)? {
            // Fix up every live path to the reference, not just one.
            let head_paths = self.tree.lookup(reference)?.head_paths.clone();
            for path in &head_paths {
                let current = self.tree.force_copy_on_write(path)?;
                let Some(stored) = self.tree.node_acl(current)? else {
                    // A pure mirror resolves through the indirection at
                    // read time; nothing stored to fix up.
                    continue;
                };
                let layered_acl = self.acl.latest_id(stored)?;
                if self.acl.get_acl_properties(layered_acl)?.acl_type != AclType::Layered {
                    continue;
                }
                // One fork per list, however many paths reach it; the
                // remaining pointers follow through the change records.
                let lineage = self.acl.store().row(layered_acl)?.lineage;
                if !processed.insert(lineage) {
                    continue;
                }
                // Fork even inside the current change-set, then re-merge
                // the inherited entries from the new target.
                self.acl.get_copy(layered_acl, None, AclCopyMode::Cow)?;
                let step = self.acl.merge_inherited_acl(target_acl, layered_acl)?;
                debug!(
                    reference = %current,
                    acl = %layered_acl,
                    records = step.len(),
                    "re-merged layered reference"
                );
                changes.extend(step);
            }
        }
        Ok(changes)
    }
}

impl<T: NodeTree> NodeAclDao for LayeredAclDao<T> {
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
        let descriptor = self.tree.lookup(node)?;
        // The tree's own copy-on-write runs ahead of the ACL write at
        // every live path.
        let mut node = node;
        for path in &descriptor.head_paths {
            node = self.tree.force_copy_on_write(path)?;
        }
        self.tree.set_node_acl(node, Some(acl))?;

        let caps = self.tree.capabilities();
        let mut changes = Vec::new();
        if let Some(source) = self.acl.get_inherited_acl(acl)? {
            propagate(
                &mut self.tree,
                &mut self.acl,
                node,
                source,
                CascadeMode::AllDescendants,
                caps,
                &mut changes,
            )?;
        }
        // Layered views onto this node re-merge from the new list.
        changes.extend(self.retarget_layered_references(&descriptor.head_paths, acl)?);
        for store in self.tree.stores() {
            let root = self.tree.root_node(&store)?;
            update_changed_acls(&mut self.tree, root, &changes)?;
        }
        Ok(changes)
    }

    fn inherited_acl(&mut self, node: NodeId) -> Result<Option<AclId>> {
        if let Some(id) = self.tree.node_acl(node)? {
            return self.acl.get_inherited_acl(id);
        }
        match self.indirect_acl(node)? {
            Some(target) => self.acl.get_inherited_acl(target),
            None => Ok(None),
        }
    }

    fn indirect_acl(&mut self, node: NodeId) -> Result<Option<AclId>> {
        let descriptor = self.tree.lookup(node)?;
        let Some(indirection) = descriptor.indirection else {
            return Ok(None);
        };
        let target = self.tree.resolve_path(&indirection.to_path)?;
        self.tree.node_acl(target)
    }

    fn set_inheritance_for_children(
        &mut self,
        node: NodeId,
        source: AclId,
    ) -> Result<Vec<ChangeRecord>> {
        self.propagate_children(node, source, CascadeMode::AllDescendants)
    }

    fn update_changed_acls(&mut self, node: NodeId, changes: &[ChangeRecord]) -> Result<()> {
        update_changed_acls(&mut self.tree, node, changes)
    }

    fn force_copy(&mut self, node: NodeId) -> Result<()> {
        let head_paths = self.tree.lookup(node)?.head_paths;
        for path in &head_paths {
            self.tree.force_copy_on_write(path)?;
        }
        Ok(())
    }

    fn patch_acls(&mut self, defaults: &[Ace]) -> Result<MigrationReport> {
        migrate_all(&mut self.tree, &mut self.acl, defaults)
    }
}
