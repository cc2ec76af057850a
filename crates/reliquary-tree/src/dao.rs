//! The per-node ACL DAO contract.
//!
//! Both tree families expose ACL assignment through this one trait; the
//! plain hierarchical binding and the layered/versioned binding implement
//! it over their respective trees.

use crate::migrate::MigrationReport;
use reliquary_acl::{Ace, AclEntryView};
use reliquary_core::{AclId, ChangeRecord, NodeId, Result};
use std::sync::Arc;

/// ACL operations addressed by node rather than by list id.
pub trait NodeAclDao {
    /// The resolved view of the node's list, if it has one.
    fn node_acl(&self, node: NodeId) -> Result<Option<Arc<Vec<AclEntryView>>>>;

    /// The id of the node's list, if it has one.
    fn node_acl_id(&self, node: NodeId) -> Result<Option<AclId>>;

    /// Attach a list to a node and cascade it through the subtree.
    fn set_node_acl(&mut self, node: NodeId, acl: AclId) -> Result<Vec<ChangeRecord>>;

    /// The shared list children of this node inherit from.
    fn inherited_acl(&mut self, node: NodeId) -> Result<Option<AclId>>;

    /// The list of the node a layered node indirects to. Unsupported on
    /// plain trees.
    fn indirect_acl(&mut self, node: NodeId) -> Result<Option<AclId>>;

    /// Hand `source` to every descendant of `node` as its inherited list.
    fn set_inheritance_for_children(
        &mut self,
        node: NodeId,
        source: AclId,
    ) -> Result<Vec<ChangeRecord>>;

    /// Re-point node ACL references across a subtree per the records.
    fn update_changed_acls(&mut self, node: NodeId, changes: &[ChangeRecord]) -> Result<()>;

    /// Trigger the tree's structural copy-on-write for the node ahead of
    /// an ACL write. A no-op on trees that do not version structurally.
    fn force_copy(&mut self, node: NodeId) -> Result<()>;

    /// Convert legacy single-list-per-node data to the sharable model,
    /// reporting per-type counts.
    fn patch_acls(&mut self, defaults: &[Ace]) -> Result<MigrationReport>;
}
