//! The tree cascade.
//!
//! One walk shared by both tree families: assign the resolved shared list
//! to children without one, merge inheritance into children that define
//! their own, and stop where a subtree opted out. The driver variant
//! passes its own capability flags, so a plain driver rejects layered
//! nodes even on a tree that could host them.

use crate::node::{NodeTree, TreeCapabilities};
use reliquary_acl::AclService;
use reliquary_core::{AclId, AclType, ChangeRecord, NodeId, RepoError, Result};

/// How far an assignment walk reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeMode {
    /// Walk the whole subtree.
    AllDescendants,
    /// Touch direct children only.
    DirectChildrenOnly,
}

/// Walk the primary children of `node`, handing them `source` as their
/// inherited list. Change records from ACL merges are appended to
/// `changes`; the caller fixes node pointers up afterwards with
/// [`update_changed_acls`].
pub(crate) fn propagate<T: NodeTree>(
    tree: &mut T,
    acl: &mut AclService,
    node: NodeId,
    source: AclId,
    mode: CascadeMode,
    caps: TreeCapabilities,
    changes: &mut Vec<ChangeRecord>,
) -> Result<()> {
    for child in tree.children(node)? {
        if !child.is_primary {
            continue;
        }
        if child.is_layered && !caps.supports_layering {
            return Err(RepoError::illegal_state(format!(
                "layered node {} is not supported by this tree driver",
                child.id
            )));
        }
        match tree.node_acl(child.id)? {
            None => {
                // Pure passthrough: the child rides on the shared list.
                // No row of its own is created.
                tree.set_node_acl(child.id, Some(source))?;
                if mode == CascadeMode::AllDescendants {
                    propagate(tree, acl, child.id, source, mode, caps, changes)?;
                }
            }
            Some(existing) => {
                let properties = acl.get_acl_properties(existing)?;
                match properties.acl_type {
                    AclType::Shared => {
                        if existing != source {
                            tree.set_node_acl(child.id, Some(source))?;
                        }
                        if mode == CascadeMode::AllDescendants {
                            propagate(tree, acl, child.id, source, mode, caps, changes)?;
                        }
                    }
                    AclType::Defining | AclType::Layered => {
                        // The child defines its own list: merge rather
                        // than overwrite. Its shared list carries the
                        // change on through the ACL chain, so the walk
                        // stops here.
                        if properties.inherits {
                            changes.extend(acl.merge_inherited_acl(source, existing)?);
                        }
                    }
                    AclType::Old => {
                        return Err(RepoError::illegal_state(format!(
                            "node {} carries a legacy list inside a new-style cascade",
                            child.id
                        )));
                    }
                    AclType::Fixed | AclType::Global => {}
                }
            }
        }
    }
    Ok(())
}

/// Walk a subtree re-pointing node ACL references per the change records:
/// any pointer at a `before` id moves to the matching `after`.
pub(crate) fn update_changed_acls<T: NodeTree>(
    tree: &mut T,
    node: NodeId,
    changes: &[ChangeRecord],
) -> Result<()> {
    if let Some(current) = tree.node_acl(node)? {
        if let Some(record) = changes
            .iter()
            .find(|record| record.before == current && record.id_changed())
        {
            tree.set_node_acl(node, record.after)?;
        }
    }
    for child in tree.children(node)? {
        if child.is_primary {
            update_changed_acls(tree, child.id, changes)?;
        }
    }
    Ok(())
}
