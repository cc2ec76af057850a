//! Legacy migration.
//!
//! Converts pre-existing single-list-per-node data into the
//! defining/shared/layered model. The walk is depth-first with children
//! handled before their parent, so every defining list a relabel cascades
//! into was created inside the migration's own change-set; that is why
//! the cascade is asserted never to fork an id.

use crate::cascade::{propagate, update_changed_acls, CascadeMode};
use crate::node::{NodeDescriptor, NodeTree};
use reliquary_acl::{Ace, AclEntryView, AclProperties, AclService};
use reliquary_core::{AclId, AclType, ChangeRecord, NodeId, RepoError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Per-type counts reported by a migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Nodes visited by the counting walk
    pub nodes: u64,
    /// Nodes per effective list type after migration
    pub counts: BTreeMap<AclType, u64>,
    /// Nodes still without any list; non-zero means an incomplete run
    pub missing: u64,
}

impl MigrationReport {
    fn record(&mut self, acl_type: Option<AclType>) {
        self.nodes += 1;
        match acl_type {
            Some(acl_type) => *self.counts.entry(acl_type).or_insert(0) += 1,
            None => self.missing += 1,
        }
    }

    /// Count for one list type.
    pub fn count(&self, acl_type: AclType) -> u64 {
        self.counts.get(&acl_type).copied().unwrap_or(0)
    }

    /// Sum of all per-type counts plus the missing nodes.
    pub fn total(&self) -> u64 {
        self.counts.values().sum::<u64>() + self.missing
    }

    /// A complete run accounts for every node and leaves none bare.
    pub fn is_complete(&self) -> bool {
        self.missing == 0 && self.total() == self.nodes
    }
}

/// Walk every store converting legacy data, then count the result.
pub fn migrate_all<T: NodeTree>(
    tree: &mut T,
    acl: &mut AclService,
    defaults: &[Ace],
) -> Result<MigrationReport> {
    // One change-set for the whole run: the relabel cascades coalesce
    // instead of forking.
    acl.change_set();
    for store in tree.stores() {
        let root = tree.root_node(&store)?;
        let mut changes = Vec::new();
        migrate_node(tree, acl, root, true, defaults, &mut changes)?;
        update_changed_acls(tree, root, &changes)?;
        debug!(store = %store, records = changes.len(), "migrated store");
    }

    let mut report = MigrationReport::default();
    for store in tree.stores() {
        let root = tree.root_node(&store)?;
        count_subtree(tree, acl, root, &mut report)?;
    }
    info!(
        nodes = report.nodes,
        defining = report.count(AclType::Defining),
        shared = report.count(AclType::Shared),
        layered = report.count(AclType::Layered),
        missing = report.missing,
        "migration complete"
    );
    Ok(report)
}

fn migrate_node<T: NodeTree>(
    tree: &mut T,
    acl: &mut AclService,
    node: NodeId,
    is_root: bool,
    defaults: &[Ace],
    changes: &mut Vec<ChangeRecord>,
) -> Result<()> {
    let children: Vec<NodeDescriptor> = tree.children(node)?;
    for child in &children {
        if child.is_primary {
            migrate_node(tree, acl, child.id, false, defaults, changes)?;
        }
    }

    let descriptor = tree.lookup(node)?;
    match tree.node_acl(node)? {
        None if is_root => {
            // A bare root gets a fresh defining list with the default
            // entries; everything below inherits from it.
            let defining =
                acl.create_acl_with(AclProperties::defining(), defaults.to_vec(), None)?;
            tree.set_node_acl(node, Some(defining))?;
            wire_children(tree, acl, node, defining, changes)?;
        }
        None => {
            // Pure passthrough; the nearest defining ancestor assigns the
            // shared list when it wires its children.
        }
        Some(existing) => {
            let properties = acl.get_acl_properties(existing)?;
            match properties.acl_type {
                AclType::Old => {
                    // Relabel: a new defining list carries only the
                    // directly-defined entries; inherited ones are
                    // re-derived by the ancestor wiring.
                    let direct: Vec<Ace> = acl
                        .get_acl(existing)?
                        .iter()
                        .filter(|entry| entry.is_direct())
                        .map(AclEntryView::to_ace)
                        .collect();
                    let defining = acl.create_acl_with(
                        AclProperties::defining().with_inherits(properties.inherits),
                        direct,
                        None,
                    )?;
                    tree.set_node_acl(node, Some(defining))?;
                    wire_children(tree, acl, node, defining, changes)?;
                    acl.delete_acl(existing)?;
                    debug!(node = %node, old = %existing, new = %defining, "relabelled legacy list");
                }
                AclType::Layered => {
                    // Already layered: re-derive the merge source from the
                    // indirection target.
                    if tree.capabilities().supports_layering {
                        if let Some(indirection) = &descriptor.indirection {
                            if let Ok(target) = tree.resolve_path(&indirection.to_path) {
                                if let Some(target_acl) = tree.node_acl(target)? {
                                    changes
                                        .extend(acl.merge_inherited_acl(target_acl, existing)?);
                                }
                            }
                        }
                    }
                }
                // Already migrated: idempotent skip.
                AclType::Defining
                | AclType::Shared
                | AclType::Fixed
                | AclType::Global => {}
            }
        }
    }
    Ok(())
}

/// Hand the new defining list's shared list to the subtree, asserting the
/// relabel stayed purely additive: a fork during this cascade is an
/// internal-consistency bug, not a recoverable condition.
fn wire_children<T: NodeTree>(
    tree: &mut T,
    acl: &mut AclService,
    node: NodeId,
    defining: AclId,
    changes: &mut Vec<ChangeRecord>,
) -> Result<()> {
    let Some(source) = acl.get_inherited_acl(defining)? else {
        return Ok(());
    };
    let mut step = Vec::new();
    let caps = tree.capabilities();
    propagate(
        tree,
        acl,
        node,
        source,
        CascadeMode::AllDescendants,
        caps,
        &mut step,
    )?;
    if let Some(forked) = step.iter().find(|record| record.id_changed()) {
        return Err(RepoError::migration_assertion(format!(
            "relabelling under {node} forked {} into {:?}",
            forked.before, forked.after
        )));
    }
    changes.extend(step);
    Ok(())
}

fn count_subtree<T: NodeTree>(
    tree: &T,
    acl: &AclService,
    node: NodeId,
    report: &mut MigrationReport,
) -> Result<()> {
    let acl_type = match tree.node_acl(node)? {
        Some(id) => Some(acl.get_acl_properties(id)?.acl_type),
        None => None,
    };
    report.record(acl_type);
    for child in tree.children(node)? {
        if child.is_primary {
            count_subtree(tree, acl, child.id, report)?;
        }
    }
    Ok(())
}
