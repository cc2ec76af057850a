//! The copy-on-write engine.
//!
//! Given a target list and a requested mutation, decides whether the
//! existing row can be mutated in place or must be version-forked, applies
//! the mutation's member edits, and cascades the same decision to every list
//! that inherits from the target. A forked ancestor forces its dependents to
//! fork too, so any inheritance chain stays on one consistent version
//! lineage.

use crate::cache::AclCache;
use crate::entry::{Ace, AcePattern};
use crate::records::{AceId, AclMember};
use crate::store::AclStore;
use reliquary_core::{AclId, AclType, ChangeRecord, Result};
use tracing::debug;

/// What a mutation does to the selected row's members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMode {
    /// Delete every member below the mutation's depth (dropping
    /// inheritance).
    TruncateInherited,
    /// Add the supplied inherited members.
    AddInherited,
    /// Replace the inherited members: truncate, then add.
    ChangeInherited,
    /// Delete the members one level below the depth and close the gap
    /// (an intermediate ancestor left the chain).
    RemoveInherited,
    /// Open a gap one level below the depth and insert the supplied
    /// members there (a new intermediate ancestor was spliced in).
    InsertInherited,
    /// Remove members matching the exclude patterns at the depth, then add
    /// the supplied entries there.
    CopyAndUpdate,
    /// Copy only: fork (or no-op) without touching members.
    CopyOnly,
    /// Add the supplied entries, then add the supplied inherited members.
    /// Two explicit steps, always both.
    CreateAndInherit,
}

/// What `CopyAndUpdate` removes at the mutation's depth before adding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Exclusion {
    /// Remove nothing.
    #[default]
    Nothing,
    /// Remove every member at the depth.
    Everything,
    /// Remove members matching any of the patterns. Fields within one
    /// pattern are AND-combined; the patterns themselves are OR-combined.
    Matching(Vec<AcePattern>),
}

/// A requested mutation against one list.
#[derive(Debug, Clone)]
pub struct Mutation {
    /// The list to mutate
    pub target: AclId,
    /// The resulting id of the list above, during cascade steps
    pub parent: Option<AclId>,
    /// What to remove at the mutation's depth (`CopyAndUpdate`)
    pub exclude: Exclusion,
    /// Entries to add at the mutation's depth
    pub additions: Vec<Ace>,
    /// New inheritance source for the target (`ChangeInherited`)
    pub new_inherits_from: Option<AclId>,
    /// Inherited members to write, at target-relative positions
    pub inherited: Vec<AclMember>,
    /// Propagate the mutation to every list inheriting from the target
    pub cascade: bool,
    /// The member depth the mutation applies at for the target row
    pub depth: u32,
    /// What to do to the selected row's members
    pub mode: MutationMode,
}

impl Mutation {
    /// A mutation with no member edits beyond what the mode implies.
    pub fn new(target: AclId, mode: MutationMode) -> Self {
        Self {
            target,
            parent: None,
            exclude: Exclusion::Nothing,
            additions: Vec::new(),
            new_inherits_from: None,
            inherited: Vec::new(),
            cascade: false,
            depth: 0,
            mode,
        }
    }

    /// Set the entries to add.
    pub fn with_additions(mut self, additions: Vec<Ace>) -> Self {
        self.additions = additions;
        self
    }

    /// Set what to remove at the mutation's depth.
    pub fn with_exclude(mut self, exclude: Exclusion) -> Self {
        self.exclude = exclude;
        self
    }

    /// Set the inherited members to write.
    pub fn with_inherited(mut self, inherited: Vec<AclMember>) -> Self {
        self.inherited = inherited;
        self
    }

    /// Set the new inheritance source.
    pub fn with_new_inherits_from(mut self, source: AclId) -> Self {
        self.new_inherits_from = Some(source);
        self
    }

    /// Cascade to dependents.
    pub fn with_cascade(mut self) -> Self {
        self.cascade = true;
        self
    }
}

/// Per-invocation view of the mutation shared by every cascade step.
struct Op<'a> {
    exclude: &'a Exclusion,
    additions: &'a [AceId],
    new_inherits_from: Option<AclId>,
    inherited: &'a [AclMember],
    cascade: bool,
    mode: MutationMode,
}

/// The copy-on-write engine, borrowed over a store and its cache for the
/// duration of one operation.
pub struct CowEngine<'a> {
    store: &'a mut AclStore,
    cache: &'a AclCache,
}

impl<'a> CowEngine<'a> {
    /// Borrow the engine over a store and cache.
    pub fn new(store: &'a mut AclStore, cache: &'a AclCache) -> Self {
        Self { store, cache }
    }

    /// Apply a mutation, returning one change record per list visited,
    /// parents before their dependents.
    pub fn apply(&mut self, mutation: &Mutation) -> Result<Vec<ChangeRecord>> {
        let additions = mutation
            .additions
            .iter()
            .map(|ace| self.store.intern_ace(ace))
            .collect::<Result<Vec<_>>>()?;
        let op = Op {
            exclude: &mutation.exclude,
            additions: &additions,
            new_inherits_from: mutation.new_inherits_from,
            inherited: &mutation.inherited,
            cascade: mutation.cascade,
            mode: mutation.mode,
        };
        let mut changes = Vec::new();
        self.apply_inner(
            &op,
            mutation.target,
            mutation.parent,
            mutation.depth,
            false,
            true,
            &mut changes,
        )?;
        Ok(changes)
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_inner(
        &mut self,
        op: &Op<'_>,
        target: AclId,
        parent: Option<AclId>,
        depth: u32,
        force_version: bool,
        at_root: bool,
        changes: &mut Vec<ChangeRecord>,
    ) -> Result<()> {
        let row = self.store.row(target)?.clone();

        if !row.latest {
            // Stale row: nothing to write, but any cached view is suspect.
            self.cache.evict(target);
            changes.push(ChangeRecord::unchanged(target, row.acl_type));
            return Ok(());
        }

        let current = self.store.change_set();
        let in_place = !row.versioned
            || (row.change_set == current && !force_version && !row.requires_version);
        let (resulting, forked) = if in_place {
            (target, false)
        } else {
            (self.store.fork(target)?, true)
        };

        self.write_members(op, resulting, depth)?;

        // Root mutations may re-point inheritance explicitly; cascade steps
        // follow the resulting id of the list above.
        let new_source = if at_root { op.new_inherits_from } else { parent };
        if let Some(source) = new_source {
            self.store.row_mut(resulting)?.inherits_from = Some(source);
        }

        if forked {
            // The parent's shared-pointer must follow the fork.
            if self.store.row(resulting)?.acl_type == AclType::Shared {
                if let Some(parent_id) = parent {
                    self.store.row_mut(parent_id)?.inherited_acl = Some(resulting);
                }
            }
            changes.push(ChangeRecord::forked(
                target,
                resulting,
                row.acl_type,
                row.acl_type,
            ));
        } else {
            changes.push(ChangeRecord::unchanged(target, row.acl_type));
        }
        self.cache.evict(target);
        self.cache.evict(resulting);
        debug!(
            before = %target,
            after = %resulting,
            mode = ?op.mode,
            depth,
            forked,
            "applied ACL mutation"
        );

        if op.cascade {
            let child_depth = depth + row.acl_type.inherit_shift();
            for dependent in self.store.dependents(row.lineage) {
                if dependent == resulting {
                    continue;
                }
                self.apply_inner(
                    op,
                    dependent,
                    Some(resulting),
                    child_depth,
                    force_version || forked,
                    false,
                    changes,
                )?;
            }
        }
        Ok(())
    }

    fn write_members(&mut self, op: &Op<'_>, id: AclId, depth: u32) -> Result<()> {
        match op.mode {
            MutationMode::CopyOnly => Ok(()),
            MutationMode::CopyAndUpdate => {
                self.remove_matching(id, op.exclude, depth)?;
                self.add_at(id, op.additions, depth)
            }
            MutationMode::TruncateInherited => self.truncate_inherited(id, depth),
            MutationMode::AddInherited => self.add_inherited(id, op.inherited, depth),
            MutationMode::ChangeInherited => {
                self.truncate_inherited(id, depth)?;
                self.add_inherited(id, op.inherited, depth)
            }
            MutationMode::RemoveInherited => self.remove_inherited_level(id, depth),
            MutationMode::InsertInherited => self.insert_inherited_level(id, op.inherited, depth),
            MutationMode::CreateAndInherit => {
                self.add_at(id, op.additions, depth)?;
                self.add_inherited(id, op.inherited, depth)
            }
        }
    }

    /// Delete members at `depth` selected by the exclusion.
    fn remove_matching(&mut self, id: AclId, exclude: &Exclusion, depth: u32) -> Result<()> {
        let doomed: Vec<AceId> = match exclude {
            Exclusion::Nothing => return Ok(()),
            Exclusion::Everything => self
                .store
                .members(id)?
                .iter()
                .filter(|member| member.position == depth)
                .map(|member| member.ace)
                .collect(),
            Exclusion::Matching(patterns) => {
                let mut selected = Vec::new();
                for member in self.store.members(id)? {
                    if member.position == depth && self.store.ace_matches(member.ace, patterns)? {
                        selected.push(member.ace);
                    }
                }
                selected
            }
        };
        self.store
            .members_mut(id)?
            .retain(|member| !(member.position == depth && doomed.contains(&member.ace)));
        Ok(())
    }

    /// Insert entries at exactly `depth`, skipping duplicates.
    fn add_at(&mut self, id: AclId, aces: &[AceId], depth: u32) -> Result<()> {
        let members = self.store.members_mut(id)?;
        for &ace in aces {
            let member = AclMember {
                ace,
                position: depth,
            };
            if !members.contains(&member) {
                members.push(member);
            }
        }
        Ok(())
    }

    /// Delete every member below `depth`.
    fn truncate_inherited(&mut self, id: AclId, depth: u32) -> Result<()> {
        self.store
            .members_mut(id)?
            .retain(|member| member.position <= depth);
        Ok(())
    }

    /// Write inherited members, shifting their target-relative positions by
    /// `depth`, skipping duplicates.
    fn add_inherited(&mut self, id: AclId, inherited: &[AclMember], depth: u32) -> Result<()> {
        let members = self.store.members_mut(id)?;
        for entry in inherited {
            let member = AclMember {
                ace: entry.ace,
                position: entry.position + depth,
            };
            if !members.contains(&member) {
                members.push(member);
            }
        }
        Ok(())
    }

    /// Delete members exactly one level below `depth` and close the gap.
    fn remove_inherited_level(&mut self, id: AclId, depth: u32) -> Result<()> {
        let members = self.store.members_mut(id)?;
        members.retain(|member| member.position != depth + 1);
        for member in members.iter_mut() {
            if member.position > depth + 1 {
                member.position -= 1;
            }
        }
        Ok(())
    }

    /// Open a gap one level below `depth` and insert the members there.
    fn insert_inherited_level(
        &mut self,
        id: AclId,
        inherited: &[AclMember],
        depth: u32,
    ) -> Result<()> {
        let members = self.store.members_mut(id)?;
        for member in members.iter_mut() {
            if member.position > depth {
                member.position += 1;
            }
        }
        for entry in inherited {
            let member = AclMember {
                ace: entry.ace,
                position: depth + 1,
            };
            if !members.contains(&member) {
                members.push(member);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{AccessStatus, PermissionRef};
    use crate::records::AclProperties;
    use reliquary_core::QName;

    fn read() -> PermissionRef {
        PermissionRef::new(QName::new("model", "content"), "Read")
    }

    fn write() -> PermissionRef {
        PermissionRef::new(QName::new("model", "content"), "Write")
    }

    fn fixture() -> (AclStore, AclCache) {
        (AclStore::new(), AclCache::new())
    }

    #[test]
    fn in_place_within_one_change_set() {
        let (mut store, cache) = fixture();
        let id = store.create_acl(AclProperties::defining());

        let mutation = Mutation::new(id, MutationMode::CopyAndUpdate)
            .with_additions(vec![Ace::allow("alice", read())]);
        let changes = CowEngine::new(&mut store, &cache).apply(&mutation).unwrap();
        assert_eq!(changes.len(), 1);
        assert!(!changes[0].id_changed());

        // Second mutation in the same change-set coalesces too.
        let mutation = Mutation::new(id, MutationMode::CopyAndUpdate)
            .with_additions(vec![Ace::allow("bob", write())]);
        let changes = CowEngine::new(&mut store, &cache).apply(&mutation).unwrap();
        assert!(!changes[0].id_changed());
        assert_eq!(store.members(id).unwrap().len(), 2);
    }

    #[test]
    fn new_change_set_forks() {
        let (mut store, cache) = fixture();
        let id = store.create_acl(AclProperties::defining());
        store.complete_change_set();

        let mutation = Mutation::new(id, MutationMode::CopyAndUpdate)
            .with_additions(vec![Ace::allow("alice", read())]);
        let changes = CowEngine::new(&mut store, &cache).apply(&mutation).unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].id_changed());
        let after = changes[0].after.unwrap();
        assert_ne!(after, id);
        assert!(!store.row(id).unwrap().latest);
        assert!(store.row(after).unwrap().latest);
        // The old row's members are untouched.
        assert!(store.members(id).unwrap().is_empty());
        assert_eq!(store.members(after).unwrap().len(), 1);
    }

    #[test]
    fn non_versioned_rows_never_fork() {
        let (mut store, cache) = fixture();
        let id = store.create_acl(AclProperties::defining().with_versioned(false));
        store.complete_change_set();

        let mutation = Mutation::new(id, MutationMode::CopyAndUpdate)
            .with_additions(vec![Ace::allow("alice", read())]);
        let changes = CowEngine::new(&mut store, &cache).apply(&mutation).unwrap();
        assert!(!changes[0].id_changed());
        let lineage = store.row(id).unwrap().lineage;
        assert_eq!(store.version_count(lineage), 1);
    }

    #[test]
    fn requires_version_forces_a_fork() {
        let (mut store, cache) = fixture();
        let id = store.create_acl(AclProperties::defining());
        store.row_mut(id).unwrap().requires_version = true;

        let mutation = Mutation::new(id, MutationMode::CopyAndUpdate)
            .with_additions(vec![Ace::allow("alice", read())]);
        let changes = CowEngine::new(&mut store, &cache).apply(&mutation).unwrap();
        assert!(changes[0].id_changed());
        // The fork cleared the flag.
        let after = changes[0].after.unwrap();
        assert!(!store.row(after).unwrap().requires_version);
    }

    #[test]
    fn stale_rows_are_a_no_op() {
        let (mut store, cache) = fixture();
        let id = store.create_acl(AclProperties::defining());
        store.complete_change_set();
        let forked = store.fork(id).unwrap();

        let mutation = Mutation::new(id, MutationMode::CopyAndUpdate)
            .with_additions(vec![Ace::allow("alice", read())]);
        let changes = CowEngine::new(&mut store, &cache).apply(&mutation).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].before, id);
        assert_eq!(changes[0].after, Some(id));
        assert!(store.members(id).unwrap().is_empty());
        assert!(store.members(forked).unwrap().is_empty());
    }

    #[test]
    fn create_and_inherit_adds_then_inherits() {
        let (mut store, cache) = fixture();
        let id = store.create_acl(AclProperties::defining());
        let inherited_ace = store.intern_ace(&Ace::allow("everyone", read())).unwrap();

        let mutation = Mutation::new(id, MutationMode::CreateAndInherit)
            .with_additions(vec![Ace::allow("alice", read())])
            .with_inherited(vec![AclMember {
                ace: inherited_ace,
                position: 1,
            }]);
        CowEngine::new(&mut store, &cache).apply(&mutation).unwrap();

        let view = store.resolve_view(id).unwrap();
        assert_eq!(view.len(), 2);
        // Both steps ran: the direct entry at 0 and the inherited one at 1.
        assert_eq!(view[0].authority, "alice");
        assert_eq!(view[0].position, 0);
        assert_eq!(view[1].authority, "everyone");
        assert_eq!(view[1].position, 1);
    }

    #[test]
    fn remove_matching_honours_or_of_ands() {
        let (mut store, cache) = fixture();
        let id = store.create_acl(AclProperties::defining());
        let mutation = Mutation::new(id, MutationMode::CopyAndUpdate).with_additions(vec![
            Ace::allow("alice", read()),
            Ace::allow("alice", write()),
            Ace::allow("bob", read()),
        ]);
        CowEngine::new(&mut store, &cache).apply(&mutation).unwrap();

        // (alice AND write) OR (bob): removes two of the three.
        let patterns = vec![
            AcePattern {
                authority: Some("alice".into()),
                permission: Some(write()),
                ..AcePattern::default()
            },
            AcePattern::for_authority("bob"),
        ];
        let mutation = Mutation::new(id, MutationMode::CopyAndUpdate)
            .with_exclude(Exclusion::Matching(patterns));
        CowEngine::new(&mut store, &cache).apply(&mutation).unwrap();

        let view = store.resolve_view(id).unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].authority, "alice");
        assert_eq!(view[0].permission, read());
        assert_eq!(view[0].status, AccessStatus::Allowed);
    }

    #[test]
    fn remove_and_insert_levels_keep_positions_dense() {
        let (mut store, cache) = fixture();
        let id = store.create_acl(AclProperties::defining());
        let a = store.intern_ace(&Ace::allow("a", read())).unwrap();
        let b = store.intern_ace(&Ace::allow("b", read())).unwrap();
        let c = store.intern_ace(&Ace::allow("c", read())).unwrap();
        CowEngine::new(&mut store, &cache)
            .apply(
                &Mutation::new(id, MutationMode::AddInherited).with_inherited(vec![
                    AclMember { ace: a, position: 1 },
                    AclMember { ace: b, position: 2 },
                    AclMember { ace: c, position: 3 },
                ]),
            )
            .unwrap();

        // Remove the level at position 1 (depth 0): b and c move up.
        CowEngine::new(&mut store, &cache)
            .apply(&Mutation::new(id, MutationMode::RemoveInherited))
            .unwrap();
        let view = store.resolve_view(id).unwrap();
        assert_eq!(
            view.iter().map(|v| (&*v.authority, v.position)).collect::<Vec<_>>(),
            vec![("b", 1), ("c", 2)]
        );

        // Splice a level back in at position 1: b and c move down again.
        CowEngine::new(&mut store, &cache)
            .apply(
                &Mutation::new(id, MutationMode::InsertInherited)
                    .with_inherited(vec![AclMember { ace: a, position: 1 }]),
            )
            .unwrap();
        let view = store.resolve_view(id).unwrap();
        assert_eq!(
            view.iter().map(|v| (&*v.authority, v.position)).collect::<Vec<_>>(),
            vec![("a", 1), ("b", 2), ("c", 3)]
        );
    }
}
