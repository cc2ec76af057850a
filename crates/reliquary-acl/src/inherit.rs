//! Inheritance resolution.
//!
//! Computes and lazily creates the shared list a defining or layered list
//! hands to its children, and re-points a list's inheritance at the shared
//! list of a chosen parent. The actual writes are delegated to the
//! copy-on-write engine.

use crate::cache::AclCache;
use crate::records::AclProperties;
use crate::store::AclStore;
use crate::writer::{CowEngine, Mutation, MutationMode};
use reliquary_core::{AclId, AclType, ChangeRecord, RepoError, Result};
use std::collections::HashSet;
use tracing::warn;

/// Resolver for shared lists and inheritance re-pointing, borrowed over a
/// store and its cache for the duration of one operation.
pub struct InheritanceResolver<'a> {
    store: &'a mut AclStore,
    cache: &'a AclCache,
}

impl<'a> InheritanceResolver<'a> {
    /// Borrow the resolver over a store and cache.
    pub fn new(store: &'a mut AclStore, cache: &'a AclCache) -> Self {
        Self { store, cache }
    }

    /// The shared list children of `id` inherit from, created lazily on
    /// first use and cached on the row afterwards.
    ///
    /// Shared, fixed and global lists degenerate to themselves; legacy
    /// lists do not share and resolve to `None`.
    pub fn shared_acl(&mut self, id: AclId) -> Result<Option<AclId>> {
        let row = self.store.row(id)?.clone();
        match row.acl_type {
            AclType::Defining | AclType::Layered => {
                if let Some(existing) = row.inherited_acl {
                    if self.store.contains(existing) {
                        let shared = self.store.row(existing)?;
                        if shared.latest {
                            return Ok(Some(existing));
                        }
                        let lineage = shared.lineage;
                        if let Some(latest) = self.store.latest_of(lineage) {
                            warn!(
                                acl = %id,
                                stale = %existing,
                                latest = %latest,
                                "re-derived stale shared-list pointer"
                            );
                            self.store.row_mut(id)?.inherited_acl = Some(latest);
                            return Ok(Some(latest));
                        }
                    }
                }
                let shared = self.create_shared(id, row.versioned)?;
                Ok(Some(shared))
            }
            AclType::Shared | AclType::Fixed | AclType::Global => Ok(Some(id)),
            AclType::Old => Ok(None),
        }
    }

    fn create_shared(&mut self, parent: AclId, versioned: bool) -> Result<AclId> {
        let shared = self.store.create_acl(AclProperties {
            acl_type: AclType::Shared,
            inherits: true,
            versioned,
        });
        self.store.row_mut(shared)?.inherits_from = Some(parent);
        let inherited = self.store.inherited_for_child(parent)?;
        // Freshly created in the current change-set, so this writes in
        // place; no fork can happen here.
        CowEngine::new(self.store, self.cache).apply(
            &Mutation::new(shared, MutationMode::CreateAndInherit).with_inherited(inherited),
        )?;
        self.store.row_mut(parent)?.inherited_acl = Some(shared);
        Ok(shared)
    }

    /// Re-point `target`'s inheritance to come from `new_parent`, or
    /// re-derive the parent from the target's last known source when
    /// `new_parent` is `None`.
    ///
    /// No-op when the target's inherits flag is off. The write is a
    /// `ChangeInherited` cascade through the copy-on-write engine.
    pub fn merge(&mut self, new_parent: Option<AclId>, target: AclId) -> Result<Vec<ChangeRecord>> {
        let row = self.store.row(target)?.clone();
        if !matches!(row.acl_type, AclType::Defining | AclType::Layered) {
            return Err(RepoError::illegal_state(format!(
                "inheritance can only be merged into a defining or layered list, not {} ({target})",
                row.acl_type
            )));
        }
        if !row.inherits {
            return Ok(Vec::new());
        }

        let parent = match new_parent {
            Some(parent) => parent,
            None => self.rederive_parent(target, row.inherits_from)?,
        };

        // Fail before anything is written, including the lazy shared list.
        self.check_cycle(parent, target)?;

        let source = self.shared_acl(parent)?.ok_or_else(|| {
            RepoError::illegal_state(format!(
                "list {parent} cannot hand a shared list to children"
            ))
        })?;
        let inherited = self.store.inherited_for_child(source)?;
        CowEngine::new(self.store, self.cache).apply(
            &Mutation::new(target, MutationMode::ChangeInherited)
                .with_new_inherits_from(source)
                .with_inherited(inherited)
                .with_cascade(),
        )
    }

    fn rederive_parent(&self, target: AclId, recorded: Option<AclId>) -> Result<AclId> {
        let recorded = recorded.ok_or_else(|| {
            RepoError::invalid_reference(format!("{target} has no inheritance source recorded"))
        })?;
        if !self.store.contains(recorded) {
            return Err(RepoError::invalid_reference(format!(
                "{target} inherits from a deleted list ({recorded})"
            )));
        }
        let row = self.store.row(recorded)?;
        if row.latest {
            return Ok(recorded);
        }
        let latest = self.store.latest_of(row.lineage).ok_or_else(|| {
            RepoError::invalid_reference(format!(
                "no latest version for inheritance source {recorded}"
            ))
        })?;
        warn!(
            acl = %target,
            stale = %recorded,
            latest = %latest,
            "re-derived stale inheritance source"
        );
        Ok(latest)
    }

    /// Walk the ancestor chain from `source` to the root; finding `target`
    /// on the way means re-parenting would close a cycle.
    pub fn check_cycle(&self, source: AclId, target: AclId) -> Result<()> {
        let target_lineage = self.store.row(target)?.lineage;
        let mut chain = vec![source];
        let mut visited = HashSet::new();
        let mut cursor = Some(source);
        while let Some(id) = cursor {
            let row = self.store.row(id)?;
            if row.lineage == target_lineage {
                let rendered: Vec<String> = chain.iter().map(ToString::to_string).collect();
                return Err(RepoError::cyclical(format!(
                    "{target} is an ancestor of {source}: {}",
                    rendered.join(" -> ")
                )));
            }
            if !visited.insert(row.lineage) {
                break;
            }
            cursor = row.inherits_from;
            if let Some(next) = cursor {
                chain.push(next);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{Ace, PermissionRef};
    use crate::writer::{CowEngine, Mutation, MutationMode};
    use assert_matches::assert_matches;
    use reliquary_core::QName;

    fn read() -> PermissionRef {
        PermissionRef::new(QName::new("model", "content"), "Read")
    }

    fn fixture() -> (AclStore, AclCache) {
        (AclStore::new(), AclCache::new())
    }

    fn defining_with(store: &mut AclStore, cache: &AclCache, authority: &str) -> AclId {
        let id = store.create_acl(AclProperties::defining());
        CowEngine::new(store, cache)
            .apply(
                &Mutation::new(id, MutationMode::CopyAndUpdate)
                    .with_additions(vec![Ace::allow(authority, read())]),
            )
            .unwrap();
        id
    }

    #[test]
    fn shared_acl_is_created_lazily_and_cached() {
        let (mut store, cache) = fixture();
        let defining = defining_with(&mut store, &cache, "alice");

        let shared = InheritanceResolver::new(&mut store, &cache)
            .shared_acl(defining)
            .unwrap()
            .unwrap();
        assert_ne!(shared, defining);
        assert_eq!(store.row(shared).unwrap().acl_type, AclType::Shared);
        assert_eq!(store.row(shared).unwrap().inherits_from, Some(defining));

        // The parent's entries sit one level deeper; no position-0 entries.
        let view = store.resolve_view(shared).unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].position, 1);

        // Second call returns the recorded pointer without recomputation.
        let again = InheritanceResolver::new(&mut store, &cache)
            .shared_acl(defining)
            .unwrap()
            .unwrap();
        assert_eq!(again, shared);
    }

    #[test]
    fn shared_acl_degenerates_by_type() {
        let (mut store, cache) = fixture();
        let fixed = store.create_acl(AclProperties {
            acl_type: AclType::Fixed,
            inherits: false,
            versioned: false,
        });
        let old = store.create_acl(AclProperties::old());

        let mut resolver = InheritanceResolver::new(&mut store, &cache);
        assert_eq!(resolver.shared_acl(fixed).unwrap(), Some(fixed));
        assert_eq!(resolver.shared_acl(old).unwrap(), None);
    }

    #[test]
    fn merge_wires_target_to_parents_shared_list() {
        let (mut store, cache) = fixture();
        let parent = defining_with(&mut store, &cache, "alice");
        let child = defining_with(&mut store, &cache, "bob");

        let changes = InheritanceResolver::new(&mut store, &cache)
            .merge(Some(parent), child)
            .unwrap();
        assert!(!changes.is_empty());

        let shared = store.row(parent).unwrap().inherited_acl.unwrap();
        assert_eq!(store.row(child).unwrap().inherits_from, Some(shared));
        let view = store.resolve_view(child).unwrap();
        assert_eq!(view.len(), 2);
        assert_eq!(view[0].authority, "bob");
        assert_eq!(view[0].position, 0);
        assert_eq!(view[1].authority, "alice");
        assert_eq!(view[1].position, 1);
    }

    #[test]
    fn merge_is_a_no_op_when_inherits_is_off() {
        let (mut store, cache) = fixture();
        let parent = defining_with(&mut store, &cache, "alice");
        let child = store.create_acl(AclProperties::defining().with_inherits(false));

        let changes = InheritanceResolver::new(&mut store, &cache)
            .merge(Some(parent), child)
            .unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn merge_rejects_shared_targets() {
        let (mut store, cache) = fixture();
        let parent = defining_with(&mut store, &cache, "alice");
        let shared = InheritanceResolver::new(&mut store, &cache)
            .shared_acl(parent)
            .unwrap()
            .unwrap();
        assert_matches!(
            InheritanceResolver::new(&mut store, &cache).merge(Some(parent), shared),
            Err(RepoError::IllegalState { .. })
        );
    }

    #[test]
    fn cycles_are_rejected_before_any_write() {
        let (mut store, cache) = fixture();
        let a = defining_with(&mut store, &cache, "a");
        let b = defining_with(&mut store, &cache, "b");
        let c = defining_with(&mut store, &cache, "c");

        // a inherits from b, b inherits from c.
        InheritanceResolver::new(&mut store, &cache)
            .merge(Some(b), a)
            .unwrap();
        InheritanceResolver::new(&mut store, &cache)
            .merge(Some(c), b)
            .unwrap();

        let a_source = store.row(a).unwrap().inherits_from;
        let b_source = store.row(b).unwrap().inherits_from;
        let c_source = store.row(c).unwrap().inherits_from;

        // Closing the loop must fail and change nothing.
        assert_matches!(
            InheritanceResolver::new(&mut store, &cache).merge(Some(a), c),
            Err(RepoError::CyclicalInheritance { .. })
        );
        assert_eq!(store.row(a).unwrap().inherits_from, a_source);
        assert_eq!(store.row(b).unwrap().inherits_from, b_source);
        assert_eq!(store.row(c).unwrap().inherits_from, c_source);
    }
}
