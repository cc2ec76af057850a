//! The ACL persistence service.
//!
//! The caller-facing surface over the entity store, the view cache, the
//! copy-on-write engine and the inheritance resolver. Mutating operations
//! run under a snapshot guard: a failure restores the store and clears the
//! cache, so partial state never becomes observable.

use crate::cache::AclCache;
use crate::entry::{Ace, AcePattern, AclEntryView};
use crate::inherit::InheritanceResolver;
use crate::records::{AclProperties, AclRecord};
use crate::store::AclStore;
use crate::writer::{CowEngine, Exclusion, Mutation, MutationMode};
use reliquary_core::{AclId, AclType, ChangeRecord, ChangeSetId, LineageId, RepoError, Result};
use std::sync::Arc;
use tracing::debug;

/// How a node copy treats the source node's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclCopyMode {
    /// The copy carries no list of its own and inherits from the new
    /// parent.
    Inherit,
    /// The copy keeps the source id; the next mutation must fork.
    Cow,
    /// The copy is a layered view onto the source list.
    Redirect,
    /// The copy gets its own list carrying the source's direct entries.
    Copy,
}

/// The ACL persistence service.
#[derive(Debug, Default)]
pub struct AclService {
    store: AclStore,
    cache: AclCache,
}

impl AclService {
    /// Create a service over an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the entity store.
    pub fn store(&self) -> &AclStore {
        &self.store
    }

    /// The current transaction's change-set, created on first use.
    pub fn change_set(&mut self) -> ChangeSetId {
        self.store.change_set()
    }

    /// Close the current transaction's change-set.
    pub fn complete_change_set(&mut self) {
        self.store.complete_change_set();
    }

    /// Run a mutating operation under the snapshot guard: on failure the
    /// store is restored and the cache cleared, so nothing partial shows.
    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let snapshot = self.store.clone();
        let result = f(self);
        if result.is_err() {
            self.store = snapshot;
            self.cache.clear();
        }
        result
    }

    // --- creation ---

    /// Create a list with the given properties and no entries.
    pub fn create_acl(&mut self, properties: AclProperties) -> Result<AclId> {
        self.guarded(|service| service.create_inner(properties, Vec::new(), None))
    }

    /// Create a list with entries, optionally wired to inherit from a
    /// parent list.
    pub fn create_acl_with(
        &mut self,
        properties: AclProperties,
        entries: Vec<Ace>,
        inherit_from: Option<AclId>,
    ) -> Result<AclId> {
        self.guarded(|service| service.create_inner(properties, entries, inherit_from))
    }

    /// Bootstrap a fixed system list. Non-versioned, non-inheriting.
    pub fn create_fixed_acl(&mut self, entries: Vec<Ace>) -> Result<AclId> {
        self.guarded(|service| {
            service.create_inner(
                AclProperties {
                    acl_type: AclType::Fixed,
                    inherits: false,
                    versioned: false,
                },
                entries,
                None,
            )
        })
    }

    /// Bootstrap the global system list. Non-versioned, non-inheriting.
    pub fn create_global_acl(&mut self, entries: Vec<Ace>) -> Result<AclId> {
        self.guarded(|service| {
            service.create_inner(
                AclProperties {
                    acl_type: AclType::Global,
                    inherits: false,
                    versioned: false,
                },
                entries,
                None,
            )
        })
    }

    fn create_inner(
        &mut self,
        properties: AclProperties,
        entries: Vec<Ace>,
        inherit_from: Option<AclId>,
    ) -> Result<AclId> {
        if properties.acl_type == AclType::Shared {
            return Err(RepoError::illegal_state(
                "shared lists are derived lazily, not created directly",
            ));
        }
        let id = self.store.create_acl(properties);
        if !entries.is_empty() {
            CowEngine::new(&mut self.store, &self.cache).apply(
                &Mutation::new(id, MutationMode::CopyAndUpdate).with_additions(entries),
            )?;
        }
        if let Some(parent) = inherit_from {
            if properties.inherits && properties.acl_type.shares_to_children() {
                InheritanceResolver::new(&mut self.store, &self.cache)
                    .merge(Some(parent), id)?;
            }
        }
        debug!(acl = %id, acl_type = %properties.acl_type, "created ACL");
        Ok(id)
    }

    // --- reads ---

    /// The fully-resolved view of a list: members sorted by position,
    /// direct entries first. Served from the cache when possible.
    pub fn get_acl(&self, id: AclId) -> Result<Arc<Vec<AclEntryView>>> {
        self.store.row(id)?;
        if let Some(view) = self.cache.get(id) {
            return Ok(view);
        }
        let view = Arc::new(self.store.resolve_view(id)?);
        self.cache.put(id, Arc::clone(&view));
        Ok(view)
    }

    /// The construction-time properties of a list.
    pub fn get_acl_properties(&self, id: AclId) -> Result<AclProperties> {
        Ok(self.store.row(id)?.properties())
    }

    /// Map a possibly-stale id to the latest row of its lineage.
    pub fn latest_id(&self, id: AclId) -> Result<AclId> {
        let row = self.store.row(id)?;
        if row.latest {
            return Ok(id);
        }
        self.store.latest_of(row.lineage).ok_or_else(|| {
            RepoError::invalid_reference(format!("no latest version for {id}"))
        })
    }

    // --- entry mutation ---

    /// Set one entry on a list, replacing any entry for the same authority
    /// and permission. Cascades to every inheriting list.
    pub fn set_ace(&mut self, id: AclId, ace: Ace) -> Result<Vec<ChangeRecord>> {
        self.set_aces(id, vec![ace])
    }

    /// Set several entries at once. One change-set, one potential fork.
    pub fn set_aces(&mut self, id: AclId, aces: Vec<Ace>) -> Result<Vec<ChangeRecord>> {
        self.guarded(|service| {
            service.mutable_target(id)?;
            let patterns = aces.iter().map(AcePattern::replacing).collect();
            CowEngine::new(&mut service.store, &service.cache).apply(
                &Mutation::new(id, MutationMode::CopyAndUpdate)
                    .with_exclude(Exclusion::Matching(patterns))
                    .with_additions(aces)
                    .with_cascade(),
            )
        })
    }

    /// Delete directly-defined entries selected by the patterns; `None`
    /// deletes every direct entry. Cascades to every inheriting list.
    pub fn delete_aces(
        &mut self,
        id: AclId,
        patterns: Option<Vec<AcePattern>>,
    ) -> Result<Vec<ChangeRecord>> {
        self.guarded(|service| {
            service.mutable_target(id)?;
            let exclude = match patterns {
                Some(patterns) => Exclusion::Matching(patterns),
                None => Exclusion::Everything,
            };
            CowEngine::new(&mut service.store, &service.cache).apply(
                &Mutation::new(id, MutationMode::CopyAndUpdate)
                    .with_exclude(exclude)
                    .with_cascade(),
            )
        })
    }

    /// Delete every directly-defined entry.
    pub fn delete_local_aces(&mut self, id: AclId) -> Result<Vec<ChangeRecord>> {
        self.delete_aces(id, None)
    }

    /// Delete every inherited entry without touching the inherits flag.
    pub fn delete_inherited_aces(&mut self, id: AclId) -> Result<Vec<ChangeRecord>> {
        self.guarded(|service| {
            service.mutable_target(id)?;
            CowEngine::new(&mut service.store, &service.cache)
                .apply(&Mutation::new(id, MutationMode::TruncateInherited).with_cascade())
        })
    }

    // --- inheritance ---

    /// Turn inheritance on and wire the list under `parent`.
    pub fn enable_inheritance(&mut self, id: AclId, parent: AclId) -> Result<Vec<ChangeRecord>> {
        self.guarded(|service| {
            service.mutable_target(id)?;
            service.store.row_mut(id)?.inherits = true;
            InheritanceResolver::new(&mut service.store, &service.cache).merge(Some(parent), id)
        })
    }

    /// Turn inheritance off. When `keep_inherited` is set, the formerly
    /// inherited entries are retained as direct copies first.
    pub fn disable_inheritance(
        &mut self,
        id: AclId,
        keep_inherited: bool,
    ) -> Result<Vec<ChangeRecord>> {
        self.guarded(|service| {
            let row = service.mutable_target(id)?;
            if !row.inherits {
                return Ok(Vec::new());
            }
            let mut records = Vec::new();
            let mut current = id;
            if keep_inherited {
                let demoted: Vec<Ace> = service
                    .store
                    .resolve_view(id)?
                    .iter()
                    .filter(|view| !view.is_direct())
                    .map(AclEntryView::to_ace)
                    .collect();
                if !demoted.is_empty() {
                    let step = CowEngine::new(&mut service.store, &service.cache).apply(
                        &Mutation::new(current, MutationMode::CopyAndUpdate)
                            .with_additions(demoted)
                            .with_cascade(),
                    )?;
                    current = resulting_id(&step, current);
                    records.extend(step);
                }
            }
            let step = CowEngine::new(&mut service.store, &service.cache)
                .apply(&Mutation::new(current, MutationMode::TruncateInherited).with_cascade())?;
            current = resulting_id(&step, current);
            records.extend(step);
            service.store.row_mut(current)?.inherits = false;
            Ok(records)
        })
    }

    /// Re-point `target`'s inheritance at `parent`'s shared list, replacing
    /// its inherited entries and cascading through every dependent.
    pub fn merge_inherited_acl(
        &mut self,
        parent: AclId,
        target: AclId,
    ) -> Result<Vec<ChangeRecord>> {
        self.guarded(|service| {
            InheritanceResolver::new(&mut service.store, &service.cache)
                .merge(Some(parent), target)
        })
    }

    /// Re-derive `target`'s inheritance from its last known source.
    pub fn remerge_inherited_acl(&mut self, target: AclId) -> Result<Vec<ChangeRecord>> {
        self.guarded(|service| {
            InheritanceResolver::new(&mut service.store, &service.cache).merge(None, target)
        })
    }

    /// The shared list children of `id` inherit from, created lazily.
    pub fn get_inherited_acl(&mut self, id: AclId) -> Result<Option<AclId>> {
        self.guarded(|service| {
            InheritanceResolver::new(&mut service.store, &service.cache).shared_acl(id)
        })
    }

    // --- copies ---

    /// The list a copied node should carry, by copy mode and source type.
    pub fn get_copy(
        &mut self,
        id: AclId,
        inherit_from: Option<AclId>,
        mode: AclCopyMode,
    ) -> Result<Option<AclId>> {
        self.guarded(|service| service.get_copy_inner(id, inherit_from, mode))
    }

    fn get_copy_inner(
        &mut self,
        id: AclId,
        inherit_from: Option<AclId>,
        mode: AclCopyMode,
    ) -> Result<Option<AclId>> {
        let row = self.store.row(id)?.clone();
        match mode {
            AclCopyMode::Inherit => {
                let target = inherit_from.unwrap_or(id);
                InheritanceResolver::new(&mut self.store, &self.cache).shared_acl(target)
            }
            AclCopyMode::Cow => {
                match row.acl_type {
                    AclType::Fixed | AclType::Global => {}
                    _ => self.store.row_mut(id)?.requires_version = true,
                }
                Ok(Some(id))
            }
            AclCopyMode::Copy => match row.acl_type {
                AclType::Defining | AclType::Layered | AclType::Old => {
                    // A copied legacy list re-emerges as a defining one.
                    let acl_type = if row.acl_type == AclType::Old {
                        AclType::Defining
                    } else {
                        row.acl_type
                    };
                    let direct: Vec<Ace> = self
                        .store
                        .resolve_view(id)?
                        .iter()
                        .filter(|view| view.is_direct())
                        .map(AclEntryView::to_ace)
                        .collect();
                    let copy = self.create_inner(
                        AclProperties {
                            acl_type,
                            inherits: row.inherits,
                            versioned: true,
                        },
                        direct,
                        inherit_from,
                    )?;
                    Ok(Some(copy))
                }
                AclType::Shared => match inherit_from {
                    Some(parent) => {
                        InheritanceResolver::new(&mut self.store, &self.cache).shared_acl(parent)
                    }
                    None => Ok(Some(id)),
                },
                AclType::Fixed | AclType::Global => Ok(Some(id)),
            },
            AclCopyMode::Redirect => match row.acl_type {
                AclType::Defining | AclType::Shared | AclType::Layered => {
                    let layered = self.store.create_acl(AclProperties::layered());
                    self.store.row_mut(layered)?.inherits_from = Some(id);
                    let inherited = self.store.inherited_for_child(id)?;
                    CowEngine::new(&mut self.store, &self.cache).apply(
                        &Mutation::new(layered, MutationMode::CreateAndInherit)
                            .with_inherited(inherited),
                    )?;
                    Ok(Some(layered))
                }
                AclType::Fixed | AclType::Global | AclType::Old => Err(RepoError::illegal_state(
                    format!("a {} list cannot back a layered view", row.acl_type),
                )),
            },
        }
    }

    // --- deletion ---

    /// Delete a list when its owning node goes away. Children inheriting
    /// through its shared list are re-wired to the source above it (or
    /// truncated when there is none), then both lineages are physically
    /// removed.
    pub fn delete_acl(&mut self, id: AclId) -> Result<Vec<ChangeRecord>> {
        self.guarded(|service| service.delete_inner(id))
    }

    fn delete_inner(&mut self, id: AclId) -> Result<Vec<ChangeRecord>> {
        let row = self.store.row(id)?.clone();
        match row.acl_type {
            AclType::Shared => Err(RepoError::illegal_state(
                "a shared list is deleted with the defining list that owns it",
            )),
            AclType::Fixed | AclType::Global => Err(RepoError::illegal_state(
                "bootstrap lists cannot be deleted",
            )),
            AclType::Defining | AclType::Layered | AclType::Old => {
                let mut records = Vec::new();
                let above = row.inherits_from.filter(|&s| self.store.contains(s));
                // Children inherit through the shared list; layered views
                // inherit from this list directly. Both get re-wired to
                // the source above, or truncated when there is none.
                if let Some(shared) = row.inherited_acl {
                    if self.store.contains(shared) {
                        let shared_lineage = self.store.row(shared)?.lineage;
                        self.rewire_dependents(shared_lineage, above, &mut records)?;
                        for removed in self.store.remove_lineage(shared_lineage) {
                            self.cache.evict(removed);
                            records.push(ChangeRecord::deleted(removed, AclType::Shared));
                        }
                    }
                }
                self.rewire_dependents(row.lineage, above, &mut records)?;
                for removed in self.store.remove_lineage(row.lineage) {
                    self.cache.evict(removed);
                    records.push(ChangeRecord::deleted(removed, row.acl_type));
                }
                debug!(acl = %id, acl_type = %row.acl_type, "deleted ACL");
                Ok(records)
            }
        }
    }

    fn rewire_dependents(
        &mut self,
        lineage: LineageId,
        above: Option<AclId>,
        records: &mut Vec<ChangeRecord>,
    ) -> Result<()> {
        for dependent in self.store.dependents(lineage) {
            let dep_type = self.store.row(dependent)?.acl_type;
            if !matches!(dep_type, AclType::Defining | AclType::Layered) {
                continue;
            }
            match above {
                Some(source) => {
                    records.extend(
                        InheritanceResolver::new(&mut self.store, &self.cache)
                            .merge(Some(source), dependent)?,
                    );
                }
                None => {
                    let step = CowEngine::new(&mut self.store, &self.cache).apply(
                        &Mutation::new(dependent, MutationMode::TruncateInherited).with_cascade(),
                    )?;
                    let current = resulting_id(&step, dependent);
                    self.store.row_mut(current)?.inherits_from = None;
                    records.extend(step);
                }
            }
        }
        Ok(())
    }

    // --- authorities ---

    /// Rename an authority everywhere at once. Clears the whole cache
    /// rather than chasing every affected list.
    pub fn rename_authority(&mut self, old: &str, new: &str) -> Result<()> {
        self.guarded(|service| {
            service.store.rename_authority(old, new)?;
            service.cache.clear();
            Ok(())
        })
    }

    /// The target of a direct mutation: must exist, be the latest version,
    /// and be of a directly-mutable type.
    fn mutable_target(&self, id: AclId) -> Result<AclRecord> {
        let row = self.store.row(id)?;
        if !row.latest {
            return Err(RepoError::invalid_reference(format!(
                "{id} is a historical version and cannot be mutated"
            )));
        }
        if !row.acl_type.is_directly_mutable() {
            return Err(RepoError::illegal_state(format!(
                "a {} list cannot be mutated directly",
                row.acl_type
            )));
        }
        Ok(row.clone())
    }
}

/// Follow one id through a batch of change records.
fn resulting_id(records: &[ChangeRecord], id: AclId) -> AclId {
    records
        .iter()
        .find(|record| record.before == id)
        .and_then(|record| record.after)
        .unwrap_or(id)
}
