//! The ACL entity store.
//!
//! Durable records for lists, their member entries, authorities, permissions
//! and change-sets, with interning for entry and authority rows. The store is
//! a plain value: callers wire it into a service and guard mutations with the
//! snapshot/rollback pair when they need transactional all-or-nothing
//! behaviour.

use crate::entry::{Ace, AcePattern, AclEntryView, PermissionRef};
use crate::records::{
    AceId, AceKey, AclMember, AclProperties, AclRecord, AuthorityId, AuthorityRecord, PermissionId,
};
use indexmap::IndexMap;
use reliquary_core::{AclId, AclVersion, ChangeSetId, LineageId, RepoError, Result};
use std::collections::HashMap;
use tracing::debug;

/// The in-memory ACL entity store.
///
/// `Clone` is the snapshot primitive: the service layer clones the store
/// before a mutating operation and restores the clone if the operation
/// fails, so partial state is never observable.
#[derive(Debug, Clone, Default)]
pub struct AclStore {
    rows: IndexMap<AclId, AclRecord>,
    members: IndexMap<AclId, Vec<AclMember>>,
    aces: IndexMap<AceId, AceKey>,
    ace_intern: HashMap<AceKey, AceId>,
    authorities: IndexMap<AuthorityId, AuthorityRecord>,
    authority_intern: HashMap<String, AuthorityId>,
    permissions: IndexMap<PermissionId, PermissionRef>,
    permission_intern: HashMap<PermissionRef, PermissionId>,
    latest_by_lineage: HashMap<LineageId, AclId>,
    current_change_set: Option<ChangeSetId>,
    next_acl: u64,
    next_lineage: u64,
    next_ace: u64,
    next_authority: u64,
    next_permission: u64,
    next_change_set: u64,
}

impl AclStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // --- change-sets ---

    /// The change-set of the current transaction, created on first use.
    ///
    /// First caller wins; every subsequent caller inside the same
    /// transaction sees the same id until [`AclStore::complete_change_set`].
    pub fn change_set(&mut self) -> ChangeSetId {
        if let Some(current) = self.current_change_set {
            return current;
        }
        let id = ChangeSetId(self.next_change_set);
        self.next_change_set += 1;
        self.current_change_set = Some(id);
        debug!(change_set = %id, "opened change-set");
        id
    }

    /// Close the current transaction's change-set. The next mutation opens a
    /// fresh one, which forces versioned lists to fork again.
    pub fn complete_change_set(&mut self) {
        if let Some(current) = self.current_change_set.take() {
            debug!(change_set = %current, "completed change-set");
        }
    }

    // --- interning ---

    /// Intern an authority name, returning the shared row id.
    pub fn intern_authority(&mut self, name: &str) -> AuthorityId {
        if let Some(&id) = self.authority_intern.get(name) {
            return id;
        }
        let id = AuthorityId(self.next_authority);
        self.next_authority += 1;
        self.authorities.insert(
            id,
            AuthorityRecord {
                id,
                name: name.to_string(),
                checksum: AuthorityRecord::checksum_of(name),
            },
        );
        self.authority_intern.insert(name.to_string(), id);
        id
    }

    /// Intern a permission reference, returning the shared row id.
    pub fn intern_permission(&mut self, permission: &PermissionRef) -> PermissionId {
        if let Some(&id) = self.permission_intern.get(permission) {
            return id;
        }
        let id = PermissionId(self.next_permission);
        self.next_permission += 1;
        self.permissions.insert(id, permission.clone());
        self.permission_intern.insert(permission.clone(), id);
        id
    }

    /// Intern an entry. Identical tuples share one row.
    ///
    /// Entries carrying a context are rejected: context-scoped entries are
    /// not supported on any mutation path.
    pub fn intern_ace(&mut self, ace: &Ace) -> Result<AceId> {
        if ace.context.is_some() {
            return Err(RepoError::unsupported(
                "context-scoped access control entries",
            ));
        }
        let key = AceKey {
            permission: self.intern_permission(&ace.permission),
            authority: self.intern_authority(&ace.authority),
            status: ace.status,
            ace_type: ace.ace_type,
            context: None,
        };
        if let Some(&id) = self.ace_intern.get(&key) {
            return Ok(id);
        }
        let id = AceId(self.next_ace);
        self.next_ace += 1;
        self.aces.insert(id, key.clone());
        self.ace_intern.insert(key, id);
        Ok(id)
    }

    // --- rows ---

    /// Create a new list with the given properties. The row starts latest,
    /// at version 0, with no members.
    pub fn create_acl(&mut self, properties: AclProperties) -> AclId {
        let change_set = self.change_set();
        let id = AclId(self.next_acl);
        self.next_acl += 1;
        let lineage = LineageId(self.next_lineage);
        self.next_lineage += 1;
        self.rows.insert(
            id,
            AclRecord {
                id,
                lineage,
                version: AclVersion(0),
                acl_type: properties.acl_type,
                inherits: properties.inherits,
                versioned: properties.versioned,
                latest: true,
                inherits_from: None,
                inherited_acl: None,
                requires_version: false,
                change_set,
            },
        );
        self.members.insert(id, Vec::new());
        self.latest_by_lineage.insert(lineage, id);
        id
    }

    /// Look up a row.
    pub fn row(&self, id: AclId) -> Result<&AclRecord> {
        self.rows
            .get(&id)
            .ok_or_else(|| RepoError::invalid_reference(format!("no such ACL: {id}")))
    }

    pub(crate) fn row_mut(&mut self, id: AclId) -> Result<&mut AclRecord> {
        self.rows
            .get_mut(&id)
            .ok_or_else(|| RepoError::invalid_reference(format!("no such ACL: {id}")))
    }

    /// Does the row exist?
    pub fn contains(&self, id: AclId) -> bool {
        self.rows.contains_key(&id)
    }

    /// The latest row of a lineage, if any row survives.
    pub fn latest_of(&self, lineage: LineageId) -> Option<AclId> {
        self.latest_by_lineage.get(&lineage).copied()
    }

    /// All latest rows whose `inherits_from` points at any version of the
    /// given lineage. Deterministic insertion order.
    pub fn dependents(&self, lineage: LineageId) -> Vec<AclId> {
        self.rows
            .values()
            .filter(|row| row.latest)
            .filter(|row| {
                row.inherits_from
                    .and_then(|parent| self.rows.get(&parent))
                    .is_some_and(|parent| parent.lineage == lineage)
            })
            .map(|row| row.id)
            .collect()
    }

    /// Fork a versioned row: copy it (and its members) into a new row with
    /// the version incremented, flip `latest` to the new row, and clear the
    /// forced-version flag.
    pub(crate) fn fork(&mut self, id: AclId) -> Result<AclId> {
        let change_set = self.change_set();
        let old = self.row(id)?.clone();
        let new_id = AclId(self.next_acl);
        self.next_acl += 1;
        self.rows.insert(
            new_id,
            AclRecord {
                id: new_id,
                version: old.version.next(),
                latest: true,
                requires_version: false,
                change_set,
                ..old.clone()
            },
        );
        let copied = self.members.get(&id).cloned().unwrap_or_default();
        self.members.insert(new_id, copied);
        if let Some(row) = self.rows.get_mut(&id) {
            row.latest = false;
        }
        self.latest_by_lineage.insert(old.lineage, new_id);
        debug!(before = %id, after = %new_id, version = %old.version.next(), "forked ACL");
        Ok(new_id)
    }

    /// Physically delete every version-row of a lineage. Returns the ids
    /// removed, oldest first.
    pub(crate) fn remove_lineage(&mut self, lineage: LineageId) -> Vec<AclId> {
        let ids: Vec<AclId> = self
            .rows
            .values()
            .filter(|row| row.lineage == lineage)
            .map(|row| row.id)
            .collect();
        for id in &ids {
            self.rows.shift_remove(id);
            self.members.shift_remove(id);
        }
        self.latest_by_lineage.remove(&lineage);
        ids
    }

    // --- members ---

    /// The memberships of a row, unordered.
    pub fn members(&self, id: AclId) -> Result<&[AclMember]> {
        self.members
            .get(&id)
            .map(Vec::as_slice)
            .ok_or_else(|| RepoError::invalid_reference(format!("no such ACL: {id}")))
    }

    pub(crate) fn members_mut(&mut self, id: AclId) -> Result<&mut Vec<AclMember>> {
        self.members
            .get_mut(&id)
            .ok_or_else(|| RepoError::invalid_reference(format!("no such ACL: {id}")))
    }

    /// Resolve the fields of an interned entry for pattern matching and
    /// view materialization.
    pub fn ace_fields(&self, id: AceId) -> Result<(&str, &PermissionRef, &AceKey)> {
        let key = self
            .aces
            .get(&id)
            .ok_or_else(|| RepoError::invalid_reference(format!("no such entry: {id}")))?;
        let authority = self
            .authorities
            .get(&key.authority)
            .ok_or_else(|| RepoError::invalid_reference("dangling authority reference"))?;
        let permission = self
            .permissions
            .get(&key.permission)
            .ok_or_else(|| RepoError::invalid_reference("dangling permission reference"))?;
        Ok((&authority.name, permission, key))
    }

    /// Does the interned entry match any of the patterns? An empty slice
    /// matches nothing; `None` fields within a pattern match anything.
    pub fn ace_matches(&self, id: AceId, patterns: &[AcePattern]) -> Result<bool> {
        let (authority, permission, key) = self.ace_fields(id)?;
        Ok(patterns
            .iter()
            .any(|pattern| pattern.matches(authority, permission, key.status, key.ace_type)))
    }

    /// Materialize the resolved view of a row: all members sorted by
    /// position, direct entries first.
    pub fn resolve_view(&self, id: AclId) -> Result<Vec<AclEntryView>> {
        let mut views = Vec::new();
        for member in self.members(id)? {
            let (authority, permission, key) = self.ace_fields(member.ace)?;
            views.push(AclEntryView {
                authority: authority.to_string(),
                permission: permission.clone(),
                status: key.status,
                ace_type: key.ace_type,
                position: member.position,
            });
        }
        views.sort_by_key(|view| view.position);
        Ok(views)
    }

    /// The members a child list inherits from `parent`, at child-relative
    /// positions: entries from a shared parent keep their positions, entries
    /// from a defining parent shift one level deeper.
    pub fn inherited_for_child(&self, parent: AclId) -> Result<Vec<AclMember>> {
        let shift = self.row(parent)?.acl_type.inherit_shift();
        Ok(self
            .members(parent)?
            .iter()
            .map(|member| AclMember {
                ace: member.ace,
                position: member.position + shift,
            })
            .collect())
    }

    // --- authorities ---

    /// Rename an authority everywhere at once. Every interned entry keeps
    /// its row; only the authority row changes.
    pub fn rename_authority(&mut self, old: &str, new: &str) -> Result<()> {
        if self.authority_intern.contains_key(new) {
            return Err(RepoError::unsupported(format!(
                "renaming authority onto an existing one: {new}"
            )));
        }
        let id = self
            .authority_intern
            .remove(old)
            .ok_or_else(|| RepoError::invalid_reference(format!("no such authority: {old}")))?;
        if let Some(record) = self.authorities.get_mut(&id) {
            record.name = new.to_string();
            record.checksum = AuthorityRecord::checksum_of(new);
        }
        self.authority_intern.insert(new.to_string(), id);
        debug!(%old, %new, "renamed authority");
        Ok(())
    }

    /// Number of version-rows currently stored for a lineage.
    pub fn version_count(&self, lineage: LineageId) -> usize {
        self.rows.values().filter(|row| row.lineage == lineage).count()
    }
}
