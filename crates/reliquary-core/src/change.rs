//! Change records.
//!
//! The minimal unit callers use to learn whether a mutation changed an ACL's
//! id (a copy-on-write fork happened) and thus whether cached or propagated
//! references to the old id must be updated.

use crate::acl_type::AclType;
use crate::identifiers::AclId;
use serde::{Deserialize, Serialize};

/// Result of one ACL mutation step.
///
/// `after == Some(before)` means the row was mutated in place (or was a
/// stale no-op); a different `after` means a fork; `after == None` means the
/// list was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// The id the caller held before the mutation
    pub before: AclId,
    /// The id to use afterwards; `None` when the list was deleted
    pub after: Option<AclId>,
    /// ACL type before the mutation
    pub type_before: AclType,
    /// ACL type afterwards; `None` when the list was deleted
    pub type_after: Option<AclType>,
}

impl ChangeRecord {
    /// Record an in-place mutation or stale no-op: id and type unchanged.
    pub fn unchanged(id: AclId, acl_type: AclType) -> Self {
        Self {
            before: id,
            after: Some(id),
            type_before: acl_type,
            type_after: Some(acl_type),
        }
    }

    /// Record a copy-on-write fork from `before` to `after`.
    pub fn forked(before: AclId, after: AclId, type_before: AclType, type_after: AclType) -> Self {
        Self {
            before,
            after: Some(after),
            type_before,
            type_after: Some(type_after),
        }
    }

    /// Record a deletion.
    pub fn deleted(id: AclId, acl_type: AclType) -> Self {
        Self {
            before: id,
            after: None,
            type_before: acl_type,
            type_after: None,
        }
    }

    /// Did the id change (fork or deletion)?
    pub fn id_changed(&self) -> bool {
        self.after != Some(self.before)
    }

    /// Did the ACL type change across the mutation?
    pub fn type_changed(&self) -> bool {
        self.type_after != Some(self.type_before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_records_do_not_report_changes() {
        let record = ChangeRecord::unchanged(AclId(1), AclType::Defining);
        assert!(!record.id_changed());
        assert!(!record.type_changed());
    }

    #[test]
    fn forks_report_id_changes() {
        let record = ChangeRecord::forked(AclId(1), AclId(2), AclType::Shared, AclType::Shared);
        assert!(record.id_changed());
        assert!(!record.type_changed());
    }

    #[test]
    fn relabels_report_type_changes() {
        let record = ChangeRecord::forked(AclId(1), AclId(1), AclType::Old, AclType::Defining);
        assert!(record.type_changed());
    }

    #[test]
    fn deletions_change_both() {
        let record = ChangeRecord::deleted(AclId(5), AclType::Defining);
        assert!(record.id_changed());
        assert!(record.type_changed());
    }

    #[test]
    fn records_round_trip_as_json() {
        let record = ChangeRecord::forked(AclId(1), AclId(2), AclType::Old, AclType::Defining);
        let json = serde_json::to_string(&record).unwrap();
        let back: ChangeRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
