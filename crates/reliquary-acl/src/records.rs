//! Durable records of the ACL entity store.
//!
//! A list is a sequence of version-rows sharing one lineage; exactly one row
//! per lineage is the latest. Entry rows and authority rows are interned and
//! referenced by id from list memberships.

use crate::entry::{AccessStatus, AceContext, AceType};
use reliquary_core::{AclId, AclType, AclVersion, ChangeSetId, LineageId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Interned entry row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AceId(pub u64);

impl fmt::Display for AceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ace-{}", self.0)
    }
}

/// Interned authority row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AuthorityId(pub u64);

/// Interned permission row id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionId(pub u64);

/// An interned authority: the principal/group identifier string plus a
/// checksum used as a fast equality pre-check on lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityRecord {
    /// Row id
    pub id: AuthorityId,
    /// The principal or group identifier
    pub name: String,
    /// First eight bytes of the blake3 hash of the name
    pub checksum: u64,
}

impl AuthorityRecord {
    /// Compute the checksum for an authority name.
    pub fn checksum_of(name: &str) -> u64 {
        let hash = blake3::hash(name.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&hash.as_bytes()[..8]);
        u64::from_le_bytes(bytes)
    }
}

/// The interning key of an entry row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AceKey {
    /// Interned permission reference
    pub permission: PermissionId,
    /// Interned authority reference
    pub authority: AuthorityId,
    /// Grant or deny
    pub status: AccessStatus,
    /// Entry classification
    pub ace_type: AceType,
    /// Optional scoping, part of the identity even though unsupported
    pub context: Option<AceContext>,
}

/// Membership of one entry in one list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclMember {
    /// The interned entry
    pub ace: AceId,
    /// Depth marker: 0 = defined directly on the list, >0 = inherited from
    /// that many definition levels up
    pub position: u32,
}

/// Construction-time properties of a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclProperties {
    /// The kind of list
    pub acl_type: AclType,
    /// Does the list pull in entries from a parent
    pub inherits: bool,
    /// Do mutations fork a new row, or mutate in place
    pub versioned: bool,
}

impl AclProperties {
    /// A defining, inheriting, versioned list. The common case.
    pub fn defining() -> Self {
        Self {
            acl_type: AclType::Defining,
            inherits: true,
            versioned: true,
        }
    }

    /// A layered, inheriting, versioned list.
    pub fn layered() -> Self {
        Self {
            acl_type: AclType::Layered,
            inherits: true,
            versioned: true,
        }
    }

    /// A legacy list awaiting migration. Never versioned.
    pub fn old() -> Self {
        Self {
            acl_type: AclType::Old,
            inherits: true,
            versioned: false,
        }
    }

    /// Set the inherits flag.
    pub fn with_inherits(mut self, inherits: bool) -> Self {
        self.inherits = inherits;
        self
    }

    /// Set the versioned flag.
    pub fn with_versioned(mut self, versioned: bool) -> Self {
        self.versioned = versioned;
        self
    }
}

/// One version-row of an access control list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRecord {
    /// Surrogate row id, unique per version
    pub id: AclId,
    /// Logical id stable across versions
    pub lineage: LineageId,
    /// Version within the lineage
    pub version: AclVersion,
    /// The kind of list
    pub acl_type: AclType,
    /// Does the list pull in entries from a parent
    pub inherits: bool,
    /// Do mutations fork a new row, or mutate in place
    pub versioned: bool,
    /// Is this row the current version for its lineage
    pub latest: bool,
    /// The list this list's inherited entries come from
    pub inherits_from: Option<AclId>,
    /// The lazily-created shared list that sits below this one
    pub inherited_acl: Option<AclId>,
    /// Force the next mutation to fork even if otherwise avoidable
    pub requires_version: bool,
    /// The batch this version was created in
    pub change_set: ChangeSetId,
}

impl AclRecord {
    /// The construction-time properties of this row.
    pub fn properties(&self) -> AclProperties {
        AclProperties {
            acl_type: self.acl_type,
            inherits: self.inherits,
            versioned: self.versioned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_stable_and_discriminating() {
        let a = AuthorityRecord::checksum_of("GROUP_EVERYONE");
        let b = AuthorityRecord::checksum_of("GROUP_EVERYONE");
        let c = AuthorityRecord::checksum_of("alice");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn defining_properties_default_sensibly() {
        let props = AclProperties::defining();
        assert_eq!(props.acl_type, AclType::Defining);
        assert!(props.inherits);
        assert!(props.versioned);

        let fixed = AclProperties {
            acl_type: AclType::Fixed,
            inherits: false,
            versioned: false,
        };
        assert!(!fixed.versioned);
    }
}
