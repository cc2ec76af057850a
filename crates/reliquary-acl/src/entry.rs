//! Access control entries and the patterns that select them.
//!
//! An entry is one (permission, authority, allow/deny) grant. Entry rows are
//! interned by the store: identical tuples share one row, referenced by many
//! list memberships.

use reliquary_core::QName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Grant or deny.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessStatus {
    /// The entry grants the permission.
    Allowed,
    /// The entry denies the permission.
    Denied,
}

/// Classification of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AceType {
    /// Explicitly granted to a named authority.
    Explicit,
    /// Granted to the owner of the node.
    Owner,
    /// Granted to everyone.
    Everyone,
}

/// Class/kvp/property scoping for an entry.
///
/// Representable for completeness; every mutation path rejects entries that
/// carry a context with [`reliquary_core::RepoError::Unsupported`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AceContext {
    /// Class the entry is scoped to
    pub class_context: Option<QName>,
    /// Key-value pair scoping
    pub kvp_context: Option<String>,
    /// Property the entry is scoped to
    pub property_context: Option<QName>,
}

/// A permission reference: a type-qualified name plus the permission name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionRef {
    /// The qualified type the permission belongs to
    pub qtype: QName,
    /// The permission name within that type
    pub name: String,
}

impl PermissionRef {
    /// Create a permission reference.
    pub fn new(qtype: QName, name: impl Into<String>) -> Self {
        Self {
            qtype,
            name: name.into(),
        }
    }
}

impl fmt::Display for PermissionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.qtype, self.name)
    }
}

/// One access control entry as callers supply it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ace {
    /// The permission granted or denied
    pub permission: PermissionRef,
    /// The authority (principal or group) the entry applies to
    pub authority: String,
    /// Grant or deny
    pub status: AccessStatus,
    /// Entry classification
    pub ace_type: AceType,
    /// Optional scoping; unsupported on mutation paths
    pub context: Option<AceContext>,
}

impl Ace {
    /// A plain explicit grant.
    pub fn allow(authority: impl Into<String>, permission: PermissionRef) -> Self {
        Self {
            permission,
            authority: authority.into(),
            status: AccessStatus::Allowed,
            ace_type: AceType::Explicit,
            context: None,
        }
    }

    /// A plain explicit denial.
    pub fn deny(authority: impl Into<String>, permission: PermissionRef) -> Self {
        Self {
            permission,
            authority: authority.into(),
            status: AccessStatus::Denied,
            ace_type: AceType::Explicit,
            context: None,
        }
    }
}

/// One resolved member of an ACL view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntryView {
    /// The authority the entry applies to
    pub authority: String,
    /// The permission granted or denied
    pub permission: PermissionRef,
    /// Grant or deny
    pub status: AccessStatus,
    /// Entry classification
    pub ace_type: AceType,
    /// Depth marker: 0 = defined directly on this list, >0 = inherited from
    /// that many definition levels up
    pub position: u32,
}

impl AclEntryView {
    /// Is this entry defined directly on the list it was resolved from?
    pub fn is_direct(&self) -> bool {
        self.position == 0
    }

    /// The entry value this view was resolved from, without its position.
    pub fn to_ace(&self) -> Ace {
        Ace {
            permission: self.permission.clone(),
            authority: self.authority.clone(),
            status: self.status,
            ace_type: self.ace_type,
            context: None,
        }
    }
}

/// A selection pattern over entries.
///
/// Within one pattern the populated fields are AND-combined; a slice of
/// patterns is OR-combined. A pattern with no populated fields matches every
/// entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcePattern {
    /// Match entries with this access status
    pub status: Option<AccessStatus>,
    /// Match entries with this classification
    pub ace_type: Option<AceType>,
    /// Match entries for this authority
    pub authority: Option<String>,
    /// Match entries for this permission
    pub permission: Option<PermissionRef>,
}

impl AcePattern {
    /// Pattern selecting every entry for one authority.
    pub fn for_authority(authority: impl Into<String>) -> Self {
        Self {
            authority: Some(authority.into()),
            ..Self::default()
        }
    }

    /// Pattern selecting the entries an [`Ace`] would replace: same
    /// authority and same permission.
    pub fn replacing(ace: &Ace) -> Self {
        Self {
            authority: Some(ace.authority.clone()),
            permission: Some(ace.permission.clone()),
            ..Self::default()
        }
    }

    /// Does the pattern match the given resolved entry fields?
    pub fn matches(
        &self,
        authority: &str,
        permission: &PermissionRef,
        status: AccessStatus,
        ace_type: AceType,
    ) -> bool {
        self.status.map_or(true, |s| s == status)
            && self.ace_type.map_or(true, |t| t == ace_type)
            && self.authority.as_deref().map_or(true, |a| a == authority)
            && self.permission.as_ref().map_or(true, |p| p == permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reliquary_core::QName;

    fn read() -> PermissionRef {
        PermissionRef::new(QName::new("model", "content"), "Read")
    }

    fn write() -> PermissionRef {
        PermissionRef::new(QName::new("model", "content"), "Write")
    }

    #[test]
    fn empty_pattern_matches_everything() {
        let pattern = AcePattern::default();
        assert!(pattern.matches("alice", &read(), AccessStatus::Allowed, AceType::Explicit));
        assert!(pattern.matches("bob", &write(), AccessStatus::Denied, AceType::Owner));
    }

    #[test]
    fn populated_fields_are_and_combined() {
        let pattern = AcePattern {
            authority: Some("alice".into()),
            permission: Some(read()),
            ..AcePattern::default()
        };
        assert!(pattern.matches("alice", &read(), AccessStatus::Allowed, AceType::Explicit));
        assert!(!pattern.matches("alice", &write(), AccessStatus::Allowed, AceType::Explicit));
        assert!(!pattern.matches("bob", &read(), AccessStatus::Allowed, AceType::Explicit));
    }

    #[test]
    fn replacing_pattern_ignores_status() {
        let ace = Ace::allow("alice", read());
        let pattern = AcePattern::replacing(&ace);
        // A denial for the same authority and permission is replaced too.
        assert!(pattern.matches("alice", &read(), AccessStatus::Denied, AceType::Explicit));
    }
}
