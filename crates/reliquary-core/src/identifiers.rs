//! Identifier newtypes for the permission layer.
//!
//! ACL identity is three-part: a [`LineageId`] stable across versions, an
//! [`AclVersion`] counting forks, and an [`AclId`] surrogate row id unique per
//! version. Callers hold `AclId`s; a copy-on-write fork is visible to them as
//! an `AclId` change.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Surrogate row id of one ACL version. Changes when the ACL is forked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AclId(pub u64);

impl fmt::Display for AclId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "acl-{}", self.0)
    }
}

/// Logical ACL id, shared by every version of one list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineageId(pub u64);

impl fmt::Display for LineageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lineage-{}", self.0)
    }
}

/// Version counter within a lineage. Starts at 0, incremented per fork.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct AclVersion(pub u64);

impl AclVersion {
    /// The version following this one.
    pub fn next(self) -> Self {
        AclVersion(self.0 + 1)
    }
}

impl fmt::Display for AclVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// One logical batch of ACL mutations, bound to the enclosing transaction.
///
/// Mutations against a versioned ACL inside the same change-set coalesce into
/// one fork; a new change-set forces the next mutation to fork again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeSetId(pub u64);

impl fmt::Display for ChangeSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cs-{}", self.0)
    }
}

/// Identifier of a node in a content tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// Identifier of a store (one rooted content tree).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId(pub String);

impl StoreId {
    /// Create a store id from a name.
    pub fn new(name: impl Into<String>) -> Self {
        StoreId(name.into())
    }

    /// The store name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
