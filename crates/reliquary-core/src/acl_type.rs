//! The closed set of ACL types.
//!
//! All type-dependent branching in the engine dispatches off this enum, and
//! the behavioural questions each operation asks are exposed as predicate
//! methods so the answers live in one place instead of being re-derived in
//! every `match`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of an access control list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AclType {
    /// Explicitly set by a permission-set request; the root of an
    /// inheritance chain.
    Defining,
    /// Derived list representing what children of a defining or layered
    /// list inherit. Never mutated by external callers.
    Shared,
    /// A list on a layered node that indirects to another path, merging the
    /// target's permissions with local overrides.
    Layered,
    /// System-bootstrap list with a fixed set of entries.
    Fixed,
    /// System-bootstrap list applying globally.
    Global,
    /// Legacy single-list-per-node data awaiting migration.
    Old,
}

impl AclType {
    /// May external callers mutate this list's entries directly?
    pub fn is_directly_mutable(self) -> bool {
        matches!(self, AclType::Defining | AclType::Layered | AclType::Old)
    }

    /// Can this list pull in entries from a parent at all?
    pub fn supports_inheritance(self) -> bool {
        matches!(
            self,
            AclType::Defining | AclType::Shared | AclType::Layered | AclType::Old
        )
    }

    /// Does this list hand a lazily-created shared list to its children?
    pub fn shares_to_children(self) -> bool {
        matches!(self, AclType::Defining | AclType::Layered)
    }

    /// Entries copied from a parent of this type shift one position deeper;
    /// a shared parent already carries child-relative positions.
    pub fn inherit_shift(self) -> u32 {
        match self {
            AclType::Shared => 0,
            _ => 1,
        }
    }
}

impl fmt::Display for AclType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AclType::Defining => "DEFINING",
            AclType::Shared => "SHARED",
            AclType::Layered => "LAYERED",
            AclType::Fixed => "FIXED",
            AclType::Global => "GLOBAL",
            AclType::Old => "OLD",
        };
        write!(f, "{name}")
    }
}
