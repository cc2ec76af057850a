//! # Reliquary Core - Foundation Types
//!
//! Foundation crate for the Reliquary content repository's permission layer.
//! It defines the identifier newtypes, qualified names, the unified error
//! type, and the change records threaded through every ACL operation.
//!
//! This crate has no dependencies on the other workspace members and no
//! business logic of its own: pure value types and their invariants.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Identifier newtypes for ACL rows, lineages, change-sets, nodes and stores
pub mod identifiers;

/// The closed set of ACL types and their capability predicates
pub mod acl_type;

/// Unified error handling
pub mod errors;

/// Namespace-qualified names for the permission vocabulary
pub mod qname;

/// Change records produced by ACL mutations
pub mod change;

pub use acl_type::AclType;
pub use change::ChangeRecord;
pub use errors::{RepoError, Result};
pub use identifiers::{AclId, AclVersion, ChangeSetId, LineageId, NodeId, StoreId};
pub use qname::QName;
