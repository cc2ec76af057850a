//! # Reliquary ACL - Inheritance and Copy-On-Write Engine
//!
//! The persistence and domain layer for access control lists in the
//! Reliquary content repository: the entity store for lists, entries,
//! authorities and change-sets, the materialized-view cache, the
//! copy-on-write engine that decides between in-place mutation and version
//! forking, and the inheritance resolver that derives the shared lists
//! children inherit from.
//!
//! ## Core Concepts
//!
//! - **Lineage and version**: a list is a chain of version-rows sharing one
//!   lineage; exactly one row is the latest. Callers hold row ids and learn
//!   about forks through [`reliquary_core::ChangeRecord`]s.
//! - **Change-sets**: the batching unit. Mutations against one versioned
//!   list inside one change-set coalesce into a single fork.
//! - **Position**: member depth marker. 0 = defined directly, >0 =
//!   inherited from that many definition levels up. Resolved views sort by
//!   position, direct entries first.
//! - **Shared lists**: derived lazily, mirror what a defining or layered
//!   list passes down, and are never mutated by external callers.
//!
//! All operations are synchronous and run inside a caller-supplied
//! transaction boundary; the change-set is the only concurrency-relevant
//! construct.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Access control entries, views and selection patterns
pub mod entry;

/// Durable records: list rows, memberships, interned entries
pub mod records;

/// The ACL entity store
pub mod store;

/// Process-wide cache of materialized views
pub mod cache;

/// The copy-on-write engine
pub mod writer;

/// Inheritance resolution
pub mod inherit;

/// The caller-facing persistence service
pub mod service;

pub use cache::AclCache;
pub use entry::{Ace, AcePattern, AccessStatus, AceContext, AceType, AclEntryView, PermissionRef};
pub use inherit::InheritanceResolver;
pub use records::{AclMember, AclProperties, AclRecord};
pub use service::{AclCopyMode, AclService};
pub use store::AclStore;
pub use writer::{CowEngine, Exclusion, Mutation, MutationMode};
