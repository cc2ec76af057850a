//! # Reliquary Tree - Cascade Drivers and Migration
//!
//! Applies the ACL engine across content trees: the node-tree collaborator
//! interface, one cascade walk shared by both tree families, the per-node
//! ACL DAO contract with its plain and layered bindings, and the legacy
//! migration driver that converts single-list-per-node data into the
//! defining/shared/layered model.
//!
//! The two bindings differ by capability, not by algorithm: the plain
//! hierarchical binding rejects layered nodes outright, while the layered
//! binding adds structural copy-on-write, head-path fixup and indirection
//! retargeting on top of the same walk.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// The node-tree collaborator interface
pub mod node;

/// In-memory reference tree
pub mod memory;

/// The shared cascade walk
pub mod cascade;

/// The per-node ACL DAO contract
pub mod dao;

/// The plain hierarchical binding
pub mod plain;

/// The layered/versioned binding
pub mod layered;

/// Legacy migration
pub mod migrate;

pub use cascade::CascadeMode;
pub use dao::NodeAclDao;
pub use layered::LayeredAclDao;
pub use memory::MemoryTree;
pub use migrate::{migrate_all, MigrationReport};
pub use node::{Indirection, NodeDescriptor, NodePath, NodeTree, TreeCapabilities};
pub use plain::PlainAclDao;
