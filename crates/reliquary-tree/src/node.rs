//! The node-tree collaborator interface.
//!
//! The ACL drivers consume content trees through this narrow trait: node
//! lookup, primary-child enumeration, path resolution, and the structural
//! copy-on-write hook of versioned trees. Two tree families implement it,
//! distinguished by capability flags rather than separate driver code.

use reliquary_core::{AclId, NodeId, Result, StoreId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A slash-separated path within a store: `store:/a/b`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodePath(pub String);

impl NodePath {
    /// Build a path from a store and its segments.
    pub fn new(store: &StoreId, segments: &[&str]) -> Self {
        if segments.is_empty() {
            NodePath(format!("{}:/", store.as_str()))
        } else {
            NodePath(format!("{}:/{}", store.as_str(), segments.join("/")))
        }
    }

    /// The store component, if the path is well-formed.
    pub fn store(&self) -> Option<StoreId> {
        self.0.split_once(":/").map(|(store, _)| StoreId::new(store))
    }

    /// The path segments below the store root.
    pub fn segments(&self) -> Vec<&str> {
        match self.0.split_once(":/") {
            Some((_, rest)) if !rest.is_empty() => rest.split('/').collect(),
            _ => Vec::new(),
        }
    }

    /// This path extended by one segment.
    pub fn join(&self, segment: &str) -> NodePath {
        if self.0.ends_with('/') {
            NodePath(format!("{}{segment}", self.0))
        } else {
            NodePath(format!("{}/{segment}", self.0))
        }
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A layered node's pointer to the (path, version) it mirrors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Indirection {
    /// The mirrored path
    pub to_path: NodePath,
    /// The mirrored version; `None` means the current head
    pub to_version: Option<u64>,
}

impl Indirection {
    /// An indirection onto the current head of a path.
    pub fn head(to_path: NodePath) -> Self {
        Self {
            to_path,
            to_version: None,
        }
    }
}

/// What a tree family supports, selecting driver behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeCapabilities {
    /// Layered nodes that indirect to another path
    pub supports_layering: bool,
    /// Nodes reachable through more than one live path
    pub supports_multiple_head_paths: bool,
}

impl TreeCapabilities {
    /// A plain hierarchical tree: one path per node, no layering.
    pub fn plain() -> Self {
        Self {
            supports_layering: false,
            supports_multiple_head_paths: false,
        }
    }

    /// A versioned virtual-filesystem tree.
    pub fn layered() -> Self {
        Self {
            supports_layering: true,
            supports_multiple_head_paths: true,
        }
    }
}

/// What the drivers need to know about one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// The node id
    pub id: NodeId,
    /// The node's name under the enumerated parent (or the store name for
    /// roots)
    pub name: String,
    /// Is the node a directory
    pub is_directory: bool,
    /// Is the enumerated child association primary
    pub is_primary: bool,
    /// Is the node a layered view onto another path
    pub is_layered: bool,
    /// Is the node a historical, read-only version
    pub read_only: bool,
    /// The layered node's target, when layered
    pub indirection: Option<Indirection>,
    /// Every live path the node is reachable through
    pub head_paths: Vec<NodePath>,
}

/// The node-tree collaborator consumed by the ACL drivers.
pub trait NodeTree {
    /// What this tree family supports.
    fn capabilities(&self) -> TreeCapabilities;

    /// Every store, in a stable order.
    fn stores(&self) -> Vec<StoreId>;

    /// The root node of a store.
    fn root_node(&self, store: &StoreId) -> Result<NodeId>;

    /// Describe one node.
    fn lookup(&self, node: NodeId) -> Result<NodeDescriptor>;

    /// The node at a path.
    fn resolve_path(&self, path: &NodePath) -> Result<NodeId>;

    /// The children of a node, primary and secondary, in a stable order.
    fn children(&self, node: NodeId) -> Result<Vec<NodeDescriptor>>;

    /// Trigger the tree's own structural copy-on-write for a path, ahead
    /// of an ACL write. Returns the (possibly new) node id at the path.
    fn force_copy_on_write(&mut self, path: &NodePath) -> Result<NodeId>;

    /// The ACL attached to a node, if any. Absence means the node
    /// inherits purely through its parent.
    fn node_acl(&self, node: NodeId) -> Result<Option<AclId>>;

    /// Attach or clear a node's ACL pointer.
    fn set_node_acl(&mut self, node: NodeId, acl: Option<AclId>) -> Result<()>;
}
