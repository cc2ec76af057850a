//! In-memory node tree.
//!
//! The reference [`NodeTree`] implementation used by the driver tests and
//! by embedders that keep their content tree in memory. Supports both tree
//! families: construct with [`MemoryTree::plain`] or [`MemoryTree::layered`].

use crate::node::{Indirection, NodeDescriptor, NodePath, NodeTree, TreeCapabilities};
use indexmap::IndexMap;
use reliquary_core::{AclId, NodeId, RepoError, Result, StoreId};
use tracing::debug;

#[derive(Debug, Clone)]
struct NodeRow {
    directory: bool,
    indirection: Option<Indirection>,
    acl: Option<AclId>,
    read_only: bool,
}

#[derive(Debug, Clone)]
struct Edge {
    name: String,
    child: NodeId,
    primary: bool,
}

/// An in-memory content tree.
#[derive(Debug, Clone)]
pub struct MemoryTree {
    capabilities: TreeCapabilities,
    stores: IndexMap<StoreId, NodeId>,
    nodes: IndexMap<NodeId, NodeRow>,
    edges: IndexMap<NodeId, Vec<Edge>>,
    next_node: u64,
}

impl MemoryTree {
    /// An empty plain hierarchical tree.
    pub fn plain() -> Self {
        Self::with_capabilities(TreeCapabilities::plain())
    }

    /// An empty layered/versioned tree.
    pub fn layered() -> Self {
        Self::with_capabilities(TreeCapabilities::layered())
    }

    fn with_capabilities(capabilities: TreeCapabilities) -> Self {
        Self {
            capabilities,
            stores: IndexMap::new(),
            nodes: IndexMap::new(),
            edges: IndexMap::new(),
            next_node: 0,
        }
    }

    fn new_node(&mut self, directory: bool, indirection: Option<Indirection>) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.nodes.insert(
            id,
            NodeRow {
                directory,
                indirection,
                acl: None,
                read_only: false,
            },
        );
        self.edges.insert(id, Vec::new());
        id
    }

    /// Create a store with a fresh directory root. Returns the root node.
    pub fn add_store(&mut self, name: &str) -> NodeId {
        let root = self.new_node(true, None);
        self.stores.insert(StoreId::new(name), root);
        root
    }

    /// Add a primary child directory or file.
    pub fn add_child(&mut self, parent: NodeId, name: &str, directory: bool) -> NodeId {
        let child = self.new_node(directory, None);
        self.push_edge(parent, name, child, true);
        child
    }

    /// Add a primary layered child mirroring another path.
    pub fn add_layered(&mut self, parent: NodeId, name: &str, indirection: Indirection) -> NodeId {
        let child = self.new_node(true, Some(indirection));
        self.push_edge(parent, name, child, true);
        child
    }

    /// Link an existing node under a second parent, creating another live
    /// path to it.
    pub fn link_child(&mut self, parent: NodeId, name: &str, child: NodeId, primary: bool) {
        self.push_edge(parent, name, child, primary);
    }

    fn push_edge(&mut self, parent: NodeId, name: &str, child: NodeId, primary: bool) {
        self.edges.entry(parent).or_default().push(Edge {
            name: name.to_string(),
            child,
            primary,
        });
    }

    /// Mark a node as a historical, read-only version.
    pub fn mark_read_only(&mut self, node: NodeId) {
        if let Some(row) = self.nodes.get_mut(&node) {
            row.read_only = true;
        }
    }

    fn row(&self, node: NodeId) -> Result<&NodeRow> {
        self.nodes
            .get(&node)
            .ok_or_else(|| RepoError::invalid_reference(format!("no such node: {node}")))
    }

    fn head_paths_of(&self, node: NodeId) -> Vec<NodePath> {
        let mut paths = Vec::new();
        for (store, &root) in &self.stores {
            self.collect_paths(root, node, NodePath::new(store, &[]), &mut paths);
        }
        paths
    }

    fn collect_paths(
        &self,
        current: NodeId,
        target: NodeId,
        path: NodePath,
        found: &mut Vec<NodePath>,
    ) {
        if current == target {
            found.push(path);
            return;
        }
        if let Some(edges) = self.edges.get(&current) {
            for edge in edges {
                self.collect_paths(edge.child, target, path.join(&edge.name), found);
            }
        }
    }

    fn describe(&self, node: NodeId, name: &str, primary: bool) -> Result<NodeDescriptor> {
        let row = self.row(node)?;
        Ok(NodeDescriptor {
            id: node,
            name: name.to_string(),
            is_directory: row.directory,
            is_primary: primary,
            is_layered: row.indirection.is_some(),
            read_only: row.read_only,
            indirection: row.indirection.clone(),
            head_paths: self.head_paths_of(node),
        })
    }
}

impl NodeTree for MemoryTree {
    fn capabilities(&self) -> TreeCapabilities {
        self.capabilities
    }

    fn stores(&self) -> Vec<StoreId> {
        self.stores.keys().cloned().collect()
    }

    fn root_node(&self, store: &StoreId) -> Result<NodeId> {
        self.stores
            .get(store)
            .copied()
            .ok_or_else(|| RepoError::invalid_reference(format!("no such store: {store}")))
    }

    fn lookup(&self, node: NodeId) -> Result<NodeDescriptor> {
        let name = self
            .edges
            .values()
            .flatten()
            .find(|edge| edge.child == node)
            .map(|edge| edge.name.clone())
            .or_else(|| {
                self.stores
                    .iter()
                    .find(|(_, &root)| root == node)
                    .map(|(store, _)| store.as_str().to_string())
            })
            .unwrap_or_default();
        self.describe(node, &name, true)
    }

    fn resolve_path(&self, path: &NodePath) -> Result<NodeId> {
        let store = path
            .store()
            .ok_or_else(|| RepoError::invalid_reference(format!("malformed path: {path}")))?;
        let mut current = self.root_node(&store)?;
        for segment in path.segments() {
            let edges = self.edges.get(&current).ok_or_else(|| {
                RepoError::invalid_reference(format!("no children under {current}"))
            })?;
            current = edges
                .iter()
                .find(|edge| edge.name == segment)
                .map(|edge| edge.child)
                .ok_or_else(|| {
                    RepoError::invalid_reference(format!("no such path: {path}"))
                })?;
        }
        Ok(current)
    }

    fn children(&self, node: NodeId) -> Result<Vec<NodeDescriptor>> {
        self.row(node)?;
        let edges = self.edges.get(&node).cloned().unwrap_or_default();
        edges
            .iter()
            .map(|edge| self.describe(edge.child, &edge.name, edge.primary))
            .collect()
    }

    fn force_copy_on_write(&mut self, path: &NodePath) -> Result<NodeId> {
        let node = self.resolve_path(path)?;
        let row = self.row(node)?.clone();
        if !row.read_only {
            return Ok(node);
        }
        // Structural copy-on-write: a writable clone replaces the
        // read-only row at this path.
        let copy = self.new_node(row.directory, row.indirection.clone());
        if let Some(copied) = self.nodes.get_mut(&copy) {
            copied.acl = row.acl;
        }
        self.edges
            .insert(copy, self.edges.get(&node).cloned().unwrap_or_default());
        let segments = path.segments();
        match segments.split_last() {
            Some((leaf, rest)) => {
                let store = path
                    .store()
                    .ok_or_else(|| RepoError::invalid_reference(format!("malformed path: {path}")))?;
                let parent = self.resolve_path(&NodePath::new(&store, rest))?;
                if let Some(edges) = self.edges.get_mut(&parent) {
                    for edge in edges.iter_mut() {
                        if edge.name == *leaf && edge.child == node {
                            edge.child = copy;
                        }
                    }
                }
            }
            None => {
                // A store root: re-point the store.
                for root in self.stores.values_mut() {
                    if *root == node {
                        *root = copy;
                    }
                }
            }
        }
        debug!(before = %node, after = %copy, %path, "copied node for write");
        Ok(copy)
    }

    fn node_acl(&self, node: NodeId) -> Result<Option<AclId>> {
        Ok(self.row(node)?.acl)
    }

    fn set_node_acl(&mut self, node: NodeId, acl: Option<AclId>) -> Result<()> {
        let row = self
            .nodes
            .get_mut(&node)
            .ok_or_else(|| RepoError::invalid_reference(format!("no such node: {node}")))?;
        row.acl = acl;
        Ok(())
    }
}
