//! Namespace-qualified names.
//!
//! Permissions are keyed by a type-qualified name (a namespace URI plus a
//! local name) and a permission name within that type. Only the qualified
//! name lives here; the permission vocabulary itself belongs to the ACL
//! crate's interning tables.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QName {
    /// Namespace URI
    pub namespace: String,
    /// Local name within the namespace
    pub local: String,
}

impl QName {
    /// Create a qualified name from a namespace URI and a local name.
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}", self.namespace, self.local)
    }
}
