//! Unified error type for the permission layer.
//!
//! Every failure is surfaced synchronously to the immediate caller; there is
//! no local recovery or retry anywhere in the engine. The enclosing
//! transaction is expected to roll back whatever was written before the
//! failure.

use thiserror::Error;

/// Unified error type for all repository permission operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepoError {
    /// Operation targeted a node or ACL id that does not exist, or a
    /// historical (read-only) version that cannot be mutated.
    #[error("Invalid reference: {message}")]
    InvalidReference {
        /// What was referenced and why it is invalid
        message: String,
    },

    /// Unsupported transition: mutating a shared list directly, layering on
    /// a tree that does not support it, mixing legacy and new-style lists.
    /// Signals a programming or data error, not a transient condition.
    #[error("Illegal state: {message}")]
    IllegalState {
        /// Description of the rejected transition
        message: String,
    },

    /// The proposed inheritance source is a descendant of the target.
    /// Detected by walking the ancestor chain before any row is written.
    #[error("Cyclical ACL inheritance: {message}")]
    CyclicalInheritance {
        /// The chain that would close the cycle
        message: String,
    },

    /// Feature explicitly not implemented (context-scoped entries, bulk
    /// authority alias queries). Fatal on first use.
    #[error("Unsupported: {message}")]
    Unsupported {
        /// The unsupported feature
        message: String,
    },

    /// The legacy migration's invariant was violated: relabelling an OLD
    /// list must never fork a descendant id. Internal-consistency bug.
    #[error("Migration assertion failed: {message}")]
    MigrationAssertion {
        /// The violated invariant
        message: String,
    },
}

/// Result type for repository permission operations
pub type Result<T> = std::result::Result<T, RepoError>;

impl RepoError {
    /// Create an invalid reference error
    pub fn invalid_reference(message: impl Into<String>) -> Self {
        Self::InvalidReference {
            message: message.into(),
        }
    }

    /// Create an illegal state error
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Create a cyclical inheritance error
    pub fn cyclical(message: impl Into<String>) -> Self {
        Self::CyclicalInheritance {
            message: message.into(),
        }
    }

    /// Create an unsupported feature error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }

    /// Create a migration assertion error
    pub fn migration_assertion(message: impl Into<String>) -> Self {
        Self::MigrationAssertion {
            message: message.into(),
        }
    }
}
