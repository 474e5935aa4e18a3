//! Error taxonomy for the tree pool.
//!
//! Three families, with different propagation rules:
//!
//! - **Unwinding** ([`PoolError::OutOfMemory`], [`PoolError::Interrupted`]):
//!   the only conditions that unwind the checkpoint stack to the nearest
//!   boundary. Always recoverable; never leave the arena inconsistent.
//! - **Rejections** ([`PoolError::Rejected`]): a structural edit that was
//!   refused before anything moved. Reported to the caller, who decides.
//! - **Violations** ([`PoolError::Violation`]): a programming error in the
//!   caller (checkpoints closed out of order, stale handles...). Callers
//!   should treat these as fatal.

use std::error::Error;
use std::fmt;

use crate::id::{NodeId, TypeTag, UnwindReason};

/// Errors returned by tree pool operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PoolError {
    /// The arena cannot hold the requested bytes.
    OutOfMemory {
        /// Number of bytes the operation needed.
        requested: usize,
        /// Number of free bytes left in the arena.
        available: usize,
    },
    /// The computation was aborted by the caller and unwound.
    Interrupted,
    /// A structural edit was refused; the arena is unchanged.
    Rejected(Rejection),
    /// The caller broke a usage invariant of the pool.
    Violation(Violation),
    /// Pool configuration is invalid.
    InvalidConfig {
        /// Human-readable description of what is wrong.
        reason: String,
    },
}

impl PoolError {
    /// Whether this error unwinds the checkpoint stack.
    pub fn is_unwinding(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. } | Self::Interrupted)
    }

    /// The unwind reason this error corresponds to, if any.
    pub fn unwind_reason(&self) -> Option<UnwindReason> {
        match self {
            Self::OutOfMemory { .. } => Some(UnwindReason::PoolFull),
            Self::Interrupted => Some(UnwindReason::Interrupted),
            _ => None,
        }
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "pool out of memory: requested {requested} bytes, {available} bytes available"
            ),
            Self::Interrupted => write!(f, "computation interrupted"),
            Self::Rejected(r) => write!(f, "structural edit rejected: {r}"),
            Self::Violation(v) => write!(f, "pool invariant violated: {v}"),
            Self::InvalidConfig { reason } => write!(f, "invalid pool config: {reason}"),
        }
    }
}

impl Error for PoolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Rejected(r) => Some(r),
            Self::Violation(v) => Some(v),
            _ => None,
        }
    }
}

impl From<Rejection> for PoolError {
    fn from(r: Rejection) -> Self {
        Self::Rejected(r)
    }
}

impl From<Violation> for PoolError {
    fn from(v: Violation) -> Self {
        Self::Violation(v)
    }
}

/// Why a structural edit was refused.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// The child index does not exist on the parent.
    ChildIndexOutOfRange {
        /// The requested index.
        index: usize,
        /// Number of children the parent has.
        child_count: usize,
    },
    /// The node is already contained in a parent and cannot be adopted.
    AlreadyContained {
        /// The contained node.
        node: NodeId,
    },
    /// The same node was listed twice as a child.
    DuplicateChild {
        /// The repeated node.
        node: NodeId,
    },
    /// Adopting the node would make a tree contain itself.
    WouldCreateCycle {
        /// The node that would become its own descendant.
        node: NodeId,
    },
    /// A payload larger than the header can describe.
    PayloadTooLarge {
        /// Requested payload length in bytes.
        len: usize,
    },
    /// No behavior is registered for the node's type tag.
    UnregisteredType {
        /// The unknown tag.
        tag: TypeTag,
    },
    /// The reference counter of the node is saturated.
    TooManyReferences {
        /// The saturated node.
        node: NodeId,
    },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChildIndexOutOfRange { index, child_count } => {
                write!(f, "child index {index} out of range (node has {child_count} children)")
            }
            Self::AlreadyContained { node } => {
                write!(f, "node {node} is already contained in a parent")
            }
            Self::DuplicateChild { node } => write!(f, "node {node} listed twice as a child"),
            Self::WouldCreateCycle { node } => {
                write!(f, "node {node} would become its own descendant")
            }
            Self::PayloadTooLarge { len } => write!(f, "payload of {len} bytes is too large"),
            Self::UnregisteredType { tag } => write!(f, "no behavior registered for type {tag}"),
            Self::TooManyReferences { node } => {
                write!(f, "reference count of node {node} is saturated")
            }
        }
    }
}

impl Error for Rejection {}

/// A usage error that indicates a bug in the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Violation {
    /// The identifier refers to a node that has been released or rolled back.
    StaleHandle {
        /// The stale identifier.
        node: NodeId,
    },
    /// The node lies below the topmost checkpoint's watermark and may not move.
    FrozenNode {
        /// The frozen node.
        node: NodeId,
        /// Byte offset of the node.
        offset: u32,
        /// Watermark of the topmost open checkpoint.
        watermark: u32,
    },
    /// A checkpoint was closed while a more recent one was still open.
    CheckpointOrder {
        /// Serial of the checkpoint being closed.
        closing: u64,
        /// Serial of the topmost open checkpoint.
        topmost: u64,
    },
    /// A checkpoint token issued by a different pool.
    ForeignCheckpoint,
    /// An unwind was raised with no active boundary to catch it.
    NoUnwindBoundary,
    /// A boundary body returned successfully with checkpoints still open.
    UnclosedCheckpoints {
        /// Number of checkpoints left open above the boundary.
        open: usize,
    },
    /// The shared pool was used before `init` or after `shutdown`.
    NotInitialized,
    /// The shared pool was initialized twice.
    AlreadyInitialized,
    /// The shared pool was entered again while already in use.
    ReentrantAccess,
    /// An integrity check found the arena layout corrupted.
    Corrupted {
        /// Description of the broken invariant.
        detail: String,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StaleHandle { node } => write!(f, "stale handle {node}"),
            Self::FrozenNode {
                node,
                offset,
                watermark,
            } => write!(
                f,
                "node {node} at offset {offset} is frozen below checkpoint watermark {watermark}"
            ),
            Self::CheckpointOrder { closing, topmost } => write!(
                f,
                "checkpoint {closing} closed while checkpoint {topmost} is still open"
            ),
            Self::ForeignCheckpoint => write!(f, "checkpoint belongs to another pool"),
            Self::NoUnwindBoundary => write!(f, "unwind raised with no active boundary"),
            Self::UnclosedCheckpoints { open } => {
                write!(f, "{open} checkpoint(s) left open inside a boundary")
            }
            Self::NotInitialized => write!(f, "shared pool is not initialized"),
            Self::AlreadyInitialized => write!(f, "shared pool is already initialized"),
            Self::ReentrantAccess => write!(f, "shared pool entered while already in use"),
            Self::Corrupted { detail } => write!(f, "arena corrupted: {detail}"),
        }
    }
}

impl Error for Violation {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_memory_and_interrupt_unwind() {
        let oom = PoolError::OutOfMemory {
            requested: 8,
            available: 0,
        };
        assert!(oom.is_unwinding());
        assert_eq!(oom.unwind_reason(), Some(UnwindReason::PoolFull));
        assert!(PoolError::Interrupted.is_unwinding());

        let rejected = PoolError::from(Rejection::ChildIndexOutOfRange {
            index: 3,
            child_count: 2,
        });
        assert!(!rejected.is_unwinding());
        assert!(!PoolError::from(Violation::NoUnwindBoundary).is_unwinding());
    }

    #[test]
    fn display_names_the_offending_node() {
        let err = PoolError::from(Violation::StaleHandle {
            node: NodeId::new(4, 1),
        });
        assert_eq!(err.to_string(), "pool invariant violated: stale handle 4v1");
    }

    #[test]
    fn source_exposes_rejection() {
        let err = PoolError::from(Rejection::PayloadTooLarge { len: 10 });
        assert!(err.source().is_some());
    }
}
