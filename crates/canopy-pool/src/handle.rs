//! Reference-counted node handles.
//!
//! A [`Handle`] holds one counted reference to a node. It stores only the
//! node's [`NodeId`], never an offset, so it keeps resolving to the right
//! node while structural edits elsewhere move bytes around.
//!
//! Handles are deliberately neither `Copy` nor `Clone`: duplicating one must
//! bump the node's reference count, which needs the pool. Use
//! [`TreePool::retain`](crate::TreePool::retain) to duplicate and
//! [`TreePool::release`](crate::TreePool::release) to give a reference back.
//! A handle dropped without release keeps its reference until the node is
//! rolled back, destroyed through its parent, or the pool shuts down.

use std::fmt;

use canopy_core::NodeId;

/// One counted reference to a node in a [`TreePool`](crate::TreePool).
///
/// Equality is identity: two handles are equal when they name the same
/// node, regardless of structure.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use]
pub struct Handle {
    id: NodeId,
}

impl Handle {
    pub(crate) fn new(id: NodeId) -> Self {
        Self { id }
    }

    /// The identifier of the referenced node.
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.id)
    }
}
