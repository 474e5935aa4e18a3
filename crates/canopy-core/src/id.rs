//! Strongly-typed identifiers and small value types shared across the pool.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies the kind of a node (integer literal, addition, layout row...).
///
/// The engine never interprets a tag itself. It stores the tag in the node
/// header and uses it to look up the node's behavior when dispatching
/// serialization, approximation, rendering and reduction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(pub u16);

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u16> for TypeTag {
    fn from(v: u16) -> Self {
        Self(v)
    }
}

/// Stable reference to a node, resolved through the identifier table.
///
/// `slot` is the dense identifier written into the node header. `generation`
/// is bumped every time the slot is released, so an identifier that outlived
/// its node is detected as stale instead of resolving to whatever node
/// reused the slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    /// Dense slot index in the identifier table.
    pub slot: u32,
    /// Release counter of the slot at the time this identifier was issued.
    pub generation: u32,
}

impl NodeId {
    /// Create an identifier from its raw parts.
    pub const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

/// Counter for unique [`PoolInstanceId`] allocation.
static POOL_INSTANCE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique per-instance identifier for a tree pool.
///
/// Checkpoint tokens carry the instance ID of the pool that issued them, so
/// a token handed to the wrong pool is rejected rather than matched against
/// an unrelated checkpoint stack with colliding serial numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolInstanceId(u64);

impl PoolInstanceId {
    /// Allocate a fresh, unique instance ID.
    pub fn next() -> Self {
        Self(POOL_INSTANCE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PoolInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a computation is being unwound to the nearest boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnwindReason {
    /// The arena could not satisfy an allocation.
    PoolFull,
    /// The caller aborted the computation (e.g. a user interrupt).
    Interrupted,
}

impl fmt::Display for UnwindReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolFull => write!(f, "pool full"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// On-screen extent reported by a node's render behavior.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RenderSize {
    /// Horizontal extent in pixels.
    pub width: u32,
    /// Vertical extent in pixels.
    pub height: u32,
    /// Distance from the top edge to the baseline, in pixels.
    pub baseline: u32,
}

impl RenderSize {
    /// Create a render size.
    pub const fn new(width: u32, height: u32, baseline: u32) -> Self {
        Self {
            width,
            height,
            baseline,
        }
    }

    /// Place `other` to the right of `self`, aligning baselines.
    pub fn beside(self, other: RenderSize) -> RenderSize {
        let baseline = self.baseline.max(other.baseline);
        let below = self
            .height
            .saturating_sub(self.baseline)
            .max(other.height.saturating_sub(other.baseline));
        RenderSize {
            width: self.width + other.width,
            height: baseline + below,
            baseline,
        }
    }

    /// Stack `other` below `self`, centred, with the baseline between them.
    pub fn above(self, other: RenderSize) -> RenderSize {
        RenderSize {
            width: self.width.max(other.width),
            height: self.height + other.height,
            baseline: self.height,
        }
    }
}
