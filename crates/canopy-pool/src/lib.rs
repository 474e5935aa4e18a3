//! Fixed-capacity tree arena with relocation-stable handles and rollback.
//!
//! Nodes of variable size live back to back in a single pre-allocated byte
//! buffer. Children follow their parent's payload, so a whole subtree is
//! one contiguous byte range and the arena never fragments: freeing a
//! tree compacts everything after it.
//!
//! # Architecture
//!
//! ```text
//! TreePool
//! ├── Arena            one Vec<u8> of fixed capacity, bump cursor live_end
//! ├── IdentifierTable  slot → current offset (the only stored addresses)
//! ├── BehaviorTable    TypeTag → Rc<dyn NodeBehavior>
//! ├── Vec<Frame>       checkpoint stack (plain checkpoints and boundaries)
//! └── deferred         frozen roots released to zero
//! ```
//!
//! # References
//!
//! Callers hold [`Handle`]s, which carry a [`NodeId`](canopy_core::NodeId)
//! and nothing else. Every edit that moves bytes updates the identifier
//! table, so a handle keeps resolving to its node wherever it moves.
//!
//! # Transactions
//!
//! A [`Checkpoint`] records the fill level. Rollback truncates to it and
//! releases every node past it. Nodes below the topmost watermark are
//! frozen until the checkpoint closes, which makes truncation an exact
//! restore. An unwind boundary is a checkpoint that catches
//! allocation failures and interrupts: raising an unwind rolls back every
//! checkpoint down to the nearest boundary and returns the error for `?`
//! to carry to the boundary's owner.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod arena;
pub mod behavior;
pub mod checkpoint;
pub mod config;
pub mod dump;
pub mod editor;
pub mod handle;
pub mod integrity;
pub mod node;
pub mod pool;
pub mod shared;
pub mod stats;
pub mod table;
pub mod unwind;

// Public re-exports for the primary API surface.
pub use behavior::{BehaviorTable, NodeBehavior};
pub use checkpoint::{Checkpoint, CheckpointKind, CloseError};
pub use config::PoolConfig;
pub use dump::DumpFormat;
pub use handle::Handle;
pub use node::{Children, Header, NodeRef, HEADER_SIZE, NO_PARENT};
pub use pool::TreePool;
pub use stats::PoolStats;
