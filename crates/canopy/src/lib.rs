//! Canopy: fixed-capacity tree memory for embedded computer-algebra engines.
//!
//! This is the top-level facade crate that re-exports the public API from
//! the canopy sub-crates. For most users, adding `canopy` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use canopy::prelude::*;
//!
//! // A node type whose payload is its printed text.
//! struct Text;
//! impl NodeBehavior for Text {
//!     fn name(&self) -> &str { "text" }
//!     fn serialize(&self, node: NodeRef<'_>, out: &mut String) -> Result<(), PoolError> {
//!         out.push_str(&String::from_utf8_lossy(node.payload()));
//!         for child in node.children() {
//!             child.serialize_into(out)?;
//!         }
//!         Ok(())
//!     }
//!     fn approximate(&self, _node: NodeRef<'_>) -> Result<f64, PoolError> { Ok(f64::NAN) }
//!     fn render_size(&self, node: NodeRef<'_>) -> Result<RenderSize, PoolError> {
//!         Ok(RenderSize::new(node.payload().len() as u32, 1, 1))
//!     }
//! }
//!
//! const TEXT: TypeTag = TypeTag(1);
//!
//! let mut pool = TreePool::new(PoolConfig::new(1024)).unwrap();
//! pool.register_behavior(TEXT, Rc::new(Text));
//!
//! let world = pool.create_node(TEXT, b"world", &[]).unwrap();
//! let hello = pool.create_node(TEXT, b"hello ", &[&world]).unwrap();
//! pool.release(world).unwrap();
//! assert_eq!(pool.serialize(&hello).unwrap(), "hello world");
//!
//! // Speculative edits roll back exactly.
//! let cp = pool.open_checkpoint();
//! let scratch = pool.clone_node(&hello).unwrap();
//! pool.write_payload(&scratch, b"bye ").unwrap();
//! pool.rollback(cp).unwrap();
//! assert!(!pool.contains(&scratch));
//! assert_eq!(pool.live_node_count(), 2);
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `canopy-core` | Identifiers, type tags, error taxonomy |
//! | [`pool`] | `canopy-pool` | The arena, tree editor, checkpoints and unwinding |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types and IDs (`canopy-core`).
///
/// Contains [`types::NodeId`], [`types::TypeTag`], [`types::UnwindReason`]
/// and the error taxonomy rooted at [`types::PoolError`].
pub use canopy_core as types;

/// The tree pool (`canopy-pool`).
///
/// [`pool::TreePool`] owns the arena; [`pool::shared`] offers a
/// per-thread instance for embedders without a place to keep one.
pub use canopy_pool as pool;

/// Common imports for typical canopy usage.
///
/// ```rust
/// use canopy::prelude::*;
/// ```
///
/// This imports the pool, handles and checkpoints, the behavior trait, and
/// the error and identifier types.
pub mod prelude {
    // Core types
    pub use canopy_core::{NodeId, RenderSize, TypeTag, UnwindReason};

    // Errors
    pub use canopy_core::{PoolError, Rejection, Violation};

    // Pool
    pub use canopy_pool::{
        Checkpoint, CheckpointKind, CloseError, DumpFormat, Handle, NodeBehavior, NodeRef,
        PoolConfig, PoolStats, TreePool,
    };

    // Per-thread instance
    pub use canopy_pool::shared;
}
