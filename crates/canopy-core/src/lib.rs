//! Core types for the canopy tree pool.
//!
//! This is the leaf crate with zero internal dependencies. It defines the
//! vocabulary shared by the engine and its consumers: node identifiers,
//! type tags, unwind reasons and the error taxonomy.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod error;
pub mod id;

pub use error::{PoolError, Rejection, Violation};
pub use id::{NodeId, PoolInstanceId, RenderSize, TypeTag, UnwindReason};
