//! Per-type node behavior and its dispatch table.
//!
//! The pool stores only a [`TypeTag`] per node. Everything type-specific
//! (how a node prints, what number it stands for, how large it draws, how
//! it simplifies) lives behind [`NodeBehavior`], registered per tag in a
//! [`BehaviorTable`]. Adding a node type means adding a tag and a table
//! entry; the engine itself never changes.

use std::rc::Rc;

use canopy_core::{PoolError, Rejection, RenderSize, TypeTag};
use indexmap::IndexMap;
use tracing::trace;

use crate::handle::Handle;
use crate::node::NodeRef;
use crate::pool::TreePool;

/// Behavior of one node type.
///
/// The read-only hooks receive a [`NodeRef`] and may recurse into children
/// through it. [`reduce`](NodeBehavior::reduce) receives the pool itself so
/// it can rewrite the tree.
pub trait NodeBehavior {
    /// Human-readable type name, used in dumps.
    fn name(&self) -> &str;

    /// Append the textual form of `node` to `out`.
    fn serialize(&self, node: NodeRef<'_>, out: &mut String) -> Result<(), PoolError>;

    /// Numeric approximation of `node`.
    fn approximate(&self, node: NodeRef<'_>) -> Result<f64, PoolError>;

    /// On-screen extent of `node`.
    fn render_size(&self, node: NodeRef<'_>) -> Result<RenderSize, PoolError>;

    /// Apply one simplification to the node behind `node`.
    ///
    /// Returns whether the tree changed. The default never simplifies.
    fn reduce(&self, pool: &mut TreePool, node: &Handle) -> Result<bool, PoolError> {
        let _ = (pool, node);
        Ok(false)
    }
}

/// Registered behaviors, keyed by type tag, in registration order.
#[derive(Clone, Default)]
pub struct BehaviorTable {
    entries: IndexMap<TypeTag, Rc<dyn NodeBehavior>>,
}

impl BehaviorTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `behavior` for `tag`, replacing any previous entry.
    pub fn register(&mut self, tag: TypeTag, behavior: Rc<dyn NodeBehavior>) {
        trace!(%tag, name = behavior.name(), "behavior registered");
        self.entries.insert(tag, behavior);
    }

    /// Behavior for `tag`, if registered.
    pub fn get(&self, tag: TypeTag) -> Option<&Rc<dyn NodeBehavior>> {
        self.entries.get(&tag)
    }

    /// Behavior for `tag`, or `UnregisteredType`.
    pub fn require(&self, tag: TypeTag) -> Result<&Rc<dyn NodeBehavior>, PoolError> {
        self.get(tag)
            .ok_or_else(|| Rejection::UnregisteredType { tag }.into())
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no type is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered tags with their type names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = (TypeTag, &str)> + '_ {
        self.entries.iter().map(|(tag, b)| (*tag, b.name()))
    }
}

impl std::fmt::Debug for BehaviorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.names()).finish()
    }
}

impl TreePool {
    /// Textual form of the tree behind `handle`.
    pub fn serialize(&self, handle: &Handle) -> Result<String, PoolError> {
        let mut out = String::new();
        self.node(handle)?.serialize_into(&mut out)?;
        Ok(out)
    }

    /// Numeric approximation of the tree behind `handle`.
    pub fn approximate(&self, handle: &Handle) -> Result<f64, PoolError> {
        self.node(handle)?.approximate()
    }

    /// On-screen extent of the tree behind `handle`.
    pub fn render_size(&self, handle: &Handle) -> Result<RenderSize, PoolError> {
        self.node(handle)?.render_size()
    }

    /// Apply at most one simplification, innermost first.
    ///
    /// Children are tried left to right before the node itself. Returns
    /// whether anything changed.
    pub fn reduce_step(&mut self, handle: &Handle) -> Result<bool, PoolError> {
        for index in 0..self.child_count(handle)? {
            let child = self.child_at(handle, index)?;
            let changed = self.reduce_step(&child);
            let released = self.release(child);
            // An unwind inside the child leaves its handle stale; report the unwind.
            let changed = changed?;
            released?;
            if changed {
                return Ok(true);
            }
        }
        let behavior = Rc::clone(self.behaviors.require(self.tag(handle)?)?);
        behavior.reduce(self, handle)
    }

    /// Simplify until nothing changes or `max_steps` simplifications were
    /// applied. Returns the number applied.
    pub fn reduce_to_fixpoint(
        &mut self,
        handle: &Handle,
        max_steps: usize,
    ) -> Result<usize, PoolError> {
        let mut steps = 0;
        while steps < max_steps && self.reduce_step(handle)? {
            steps += 1;
        }
        trace!(node = %handle.id(), steps, "reduction finished");
        Ok(steps)
    }
}
