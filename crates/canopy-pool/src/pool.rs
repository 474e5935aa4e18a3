//! The tree pool: node lifetime over a fixed arena.
//!
//! [`TreePool`] owns the [`Arena`], the [`IdentifierTable`], the behavior
//! table and the checkpoint stack. This module holds construction,
//! resolution and the node lifetime operations (create, clone, retain,
//! release). Structural edits live in [`editor`](crate::editor),
//! checkpoints in [`checkpoint`](crate::checkpoint) and unwinding in
//! [`unwind`](crate::unwind).
//!
//! Every mutating operation either completes or leaves the arena exactly as
//! it found it: arguments are validated and arena growth is checked before
//! the first byte moves.

use std::rc::Rc;

use canopy_core::{NodeId, PoolError, PoolInstanceId, Rejection, TypeTag, UnwindReason, Violation};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::arena::Arena;
use crate::behavior::{BehaviorTable, NodeBehavior};
use crate::checkpoint::Frame;
use crate::config::PoolConfig;
use crate::handle::Handle;
use crate::node::{self, Header, NodeRef, HEADER_SIZE, NO_PARENT};
use crate::stats::{Counters, PoolStats};
use crate::table::IdentifierTable;

/// A fixed-capacity arena of relocatable tree nodes.
///
/// All state of the memory engine lives here; there is no global pool
/// unless the embedder opts into [`shared`](crate::shared).
pub struct TreePool {
    pub(crate) instance: PoolInstanceId,
    pub(crate) config: PoolConfig,
    pub(crate) arena: Arena,
    pub(crate) table: IdentifierTable,
    pub(crate) behaviors: BehaviorTable,
    /// Open checkpoints, innermost last.
    pub(crate) checkpoints: Vec<Frame>,
    pub(crate) next_serial: u64,
    /// Boundary closed by the most recent unwind, awaiting collection.
    pub(crate) tripped: Option<(u64, UnwindReason)>,
    /// Frozen roots whose reference count reached zero.
    pub(crate) deferred: Vec<NodeId>,
    pub(crate) counters: Counters,
}

impl TreePool {
    /// Create a pool from a validated configuration.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        debug!(capacity = config.capacity, "tree pool created");
        Ok(Self {
            instance: PoolInstanceId::next(),
            arena: Arena::new(config.capacity),
            table: IdentifierTable::with_capacity(config.reserved_identifiers),
            behaviors: BehaviorTable::new(),
            checkpoints: Vec::new(),
            next_serial: 0,
            tripped: None,
            deferred: Vec::new(),
            counters: Counters::default(),
            config,
        })
    }

    /// Create a pool of `capacity` bytes with default settings otherwise.
    pub fn with_capacity(capacity: u32) -> Result<Self, PoolError> {
        Self::new(PoolConfig::new(capacity))
    }

    /// Release every node and close every checkpoint.
    ///
    /// Outstanding handles become stale. Registered behaviors and the
    /// cumulative counters are kept; the peak is reset.
    pub fn shutdown(&mut self) {
        debug!(
            live_nodes = self.table.live_count(),
            live_bytes = self.arena.live_end(),
            open_checkpoints = self.checkpoints.len(),
            "tree pool shut down"
        );
        self.table.reset();
        self.arena.truncate(0);
        self.checkpoints.clear();
        self.deferred.clear();
        self.tripped = None;
        self.counters.peak_bytes = 0;
    }

    /// Unique identity of this pool instance.
    pub fn instance_id(&self) -> PoolInstanceId {
        self.instance
    }

    /// The configuration this pool was created with.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Arena capacity in bytes.
    pub fn capacity(&self) -> u32 {
        self.arena.capacity()
    }

    /// Number of nodes in the arena, contained nodes included.
    pub fn live_node_count(&self) -> usize {
        self.table.live_count()
    }

    /// Number of bytes holding nodes.
    pub fn live_byte_size(&self) -> u32 {
        self.arena.live_end()
    }

    /// Bytes still available.
    pub fn free_bytes(&self) -> u32 {
        self.arena.free_bytes()
    }

    /// Snapshot of occupancy and cumulative counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.arena.capacity(),
            live_bytes: self.arena.live_end(),
            peak_bytes: self.counters.peak_bytes,
            free_bytes: self.arena.free_bytes(),
            live_nodes: self.table.live_count(),
            identifier_slots: self.table.slot_count(),
            free_identifiers: self.table.free_count(),
            checkpoint_depth: self.checkpoints.len(),
            rollbacks: self.counters.rollbacks,
            unwinds: self.counters.unwinds,
            allocation_failures: self.counters.allocation_failures,
            deferred_releases: self.counters.deferred_releases,
        }
    }

    /// Register the behavior of node type `tag`, replacing any previous one.
    pub fn register_behavior(&mut self, tag: TypeTag, behavior: Rc<dyn NodeBehavior>) {
        self.behaviors.register(tag, behavior);
    }

    /// The registered behaviors.
    pub fn behaviors(&self) -> &BehaviorTable {
        &self.behaviors
    }

    // ── Resolution ──────────────────────────────────────────────

    /// Current offset of `id`, or `StaleHandle`.
    pub(crate) fn resolve(&self, id: NodeId) -> Result<u32, PoolError> {
        self.table
            .resolve(id)
            .ok_or_else(|| Violation::StaleHandle { node: id }.into())
    }

    pub(crate) fn header_at(&self, offset: u32) -> Header {
        Header::read(self.arena.bytes(), offset)
    }

    /// Current offset of an occupied slot read from a header.
    pub(crate) fn slot_offset(&self, slot: u32) -> Result<u32, PoolError> {
        self.table.offset_of_slot(slot).ok_or_else(|| {
            Violation::Corrupted {
                detail: format!("slot {slot} referenced by a header is not registered"),
            }
            .into()
        })
    }

    /// Full identifier of an occupied slot read from a header.
    pub(crate) fn slot_id(&self, slot: u32) -> Result<NodeId, PoolError> {
        self.table.id_of_slot(slot).ok_or_else(|| {
            Violation::Corrupted {
                detail: format!("slot {slot} referenced by a header is not registered"),
            }
            .into()
        })
    }

    /// Whether `handle` still names a live node of this pool.
    pub fn contains(&self, handle: &Handle) -> bool {
        self.table.resolve(handle.id()).is_some()
    }

    /// Read-only view of the node behind `handle`.
    pub fn node(&self, handle: &Handle) -> Result<NodeRef<'_>, PoolError> {
        self.node_by_id(handle.id())
    }

    /// Read-only view of the node with identifier `id`.
    pub fn node_by_id(&self, id: NodeId) -> Result<NodeRef<'_>, PoolError> {
        let offset = self.resolve(id)?;
        Ok(NodeRef::new(self, offset))
    }

    /// Payload bytes of the node behind `handle`.
    pub fn payload(&self, handle: &Handle) -> Result<&[u8], PoolError> {
        Ok(self.node(handle)?.payload())
    }

    /// Type tag of the node behind `handle`.
    pub fn tag(&self, handle: &Handle) -> Result<TypeTag, PoolError> {
        Ok(self.header_at(self.resolve(handle.id())?).tag)
    }

    /// Outstanding handles on the node behind `handle`.
    pub fn ref_count(&self, handle: &Handle) -> Result<u16, PoolError> {
        Ok(self.header_at(self.resolve(handle.id())?).ref_count)
    }

    /// Identifier of the node containing `handle`'s node, if any.
    pub fn parent(&self, handle: &Handle) -> Result<Option<NodeId>, PoolError> {
        let header = self.header_at(self.resolve(handle.id())?);
        if header.is_root() {
            return Ok(None);
        }
        Ok(self.table.id_of_slot(header.parent))
    }

    /// Watermark of the innermost open checkpoint, or 0.
    pub(crate) fn topmost_watermark(&self) -> u32 {
        self.checkpoints.last().map_or(0, |frame| frame.watermark)
    }

    /// Refuse to move or restructure a node that an open checkpoint must
    /// be able to restore.
    pub(crate) fn ensure_unfrozen(&self, id: NodeId, offset: u32) -> Result<(), PoolError> {
        let watermark = self.topmost_watermark();
        if offset < watermark {
            return Err(Violation::FrozenNode {
                node: id,
                offset,
                watermark,
            }
            .into());
        }
        Ok(())
    }

    pub(crate) fn checked_payload_len(len: usize) -> Result<u32, PoolError> {
        u32::try_from(len)
            .ok()
            .filter(|&len| len <= u32::MAX - HEADER_SIZE)
            .ok_or_else(|| Rejection::PayloadTooLarge { len }.into())
    }

    // ── Lifetime ────────────────────────────────────────────────

    /// Create a node of type `tag` with `payload`, adopting `children` in
    /// order.
    ///
    /// Each child must be a distinct root that is not frozen. Its bytes are
    /// moved to follow the new node's payload; the caller keeps its handles
    /// on the children, which now resolve inside the new tree. The returned
    /// handle holds the new node's only reference.
    pub fn create_node(
        &mut self,
        tag: TypeTag,
        payload: &[u8],
        children: &[&Handle],
    ) -> Result<Handle, PoolError> {
        self.reclaim_deferred();
        let payload_len = Self::checked_payload_len(payload.len())?;
        let own = HEADER_SIZE + payload_len;

        let mut slots: SmallVec<[u32; 8]> = SmallVec::with_capacity(children.len());
        for child in children {
            let id = child.id();
            let offset = self.resolve(id)?;
            let header = self.header_at(offset);
            if !header.is_root() {
                return Err(Rejection::AlreadyContained { node: id }.into());
            }
            if slots.contains(&id.slot) {
                return Err(Rejection::DuplicateChild { node: id }.into());
            }
            self.ensure_unfrozen(id, offset)?;
            slots.push(id.slot);
        }
        if let Err(err) = self.arena.ensure(own) {
            return Err(self.fail_allocation(err));
        }

        let mut children_len = 0u32;
        for &slot in &slots {
            let offset = self.slot_offset(slot)?;
            let size = self.header_at(offset).size;
            self.move_to_end(offset, size);
            children_len += size;
        }
        let start = self.arena.live_end() - children_len;
        self.arena.open_gap(start, own, &mut self.table)?;
        let id = self.table.issue(start);
        let buf = self.arena.bytes_mut();
        Header {
            tag,
            ref_count: 1,
            slot: id.slot,
            parent: NO_PARENT,
            size: own + children_len,
            payload_len,
        }
        .write(buf, start);
        let payload_at = Header::payload_start(start) as usize;
        buf[payload_at..payload_at + payload.len()].copy_from_slice(payload);
        for &slot in &slots {
            let offset = self.slot_offset(slot)?;
            node::set_parent(self.arena.bytes_mut(), offset, id.slot);
        }
        self.counters.observe_live_bytes(self.arena.live_end());
        trace!(node = %id, %tag, size = own + children_len, "node created");
        Ok(Handle::new(id))
    }

    /// Deep-copy the tree rooted at `handle` into a new root.
    ///
    /// Every copied node gets a fresh identifier. The copy's root holds one
    /// reference; its descendants hold none and are anchored by the copy.
    pub fn clone_node(&mut self, handle: &Handle) -> Result<Handle, PoolError> {
        self.reclaim_deferred();
        let src = self.resolve(handle.id())?;
        let size = self.header_at(src).size;
        let dst = match self.arena.allocate(size) {
            Ok(dst) => dst,
            Err(err) => return Err(self.fail_allocation(err)),
        };
        self.arena.copy_within(src, size, dst);

        let end = dst + size;
        let mut ancestors: SmallVec<[(u32, u32); 16]> = SmallVec::new();
        let mut root = None;
        let mut offset = dst;
        while offset < end {
            while ancestors.last().is_some_and(|&(until, _)| until <= offset) {
                ancestors.pop();
            }
            let header = self.header_at(offset);
            let id = self.table.issue(offset);
            let buf = self.arena.bytes_mut();
            node::set_slot(buf, offset, id.slot);
            match ancestors.last() {
                Some(&(_, parent)) => {
                    node::set_parent(buf, offset, parent);
                    node::set_ref_count(buf, offset, 0);
                }
                None => {
                    node::set_parent(buf, offset, NO_PARENT);
                    node::set_ref_count(buf, offset, 1);
                    root = Some(id);
                }
            }
            ancestors.push((offset + header.size, id.slot));
            offset = header.children_start(offset);
        }
        self.counters.observe_live_bytes(self.arena.live_end());
        let root = root.ok_or_else(|| Violation::Corrupted {
            detail: format!("clone of {} produced no root", handle.id()),
        })?;
        trace!(source = %handle.id(), clone = %root, size, "node cloned");
        Ok(Handle::new(root))
    }

    /// Take one more reference on the node behind `handle`.
    pub fn retain(&mut self, handle: &Handle) -> Result<Handle, PoolError> {
        self.retain_id(handle.id())
    }

    /// Take a reference on the node with identifier `id`.
    pub fn retain_id(&mut self, id: NodeId) -> Result<Handle, PoolError> {
        let offset = self.resolve(id)?;
        let count = self.header_at(offset).ref_count;
        let count = count
            .checked_add(1)
            .ok_or(Rejection::TooManyReferences { node: id })?;
        node::set_ref_count(self.arena.bytes_mut(), offset, count);
        Ok(Handle::new(id))
    }

    /// Give back the reference held by `handle`.
    ///
    /// A root whose count reaches zero is destroyed together with its
    /// descendants and the arena is compacted over it. A frozen root is
    /// kept until its checkpoint closes. A contained node stays anchored by
    /// its parent.
    pub fn release(&mut self, handle: Handle) -> Result<(), PoolError> {
        let id = handle.id();
        let offset = self.resolve(id)?;
        let header = self.header_at(offset);
        let count = header.ref_count.checked_sub(1).ok_or_else(|| Violation::Corrupted {
            detail: format!("release of {id} with no outstanding reference"),
        })?;
        node::set_ref_count(self.arena.bytes_mut(), offset, count);
        if count > 0 || !header.is_root() {
            return Ok(());
        }
        if offset < self.topmost_watermark() {
            self.deferred.push(id);
            self.counters.deferred_releases += 1;
            debug!(node = %id, offset, "frozen root release deferred");
            return Ok(());
        }
        self.destroy_root(offset);
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────

    /// Destroy the root at `offset` with all descendants and compact.
    pub(crate) fn destroy_root(&mut self, offset: u32) {
        let size = self.header_at(offset).size;
        let released = self.release_slots_in(offset, offset + size);
        self.arena.close_gap(offset + size, size, &mut self.table);
        trace!(offset, size, released, "root destroyed");
    }

    /// Release the identifier of every node in `[from, to)`.
    pub(crate) fn release_slots_in(&mut self, from: u32, to: u32) -> usize {
        let mut released = 0;
        let mut offset = from;
        while offset < to {
            let header = self.header_at(offset);
            if self.table.release(header.slot) {
                released += 1;
            }
            offset = header.children_start(offset);
        }
        released
    }

    /// Re-register every node whose header lies in `[from, to)`.
    pub(crate) fn reindex(&mut self, from: u32, to: u32) {
        let mut offset = from;
        while offset < to {
            let header = self.header_at(offset);
            self.table.relocate(header.slot, offset);
            offset = header.children_start(offset);
        }
    }

    /// Move the `len` bytes of a root tree at `offset` to `dst`, returning
    /// the tree's new offset.
    pub(crate) fn move_range(&mut self, offset: u32, len: u32, dst: u32) -> u32 {
        if dst == offset || dst == offset + len {
            return offset;
        }
        let moved = self.arena.relocate(offset, len, dst);
        let (lo, hi) = if dst < offset {
            (dst, offset + len)
        } else {
            (offset, dst)
        };
        self.reindex(lo, hi);
        moved
    }

    pub(crate) fn move_to_end(&mut self, offset: u32, len: u32) -> u32 {
        let end = self.arena.live_end();
        self.move_range(offset, len, end)
    }

    /// Add `delta` to the size of the node in `slot` and all its ancestors.
    pub(crate) fn adjust_ancestor_sizes(&mut self, slot: u32, delta: i64) -> Result<(), PoolError> {
        let mut slot = slot;
        while slot != NO_PARENT {
            let offset = self.slot_offset(slot)?;
            let header = self.header_at(offset);
            let size = (header.size as i64 + delta) as u32;
            node::set_size(self.arena.bytes_mut(), offset, size);
            slot = header.parent;
        }
        Ok(())
    }

    /// Slot of the root of the tree containing `slot`.
    pub(crate) fn root_slot_of(&self, slot: u32) -> Result<u32, PoolError> {
        let mut slot = slot;
        loop {
            let parent = self.header_at(self.slot_offset(slot)?).parent;
            if parent == NO_PARENT {
                return Ok(slot);
            }
            slot = parent;
        }
    }

    /// Destroy deferred roots that are no longer frozen.
    pub(crate) fn reclaim_deferred(&mut self) {
        if self.deferred.is_empty() {
            return;
        }
        let watermark = self.topmost_watermark();
        for id in std::mem::take(&mut self.deferred) {
            let Some(offset) = self.table.resolve(id) else {
                continue;
            };
            let header = self.header_at(offset);
            if header.ref_count > 0 || !header.is_root() {
                continue;
            }
            if offset < watermark {
                self.deferred.push(id);
                continue;
            }
            debug!(node = %id, offset, "deferred root reclaimed");
            self.destroy_root(offset);
        }
    }
}

impl std::fmt::Debug for TreePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreePool")
            .field("instance", &self.instance)
            .field("capacity", &self.arena.capacity())
            .field("live_bytes", &self.arena.live_end())
            .field("live_nodes", &self.table.live_count())
            .field("checkpoints", &self.checkpoints.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF: TypeTag = TypeTag(1);
    const PAIR: TypeTag = TypeTag(2);

    fn pool(capacity: u32) -> TreePool {
        TreePool::with_capacity(capacity).unwrap()
    }

    #[test]
    fn create_leaf_occupies_header_plus_payload() {
        let mut p = pool(256);
        let h = p.create_node(LEAF, &[1, 2, 3], &[]).unwrap();
        assert_eq!(p.live_byte_size(), HEADER_SIZE + 3);
        assert_eq!(p.live_node_count(), 1);
        assert_eq!(p.payload(&h).unwrap(), &[1, 2, 3]);
        assert_eq!(p.ref_count(&h).unwrap(), 1);
        assert_eq!(p.parent(&h).unwrap(), None);
    }

    #[test]
    fn create_adopts_children_in_order() {
        let mut p = pool(256);
        let a = p.create_node(LEAF, &[1], &[]).unwrap();
        let b = p.create_node(LEAF, &[2], &[]).unwrap();
        let root = p.create_node(PAIR, &[], &[&b, &a]).unwrap();

        let view = p.node(&root).unwrap();
        assert_eq!(view.offset(), 0);
        assert_eq!(view.size(), 3 * HEADER_SIZE + 2);
        let payloads: Vec<_> = view.children().map(|c| c.payload()[0]).collect();
        assert_eq!(payloads, vec![2, 1]);
        assert_eq!(p.parent(&a).unwrap(), Some(root.id()));
        assert_eq!(p.payload(&a).unwrap(), &[1]);
    }

    #[test]
    fn contained_or_repeated_children_are_rejected() {
        let mut p = pool(256);
        let a = p.create_node(LEAF, &[], &[]).unwrap();
        let err = p.create_node(PAIR, &[], &[&a, &a]).unwrap_err();
        assert_eq!(err, Rejection::DuplicateChild { node: a.id() }.into());

        let _root = p.create_node(PAIR, &[], &[&a]).unwrap();
        let err = p.create_node(PAIR, &[], &[&a]).unwrap_err();
        assert_eq!(err, Rejection::AlreadyContained { node: a.id() }.into());
    }

    #[test]
    fn create_without_room_changes_nothing() {
        let mut p = pool(HEADER_SIZE * 2);
        let a = p.create_node(LEAF, &[], &[]).unwrap();
        let err = p.create_node(PAIR, &[0; 4], &[&a]).unwrap_err();
        assert!(matches!(err, PoolError::OutOfMemory { requested: 24, .. }));
        assert_eq!(p.live_byte_size(), HEADER_SIZE);
        assert_eq!(p.parent(&a).unwrap(), None);
        assert_eq!(p.stats().allocation_failures, 1);
    }

    #[test]
    fn release_to_zero_destroys_and_compacts() {
        let mut p = pool(256);
        let a = p.create_node(LEAF, &[7; 4], &[]).unwrap();
        let b = p.create_node(LEAF, &[9; 2], &[]).unwrap();
        p.release(a).unwrap();
        assert_eq!(p.live_node_count(), 1);
        assert_eq!(p.live_byte_size(), HEADER_SIZE + 2);
        assert_eq!(p.node(&b).unwrap().offset(), 0);
        assert_eq!(p.payload(&b).unwrap(), &[9, 9]);
    }

    #[test]
    fn retained_node_survives_one_release() {
        let mut p = pool(256);
        let a = p.create_node(LEAF, &[], &[]).unwrap();
        let again = p.retain(&a).unwrap();
        assert_eq!(again, a);
        p.release(a).unwrap();
        assert!(p.contains(&again));
        p.release(again).unwrap();
        assert_eq!(p.live_node_count(), 0);
    }

    #[test]
    fn released_handle_is_stale() {
        let mut p = pool(256);
        let a = p.create_node(LEAF, &[], &[]).unwrap();
        let id = a.id();
        p.release(a).unwrap();
        let err = p.node_by_id(id).unwrap_err();
        assert_eq!(err, Violation::StaleHandle { node: id }.into());
    }

    #[test]
    fn clone_is_a_fresh_root() {
        let mut p = pool(512);
        let a = p.create_node(LEAF, &[1], &[]).unwrap();
        let root = p.create_node(PAIR, &[5], &[&a]).unwrap();
        let copy = p.clone_node(&a).unwrap();
        assert_ne!(copy.id(), a.id());
        assert_eq!(p.parent(&copy).unwrap(), None);
        assert_eq!(p.ref_count(&copy).unwrap(), 1);

        let deep = p.clone_node(&root).unwrap();
        let view = p.node(&deep).unwrap();
        assert_eq!(view.child_count(), 1);
        let child = view.child(0).unwrap();
        assert_eq!(child.ref_count(), 0);
        assert_ne!(child.id(), a.id());
        assert_eq!(child.payload(), &[1]);
        assert_eq!(p.live_node_count(), 5);
    }

    #[test]
    fn shutdown_empties_everything() {
        let mut p = pool(256);
        let a = p.create_node(LEAF, &[], &[]).unwrap();
        let _cp = p.open_checkpoint();
        p.shutdown();
        assert_eq!(p.live_byte_size(), 0);
        assert_eq!(p.live_node_count(), 0);
        assert_eq!(p.checkpoint_depth(), 0);
        assert!(!p.contains(&a));
    }

    #[test]
    fn payload_length_is_bounded() {
        assert!(TreePool::checked_payload_len(16).is_ok());
        assert_eq!(
            TreePool::checked_payload_len(u32::MAX as usize),
            Err(Rejection::PayloadTooLarge {
                len: u32::MAX as usize
            }
            .into())
        );
    }
}
