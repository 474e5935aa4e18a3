//! Structural edits on contained children and payloads.
//!
//! Edits move bytes with [`Arena::relocate`](crate::arena::Arena::relocate)
//! or open and close gaps, then fix up the identifier table and the sizes
//! of every ancestor. A node that is detached from its parent with no
//! outstanding handle is destroyed; one that is still referenced becomes a
//! root at the end of the arena.
//!
//! All edits refuse frozen nodes and check capacity up front, so a failed
//! edit leaves the arena untouched.

use canopy_core::{NodeId, PoolError, Rejection, TypeTag};
use smallvec::SmallVec;
use tracing::trace;

use crate::handle::Handle;
use crate::node::{self, child_offsets, Header, NO_PARENT};
use crate::pool::TreePool;

impl TreePool {
    /// Number of direct children of the node behind `parent`.
    pub fn child_count(&self, parent: &Handle) -> Result<usize, PoolError> {
        let offset = self.resolve(parent.id())?;
        Ok(child_offsets(self.arena.bytes(), offset).len())
    }

    /// A new handle on the `index`-th child of `parent`.
    pub fn child_at(&mut self, parent: &Handle, index: usize) -> Result<Handle, PoolError> {
        let offset = self.resolve(parent.id())?;
        let children = child_offsets(self.arena.bytes(), offset);
        let child = *children
            .get(index)
            .ok_or(Rejection::ChildIndexOutOfRange {
                index,
                child_count: children.len(),
            })?;
        let id = self.slot_id(self.header_at(child).slot)?;
        self.retain_id(id)
    }

    /// Insert the root `child` as the `index`-th child of `parent`.
    ///
    /// `index == child_count` appends. The child keeps its handles and
    /// reference count. Inserting a tree into itself is rejected.
    pub fn insert_child(
        &mut self,
        parent: &Handle,
        index: usize,
        child: &Handle,
    ) -> Result<(), PoolError> {
        let parent_offset = self.resolve(parent.id())?;
        let child_offset = self.resolve(child.id())?;
        self.ensure_unfrozen(parent.id(), parent_offset)?;
        self.ensure_unfrozen(child.id(), child_offset)?;
        let child_header = self.header_at(child_offset);
        if !child_header.is_root() {
            return Err(Rejection::AlreadyContained { node: child.id() }.into());
        }
        if self.root_slot_of(parent.id().slot)? == child.id().slot {
            return Err(Rejection::WouldCreateCycle { node: child.id() }.into());
        }
        let children = child_offsets(self.arena.bytes(), parent_offset);
        let dst = match index {
            i if i < children.len() => children[i],
            i if i == children.len() => parent_offset + self.header_at(parent_offset).size,
            _ => {
                return Err(Rejection::ChildIndexOutOfRange {
                    index,
                    child_count: children.len(),
                }
                .into())
            }
        };

        let len = child_header.size;
        let moved = self.move_range(child_offset, len, dst);
        node::set_parent(self.arena.bytes_mut(), moved, parent.id().slot);
        self.adjust_ancestor_sizes(parent.id().slot, len as i64)?;
        trace!(parent = %parent.id(), child = %child.id(), index, len, "child inserted");
        Ok(())
    }

    /// Detach the `index`-th child of `parent`.
    ///
    /// The child is destroyed if nothing references it; otherwise it
    /// becomes a root at the end of the arena and its handles stay valid.
    pub fn remove_child(&mut self, parent: &Handle, index: usize) -> Result<(), PoolError> {
        let parent_offset = self.resolve(parent.id())?;
        self.ensure_unfrozen(parent.id(), parent_offset)?;
        let children = child_offsets(self.arena.bytes(), parent_offset);
        let child_offset = *children
            .get(index)
            .ok_or(Rejection::ChildIndexOutOfRange {
                index,
                child_count: children.len(),
            })?;
        self.detach(parent.id().slot, child_offset)?;
        trace!(parent = %parent.id(), index, "child removed");
        Ok(())
    }

    /// Replace the `index`-th child of `parent` with the root `new_child`.
    ///
    /// The previous occupant is detached as by [`TreePool::remove_child`].
    pub fn replace_child(
        &mut self,
        parent: &Handle,
        index: usize,
        new_child: &Handle,
    ) -> Result<(), PoolError> {
        let child_count = self.child_count(parent)?;
        if index >= child_count {
            return Err(Rejection::ChildIndexOutOfRange { index, child_count }.into());
        }
        self.insert_child(parent, index, new_child)?;
        self.remove_child(parent, index + 1)
    }

    /// Grow or shrink the payload of `node` to `new_len` bytes.
    ///
    /// Growth is zero-filled; shrinking drops trailing bytes. Children
    /// follow the payload and move with it.
    pub fn resize_node(&mut self, node: &Handle, new_len: usize) -> Result<(), PoolError> {
        let offset = self.resolve(node.id())?;
        self.ensure_unfrozen(node.id(), offset)?;
        let new_len = Self::checked_payload_len(new_len)?;
        let header = self.header_at(offset);
        let old_len = header.payload_len;
        if new_len == old_len {
            return Ok(());
        }
        let payload_end = header.children_start(offset);
        if new_len > old_len {
            if let Err(err) = self.arena.ensure(new_len - old_len) {
                return Err(self.fail_allocation(err));
            }
            self.arena
                .open_gap(payload_end, new_len - old_len, &mut self.table)?;
        } else {
            self.arena
                .close_gap(payload_end, old_len - new_len, &mut self.table);
        }
        let delta = new_len as i64 - old_len as i64;
        let buf = self.arena.bytes_mut();
        node::set_payload_len(buf, offset, new_len);
        node::set_size(buf, offset, (header.size as i64 + delta) as u32);
        self.adjust_ancestor_sizes(header.parent, delta)?;
        self.counters.observe_live_bytes(self.arena.live_end());
        trace!(node = %node.id(), old_len, new_len, "payload resized");
        Ok(())
    }

    /// Replace the payload of `node` with `payload`, resizing as needed.
    pub fn write_payload(&mut self, node: &Handle, payload: &[u8]) -> Result<(), PoolError> {
        self.resize_node(node, payload.len())?;
        let start = Header::payload_start(self.resolve(node.id())?) as usize;
        self.arena.bytes_mut()[start..start + payload.len()].copy_from_slice(payload);
        Ok(())
    }

    /// Turn `node` into a childless node of type `tag` with `payload`.
    ///
    /// Used by reduction rules to rewrite a subtree in place: handles on
    /// `node` keep naming it, former children are detached.
    pub fn rewrite_node(
        &mut self,
        node: &Handle,
        tag: TypeTag,
        payload: &[u8],
    ) -> Result<(), PoolError> {
        let offset = self.resolve(node.id())?;
        self.ensure_unfrozen(node.id(), offset)?;
        let new_len = Self::checked_payload_len(payload.len())?;
        let old_len = self.header_at(offset).payload_len;
        // Unreferenced children are destroyed before the payload grows;
        // referenced ones only move.
        let freed: i64 = child_offsets(self.arena.bytes(), offset)
            .into_iter()
            .map(|child| self.header_at(child))
            .filter(|header| header.ref_count == 0)
            .map(|header| header.size as i64)
            .sum();
        let growth = new_len as i64 - old_len as i64 - freed;
        if growth > 0 {
            if let Err(err) = self.arena.ensure(growth as u32) {
                return Err(self.fail_allocation(err));
            }
        }
        loop {
            let offset = self.resolve(node.id())?;
            let first = child_offsets(self.arena.bytes(), offset).first().copied();
            match first {
                Some(child) => self.detach(node.id().slot, child)?,
                None => break,
            }
        }
        self.write_payload(node, payload)?;
        let offset = self.resolve(node.id())?;
        node::set_tag(self.arena.bytes_mut(), offset, tag);
        Ok(())
    }

    /// Cut the child at `child_offset` out of the tree whose node in
    /// `parent_slot` contains it.
    fn detach(&mut self, parent_slot: u32, child_offset: u32) -> Result<(), PoolError> {
        let header = self.header_at(child_offset);
        self.adjust_ancestor_sizes(parent_slot, -(header.size as i64))?;
        node::set_parent(self.arena.bytes_mut(), child_offset, NO_PARENT);
        if header.ref_count == 0 {
            self.destroy_root(child_offset);
        } else {
            self.move_to_end(child_offset, header.size);
        }
        Ok(())
    }

    /// Identifiers of the direct children of `parent`, in order.
    pub fn child_ids(&self, parent: &Handle) -> Result<SmallVec<[NodeId; 8]>, PoolError> {
        let offset = self.resolve(parent.id())?;
        child_offsets(self.arena.bytes(), offset)
            .into_iter()
            .map(|child| self.slot_id(self.header_at(child).slot))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use canopy_core::Violation;

    use super::*;
    use crate::node::HEADER_SIZE;

    const LEAF: TypeTag = TypeTag(1);
    const LIST: TypeTag = TypeTag(2);

    fn pool() -> TreePool {
        TreePool::with_capacity(1024).unwrap()
    }

    fn leaf(p: &mut TreePool, byte: u8) -> Handle {
        p.create_node(LEAF, &[byte], &[]).unwrap()
    }

    fn payloads(p: &TreePool, h: &Handle) -> Vec<u8> {
        p.node(h)
            .unwrap()
            .children()
            .map(|c| c.payload()[0])
            .collect()
    }

    #[test]
    fn insert_at_front_middle_and_end() {
        let mut p = pool();
        let a = leaf(&mut p, 1);
        let list = p.create_node(LIST, &[], &[&a]).unwrap();
        let b = leaf(&mut p, 2);
        let c = leaf(&mut p, 3);
        let d = leaf(&mut p, 4);
        p.insert_child(&list, 1, &b).unwrap();
        p.insert_child(&list, 0, &c).unwrap();
        p.insert_child(&list, 1, &d).unwrap();
        assert_eq!(payloads(&p, &list), vec![3, 4, 1, 2]);
        assert_eq!(p.node(&list).unwrap().size(), HEADER_SIZE + 4 * (HEADER_SIZE + 1));
        assert_eq!(p.parent(&d).unwrap(), Some(list.id()));
        p.check_integrity().unwrap();
    }

    #[test]
    fn insert_from_before_the_parent() {
        let mut p = pool();
        let early = leaf(&mut p, 9);
        let list = p.create_node(LIST, &[], &[]).unwrap();
        p.insert_child(&list, 0, &early).unwrap();
        assert_eq!(p.node(&list).unwrap().offset(), 0);
        assert_eq!(payloads(&p, &list), vec![9]);
        p.check_integrity().unwrap();
    }

    #[test]
    fn insert_rejects_cycles_and_bad_indices() {
        let mut p = pool();
        let a = leaf(&mut p, 1);
        let list = p.create_node(LIST, &[], &[&a]).unwrap();
        let err = p.insert_child(&a, 0, &list).unwrap_err();
        assert_eq!(err, Rejection::WouldCreateCycle { node: list.id() }.into());

        let b = leaf(&mut p, 2);
        let err = p.insert_child(&list, 5, &b).unwrap_err();
        assert_eq!(
            err,
            Rejection::ChildIndexOutOfRange {
                index: 5,
                child_count: 1
            }
            .into()
        );
        let err = p.insert_child(&list, 0, &a).unwrap_err();
        assert_eq!(err, Rejection::AlreadyContained { node: a.id() }.into());
    }

    #[test]
    fn remove_unreferenced_child_destroys_it() {
        let mut p = pool();
        let a = leaf(&mut p, 1);
        let b = leaf(&mut p, 2);
        let list = p.create_node(LIST, &[], &[&a, &b]).unwrap();
        let a_id = a.id();
        p.release(a).unwrap();
        p.remove_child(&list, 0).unwrap();
        assert_eq!(payloads(&p, &list), vec![2]);
        assert_eq!(p.live_node_count(), 2);
        assert!(p.node_by_id(a_id).is_err());
        assert_eq!(p.live_byte_size(), 2 * HEADER_SIZE + 1);
    }

    #[test]
    fn remove_referenced_child_makes_it_a_root() {
        let mut p = pool();
        let a = leaf(&mut p, 1);
        let list = p.create_node(LIST, &[], &[&a]).unwrap();
        p.remove_child(&list, 0).unwrap();
        assert_eq!(p.parent(&a).unwrap(), None);
        assert_eq!(p.child_count(&list).unwrap(), 0);
        assert_eq!(p.payload(&a).unwrap(), &[1]);
        assert_eq!(p.node(&list).unwrap().size(), HEADER_SIZE);
        p.check_integrity().unwrap();
    }

    #[test]
    fn replace_swaps_occupant() {
        let mut p = pool();
        let a = leaf(&mut p, 1);
        let b = leaf(&mut p, 2);
        let list = p.create_node(LIST, &[], &[&a, &b]).unwrap();
        let big = p.create_node(LEAF, &[7, 7, 7], &[]).unwrap();
        p.replace_child(&list, 0, &big).unwrap();
        let firsts = payloads(&p, &list);
        assert_eq!(firsts, vec![7, 2]);
        assert_eq!(p.parent(&a).unwrap(), None);
        p.check_integrity().unwrap();
    }

    #[test]
    fn resize_moves_children_and_fixes_ancestors() {
        let mut p = pool();
        let inner = leaf(&mut p, 5);
        let mid = p.create_node(LIST, &[1, 2], &[&inner]).unwrap();
        let top = p.create_node(LIST, &[], &[&mid]).unwrap();
        let before = p.node(&top).unwrap().size();

        p.resize_node(&mid, 6).unwrap();
        assert_eq!(p.payload(&mid).unwrap(), &[1, 2, 0, 0, 0, 0]);
        assert_eq!(p.payload(&inner).unwrap(), &[5]);
        assert_eq!(p.node(&top).unwrap().size(), before + 4);

        p.resize_node(&mid, 1).unwrap();
        assert_eq!(p.payload(&mid).unwrap(), &[1]);
        assert_eq!(p.node(&top).unwrap().size(), before - 1);
        p.check_integrity().unwrap();
    }

    #[test]
    fn resize_past_capacity_is_untouched() {
        let mut p = TreePool::with_capacity(HEADER_SIZE + 4).unwrap();
        let a = p.create_node(LEAF, &[1, 2], &[]).unwrap();
        let err = p.resize_node(&a, 8).unwrap_err();
        assert!(matches!(err, PoolError::OutOfMemory { .. }));
        assert_eq!(p.payload(&a).unwrap(), &[1, 2]);
    }

    #[test]
    fn rewrite_drops_children() {
        let mut p = pool();
        let a = leaf(&mut p, 1);
        let b = leaf(&mut p, 2);
        let sum = p.create_node(LIST, &[], &[&a, &b]).unwrap();
        p.release(a).unwrap();
        p.rewrite_node(&sum, LEAF, &[3]).unwrap();
        assert_eq!(p.tag(&sum).unwrap(), LEAF);
        assert_eq!(p.payload(&sum).unwrap(), &[3]);
        assert_eq!(p.child_count(&sum).unwrap(), 0);
        assert_eq!(p.parent(&b).unwrap(), None);
        assert_eq!(p.live_node_count(), 2);
        p.check_integrity().unwrap();
    }

    #[test]
    fn rewrite_that_shrinks_fits_a_full_pool() {
        let mut p = TreePool::with_capacity(3 * HEADER_SIZE + 16).unwrap();
        let a = p.create_node(LEAF, &[1; 8], &[]).unwrap();
        let b = p.create_node(LEAF, &[2; 8], &[]).unwrap();
        let sum = p.create_node(LIST, &[], &[&a, &b]).unwrap();
        p.release(a).unwrap();
        p.release(b).unwrap();
        assert_eq!(p.free_bytes(), 0);

        p.rewrite_node(&sum, LEAF, &[3; 8]).unwrap();
        assert_eq!(p.payload(&sum).unwrap(), &[3; 8]);
        assert_eq!(p.live_node_count(), 1);
        assert_eq!(p.live_byte_size(), HEADER_SIZE + 8);
        assert_eq!(p.stats().allocation_failures, 0);
        p.check_integrity().unwrap();
    }

    #[test]
    fn rewrite_counts_only_unreferenced_children_as_freed() {
        let mut p = TreePool::with_capacity(2 * HEADER_SIZE + 8).unwrap();
        let kept = p.create_node(LEAF, &[1; 8], &[]).unwrap();
        let list = p.create_node(LIST, &[], &[&kept]).unwrap();
        assert_eq!(p.free_bytes(), 0);

        let err = p.rewrite_node(&list, LEAF, &[0; 4]).unwrap_err();
        assert_eq!(
            err,
            PoolError::OutOfMemory {
                requested: 4,
                available: 0
            }
        );
        assert_eq!(p.parent(&kept).unwrap(), Some(list.id()));
        assert_eq!(p.tag(&list).unwrap(), LIST);
        p.check_integrity().unwrap();
    }

    #[test]
    fn child_at_takes_a_reference() {
        let mut p = pool();
        let a = leaf(&mut p, 1);
        let list = p.create_node(LIST, &[], &[&a]).unwrap();
        p.release(a).unwrap();
        let again = p.child_at(&list, 0).unwrap();
        assert_eq!(p.ref_count(&again).unwrap(), 1);
        assert_eq!(p.child_ids(&list).unwrap().as_slice(), &[again.id()]);
        assert!(p.child_at(&list, 1).is_err());
    }

    #[test]
    fn frozen_parent_cannot_be_edited() {
        let mut p = pool();
        let list = p.create_node(LIST, &[], &[]).unwrap();
        let _cp = p.open_checkpoint();
        let a = leaf(&mut p, 1);
        let err = p.insert_child(&list, 0, &a).unwrap_err();
        assert_eq!(
            err,
            Violation::FrozenNode {
                node: list.id(),
                offset: 0,
                watermark: HEADER_SIZE,
            }
            .into()
        );
        assert!(p.resize_node(&list, 4).is_err());
    }
}
