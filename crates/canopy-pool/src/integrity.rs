//! Full consistency check of the arena layout.
//!
//! [`TreePool::check_integrity`] re-walks every byte of the arena and
//! verifies the layout invariants:
//!
//! - the live region is a gap-free sequence of well-formed nodes;
//! - every node's size equals header + payload + the sizes of its children;
//! - every node's parent slot names the node that encloses it;
//! - every node's slot resolves through the identifier table to its offset,
//!   and the table holds no other live entries;
//! - checkpoint watermarks nest and lie within the live region;
//! - deferred releases name frozen roots without references.
//!
//! It is O(live bytes) and intended for tests and debug tooling.

use canopy_core::{PoolError, Violation};
use smallvec::SmallVec;

use crate::node::{Header, HEADER_SIZE, NO_PARENT};
use crate::pool::TreePool;

fn corrupted(detail: String) -> PoolError {
    Violation::Corrupted { detail }.into()
}

impl TreePool {
    /// Verify every layout invariant, reporting the first one broken.
    pub fn check_integrity(&self) -> Result<(), PoolError> {
        let bytes = self.arena.bytes();
        let end = self.arena.live_end();
        let mut enclosing: SmallVec<[(u32, u32); 16]> = SmallVec::new();
        let mut nodes = 0usize;
        let mut offset = 0u32;

        while offset < end {
            while enclosing.last().is_some_and(|&(until, _)| until <= offset) {
                enclosing.pop();
            }
            if end - offset < HEADER_SIZE {
                return Err(corrupted(format!("truncated header at offset {offset}")));
            }
            let header = Header::read(bytes, offset);
            let limit = enclosing.last().map_or(end, |&(until, _)| until);
            if header.size < HEADER_SIZE + header.payload_len
                || header.size > limit - offset
            {
                return Err(corrupted(format!(
                    "node at offset {offset} has size {} (payload {}, room {})",
                    header.size,
                    header.payload_len,
                    limit - offset
                )));
            }
            let expected_parent = enclosing.last().map_or(NO_PARENT, |&(_, slot)| slot);
            if header.parent != expected_parent {
                return Err(corrupted(format!(
                    "node at offset {offset} names parent {} but is enclosed by {}",
                    header.parent, expected_parent
                )));
            }
            if self.table.offset_of_slot(header.slot) != Some(offset) {
                return Err(corrupted(format!(
                    "slot {} of node at offset {offset} resolves to {:?}",
                    header.slot,
                    self.table.offset_of_slot(header.slot)
                )));
            }
            self.check_children_fill(bytes, offset, &header)?;
            nodes += 1;
            enclosing.push((offset + header.size, header.slot));
            offset = header.children_start(offset);
        }

        if nodes != self.table.live_count() {
            return Err(corrupted(format!(
                "arena holds {nodes} nodes but {} identifiers are live",
                self.table.live_count()
            )));
        }
        self.check_watermarks(end)?;
        self.check_deferred()
    }

    /// Children must tile the space after the payload exactly.
    fn check_children_fill(&self, bytes: &[u8], offset: u32, header: &Header) -> Result<(), PoolError> {
        let node_end = offset + header.size;
        let mut child = header.children_start(offset);
        while child < node_end {
            if node_end - child < HEADER_SIZE {
                return Err(corrupted(format!(
                    "children of node at offset {offset} leave a {}-byte gap",
                    node_end - child
                )));
            }
            let size = Header::read(bytes, child).size;
            if size == 0 {
                return Err(corrupted(format!("zero-sized child at offset {child}")));
            }
            child = child.saturating_add(size);
        }
        if child != node_end {
            return Err(corrupted(format!(
                "children of node at offset {offset} overrun its size by {} bytes",
                child - node_end
            )));
        }
        Ok(())
    }

    fn check_watermarks(&self, end: u32) -> Result<(), PoolError> {
        let mut previous = 0;
        for frame in &self.checkpoints {
            if frame.watermark < previous || frame.watermark > end {
                return Err(corrupted(format!(
                    "checkpoint {} watermark {} outside [{previous}, {end}]",
                    frame.serial, frame.watermark
                )));
            }
            previous = frame.watermark;
        }
        Ok(())
    }

    fn check_deferred(&self) -> Result<(), PoolError> {
        for &id in &self.deferred {
            let Some(offset) = self.table.resolve(id) else {
                return Err(corrupted(format!("deferred node {id} is not live")));
            };
            let header = self.header_at(offset);
            if !header.is_root() || header.ref_count != 0 {
                return Err(corrupted(format!(
                    "deferred node {id} is contained or still referenced"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use canopy_core::TypeTag;

    use super::*;
    use crate::node;

    #[test]
    fn fresh_and_edited_pools_are_consistent() {
        let mut p = TreePool::with_capacity(512).unwrap();
        p.check_integrity().unwrap();
        let a = p.create_node(TypeTag(1), &[1, 2], &[]).unwrap();
        let b = p.create_node(TypeTag(1), &[], &[]).unwrap();
        let root = p.create_node(TypeTag(2), &[9], &[&a, &b]).unwrap();
        let _copy = p.clone_node(&root).unwrap();
        p.check_integrity().unwrap();
    }

    #[test]
    fn broken_size_is_reported() {
        let mut p = TreePool::with_capacity(512).unwrap();
        let a = p.create_node(TypeTag(1), &[], &[]).unwrap();
        let _root = p.create_node(TypeTag(2), &[], &[&a]).unwrap();
        node::set_size(p.arena.bytes_mut(), 0, 30);
        let err = p.check_integrity().unwrap_err();
        assert!(matches!(err, PoolError::Violation(Violation::Corrupted { .. })));
    }

    #[test]
    fn wrong_parent_is_reported() {
        let mut p = TreePool::with_capacity(512).unwrap();
        let a = p.create_node(TypeTag(1), &[], &[]).unwrap();
        let _root = p.create_node(TypeTag(2), &[], &[&a]).unwrap();
        node::set_parent(p.arena.bytes_mut(), HEADER_SIZE, NO_PARENT);
        assert!(p.check_integrity().is_err());
    }
}
