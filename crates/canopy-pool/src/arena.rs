//! The fixed-capacity byte arena.
//!
//! An [`Arena`] is a single pre-allocated buffer with a bump cursor
//! (`live_end`). Every byte in `[0, live_end)` belongs to exactly one node;
//! there are no gaps. Space is reclaimed by compaction ([`Arena::shift`]
//! with a negative delta) or by truncation on rollback, never by a free
//! list, so fragmentation cannot cause an allocation failure.

use canopy_core::PoolError;
use tracing::trace;

use crate::table::IdentifierTable;

/// Contiguous byte buffer holding all live nodes.
///
/// The backing storage is allocated to full capacity at creation and never
/// reallocated.
pub struct Arena {
    /// Backing storage. `data.len()` is the capacity.
    data: Vec<u8>,
    /// Offset of the first free byte.
    live_end: u32,
}

impl Arena {
    /// Create a zero-filled arena of `capacity` bytes.
    pub fn new(capacity: u32) -> Self {
        Self {
            data: vec![0; capacity as usize],
            live_end: 0,
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> u32 {
        self.data.len() as u32
    }

    /// Offset of the first free byte, i.e. the number of live bytes.
    pub fn live_end(&self) -> u32 {
        self.live_end
    }

    /// Bytes still available for allocation.
    pub fn free_bytes(&self) -> u32 {
        self.capacity() - self.live_end
    }

    /// Check that `size` more bytes would fit, without allocating.
    pub fn ensure(&self, size: u32) -> Result<(), PoolError> {
        if size > self.free_bytes() {
            return Err(PoolError::OutOfMemory {
                requested: size as usize,
                available: self.free_bytes() as usize,
            });
        }
        Ok(())
    }

    /// Bump-allocate `size` zeroed bytes at `live_end`.
    ///
    /// Returns the offset of the allocation, or `OutOfMemory` if
    /// `live_end + size` would exceed the capacity.
    pub fn allocate(&mut self, size: u32) -> Result<u32, PoolError> {
        self.ensure(size)?;
        let offset = self.live_end;
        self.live_end += size;
        self.data[offset as usize..self.live_end as usize].fill(0);
        Ok(offset)
    }

    /// Drop every byte at or past `to`.
    ///
    /// Used only by rollback. The caller must already have released every
    /// identifier whose node lies at or past `to`.
    pub fn truncate(&mut self, to: u32) {
        debug_assert!(to <= self.live_end);
        self.live_end = to;
    }

    /// Move `[from, live_end)` by `delta` bytes and rebase the identifier
    /// table accordingly.
    ///
    /// A positive delta opens a gap (see [`Arena::open_gap`]); a negative
    /// delta compacts (see [`Arena::close_gap`]). Cost is proportional to
    /// the number of bytes after `from`.
    pub fn shift(
        &mut self,
        from: u32,
        delta: i64,
        table: &mut IdentifierTable,
    ) -> Result<(), PoolError> {
        if delta >= 0 {
            let grow = u32::try_from(delta).map_err(|_| PoolError::OutOfMemory {
                requested: delta as usize,
                available: self.free_bytes() as usize,
            })?;
            self.open_gap(from, grow, table)
        } else {
            self.close_gap(from, delta.unsigned_abs() as u32, table);
            Ok(())
        }
    }

    /// Open a zero-filled gap of `len` bytes at `at`, pushing
    /// `[at, live_end)` right. Fails without touching anything if the
    /// arena cannot grow by `len`.
    pub fn open_gap(
        &mut self,
        at: u32,
        len: u32,
        table: &mut IdentifierTable,
    ) -> Result<(), PoolError> {
        debug_assert!(at <= self.live_end);
        if len == 0 {
            return Ok(());
        }
        self.ensure(len)?;
        let (start, end, len_usize) = (at as usize, self.live_end as usize, len as usize);
        self.data.copy_within(start..end, start + len_usize);
        self.data[start..start + len_usize].fill(0);
        self.live_end += len;
        table.rebase_from(at, len as i64);
        trace!(at, len, live_end = self.live_end, "arena gap opened");
        Ok(())
    }

    /// Slide `[from, live_end)` left by `len` bytes, overwriting the `len`
    /// bytes just before `from`. The caller must already have released the
    /// identifiers of any node stored there.
    pub fn close_gap(&mut self, from: u32, len: u32, table: &mut IdentifierTable) {
        debug_assert!(len <= from && from <= self.live_end);
        if len == 0 {
            return;
        }
        let (start, end) = (from as usize, self.live_end as usize);
        self.data.copy_within(start..end, start - len as usize);
        self.live_end -= len;
        table.rebase_from(from, -(len as i64));
        trace!(from, len, live_end = self.live_end, "arena gap closed");
    }

    /// Move the `len` bytes at `src` so that they land at `dst`, sliding the
    /// bytes in between to close the hole. Returns the new offset of the
    /// moved range.
    ///
    /// `dst` is expressed in pre-move coordinates and must not fall strictly
    /// inside `[src, src + len)`. The identifier table is not updated; the
    /// caller re-registers every node in the touched span.
    pub fn relocate(&mut self, src: u32, len: u32, dst: u32) -> u32 {
        let (src, len, dst_usize) = (src as usize, len as usize, dst as usize);
        if dst_usize <= src {
            self.data[dst_usize..src + len].rotate_right(len);
            dst
        } else {
            debug_assert!(dst_usize >= src + len);
            self.data[src..dst_usize].rotate_left(len);
            (dst_usize - len) as u32
        }
    }

    /// The live region `[0, live_end)`.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.live_end as usize]
    }

    /// Mutable view of the live region.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.live_end as usize]
    }

    /// Copy `len` live bytes from `src` to `dst`. Both ranges must be live.
    pub fn copy_within(&mut self, src: u32, len: u32, dst: u32) {
        let src = src as usize;
        self.bytes_mut()
            .copy_within(src..src + len as usize, dst as usize);
    }
}
