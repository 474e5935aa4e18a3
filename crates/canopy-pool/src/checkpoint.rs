//! The checkpoint stack.
//!
//! A checkpoint records the arena's fill level (its watermark). Rolling it
//! back truncates the arena to that level and releases the identifier of
//! every node past it; discarding it commits. Checkpoints close strictly
//! LIFO.
//!
//! While a checkpoint is open, nodes below its watermark are frozen: they
//! cannot move or change shape, only gain or lose references. That is what
//! makes truncation an exact restore.
//!
//! ```text
//! 0            wm(C1)          wm(C2)              live_end
//! ├──────────────┼───────────────┼────────────────────┤
//!   frozen by C1   frozen by C2     editable
//! ```

use std::error::Error;
use std::fmt;

use canopy_core::{PoolError, PoolInstanceId, Violation};
use tracing::debug;

use crate::pool::TreePool;

/// What a checkpoint does when an unwind passes through it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointKind {
    /// Rolled back and closed by an unwind.
    Plain,
    /// Catches an unwind: rolled back, closed and marked tripped.
    UnwindBoundary,
}

/// Token for an open checkpoint.
///
/// Obtained from [`TreePool::open_checkpoint`] or
/// [`TreePool::open_unwind_boundary`] and consumed by
/// [`TreePool::discard`] or [`TreePool::rollback`]. A token whose
/// checkpoint was already closed by an unwind can still be passed to
/// either; the call does nothing.
#[derive(Debug)]
#[must_use = "an open checkpoint must be discarded or rolled back"]
pub struct Checkpoint {
    pool: PoolInstanceId,
    serial: u64,
    watermark: u32,
    kind: CheckpointKind,
}

impl Checkpoint {
    /// Position of this checkpoint in the pool's opening order.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Arena fill level when this checkpoint was opened.
    pub fn watermark(&self) -> u32 {
        self.watermark
    }

    /// Plain checkpoint or unwind boundary.
    pub fn kind(&self) -> CheckpointKind {
        self.kind
    }

    /// Whether this checkpoint catches unwinds.
    pub fn is_unwind_boundary(&self) -> bool {
        self.kind == CheckpointKind::UnwindBoundary
    }
}

/// A checkpoint that could not be closed, handed back with the reason.
///
/// The frame is still open; close it in order with the returned token.
/// Converts into [`PoolError`] for `?`.
#[derive(Debug)]
pub struct CloseError {
    /// The token that was passed in.
    pub checkpoint: Checkpoint,
    /// Why the checkpoint was not closed.
    pub error: PoolError,
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "checkpoint {} not closed: {}", self.checkpoint.serial, self.error)
    }
}

impl Error for CloseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

impl From<CloseError> for PoolError {
    fn from(e: CloseError) -> Self {
        e.error
    }
}

/// Stack entry for an open checkpoint.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Frame {
    pub serial: u64,
    pub watermark: u32,
    pub kind: CheckpointKind,
}

impl TreePool {
    /// Open a checkpoint at the current fill level.
    pub fn open_checkpoint(&mut self) -> Checkpoint {
        self.push_frame(CheckpointKind::Plain)
    }

    pub(crate) fn push_frame(&mut self, kind: CheckpointKind) -> Checkpoint {
        self.reclaim_deferred();
        let serial = self.next_serial;
        self.next_serial += 1;
        let watermark = self.arena.live_end();
        self.checkpoints.push(Frame {
            serial,
            watermark,
            kind,
        });
        debug!(
            serial,
            watermark,
            ?kind,
            depth = self.checkpoints.len(),
            "checkpoint opened"
        );
        Checkpoint {
            pool: self.instance,
            serial,
            watermark,
            kind,
        }
    }

    /// Number of open checkpoints, boundaries included.
    pub fn checkpoint_depth(&self) -> usize {
        self.checkpoints.len()
    }

    /// Commit the topmost checkpoint, keeping everything done since it
    /// opened.
    ///
    /// A token that is not topmost, or belongs to another pool, comes back
    /// inside the [`CloseError`].
    pub fn discard(&mut self, checkpoint: Checkpoint) -> Result<(), CloseError> {
        let popped = match self.pop_frame(&checkpoint) {
            Ok(popped) => popped,
            Err(error) => return Err(CloseError { checkpoint, error }),
        };
        if popped.is_none() {
            return Ok(());
        }
        debug!(
            serial = checkpoint.serial,
            depth = self.checkpoints.len(),
            "checkpoint discarded"
        );
        self.reclaim_deferred();
        Ok(())
    }

    /// Undo everything since the topmost checkpoint opened.
    ///
    /// Every node created or moved past the watermark is released and the
    /// arena is truncated to the watermark. Refused tokens come back as
    /// for [`TreePool::discard`].
    pub fn rollback(&mut self, checkpoint: Checkpoint) -> Result<(), CloseError> {
        let frame = match self.pop_frame(&checkpoint) {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(error) => return Err(CloseError { checkpoint, error }),
        };
        let released = self.truncate_to(frame.watermark);
        self.counters.rollbacks += 1;
        debug!(
            serial = frame.serial,
            watermark = frame.watermark,
            released,
            depth = self.checkpoints.len(),
            "checkpoint rolled back"
        );
        Ok(())
    }

    /// Pop the frame for `checkpoint` if it is topmost.
    ///
    /// `Ok(None)` means the checkpoint was already closed by an unwind.
    fn pop_frame(&mut self, checkpoint: &Checkpoint) -> Result<Option<Frame>, PoolError> {
        if checkpoint.pool != self.instance {
            return Err(Violation::ForeignCheckpoint.into());
        }
        let Some(top) = self.checkpoints.last() else {
            self.clear_tripped(checkpoint.serial);
            return Ok(None);
        };
        if top.serial == checkpoint.serial {
            return Ok(self.checkpoints.pop());
        }
        if self
            .checkpoints
            .iter()
            .any(|frame| frame.serial == checkpoint.serial)
        {
            return Err(Violation::CheckpointOrder {
                closing: checkpoint.serial,
                topmost: top.serial,
            }
            .into());
        }
        self.clear_tripped(checkpoint.serial);
        Ok(None)
    }

    fn clear_tripped(&mut self, serial: u64) {
        if self.tripped.is_some_and(|(tripped, _)| tripped == serial) {
            self.tripped = None;
        }
    }

    /// Release every node at or past `watermark` and truncate the arena.
    /// Returns the number of identifiers released.
    pub(crate) fn truncate_to(&mut self, watermark: u32) -> usize {
        let released = self.release_slots_in(watermark, self.arena.live_end());
        self.arena.truncate(watermark);
        let table = &self.table;
        self.deferred.retain(|&id| table.resolve(id).is_some());
        released
    }

    /// Roll back and close every frame down to and including `serial`.
    /// Returns the number of frames closed.
    pub(crate) fn close_through(&mut self, serial: u64) -> usize {
        let Some(index) = self
            .checkpoints
            .iter()
            .rposition(|frame| frame.serial == serial)
        else {
            return 0;
        };
        let watermark = self.checkpoints[index].watermark;
        let closed = self.checkpoints.len() - index;
        self.checkpoints.truncate(index);
        let released = self.truncate_to(watermark);
        self.counters.rollbacks += closed as u64;
        debug!(serial, watermark, closed, released, "checkpoints closed");
        closed
    }
}

#[cfg(test)]
mod tests {
    use canopy_core::TypeTag;

    use super::*;
    use crate::node::HEADER_SIZE;

    const LEAF: TypeTag = TypeTag(1);

    fn pool() -> TreePool {
        TreePool::with_capacity(1024).unwrap()
    }

    #[test]
    fn rollback_restores_counts() {
        let mut p = pool();
        let _keep = p.create_node(LEAF, &[1], &[]).unwrap();
        let cp = p.open_checkpoint();
        assert_eq!(cp.watermark(), HEADER_SIZE + 1);
        for i in 0..5 {
            let _ = p.create_node(LEAF, &[i; 3], &[]).unwrap();
        }
        p.rollback(cp).unwrap();
        assert_eq!(p.live_node_count(), 1);
        assert_eq!(p.live_byte_size(), HEADER_SIZE + 1);
        assert_eq!(p.stats().rollbacks, 1);
    }

    #[test]
    fn discard_keeps_work() {
        let mut p = pool();
        let cp = p.open_checkpoint();
        let a = p.create_node(LEAF, &[], &[]).unwrap();
        p.discard(cp).unwrap();
        assert!(p.contains(&a));
        assert_eq!(p.checkpoint_depth(), 0);
    }

    #[test]
    fn closing_out_of_order_is_a_violation() {
        let mut p = pool();
        let outer = p.open_checkpoint();
        let inner = p.open_checkpoint();
        let (outer_serial, inner_serial) = (outer.serial(), inner.serial());
        let err = p.discard(outer).unwrap_err();
        assert_eq!(
            err.error,
            Violation::CheckpointOrder {
                closing: outer_serial,
                topmost: inner_serial,
            }
            .into()
        );
        assert_eq!(p.checkpoint_depth(), 2);
        p.discard(inner).unwrap();

        // The refused token still closes its frame.
        let outer = err.checkpoint;
        assert_eq!(outer.serial(), outer_serial);
        p.rollback(outer).unwrap();
        assert_eq!(p.checkpoint_depth(), 0);
    }

    #[test]
    fn refused_rollback_returns_the_token() {
        let mut p = pool();
        let outer = p.open_checkpoint();
        let _ = p.create_node(LEAF, &[1], &[]).unwrap();
        let inner = p.open_checkpoint();
        let outer = p.rollback(outer).unwrap_err().checkpoint;
        assert_eq!(p.live_byte_size(), HEADER_SIZE + 1);
        p.rollback(inner).unwrap();
        p.rollback(outer).unwrap();
        assert_eq!(p.live_byte_size(), 0);
        assert_eq!(p.checkpoint_depth(), 0);
    }

    #[test]
    fn foreign_token_is_rejected() {
        let mut a = pool();
        let mut b = pool();
        let cp = a.open_checkpoint();
        let err = b.rollback(cp).unwrap_err();
        assert_eq!(err.error, Violation::ForeignCheckpoint.into());
        assert_eq!(a.checkpoint_depth(), 1);
        a.discard(err.checkpoint).unwrap();
        assert_eq!(a.checkpoint_depth(), 0);
    }

    #[test]
    fn frozen_release_is_deferred_until_discard() {
        let mut p = pool();
        let a = p.create_node(LEAF, &[], &[]).unwrap();
        let cp = p.open_checkpoint();
        p.release(a).unwrap();
        assert_eq!(p.live_node_count(), 1);
        assert_eq!(p.stats().deferred_releases, 1);
        p.discard(cp).unwrap();
        assert_eq!(p.live_node_count(), 0);
        assert_eq!(p.live_byte_size(), 0);
    }

    #[test]
    fn frozen_release_survives_rollback() {
        let mut p = pool();
        let a = p.create_node(LEAF, &[], &[]).unwrap();
        let outer = p.open_checkpoint();
        let inner = p.open_checkpoint();
        p.release(a).unwrap();
        p.rollback(inner).unwrap();
        assert_eq!(p.live_node_count(), 1);
        p.discard(outer).unwrap();
        assert_eq!(p.live_node_count(), 0);
    }

    #[test]
    fn close_through_counts_every_frame() {
        let mut p = pool();
        let _a = p.open_checkpoint();
        let b = p.open_checkpoint();
        let _c = p.open_checkpoint();
        let _ = p.create_node(LEAF, &[], &[]).unwrap();
        assert_eq!(p.close_through(b.serial()), 2);
        assert_eq!(p.checkpoint_depth(), 1);
        assert_eq!(p.live_byte_size(), 0);
        assert_eq!(p.stats().rollbacks, 2);
        // Already closed: no-op.
        p.rollback(b).unwrap();
        assert_eq!(p.checkpoint_depth(), 1);
    }
}
