//! Unwinding to the nearest boundary.
//!
//! An unwind boundary is a checkpoint that catches allocation failures and
//! interrupts. Raising an unwind rolls back every checkpoint from the top
//! of the stack down to and including the nearest boundary, marks that
//! boundary tripped and hands back the error for the caller to propagate
//! with `?`. Nothing relies on panics: the boundary's owner sees the error
//! come back out of its body.
//!
//! ```text
//!  raise ─► C4 (plain)    rolled back
//!           C3 (plain)    rolled back
//!           B2 (boundary) rolled back, tripped   ◄─ unwind stops here
//!           C1 (plain)    untouched
//! ```

use canopy_core::{PoolError, UnwindReason, Violation};
use tracing::{debug, warn};

use crate::checkpoint::{Checkpoint, CheckpointKind};
use crate::pool::TreePool;

impl TreePool {
    /// Open a checkpoint that catches unwinds.
    pub fn open_unwind_boundary(&mut self) -> Checkpoint {
        self.push_frame(CheckpointKind::UnwindBoundary)
    }

    /// Whether an unwind raised now would be caught.
    pub fn has_unwind_boundary(&self) -> bool {
        self.nearest_boundary().is_some()
    }

    fn nearest_boundary(&self) -> Option<usize> {
        self.checkpoints
            .iter()
            .rposition(|frame| frame.kind == CheckpointKind::UnwindBoundary)
    }

    /// Unwind to the nearest boundary and return the error to propagate.
    ///
    /// With no open boundary nothing is rolled back and the result is
    /// [`Violation::NoUnwindBoundary`].
    pub fn raise(&mut self, reason: UnwindReason) -> PoolError {
        let Some(index) = self.nearest_boundary() else {
            warn!(%reason, "unwind raised with no active boundary");
            return Violation::NoUnwindBoundary.into();
        };
        let serial = self.checkpoints[index].serial;
        let closed = self.close_through(serial);
        self.counters.unwinds += 1;
        self.tripped = Some((serial, reason));
        warn!(
            %reason,
            boundary = serial,
            closed,
            live_bytes = self.arena.live_end(),
            "unwound to boundary"
        );
        self.reason_error(reason)
    }

    /// Unwind as for an exhausted arena.
    pub fn raise_allocation_failure(&mut self) -> PoolError {
        self.raise(UnwindReason::PoolFull)
    }

    /// Collect the reason `boundary` was tripped, if it was.
    pub fn take_unwind(&mut self, boundary: &Checkpoint) -> Option<UnwindReason> {
        match self.tripped {
            Some((serial, reason)) if serial == boundary.serial() => {
                self.tripped = None;
                Some(reason)
            }
            _ => None,
        }
    }

    fn reason_error(&self, reason: UnwindReason) -> PoolError {
        match reason {
            UnwindReason::PoolFull => PoolError::OutOfMemory {
                requested: 0,
                available: self.arena.free_bytes() as usize,
            },
            UnwindReason::Interrupted => PoolError::Interrupted,
        }
    }

    /// Record an allocation failure and unwind if a boundary is open.
    ///
    /// Engine operations call this after their capacity check fails and
    /// before anything moved. Returns `err` for the operation to propagate.
    pub(crate) fn fail_allocation(&mut self, err: PoolError) -> PoolError {
        self.counters.allocation_failures += 1;
        warn!(error = %err, "allocation failed");
        if self.has_unwind_boundary() {
            self.raise(UnwindReason::PoolFull);
        }
        err
    }

    /// Run `body` inside a fresh unwind boundary.
    ///
    /// On success the boundary is discarded and the body's work is kept.
    /// On error, including an unwind the body raised or hit, everything
    /// since the boundary opened is rolled back. Checkpoints the body left
    /// open on success are a usage error; they are rolled back too. So is
    /// anything the body did after ignoring an unwind.
    pub fn run_guarded<T, F>(&mut self, body: F) -> Result<T, PoolError>
    where
        F: FnOnce(&mut Self) -> Result<T, PoolError>,
    {
        let boundary = self.open_unwind_boundary();
        let serial = boundary.serial();
        let result = body(self);
        let tripped = self.take_unwind(&boundary);
        match (result, tripped) {
            (_, Some(reason)) => {
                self.drop_work_after_unwind(&boundary);
                Err(self.reason_error(reason))
            }
            (Ok(value), None) => {
                let open = self
                    .checkpoints
                    .iter()
                    .rev()
                    .take_while(|frame| frame.serial != serial)
                    .count();
                if open > 0 {
                    self.close_through(serial);
                    return Err(Violation::UnclosedCheckpoints { open }.into());
                }
                self.discard(boundary)?;
                Ok(value)
            }
            (Err(err), None) => {
                let closed = self.close_through(serial);
                debug!(error = %err, boundary = serial, closed, "guarded body failed");
                Err(err)
            }
        }
    }

    /// Close frames opened above an already unwound `boundary` and
    /// truncate the arena back to its watermark.
    fn drop_work_after_unwind(&mut self, boundary: &Checkpoint) {
        let kept = self
            .checkpoints
            .partition_point(|frame| frame.serial < boundary.serial());
        let closed = self.checkpoints.len() - kept;
        self.checkpoints.truncate(kept);
        self.counters.rollbacks += closed as u64;
        if self.arena.live_end() > boundary.watermark() {
            let released = self.truncate_to(boundary.watermark());
            warn!(
                boundary = boundary.serial(),
                closed, released, "guarded body kept working after an unwind"
            );
        }
    }

    /// Run `action` in a guarded boundary, retrying after allocation
    /// failures for as long as `relax` reports that it loosened the
    /// action's requirements.
    pub fn run_relaxed<T, A, R>(&mut self, mut action: A, mut relax: R) -> Result<T, PoolError>
    where
        A: FnMut(&mut Self) -> Result<T, PoolError>,
        R: FnMut() -> bool,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.run_guarded(&mut action) {
                Err(PoolError::OutOfMemory { .. }) if relax() => {
                    debug!(attempt, "retrying with relaxed constraints");
                }
                result => return result,
            }
        }
    }
}
