//! Pool occupancy and event counters.
//!
//! [`PoolStats`] is a point-in-time snapshot for telemetry and tests. The
//! cumulative counters live in [`Counters`] inside the pool and are copied
//! into each snapshot.

/// Occupancy and cumulative event counts of a [`TreePool`](crate::TreePool).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Arena capacity in bytes.
    pub capacity: u32,
    /// Bytes currently holding nodes.
    pub live_bytes: u32,
    /// Highest `live_bytes` observed since creation or the last shutdown.
    pub peak_bytes: u32,
    /// Bytes available for allocation.
    pub free_bytes: u32,
    /// Nodes currently in the arena (roots and contained nodes).
    pub live_nodes: usize,
    /// Identifier slots ever issued.
    pub identifier_slots: usize,
    /// Identifier slots released and awaiting reuse.
    pub free_identifiers: usize,
    /// Open checkpoints, boundaries included.
    pub checkpoint_depth: usize,
    /// Checkpoints rolled back, explicitly or by an unwind.
    pub rollbacks: u64,
    /// Unwinds raised to a boundary.
    pub unwinds: u64,
    /// Operations that failed to obtain arena space.
    pub allocation_failures: u64,
    /// Releases of frozen nodes postponed until their checkpoint closed.
    pub deferred_releases: u64,
}

/// Cumulative counters kept by the pool.
#[derive(Clone, Debug, Default)]
pub(crate) struct Counters {
    pub peak_bytes: u32,
    pub rollbacks: u64,
    pub unwinds: u64,
    pub allocation_failures: u64,
    pub deferred_releases: u64,
}

impl Counters {
    pub fn observe_live_bytes(&mut self, live_bytes: u32) {
        self.peak_bytes = self.peak_bytes.max(live_bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let s = PoolStats::default();
        assert_eq!(s.live_bytes, 0);
        assert_eq!(s.live_nodes, 0);
        assert_eq!(s.rollbacks, 0);
        assert_eq!(s.unwinds, 0);
    }

    #[test]
    fn peak_only_grows() {
        let mut c = Counters::default();
        c.observe_live_bytes(40);
        c.observe_live_bytes(20);
        assert_eq!(c.peak_bytes, 40);
    }
}
