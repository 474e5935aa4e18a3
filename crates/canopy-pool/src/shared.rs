//! Process-wide pool for embedders that cannot pass a [`TreePool`] around.
//!
//! The pool is per thread: the engine is single-threaded and `TreePool`
//! holds `Rc` behaviors, so each thread that calls [`init`] gets its own
//! arena. All access goes through [`with_pool`]; calling it again from
//! inside its own closure is reported as [`Violation::ReentrantAccess`]
//! instead of aliasing the pool.

use std::cell::RefCell;

use canopy_core::{PoolError, Violation};
use tracing::debug;

use crate::config::PoolConfig;
use crate::pool::TreePool;

thread_local! {
    static SHARED: RefCell<Option<TreePool>> = const { RefCell::new(None) };
}

/// Create this thread's pool.
pub fn init(config: PoolConfig) -> Result<(), PoolError> {
    SHARED.with(|slot| {
        let mut slot = slot
            .try_borrow_mut()
            .map_err(|_| Violation::ReentrantAccess)?;
        if slot.is_some() {
            return Err(Violation::AlreadyInitialized.into());
        }
        *slot = Some(TreePool::new(config)?);
        debug!("shared pool initialized");
        Ok(())
    })
}

/// Release every node and drop this thread's pool.
pub fn shutdown() -> Result<(), PoolError> {
    SHARED.with(|slot| {
        let mut slot = slot
            .try_borrow_mut()
            .map_err(|_| Violation::ReentrantAccess)?;
        let mut pool = slot.take().ok_or(Violation::NotInitialized)?;
        pool.shutdown();
        Ok(())
    })
}

/// Whether this thread's pool exists.
pub fn is_initialized() -> bool {
    SHARED.with(|slot| slot.try_borrow().map_or(true, |pool| pool.is_some()))
}

/// Run `f` with exclusive access to this thread's pool.
pub fn with_pool<T>(f: impl FnOnce(&mut TreePool) -> Result<T, PoolError>) -> Result<T, PoolError> {
    SHARED.with(|slot| {
        let mut slot = slot
            .try_borrow_mut()
            .map_err(|_| Violation::ReentrantAccess)?;
        let pool = slot.as_mut().ok_or(Violation::NotInitialized)?;
        f(pool)
    })
}
