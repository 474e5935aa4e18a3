//! Benchmark profiles for the canopy tree pool.
//!
//! Provides pre-built pools holding a document of arithmetic expressions:
//!
//! - [`reference_profile`]: 64 terms in the default-sized pool
//! - [`stress_profile`]: 2048 terms in a 1 MiB pool
//!
//! Even terms are `(i*(i+1))` and odd terms `(((i+1)+1)/1)`, so the whole
//! document reduces to one integer in [`reduction_steps`] steps.

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use canopy_core::PoolError;
use canopy_pool::{Handle, PoolConfig, TreePool};
use canopy_test_utils::{add, divide, integer, multiply, register_all, sum_of};

/// A pool and the root of the document it holds.
pub struct Profile {
    /// Pool with every fixture type registered.
    pub pool: TreePool,
    /// `(t0+t1+...)` holding the document's only reference.
    pub document: Handle,
    /// Number of top-level terms.
    pub terms: usize,
}

/// Build a reference benchmark profile: 64 terms in a default pool.
pub fn reference_profile() -> Result<Profile, PoolError> {
    build_profile(PoolConfig::DEFAULT_CAPACITY, 64)
}

/// Build a stress benchmark profile: 2048 terms in a 1 MiB pool.
pub fn stress_profile() -> Result<Profile, PoolError> {
    build_profile(1 << 20, 2048)
}

fn build_profile(capacity: u32, terms: usize) -> Result<Profile, PoolError> {
    let mut pool = TreePool::new(PoolConfig::new(capacity))?;
    register_all(&mut pool);
    let mut operands = Vec::with_capacity(terms);
    for i in 0..terms as i64 {
        operands.push(term(&mut pool, i)?);
    }
    let document = add(&mut pool, operands)?;
    Ok(Profile {
        pool,
        document,
        terms,
    })
}

fn term(pool: &mut TreePool, i: i64) -> Result<Handle, PoolError> {
    if i % 2 == 0 {
        let a = integer(pool, i)?;
        let b = integer(pool, i + 1)?;
        multiply(pool, vec![a, b])
    } else {
        let sum = sum_of(pool, &[i + 1, 1])?;
        let one = integer(pool, 1)?;
        divide(pool, sum, one)
    }
}

/// Number of single-node rewrites that fully reduce a document of `terms`.
pub fn reduction_steps(terms: usize) -> usize {
    let odd = terms / 2;
    let even = terms - odd;
    even + 2 * odd + 1
}

/// Expected value of the reduced document.
pub fn expected_sum(terms: usize) -> i64 {
    (0..terms as i64)
        .map(|i| if i % 2 == 0 { i * (i + 1) } else { i + 2 })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_test_utils::integer_value;

    #[test]
    fn reference_profile_reduces_to_expected_sum() {
        let Profile {
            mut pool,
            document,
            terms,
        } = reference_profile().unwrap();
        let steps = pool.reduce_to_fixpoint(&document, usize::MAX).unwrap();
        assert_eq!(steps, reduction_steps(terms));
        let value = integer_value(pool.node(&document).unwrap());
        assert_eq!(value, Some(expected_sum(terms)));
        assert_eq!(pool.live_node_count(), 1);
    }
}
