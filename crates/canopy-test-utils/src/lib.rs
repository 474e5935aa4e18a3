//! Test utilities for canopy development.
//!
//! Provides fixture node types implementing [`NodeBehavior`] (see
//! [`fixtures`]) and builders that assemble expression trees in a
//! [`TreePool`] the way a parser would: operands first, then the operator
//! adopting them.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::rc::Rc;

use canopy_core::{PoolError, TypeTag};
use canopy_pool::{Handle, NodeBehavior, PoolConfig, TreePool};

pub use fixtures::{
    integer_value, Integer, Operation, Operator, Symbol, ADD, DIVIDE, INTEGER, MULTIPLY, SYMBOL,
};

/// Payload size of an integer literal.
pub const INTEGER_PAYLOAD: u32 = 8;

/// Register every fixture type on `pool`.
pub fn register_all(pool: &mut TreePool) {
    let entries: [(TypeTag, Rc<dyn NodeBehavior>); 5] = [
        (INTEGER, Rc::new(Integer)),
        (ADD, Rc::new(Operator::new(Operation::Add))),
        (MULTIPLY, Rc::new(Operator::new(Operation::Multiply))),
        (DIVIDE, Rc::new(Operator::new(Operation::Divide))),
        (SYMBOL, Rc::new(Symbol)),
    ];
    for (tag, behavior) in entries {
        pool.register_behavior(tag, behavior);
    }
}

/// A pool of `capacity` bytes with every fixture type registered.
pub fn fixture_pool(capacity: u32) -> TreePool {
    let mut pool = TreePool::new(PoolConfig::new(capacity)).expect("valid fixture capacity");
    register_all(&mut pool);
    pool
}

/// Create an integer literal.
pub fn integer(pool: &mut TreePool, value: i64) -> Result<Handle, PoolError> {
    pool.create_node(INTEGER, &value.to_le_bytes(), &[])
}

/// Create a named symbol.
pub fn symbol(pool: &mut TreePool, name: &str) -> Result<Handle, PoolError> {
    pool.create_node(SYMBOL, name.as_bytes(), &[])
}

/// Create a node adopting `children` and give up the caller's handles on
/// them, so the returned handle is the tree's only reference.
///
/// On failure the children are released too, so nothing the builder was
/// handed outlives the error.
pub fn build(
    pool: &mut TreePool,
    tag: TypeTag,
    payload: &[u8],
    children: Vec<Handle>,
) -> Result<Handle, PoolError> {
    let refs: Vec<&Handle> = children.iter().collect();
    let created = pool.create_node(tag, payload, &refs);
    drop(refs);
    let node = match created {
        Ok(node) => node,
        Err(err) => {
            release_all(pool, children);
            return Err(err);
        }
    };
    for child in children {
        pool.release(child)?;
    }
    Ok(node)
}

/// Release every handle still naming a live node.
///
/// Handles invalidated by an unwind are skipped.
pub fn release_all(pool: &mut TreePool, handles: Vec<Handle>) {
    for handle in handles {
        if pool.contains(&handle) {
            let _ = pool.release(handle);
        }
    }
}

/// `(a+b+...)` owning its operands.
pub fn add(pool: &mut TreePool, operands: Vec<Handle>) -> Result<Handle, PoolError> {
    build(pool, ADD, &[], operands)
}

/// `(a*b*...)` owning its operands.
pub fn multiply(pool: &mut TreePool, operands: Vec<Handle>) -> Result<Handle, PoolError> {
    build(pool, MULTIPLY, &[], operands)
}

/// `(n/d)` owning both operands.
pub fn divide(pool: &mut TreePool, numerator: Handle, denominator: Handle) -> Result<Handle, PoolError> {
    build(pool, DIVIDE, &[], vec![numerator, denominator])
}

/// Sum of integer literals, e.g. `sum_of(pool, &[1, 2])` is `(1+2)`.
pub fn sum_of(pool: &mut TreePool, values: &[i64]) -> Result<Handle, PoolError> {
    let mut operands = Vec::with_capacity(values.len());
    for &value in values {
        match integer(pool, value) {
            Ok(operand) => operands.push(operand),
            Err(err) => {
                release_all(pool, operands);
                return Err(err);
            }
        }
    }
    add(pool, operands)
}

/// A complete binary tree of additions `depth` levels deep over integer
/// leaves `1, 2, 3, ...`. Depth 0 is a single literal.
pub fn balanced_sum(pool: &mut TreePool, depth: u32) -> Result<Handle, PoolError> {
    let mut next = 0;
    balanced_sum_from(pool, depth, &mut next)
}

fn balanced_sum_from(pool: &mut TreePool, depth: u32, next: &mut i64) -> Result<Handle, PoolError> {
    if depth == 0 {
        *next += 1;
        return integer(pool, *next);
    }
    let left = balanced_sum_from(pool, depth - 1, next)?;
    let right = match balanced_sum_from(pool, depth - 1, next) {
        Ok(right) => right,
        Err(err) => {
            release_all(pool, vec![left]);
            return Err(err);
        }
    };
    add(pool, vec![left, right])
}

/// Bytes occupied by [`balanced_sum`] of `depth`.
pub fn balanced_sum_size(depth: u32) -> u32 {
    let leaves = 1u32 << depth;
    let operators = leaves - 1;
    leaves * (canopy_pool::HEADER_SIZE + INTEGER_PAYLOAD) + operators * canopy_pool::HEADER_SIZE
}
