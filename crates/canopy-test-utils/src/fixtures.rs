//! Fixture node types for exercising the behavior table.
//!
//! A small arithmetic vocabulary:
//!
//! - [`Integer`]: `i64` literal, payload is 8 little-endian bytes.
//! - [`Operator`]: n-ary addition and multiplication, binary division.
//!   Reduces to an [`Integer`] once every operand is one.
//! - [`Symbol`]: named unknown, payload is the UTF-8 name. Approximates to
//!   NaN and never reduces.

use std::fmt::Write;

use canopy_core::{PoolError, RenderSize, TypeTag};
use canopy_pool::{Handle, NodeBehavior, NodeRef, TreePool};
use smallvec::SmallVec;

pub const INTEGER: TypeTag = TypeTag(1);
pub const ADD: TypeTag = TypeTag(2);
pub const MULTIPLY: TypeTag = TypeTag(3);
pub const DIVIDE: TypeTag = TypeTag(4);
pub const SYMBOL: TypeTag = TypeTag(5);

/// Width of one glyph in the fixture layout, in pixels.
pub const GLYPH_WIDTH: u32 = 7;
/// Height of one line of glyphs.
pub const GLYPH_HEIGHT: u32 = 14;
/// Baseline of one line of glyphs.
pub const GLYPH_BASELINE: u32 = 10;

fn glyphs(count: usize) -> RenderSize {
    RenderSize::new(count as u32 * GLYPH_WIDTH, GLYPH_HEIGHT, GLYPH_BASELINE)
}

/// Value of an integer node, if `node` is one.
pub fn integer_value(node: NodeRef<'_>) -> Option<i64> {
    if node.tag() != INTEGER {
        return None;
    }
    let bytes: [u8; 8] = node.payload().try_into().ok()?;
    Some(i64::from_le_bytes(bytes))
}

pub struct Integer;

impl NodeBehavior for Integer {
    fn name(&self) -> &str {
        "integer"
    }

    fn serialize(&self, node: NodeRef<'_>, out: &mut String) -> Result<(), PoolError> {
        let value = integer_value(node).unwrap_or_default();
        let _ = write!(out, "{value}");
        Ok(())
    }

    fn approximate(&self, node: NodeRef<'_>) -> Result<f64, PoolError> {
        Ok(integer_value(node).unwrap_or_default() as f64)
    }

    fn render_size(&self, node: NodeRef<'_>) -> Result<RenderSize, PoolError> {
        let value = integer_value(node).unwrap_or_default();
        Ok(glyphs(value.to_string().len()))
    }
}

pub struct Symbol;

impl NodeBehavior for Symbol {
    fn name(&self) -> &str {
        "symbol"
    }

    fn serialize(&self, node: NodeRef<'_>, out: &mut String) -> Result<(), PoolError> {
        out.push_str(&String::from_utf8_lossy(node.payload()));
        Ok(())
    }

    fn approximate(&self, _node: NodeRef<'_>) -> Result<f64, PoolError> {
        Ok(f64::NAN)
    }

    fn render_size(&self, node: NodeRef<'_>) -> Result<RenderSize, PoolError> {
        Ok(glyphs(String::from_utf8_lossy(node.payload()).chars().count()))
    }
}

/// Which arithmetic operation an [`Operator`] node performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Add,
    Multiply,
    Divide,
}

pub struct Operator {
    op: Operation,
}

impl Operator {
    pub fn new(op: Operation) -> Self {
        Self { op }
    }

    fn symbol(&self) -> char {
        match self.op {
            Operation::Add => '+',
            Operation::Multiply => '*',
            Operation::Divide => '/',
        }
    }

    /// Fold integer operands. `None` if the result is not an exact `i64`.
    fn fold(&self, operands: &[i64]) -> Option<i64> {
        match self.op {
            Operation::Add => operands.iter().try_fold(0i64, |acc, &v| acc.checked_add(v)),
            Operation::Multiply => operands.iter().try_fold(1i64, |acc, &v| acc.checked_mul(v)),
            Operation::Divide => match operands {
                [n, d] if *d != 0 && n.checked_rem(*d) == Some(0) => n.checked_div(*d),
                _ => None,
            },
        }
    }
}

impl NodeBehavior for Operator {
    fn name(&self) -> &str {
        match self.op {
            Operation::Add => "add",
            Operation::Multiply => "multiply",
            Operation::Divide => "divide",
        }
    }

    fn serialize(&self, node: NodeRef<'_>, out: &mut String) -> Result<(), PoolError> {
        out.push('(');
        for (i, child) in node.children().enumerate() {
            if i > 0 {
                out.push(self.symbol());
            }
            child.serialize_into(out)?;
        }
        out.push(')');
        Ok(())
    }

    fn approximate(&self, node: NodeRef<'_>) -> Result<f64, PoolError> {
        let mut values = node.children().map(|c| c.approximate());
        match self.op {
            Operation::Add => values.try_fold(0.0, |acc, v| v.map(|v| acc + v)),
            Operation::Multiply => values.try_fold(1.0, |acc, v| v.map(|v| acc * v)),
            Operation::Divide => {
                let n = values.next().transpose()?.unwrap_or(f64::NAN);
                let d = values.next().transpose()?.unwrap_or(f64::NAN);
                Ok(n / d)
            }
        }
    }

    fn render_size(&self, node: NodeRef<'_>) -> Result<RenderSize, PoolError> {
        let mut sizes = node.children().map(|c| c.render_size());
        match self.op {
            Operation::Divide => {
                let n = sizes.next().transpose()?.unwrap_or_default();
                let d = sizes.next().transpose()?.unwrap_or_default();
                Ok(n.above(d))
            }
            _ => {
                let mut total: Option<RenderSize> = None;
                for size in sizes {
                    let size = size?;
                    total = Some(match total {
                        Some(t) => t.beside(glyphs(1)).beside(size),
                        None => size,
                    });
                }
                Ok(total.unwrap_or_else(|| glyphs(2)))
            }
        }
    }

    fn reduce(&self, pool: &mut TreePool, node: &Handle) -> Result<bool, PoolError> {
        let view = pool.node(node)?;
        let operands: Option<SmallVec<[i64; 4]>> = view.children().map(integer_value).collect();
        let Some(value) = operands.and_then(|ops| self.fold(&ops)) else {
            return Ok(false);
        };
        pool.rewrite_node(node, INTEGER, &value.to_le_bytes())?;
        Ok(true)
    }
}
