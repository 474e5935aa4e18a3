//! Node header layout and the read-only [`NodeRef`] view.
//!
//! A node is a fixed 20-byte little-endian header, then its payload, then
//! its children, each itself a complete node:
//!
//! ```text
//! 0      2          4       8         12      16            20
//! ┌──────┬──────────┬───────┬─────────┬───────┬─────────────┬─────────┬──────────┐
//! │ tag  │ refcount │ slot  │ parent  │ size  │ payload_len │ payload │ children │
//! │ u16  │ u16      │ u32   │ u32     │ u32   │ u32         │ ...     │ ...      │
//! └──────┴──────────┴───────┴─────────┴───────┴─────────────┴─────────┴──────────┘
//! ```
//!
//! `size` covers header, payload and all children. Stepping
//! `offset + HEADER_SIZE + payload_len` walks every node in pre-order;
//! stepping `offset + size` skips to the next sibling.

use canopy_core::{NodeId, PoolError, RenderSize, TypeTag};
use smallvec::SmallVec;

use crate::pool::TreePool;

/// Size of the node header in bytes.
pub const HEADER_SIZE: u32 = 20;

/// Parent slot value of a root node.
pub const NO_PARENT: u32 = u32::MAX;

const TAG_AT: usize = 0;
const REF_COUNT_AT: usize = 2;
const SLOT_AT: usize = 4;
const PARENT_AT: usize = 8;
const SIZE_AT: usize = 12;
const PAYLOAD_LEN_AT: usize = 16;

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn write_u16(buf: &mut [u8], at: usize, v: u16) {
    buf[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn write_u32(buf: &mut [u8], at: usize, v: u32) {
    buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

/// Decoded node header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    /// Node type.
    pub tag: TypeTag,
    /// Outstanding handles. Containment in a parent is not counted.
    pub ref_count: u16,
    /// Identifier slot of this node.
    pub slot: u32,
    /// Identifier slot of the containing node, or [`NO_PARENT`].
    pub parent: u32,
    /// Total bytes: header, payload and children.
    pub size: u32,
    /// Payload bytes following the header.
    pub payload_len: u32,
}

impl Header {
    /// Decode the header at `offset`.
    pub fn read(buf: &[u8], offset: u32) -> Self {
        let o = offset as usize;
        Self {
            tag: TypeTag(read_u16(buf, o + TAG_AT)),
            ref_count: read_u16(buf, o + REF_COUNT_AT),
            slot: read_u32(buf, o + SLOT_AT),
            parent: read_u32(buf, o + PARENT_AT),
            size: read_u32(buf, o + SIZE_AT),
            payload_len: read_u32(buf, o + PAYLOAD_LEN_AT),
        }
    }

    /// Encode the header at `offset`.
    pub fn write(&self, buf: &mut [u8], offset: u32) {
        let o = offset as usize;
        write_u16(buf, o + TAG_AT, self.tag.0);
        write_u16(buf, o + REF_COUNT_AT, self.ref_count);
        write_u32(buf, o + SLOT_AT, self.slot);
        write_u32(buf, o + PARENT_AT, self.parent);
        write_u32(buf, o + SIZE_AT, self.size);
        write_u32(buf, o + PAYLOAD_LEN_AT, self.payload_len);
    }

    /// Whether the node is not contained in any parent.
    pub fn is_root(&self) -> bool {
        self.parent == NO_PARENT
    }

    /// Offset of the first payload byte of a node at `offset`.
    pub fn payload_start(offset: u32) -> u32 {
        offset + HEADER_SIZE
    }

    /// Offset of the first child of a node at `offset` (also the next node
    /// in pre-order).
    pub fn children_start(&self, offset: u32) -> u32 {
        offset + HEADER_SIZE + self.payload_len
    }

    /// Bytes occupied by this node's children.
    pub fn children_len(&self) -> u32 {
        self.size - HEADER_SIZE - self.payload_len
    }
}

pub(crate) fn set_ref_count(buf: &mut [u8], offset: u32, v: u16) {
    write_u16(buf, offset as usize + REF_COUNT_AT, v);
}

pub(crate) fn set_slot(buf: &mut [u8], offset: u32, v: u32) {
    write_u32(buf, offset as usize + SLOT_AT, v);
}

pub(crate) fn set_parent(buf: &mut [u8], offset: u32, v: u32) {
    write_u32(buf, offset as usize + PARENT_AT, v);
}

pub(crate) fn set_size(buf: &mut [u8], offset: u32, v: u32) {
    write_u32(buf, offset as usize + SIZE_AT, v);
}

pub(crate) fn set_payload_len(buf: &mut [u8], offset: u32, v: u32) {
    write_u32(buf, offset as usize + PAYLOAD_LEN_AT, v);
}

pub(crate) fn set_tag(buf: &mut [u8], offset: u32, tag: TypeTag) {
    write_u16(buf, offset as usize + TAG_AT, tag.0);
}

/// Offsets of the direct children of the node at `offset`.
pub(crate) fn child_offsets(buf: &[u8], offset: u32) -> SmallVec<[u32; 8]> {
    let header = Header::read(buf, offset);
    let mut children = SmallVec::new();
    let mut child = header.children_start(offset);
    let end = offset + header.size;
    while child < end {
        children.push(child);
        child += Header::read(buf, child).size;
    }
    children
}

/// Read-only view of a node, valid until the next mutation of the pool.
///
/// This is what node behaviors receive. It exposes the node's tag, payload
/// and children, and re-enters the behavior table for recursive dispatch
/// (e.g. an addition serializing its operands).
#[derive(Clone, Copy)]
pub struct NodeRef<'a> {
    pool: &'a TreePool,
    offset: u32,
}

impl<'a> NodeRef<'a> {
    pub(crate) fn new(pool: &'a TreePool, offset: u32) -> Self {
        Self { pool, offset }
    }

    fn header(&self) -> Header {
        Header::read(self.pool.arena.bytes(), self.offset)
    }

    /// Identifier of this node.
    pub fn id(&self) -> NodeId {
        let slot = self.header().slot;
        // A node reachable through a view is always registered.
        self.pool
            .table
            .id_of_slot(slot)
            .unwrap_or(NodeId::new(slot, 0))
    }

    /// Type tag of this node.
    pub fn tag(&self) -> TypeTag {
        self.header().tag
    }

    /// Byte offset of this node in the arena.
    pub fn offset(&self) -> u32 {
        self.offset
    }

    /// Total bytes occupied by this node and its descendants.
    pub fn size(&self) -> u32 {
        self.header().size
    }

    /// Outstanding handles on this node.
    pub fn ref_count(&self) -> u16 {
        self.header().ref_count
    }

    /// Whether this node is contained in a parent.
    pub fn is_contained(&self) -> bool {
        !self.header().is_root()
    }

    /// The type-specific payload bytes.
    pub fn payload(&self) -> &'a [u8] {
        let header = self.header();
        let start = Header::payload_start(self.offset) as usize;
        &self.pool.arena.bytes()[start..start + header.payload_len as usize]
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        self.children().count()
    }

    /// The `index`-th child, if any.
    pub fn child(&self, index: usize) -> Option<NodeRef<'a>> {
        self.children().nth(index)
    }

    /// Iterate over direct children in order.
    pub fn children(&self) -> Children<'a> {
        let header = self.header();
        Children {
            pool: self.pool,
            next: header.children_start(self.offset),
            end: self.offset + header.size,
        }
    }

    /// Name of the registered behavior, or the raw tag if none.
    pub fn type_name(&self) -> String {
        match self.pool.behaviors.get(self.tag()) {
            Some(behavior) => behavior.name().to_string(),
            None => self.tag().to_string(),
        }
    }

    /// Append this node's textual form to `out`.
    pub fn serialize_into(&self, out: &mut String) -> Result<(), PoolError> {
        self.pool.behaviors.require(self.tag())?.serialize(*self, out)
    }

    /// Numeric approximation of this node.
    pub fn approximate(&self) -> Result<f64, PoolError> {
        self.pool.behaviors.require(self.tag())?.approximate(*self)
    }

    /// On-screen extent of this node.
    pub fn render_size(&self) -> Result<RenderSize, PoolError> {
        self.pool.behaviors.require(self.tag())?.render_size(*self)
    }
}

impl std::fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header = self.header();
        f.debug_struct("NodeRef")
            .field("offset", &self.offset)
            .field("tag", &header.tag)
            .field("slot", &header.slot)
            .field("size", &header.size)
            .finish()
    }
}

/// Iterator over the direct children of a node.
pub struct Children<'a> {
    pool: &'a TreePool,
    next: u32,
    end: u32,
}

impl<'a> Iterator for Children<'a> {
    type Item = NodeRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let child = NodeRef::new(self.pool, self.next);
        self.next += child.size();
        Some(child)
    }
}
