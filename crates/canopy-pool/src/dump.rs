//! Human-readable listings of the arena for debugging.

use std::fmt::Write;

use smallvec::SmallVec;

use crate::node::NodeRef;
use crate::pool::TreePool;

/// Layout of [`TreePool::dump`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DumpFormat {
    /// One line per node, indented by depth.
    Tree,
    /// One line per node in arena order, with offsets and parent slots.
    Flat,
}

impl TreePool {
    /// List every live node.
    ///
    /// Nodes are named by their behavior, or by raw tag when none is
    /// registered.
    pub fn dump(&self, format: DumpFormat) -> String {
        let mut out = String::new();
        let end = self.arena.live_end();
        let mut open_ends: SmallVec<[u32; 16]> = SmallVec::new();
        let mut offset = 0;
        while offset < end {
            while open_ends.last().is_some_and(|&until| until <= offset) {
                open_ends.pop();
            }
            let node = NodeRef::new(self, offset);
            let header = self.header_at(offset);
            // Writing to a String cannot fail.
            let _ = match format {
                DumpFormat::Tree => writeln!(
                    out,
                    "{:indent$}{} {} size={} refs={}",
                    "",
                    node.type_name(),
                    node.id(),
                    header.size,
                    header.ref_count,
                    indent = open_ends.len() * 2
                ),
                DumpFormat::Flat => {
                    let parent = if header.is_root() {
                        "-".to_string()
                    } else {
                        header.parent.to_string()
                    };
                    writeln!(
                        out,
                        "@{offset} {} {} size={} payload={} refs={} parent={parent}",
                        node.type_name(),
                        node.id(),
                        header.size,
                        header.payload_len,
                        header.ref_count,
                    )
                }
            };
            open_ends.push(offset + header.size);
            offset = header.children_start(offset);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use canopy_core::TypeTag;

    use super::*;

    #[test]
    fn tree_dump_indents_children() {
        let mut p = TreePool::with_capacity(256).unwrap();
        let a = p.create_node(TypeTag(1), &[], &[]).unwrap();
        let b = p.create_node(TypeTag(1), &[], &[]).unwrap();
        let _root = p.create_node(TypeTag(2), &[], &[&a, &b]).unwrap();
        let dump = p.dump(DumpFormat::Tree);
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(
            lines,
            vec![
                "#2 2v0 size=60 refs=1",
                "  #1 0v0 size=20 refs=1",
                "  #1 1v0 size=20 refs=1",
            ]
        );
    }

    #[test]
    fn flat_dump_lists_offsets() {
        let mut p = TreePool::with_capacity(256).unwrap();
        let a = p.create_node(TypeTag(1), &[7], &[]).unwrap();
        let _root = p.create_node(TypeTag(2), &[], &[&a]).unwrap();
        let dump = p.dump(DumpFormat::Flat);
        assert_eq!(
            dump,
            "@0 #2 1v0 size=41 payload=0 refs=1 parent=-\n\
             @20 #1 0v0 size=21 payload=1 refs=1 parent=1\n"
        );
    }

    #[test]
    fn empty_pool_dumps_nothing() {
        let p = TreePool::with_capacity(64).unwrap();
        assert!(p.dump(DumpFormat::Tree).is_empty());
    }
}
