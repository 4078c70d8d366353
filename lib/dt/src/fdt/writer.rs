use std::collections::HashMap;

use crate::{
    fdt::{FDT_HEADER_SIZE, FDT_MAGIC, FDT_VERSION, FdtHeader, FdtNodeType, LAST_COMP_VERSION},
    node::{DeviceTree, Node},
};
use utils::{
    endian::{BigEndian32, BigEndian64, EndianData},
    num::AlignableTo,
};

/// Serialiser producing version 17 flattened blobs.
///
/// Layout: header, memory reservation map, structure block, strings block. Property names are
/// deduplicated in the strings block.
#[derive(Default)]
pub struct FdtWriter {
    dt_struct: Vec<u8>,
    dt_strings: Vec<u8>,
    string_offsets: HashMap<Box<str>, u32>,
}

impl FdtWriter {
    pub fn new() -> FdtWriter {
        FdtWriter::default()
    }

    fn push_u32(&mut self, value: u32) {
        self.dt_struct
            .extend(BigEndian32::from_value(value).to_bytes());
    }

    fn push_token(&mut self, token: FdtNodeType) {
        self.push_u32(token.bits());
    }

    fn pad_struct(&mut self) {
        let len = self.dt_struct.len().align_up(4);
        self.dt_struct.resize(len, 0);
    }

    fn string_offset(&mut self, name: &str) -> u32 {
        if let Some(off) = self.string_offsets.get(name) {
            return *off;
        }
        let off = self.dt_strings.len() as u32;
        self.dt_strings.extend_from_slice(name.as_bytes());
        self.dt_strings.push(0);
        self.string_offsets.insert(Box::from(name), off);
        off
    }

    fn write_node(&mut self, tree: &DeviceTree, node: &Node) {
        self.push_token(FdtNodeType::FDT_BEGIN_NODE);
        self.dt_struct.extend_from_slice(node.full_name.as_bytes());
        self.dt_struct.push(0);
        self.pad_struct();
        for prop in node.props.iter() {
            let nameoff = self.string_offset(&prop.name);
            self.push_token(FdtNodeType::FDT_PROP);
            self.push_u32(prop.data.len() as u32);
            self.push_u32(nameoff);
            self.dt_struct.extend_from_slice(&prop.data);
            self.pad_struct();
        }
        for child in tree.get_children(node) {
            self.write_node(tree, child);
        }
        self.push_token(FdtNodeType::FDT_END_NODE);
    }

    /// Serialise `tree`. The writer may be reused afterwards.
    pub fn write(&mut self, tree: &DeviceTree) -> Vec<u8> {
        self.dt_struct.clear();
        self.dt_strings.clear();
        self.string_offsets.clear();

        self.write_node(tree, tree.root());
        self.push_token(FdtNodeType::FDT_END);

        let mut rsvmap = Vec::with_capacity((tree.mem_rsv_map.len() + 1) * 16);
        for range in tree.mem_rsv_map.iter() {
            rsvmap.extend(BigEndian64::from_value(range.start).to_bytes());
            rsvmap.extend(BigEndian64::from_value(range.end - range.start).to_bytes());
        }
        rsvmap.extend([0u8; 16]);

        let off_mem_rsvmap = FDT_HEADER_SIZE.align_up(8);
        let off_dt_struct = off_mem_rsvmap + rsvmap.len();
        let off_dt_strings = off_dt_struct + self.dt_struct.len();
        let totalsize = off_dt_strings + self.dt_strings.len();

        let be = |v: usize| BigEndian32::from_value(v as u32);
        let header = FdtHeader {
            magic: BigEndian32::from_value(FDT_MAGIC),
            totalsize: be(totalsize),
            off_dt_struct: be(off_dt_struct),
            off_dt_strings: be(off_dt_strings),
            off_mem_rsvmap: be(off_mem_rsvmap),
            version: BigEndian32::from_value(FDT_VERSION),
            last_comp_version: BigEndian32::from_value(LAST_COMP_VERSION),
            boot_cpuid_phys: BigEndian32::from_value(tree.boot_cpuid_phys),
            size_dt_strings: be(self.dt_strings.len()),
            size_dt_struct: be(self.dt_struct.len()),
        };

        let mut blob = header.to_bytes();
        blob.resize(off_mem_rsvmap, 0);
        blob.extend(rsvmap);
        blob.extend_from_slice(&self.dt_struct);
        blob.extend_from_slice(&self.dt_strings);
        log::trace!("Serialised {} nodes into {totalsize} bytes", tree.node_count());
        blob
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prop::Property;

    fn be32(blob: &[u8], off: usize) -> u32 {
        BigEndian32::from_slice(&blob[off..]).unwrap().value()
    }

    #[test]
    fn header_describes_the_blocks() {
        let mut tree = DeviceTree::new();
        tree.add_subnode("/", "chosen").unwrap();
        let blob = FdtWriter::new().write(&tree);
        assert_eq!(be32(&blob, 0), FDT_MAGIC);
        assert_eq!(be32(&blob, 4) as usize, blob.len());
        assert_eq!(be32(&blob, 20), 17);
        assert_eq!(be32(&blob, 24), 16);
        // empty reservation map is a single terminator entry
        assert_eq!(be32(&blob, 16), 40);
        assert_eq!(be32(&blob, 8), 56);
        // root node: BEGIN_NODE, empty name padded to one word
        assert_eq!(be32(&blob, 56), FdtNodeType::FDT_BEGIN_NODE.bits());
        assert_eq!(be32(&blob, 60), 0);
    }

    #[test]
    fn property_names_share_string_slots() {
        let mut tree = DeviceTree::new();
        for name in ["a", "b", "c"] {
            let path = tree.add_subnode("/", name).unwrap();
            tree.set_property(&path, Property::from_u32("reg", 1)).unwrap();
        }
        let blob = FdtWriter::new().write(&tree);
        let strings_size = be32(&blob, 32);
        assert_eq!(strings_size, 4);
        let strings_off = be32(&blob, 12) as usize;
        assert_eq!(&blob[strings_off..], b"reg\0");
    }

    #[test]
    fn values_survive_a_reparse() {
        let mut tree = DeviceTree::new();
        let path = tree.add_subnode("/", "memory@0").unwrap();
        tree.set_property_cells(&path, "reg", &[0, 0, 0, 0x4000_0000])
            .unwrap();
        tree.set_property(&path, Property::empty("qemu,empty")).unwrap();
        let reparsed = DeviceTree::from_fdt(&tree.to_fdt()).unwrap();
        let node = reparsed.get_node("/memory").unwrap();
        assert_eq!(
            node.get_property("reg").unwrap().value_as_cells(),
            vec![0, 0, 0, 0x4000_0000]
        );
        assert!(node.get_property("qemu,empty").unwrap().is_empty());
    }
}
