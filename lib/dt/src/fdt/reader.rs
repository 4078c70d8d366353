use core::ops::Range;

use crate::{
    fdt::{
        FDT_HEADER_SIZE, FDT_MAGIC, FDT_VERSION, FdtError, FdtHeader, FdtNodeType,
        LAST_COMP_VERSION, ReservedMemoryEntry,
    },
    node::{DeviceTree, Node},
    prop::Property,
};
use utils::{
    endian::{BigEndian32, BigEndian64, EndianData},
    num::AlignableTo,
};

/// Deepest node nesting accepted from an untrusted blob.
pub const MAX_DEPTH: usize = 64;

/// Parser for a flattened tree held in memory.
///
/// Every access is bounds-checked against the header's `totalsize` and the slice itself, so a
/// corrupted blob yields an [FdtError] instead of undefined reads.
pub struct FdtReader<'a> {
    blob: &'a [u8],
    cursor: usize,
    struct_end: usize,
    nodes: Vec<Node>,
}

/// Cursor primitives over the structure block.
impl FdtReader<'_> {
    /// Read a 32-bit big-endian word at the cursor without advancing.
    fn peek_u32(&self) -> Result<u32, FdtError> {
        if self.cursor + 4 > self.struct_end {
            return Err(FdtError::Truncated {
                offset: self.cursor,
                len: self.struct_end,
            });
        }
        BigEndian32::from_slice(&self.blob[self.cursor..])
            .map(|v| v.value())
            .ok_or(FdtError::Truncated {
                offset: self.cursor,
                len: self.blob.len(),
            })
    }

    #[inline]
    fn advance(&mut self) {
        self.cursor += 4;
    }

    /// Read a word and advance past it.
    fn read_u32(&mut self) -> Result<u32, FdtError> {
        let word = self.peek_u32()?;
        self.advance();
        Ok(word)
    }

    /// Read `len` bytes and move the cursor to the next 4-byte aligned position.
    fn readbytes_aligned(&mut self, len: usize) -> Result<&[u8], FdtError> {
        let start = self.cursor;
        let end = start.checked_add(len).filter(|end| *end <= self.struct_end).ok_or(
            FdtError::Truncated {
                offset: start,
                len: self.struct_end,
            },
        )?;
        self.cursor = end.align_up(4);
        Ok(&self.blob[start..end])
    }

    /// Skip zero words and NOPs up to the next meaningful token.
    fn skip(&mut self) -> Result<(), FdtError> {
        let mut p = self.peek_u32()?;
        while p == 0 || p == FdtNodeType::FDT_NOP.bits() {
            self.advance();
            p = self.peek_u32()?;
        }
        Ok(())
    }

    /// Read a NUL-terminated node name and move to the next aligned position.
    fn readstr_aligned(&mut self) -> Result<&str, FdtError> {
        let start = self.cursor;
        let area = &self.blob[start..self.struct_end];
        let len = area
            .iter()
            .position(|b| *b == 0)
            .ok_or(FdtError::InvalidString { offset: start })?;
        self.cursor = (start + len + 1).align_up(4);
        core::str::from_utf8(&area[..len]).map_err(|_| FdtError::InvalidString { offset: start })
    }

    /// Consumes a token, failing unless it is `expected`.
    fn expect_token(&mut self, expected: FdtNodeType) -> Result<(), FdtError> {
        let cursor = self.cursor;
        let node_type = self.read_u32()?;
        if node_type != expected.bits() {
            return Err(FdtError::InvalidNodeType { node_type, cursor });
        }
        Ok(())
    }
}

impl<'a> FdtReader<'a> {
    pub fn new(blob: &'a [u8]) -> FdtReader<'a> {
        FdtReader {
            blob,
            cursor: 0,
            struct_end: 0,
            nodes: vec![],
        }
    }

    pub fn get_header(&self) -> Result<FdtHeader, FdtError> {
        FdtHeader::parse(self.blob)
    }

    /// Validate the header: magic number, compatible version range and block bounds.
    pub fn validate(&self) -> Result<FdtHeader, FdtError> {
        if self.blob.len() < FDT_HEADER_SIZE {
            return Err(FdtError::Truncated {
                offset: FDT_HEADER_SIZE,
                len: self.blob.len(),
            });
        }
        let header = self.get_header()?;

        let magic = header.magic.value();
        if magic != FDT_MAGIC {
            return Err(FdtError::InvalidMagic { magic });
        }

        // readable as version 17 when the blob claims at least 16 and asks for no more than 17
        let version = header.version.value();
        if version < LAST_COMP_VERSION || header.last_comp_version.value() > FDT_VERSION {
            return Err(FdtError::IncompatibleVersion { version });
        }

        let total = header.totalsize.value() as usize;
        if total > self.blob.len() || total < FDT_HEADER_SIZE {
            return Err(FdtError::Truncated {
                offset: total,
                len: self.blob.len(),
            });
        }
        let in_bounds = |off: BigEndian32, size: usize| {
            (off.value() as usize)
                .checked_add(size)
                .is_some_and(|end| end <= total)
        };
        if !in_bounds(header.off_dt_struct, header.size_dt_struct.value() as usize) {
            return Err(FdtError::BlockOutOfBounds { block: "structure" });
        }
        if !in_bounds(header.off_dt_strings, header.size_dt_strings.value() as usize) {
            return Err(FdtError::BlockOutOfBounds { block: "strings" });
        }
        if !in_bounds(header.off_mem_rsvmap, 16) {
            return Err(FdtError::BlockOutOfBounds {
                block: "memory reservation",
            });
        }

        // tokens are cell aligned, reservation entries 8-byte aligned
        if !header.off_dt_struct.value().is_aligned_to(4) {
            return Err(FdtError::Misaligned { block: "structure" });
        }
        if !header.off_mem_rsvmap.value().is_aligned_to(8) {
            return Err(FdtError::Misaligned {
                block: "memory reservation",
            });
        }
        Ok(header)
    }

    /// Read a NUL-terminated string from the string table at `offset`.
    fn get_string(&self, header: &FdtHeader, offset: usize) -> Result<&'a str, FdtError> {
        let blob: &'a [u8] = self.blob;
        let table_start = header.off_dt_strings.value() as usize;
        let table_end = table_start + header.size_dt_strings.value() as usize;
        let start = table_start + offset;
        if start >= table_end {
            return Err(FdtError::InvalidString { offset: start });
        }
        let area = &blob[start..table_end];
        let len = area
            .iter()
            .position(|b| *b == 0)
            .ok_or(FdtError::InvalidString { offset: start })?;
        core::str::from_utf8(&area[..len]).map_err(|_| FdtError::InvalidString { offset: start })
    }

    /// Collects the `FDT_PROP` entries at the cursor.
    fn read_props(&mut self, header: &FdtHeader) -> Result<Vec<Property>, FdtError> {
        let mut props = Vec::new();
        loop {
            self.skip()?;
            if self.peek_u32()? != FdtNodeType::FDT_PROP.bits() {
                return Ok(props);
            }
            self.advance();
            let len = self.read_u32()? as usize;
            let name_offset = self.read_u32()? as usize;
            let name = self.get_string(header, name_offset)?;
            let data = self.readbytes_aligned(len)?.to_vec();
            props.push(Property::new(name, data));
        }
    }

    /// Parses the node at the cursor and its whole subtree, up to the matching `FDT_END_NODE`.
    ///
    /// Ids are handed out in pre-order; the root is its own parent.
    fn read_node(
        &mut self,
        header: &FdtHeader,
        parent: Option<usize>,
        depth: usize,
    ) -> Result<usize, FdtError> {
        if depth > MAX_DEPTH {
            return Err(FdtError::TooDeep {
                max_depth: MAX_DEPTH,
            });
        }
        self.skip()?;
        self.expect_token(FdtNodeType::FDT_BEGIN_NODE)?;
        let id = self.nodes.len();
        let name = self.readstr_aligned()?.to_string();
        self.nodes.push(Node::new(id, parent.unwrap_or(id), &name));
        self.nodes[id].props = self.read_props(header)?;

        loop {
            self.skip()?;
            let cursor = self.cursor;
            match self.peek_u32()? {
                token if token == FdtNodeType::FDT_BEGIN_NODE.bits() => {
                    let child = self.read_node(header, Some(id), depth + 1)?;
                    self.nodes[id].children.push(child);
                }
                token if token == FdtNodeType::FDT_END_NODE.bits() => {
                    self.advance();
                    return Ok(id);
                }
                node_type => return Err(FdtError::InvalidNodeType { node_type, cursor }),
            }
        }
    }

    /// Reservation entries up to the all-zero terminator.
    fn get_mem_rsv_map(&self, header: &FdtHeader) -> Result<Vec<Range<u64>>, FdtError> {
        let total = header.totalsize.value() as usize;
        let mut offset = header.off_mem_rsvmap.value() as usize;
        let mut reserved = Vec::new();
        loop {
            if offset + 16 > total {
                return Err(FdtError::BlockOutOfBounds {
                    block: "memory reservation",
                });
            }
            let entry = ReservedMemoryEntry {
                addr: BigEndian64::from_slice(&self.blob[offset..]).ok_or(
                    FdtError::Truncated {
                        offset,
                        len: total,
                    },
                )?,
                size: BigEndian64::from_slice(&self.blob[offset + 8..]).ok_or(
                    FdtError::Truncated {
                        offset: offset + 8,
                        len: total,
                    },
                )?,
            };
            let (addr, size) = (entry.addr.value(), entry.size.value());
            if addr == 0 && size == 0 {
                return Ok(reserved);
            }
            reserved.push(addr..addr.saturating_add(size));
            offset += 16;
        }
    }

    /// Parses the whole blob into an editable [DeviceTree].
    ///
    /// Names and property data are copied out, so the blob may be dropped afterwards. A failed
    /// read leaves the reader ready for another attempt.
    pub fn read(&mut self) -> Result<DeviceTree, FdtError> {
        self.cursor = 0;
        self.nodes.clear();
        let header = self.validate()?;
        let struct_start = header.off_dt_struct.value() as usize;
        self.cursor = struct_start;
        let struct_size = header.size_dt_struct.value() as usize;
        self.struct_end = match struct_size {
            // left unset by some version 16 producers
            0 => header.totalsize.value() as usize,
            size => struct_start + size,
        };

        let root_id = self.read_node(&header, None, 0)?;
        self.skip()?;
        self.expect_token(FdtNodeType::FDT_END)?;
        if struct_size != 0 && self.cursor != self.struct_end {
            return Err(FdtError::TrailingData {
                offset: self.cursor,
            });
        }

        let mut tree = DeviceTree::from_parts(root_id, core::mem::take(&mut self.nodes));
        tree.mem_rsv_map = self.get_mem_rsv_map(&header)?;
        tree.boot_cpuid_phys = header.boot_cpuid_phys.value();
        log::trace!(
            "Parsed flattened tree: {} nodes, {} reserved ranges",
            tree.node_count(),
            tree.mem_rsv_map.len()
        );
        Ok(tree)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fdt::writer::FdtWriter;

    fn sample_blob() -> Vec<u8> {
        let mut tree = DeviceTree::new();
        tree.set_property_cells("/", "#address-cells", &[1]).unwrap();
        tree.add_subnode("/", "chosen").unwrap();
        tree.set_property_string("/chosen", "bootargs", "console=ttyPS0")
            .unwrap();
        tree.add_subnode("/", "cpus").unwrap();
        tree.add_subnode("/cpus", "cpu@0").unwrap();
        tree.set_property(
            "/cpus/cpu@0",
            Property::from_strlist("compatible", &["arm,cortex-a9"]),
        )
        .unwrap();
        tree.mem_rsv_map.push(0x1000..0x3000);
        tree.boot_cpuid_phys = 1;
        FdtWriter::new().write(&tree)
    }

    #[test]
    fn reads_what_the_writer_produces() {
        let tree = FdtReader::new(&sample_blob()).read().unwrap();
        assert_eq!(tree.paths(), vec!["/", "/chosen", "/cpus", "/cpus/cpu@0"]);
        assert_eq!(
            tree.get_prop_str("/chosen", "bootargs").unwrap().as_deref(),
            Some("console=ttyPS0")
        );
        assert_eq!(tree.mem_rsv_map, vec![0x1000..0x3000]);
        assert_eq!(tree.boot_cpuid_phys, 1);
        assert_eq!(
            tree.node_type("/chosen").unwrap(),
            crate::node::NodeType::Description
        );
    }

    #[test]
    fn rejects_bad_magic() {
        let mut blob = sample_blob();
        blob[0] = 0;
        assert!(matches!(
            FdtReader::new(&blob).read(),
            Err(FdtError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn rejects_truncated_blobs() {
        let blob = sample_blob();
        assert!(matches!(
            FdtReader::new(&blob[..blob.len() - 8]).read(),
            Err(FdtError::Truncated { .. })
        ));
        assert!(matches!(
            FdtReader::new(&blob[..12]).read(),
            Err(FdtError::Truncated { .. })
        ));
    }

    #[test]
    fn rejects_unknown_tokens() {
        let mut blob = sample_blob();
        let header = FdtHeader::parse(&blob).unwrap();
        let off = header.off_dt_struct.value() as usize;
        blob[off..off + 4].copy_from_slice(&[0, 0, 0, 0x07]);
        assert!(matches!(
            FdtReader::new(&blob).read(),
            Err(FdtError::InvalidNodeType { node_type: 7, .. })
        ));
    }

    #[test]
    fn rejects_future_versions() {
        let mut blob = sample_blob();
        // last_comp_version
        blob[24..28].copy_from_slice(&[0, 0, 0, 18]);
        assert!(matches!(
            FdtReader::new(&blob).read(),
            Err(FdtError::IncompatibleVersion { .. })
        ));
    }

    #[test]
    fn rejects_misaligned_structure_block() {
        let mut blob = sample_blob();
        let header = FdtHeader::parse(&blob).unwrap();
        let off = header.off_dt_struct.value() + 2;
        // off_dt_struct
        blob[8..12].copy_from_slice(&off.to_be_bytes());
        assert!(matches!(
            FdtReader::new(&blob).read(),
            Err(FdtError::Misaligned { block: "structure" })
        ));
    }

    #[test]
    fn rejects_data_after_the_end_token() {
        let mut blob = sample_blob();
        let header = FdtHeader::parse(&blob).unwrap();
        let size = header.size_dt_struct.value() + 4;
        // size_dt_struct, now covering the first word of the strings block
        blob[36..40].copy_from_slice(&size.to_be_bytes());
        let end = header.off_dt_struct.value() + header.size_dt_struct.value();
        assert_eq!(
            FdtReader::new(&blob).read().unwrap_err(),
            FdtError::TrailingData {
                offset: end as usize
            }
        );
    }
}
