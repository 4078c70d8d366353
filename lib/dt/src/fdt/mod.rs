//! Flattened tree blobs: header layout, structure tokens, and the reader and writer.

use bitflags::bitflags;
use utils::endian::{BigEndian32, BigEndian64, EndianData};

pub mod reader;
pub mod writer;

/// Expected FDT magic number (0xd00dfeed).
pub const FDT_MAGIC: u32 = 0xd00dfeed;
/// The FDT version this parser targets and the writer emits.
pub const FDT_VERSION: u32 = 17;
/// The last compatible FDT version accepted by this parser.
pub const LAST_COMP_VERSION: u32 = 16;
/// Size of the on-disk header in bytes.
pub const FDT_HEADER_SIZE: usize = 40;

/// Flattened Device Tree header (big-endian fields).
///
/// Fields are stored as big-endian 32-bit values and should be interpreted as `EndianData`.
#[derive(Debug, Clone, Copy)]
pub struct FdtHeader {
    pub magic: BigEndian32,
    pub totalsize: BigEndian32,
    pub off_dt_struct: BigEndian32,
    pub off_dt_strings: BigEndian32,
    pub off_mem_rsvmap: BigEndian32,
    pub version: BigEndian32,
    pub last_comp_version: BigEndian32,
    pub boot_cpuid_phys: BigEndian32,
    pub size_dt_strings: BigEndian32,
    pub size_dt_struct: BigEndian32,
}

impl FdtHeader {
    /// Decode the header fields from the start of `blob` without validating them.
    pub fn parse(blob: &[u8]) -> Result<FdtHeader, FdtError> {
        let field = |idx: usize| {
            blob.get(idx * 4..)
                .and_then(BigEndian32::from_slice)
                .ok_or(FdtError::Truncated {
                    offset: idx * 4,
                    len: blob.len(),
                })
        };
        Ok(FdtHeader {
            magic: field(0)?,
            totalsize: field(1)?,
            off_dt_struct: field(2)?,
            off_dt_strings: field(3)?,
            off_mem_rsvmap: field(4)?,
            version: field(5)?,
            last_comp_version: field(6)?,
            boot_cpuid_phys: field(7)?,
            size_dt_strings: field(8)?,
            size_dt_struct: field(9)?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        [
            self.magic,
            self.totalsize,
            self.off_dt_struct,
            self.off_dt_strings,
            self.off_mem_rsvmap,
            self.version,
            self.last_comp_version,
            self.boot_cpuid_phys,
            self.size_dt_strings,
            self.size_dt_struct,
        ]
        .iter()
        .flat_map(|f| f.to_bytes())
        .collect()
    }
}

/// One `(address, size)` pair of the memory reservation block.
#[derive(Debug, Clone, Copy)]
pub struct ReservedMemoryEntry {
    pub addr: BigEndian64,
    pub size: BigEndian64,
}

bitflags! {
    /// Structure block tokens.
    pub struct FdtNodeType: u32 {
        /// Followed by the NUL-terminated unit name, padded to a cell.
        const FDT_BEGIN_NODE = 0x01;
        const FDT_END_NODE = 0x02;
        /// Followed by `len`, `nameoff` and `len` bytes of data.
        const FDT_PROP = 0x03;
        const FDT_NOP = 0x04;
        const FDT_END = 0x09;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FdtError {
    #[error("invalid magic number {magic:#x}")]
    InvalidMagic { magic: u32 },
    #[error("incompatible flattened tree version {version}")]
    IncompatibleVersion { version: u32 },
    #[error("blob truncated: offset {offset:#x} is beyond {len:#x} bytes")]
    Truncated { offset: usize, len: usize },
    #[error("the {block} block lies outside the blob")]
    BlockOutOfBounds { block: &'static str },
    #[error("the {block} block is not aligned")]
    Misaligned { block: &'static str },
    #[error("unexpected token {node_type:#x} at offset {cursor:#x}")]
    InvalidNodeType { node_type: u32, cursor: usize },
    #[error("unterminated or non UTF-8 string at offset {offset:#x}")]
    InvalidString { offset: usize },
    #[error("data after the end token at offset {offset:#x}")]
    TrailingData { offset: usize },
    #[error("nodes nested deeper than {max_depth} levels")]
    TooDeep { max_depth: usize },
}
