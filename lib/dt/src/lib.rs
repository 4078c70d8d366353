//! Hardware description tree: an editable in-memory store plus a reader and writer for the
//! flattened (binary) representation.

pub mod fdt;
pub mod node;
pub mod prop;

pub use fdt::{FdtError, reader::FdtReader, writer::FdtWriter};
pub use node::{DeviceTree, Node, NodeType, TreeError};
pub use prop::{Property, PropertyError};

impl DeviceTree {
    /// Parse a flattened blob into an editable tree.
    pub fn from_fdt(blob: &[u8]) -> Result<DeviceTree, FdtError> {
        FdtReader::new(blob).read()
    }

    /// Serialise the tree into a flattened blob.
    pub fn to_fdt(&self) -> Vec<u8> {
        FdtWriter::new().write(self)
    }
}
