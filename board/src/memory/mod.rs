//! Machine memory layout: the address-space model and the planner reconciling the tree's RAM
//! description with the requested RAM size.

pub mod planner;
pub mod space;

pub use planner::{MEMORY_REGION_COMPATIBLE, MemoryPlan, MemoryPlanner, MemoryVariant};
pub use space::{AddressSpace, MemoryWindow, WindowId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("no memory window with index {id}")]
    UnknownWindow { id: usize },
    #[error("memory window '{name}' is already mapped")]
    AlreadyMapped { name: String },
    #[error("memory window '{name}' at {base:#x} overlaps '{other}'")]
    Overlap {
        name: String,
        other: String,
        base: u64,
    },
    #[error("memory window '{name}' cannot be mapped inside itself")]
    SelfContainer { name: String },
}
