//! Device objects and the dependency-ordered instantiation pass that creates them from the tree.

pub mod builder;
pub mod catalog;
pub mod instantiate;
pub mod mdio;
pub mod object;
pub mod region;

pub use builder::{
    BuildContext, BuildOutcome, Builder, BuilderTable, DeviceFactory, NodeView, PendingBinding,
};
pub use catalog::DeviceCatalog;
pub use instantiate::{InstantiationReport, instantiate};
pub use object::{Device, DeviceHandle, DeviceRef, DeviceRegistry};
