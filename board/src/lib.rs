//! Machine assembly from a flattened hardware description.
//!
//! [Machine::build] turns a [MachineRequest] and one or two device trees into a [BuiltMachine]:
//! device objects built in dependency order, a RAM layout reconciled with what the tree
//! describes, and the boot parameters for the kernel loader.

pub mod boot;
pub mod devices;
pub mod error;
pub mod loader;
pub mod logging;
pub mod machine;
pub mod memory;
pub mod quirks;
pub mod request;

pub use boot::{BootInfo, KernelLoader, LoggingLoader};
pub use error::{BuildError, DeviceError};
pub use loader::{TreeSource, TreeSources};
pub use machine::{BuiltMachine, Machine, MachineKind};
pub use request::{MachineRequest, Platform};
