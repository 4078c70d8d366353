//! Small helpers shared by the tree store and the machine builder.

pub mod endian;
pub mod num;
pub mod range;
pub mod range_set;
