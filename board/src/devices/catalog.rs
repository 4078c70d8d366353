use std::collections::BTreeSet;

use dt::Property;

use crate::{
    devices::{builder::DeviceFactory, object::DeviceHandle},
    error::DeviceError,
};

/// Device kinds the board code itself instantiates.
pub const BOARD_KINDS: &[&str] = &[
    "arm.pl35x",
    "nand",
    "mdio",
    "a9-scu",
    "xilinx,zynq_slcr",
    "a9mpcore_priv",
    "xlnx.ps7-i2c",
    "pca9548",
    "at.24c08",
    "xilinx,spips",
    "m25p80",
    "xlnx,ps7-usb",
    "cadence_uart",
    "cadence_ttc",
    "cadence_gem",
    "cfi.pflash02",
];

/// A [DeviceFactory] creating plain property-carrying objects for a fixed set of kinds.
///
/// Register-level device models live elsewhere; this catalog only records what was asked for,
/// which is all the layout engine needs.
#[derive(Debug, Default, Clone)]
pub struct DeviceCatalog {
    kinds: BTreeSet<Box<str>>,
}

impl DeviceCatalog {
    pub fn new(kinds: &[&str]) -> DeviceCatalog {
        DeviceCatalog {
            kinds: kinds.iter().map(|k| Box::from(*k)).collect(),
        }
    }

    /// The board kinds plus `extra` device-tree compatibles.
    pub fn with_board_kinds(extra: &[&str]) -> DeviceCatalog {
        let mut catalog = DeviceCatalog::new(BOARD_KINDS);
        catalog.add_kinds(extra);
        catalog
    }

    pub fn add_kinds(&mut self, kinds: &[&str]) {
        self.kinds.extend(kinds.iter().map(|k| Box::from(*k)));
    }
}

impl DeviceFactory for DeviceCatalog {
    fn supports(&self, kind: &str) -> bool {
        self.kinds.contains(kind)
    }

    fn create(
        &self,
        kind: &str,
        name: &str,
        props: &[Property],
    ) -> Result<DeviceHandle, DeviceError> {
        if !self.supports(kind) {
            return Err(DeviceError::UnknownKind {
                kind: kind.to_string(),
            });
        }
        let handle = DeviceHandle::new(name, kind);
        for prop in props {
            handle.set_property(prop.clone());
        }
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_kinds_are_rejected() {
        let catalog = DeviceCatalog::with_board_kinds(&["cdns,ttc"]);
        assert!(catalog.supports("cdns,ttc"));
        assert!(catalog.supports("a9-scu"));
        assert!(matches!(
            catalog.create("arm,pl011", "serial", &[]),
            Err(DeviceError::UnknownKind { .. })
        ));
        let ttc = catalog
            .create("cdns,ttc", "timer@f8001000", &[Property::from_u32("x", 3)])
            .unwrap();
        assert_eq!(ttc.kind.as_ref(), "cdns,ttc");
        assert!(ttc.property("x").is_some());
    }
}
