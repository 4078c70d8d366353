#![allow(dead_code)]

use board::{
    BootInfo, BuildError, BuiltMachine, KernelLoader, Machine, MachineKind, MachineRequest,
    TreeSource, TreeSources, devices::DeviceCatalog, memory::MEMORY_REGION_COMPATIBLE,
};
use dt::{DeviceTree, Property};

pub const MIB: u64 = 1 << 20;
pub const GIB: u64 = 1 << 30;

/// A root with explicit cell widths.
pub fn tree_with_cells(address: u32, size: u32) -> DeviceTree {
    let mut tree = DeviceTree::new();
    tree.set_property_cells("/", "#address-cells", &[address]).unwrap();
    tree.set_property_cells("/", "#size-cells", &[size]).unwrap();
    tree
}

/// `reg` cells for a two-address-cell, one-size-cell parent.
pub fn reg_2_1(base: u64, size: u64) -> Vec<u32> {
    vec![(base >> 32) as u32, base as u32, size as u32]
}

/// A top-level RAM region node.
pub fn add_ram_region(
    tree: &mut DeviceTree,
    name: &str,
    base: u64,
    size: u64,
    container: Option<u32>,
) -> String {
    let path = tree.add_subnode("/", name).unwrap();
    tree.set_property_string(&path, "compatible", MEMORY_REGION_COMPATIBLE)
        .unwrap();
    tree.set_property_cells(&path, "reg", &reg_2_1(base, size))
        .unwrap();
    tree.set_property(&path, Property::from_u32("qemu,ram", 1))
        .unwrap();
    if let Some(phandle) = container {
        tree.set_property_cells(&path, "container", &[phandle])
            .unwrap();
    }
    path
}

pub fn set_phandle(tree: &mut DeviceTree, path: &str, phandle: u32) {
    tree.set_property_cells(path, "phandle", &[phandle]).unwrap();
}

pub fn blob(name: &str, tree: &DeviceTree) -> TreeSource {
    TreeSource::blob(name, tree.to_fdt())
}

pub fn catalog() -> DeviceCatalog {
    DeviceCatalog::with_board_kinds(&[
        "cdns,gem",
        "xlnx,zynq-qspi-1.0",
        "n25q128a11",
        "xlnx,ps7-usb-1.00.a",
        "xlnx,zynq-uart",
    ])
}

/// Records what it was asked to load; fails on demand.
#[derive(Debug, Default)]
pub struct RecordingLoader {
    pub loaded: Vec<BootInfo>,
    pub fail: bool,
}

impl KernelLoader for RecordingLoader {
    fn load(&mut self, info: &BootInfo) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.fail {
            return Err("kernel image is not an ARM zImage".into());
        }
        self.loaded.push(info.clone());
        Ok(())
    }
}

pub fn build(
    kind: MachineKind,
    request: &MachineRequest,
    tree: &DeviceTree,
) -> Result<BuiltMachine, BuildError> {
    let sources = TreeSources::software(blob("board.dtb", tree));
    Machine::build(
        kind,
        request,
        &sources,
        &catalog(),
        &mut RecordingLoader::default(),
    )
}

/// A Zynq-7000 style tree: two A9 cores, an Ethernet controller with an MDIO bus, a dual QSPI
/// controller, and a USB controller, all on a `simple-bus`.
pub fn zynq7000_tree() -> DeviceTree {
    let mut tree = tree_with_cells(1, 1);
    tree.set_property_string("/", "compatible", "xlnx,zynq-7000")
        .unwrap();

    tree.add_node("/cpus").unwrap();
    for cpu in ["cpu@0", "cpu@1"] {
        let path = tree.add_subnode("/cpus", cpu).unwrap();
        tree.set_property_string(&path, "compatible", "arm,cortex-a9")
            .unwrap();
        tree.set_property_string(&path, "device_type", "cpu").unwrap();
    }

    tree.add_node("/amba").unwrap();
    tree.set_property_string("/amba", "compatible", "simple-bus")
        .unwrap();
    tree.set_property_cells("/amba", "#address-cells", &[1]).unwrap();
    tree.set_property_cells("/amba", "#size-cells", &[1]).unwrap();

    let gem = tree.add_subnode("/amba", "ethernet@e000b000").unwrap();
    tree.set_property_string(&gem, "compatible", "cdns,gem").unwrap();
    tree.set_property_cells(&gem, "reg", &[0xe000_b000, 0x1000])
        .unwrap();
    let mdio = tree.add_subnode(&gem, "mdio").unwrap();
    let phy = tree.add_subnode(&mdio, "phy@7").unwrap();
    tree.set_property_string(&phy, "compatible", "marvell,88e1116r")
        .unwrap();

    let qspi = tree.add_subnode("/amba", "spi@e000d000").unwrap();
    tree.set_property_string(&qspi, "compatible", "xlnx,zynq-qspi-1.0")
        .unwrap();
    tree.set_property_cells(&qspi, "is-dual", &[1]).unwrap();
    let flash = tree.add_subnode(&qspi, "flash@0").unwrap();
    tree.set_property_string(&flash, "compatible", "n25q128a11")
        .unwrap();
    tree.set_property_cells(&flash, "reg", &[0]).unwrap();

    let usb = tree.add_subnode("/amba", "usb@e0002000").unwrap();
    tree.set_property_string(&usb, "compatible", "xlnx,ps7-usb-1.00.a")
        .unwrap();
    tree.set_property_string(&usb, "dr_mode", "otg").unwrap();

    let uart = tree.add_subnode("/amba", "serial@e0001000").unwrap();
    tree.set_property_string(&uart, "compatible", "xlnx,zynq-uart")
        .unwrap();
    tree
}
