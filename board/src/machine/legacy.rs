//! The fixed-layout Zynq-7000 board, built from a static device table instead of a tree.

use config::legacy_zynq::{
    BOARD_ID, MAX_RAM_SIZE, MPCORE_PERIPHBASE, OCM_BASE, OCM_SIZE, PFLASH_BASE, SLCR_BASE,
};
use dt::{DeviceTree, Property};

use crate::{
    boot::{BootInfo, KernelLoader},
    devices::{DeviceFactory, DeviceHandle, DeviceRegistry},
    error::BuildError,
    machine::{BuiltMachine, MachineKind},
    memory::{AddressSpace, WindowId},
    request::MachineRequest,
};

const PFLASH_SIZE: u32 = 64 << 20;
const PFLASH_SECTOR_SIZE: u32 = 128 << 10;
const QSPI_LINEAR_BASE: u64 = 0xfc00_0000;
const GEM_BASES: [(u64, u32); 2] = [(0xe000_b000, 54), (0xe000_c000, 77)];
/// Mux channels of each I2C controller that carry EEPROMs.
const I2C_MUX_CHANNELS: [u32; 2] = [2, 3];
const EEPROMS_PER_CHANNEL: u32 = 2;
const EEPROM_BASE_ADDR: u32 = 0x50;
const EEPROM_SIZE: u32 = 1024;
const SPI_FLASH_PART: &str = "n25q128";

struct FixedDevice {
    kind: &'static str,
    name: &'static str,
    base: u64,
    irqs: &'static [u32],
}

const fn device(
    kind: &'static str,
    name: &'static str,
    base: u64,
    irqs: &'static [u32],
) -> FixedDevice {
    FixedDevice {
        kind,
        name,
        base,
        irqs,
    }
}

const DEVICES: &[FixedDevice] = &[
    device("xlnx,ps7-usb", "usb0", 0xe000_2000, &[53]),
    device("xlnx,ps7-usb", "usb1", 0xe000_3000, &[75]),
    device("cadence_uart", "uart0", 0xe000_0000, &[59]),
    device("cadence_uart", "uart1", 0xe000_1000, &[82]),
    device("cadence_ttc", "ttc0", 0xf800_1000, &[42, 43, 44]),
    device("cadence_ttc", "ttc1", 0xf800_2000, &[69, 70, 71]),
];

const I2C_CONTROLLERS: [(&str, u64, u32); 2] = [
    ("i2c0", 0xe000_4000, 57),
    ("i2c1", 0xe000_5000, 80),
];

/// SPI controllers: base, interrupt, and whether it is the quad-SPI one.
const SPI_CONTROLLERS: [(&str, u64, u32, bool); 3] = [
    ("spi0", 0xe000_6000, 58, false),
    ("spi1", 0xe000_7000, 81, false),
    ("qspi", 0xe000_d000, 51, true),
];

struct LegacyBoard<'a> {
    factory: &'a dyn DeviceFactory,
    registry: DeviceRegistry,
}

impl LegacyBoard<'_> {
    fn add(
        &mut self,
        kind: &str,
        name: &str,
        base: u64,
        props: &[Property],
    ) -> Result<DeviceHandle, BuildError> {
        let path = format!("/{name}");
        let handle = self
            .factory
            .create(kind, name, props)
            .map_err(|source| BuildError::Builder {
                node: path.clone(),
                source,
            })?;
        handle.map_mmio(base);
        self.registry.insert(&path, handle.clone());
        Ok(handle)
    }

    /// Create a device behind `parent`, registered at `<parent_path>/<slot>`.
    fn attach(
        &mut self,
        parent_path: &str,
        parent: &DeviceHandle,
        kind: &str,
        slot: &str,
        props: &[Property],
    ) -> Result<DeviceHandle, BuildError> {
        let path = format!("{parent_path}/{slot}");
        let name = slot.rsplit('/').next().unwrap_or(slot);
        let handle = self
            .factory
            .create(kind, name, props)
            .map_err(|source| BuildError::Builder {
                node: path.clone(),
                source,
            })?;
        parent.add_child(slot, &handle);
        self.registry.insert(&path, handle.clone());
        Ok(handle)
    }

    /// An I2C controller with a pca9548 mux whose channels carry 24c08 EEPROMs.
    fn add_i2c(&mut self, name: &str, base: u64, irq: u32) -> Result<(), BuildError> {
        let i2c = self.add(
            "xlnx.ps7-i2c",
            name,
            base,
            &[Property::from_u32("interrupts", irq)],
        )?;
        let i2c_path = format!("/{name}");
        let mux = self.attach(
            &i2c_path,
            &i2c,
            "pca9548",
            "mux@0",
            &[Property::from_u32("address", 0)],
        )?;
        let mux_path = format!("{i2c_path}/mux@0");
        for channel in I2C_MUX_CHANNELS {
            for i in 0..EEPROMS_PER_CHANNEL {
                let addr = EEPROM_BASE_ADDR + 4 * i;
                self.attach(
                    &mux_path,
                    &mux,
                    "at.24c08",
                    &format!("i2c@{channel}/eeprom@{addr:x}"),
                    &[
                        Property::from_u32("address", addr),
                        Property::from_u32("size", EEPROM_SIZE),
                    ],
                )?;
            }
        }
        Ok(())
    }

    /// A SPI controller with a flash on every chip select of every bus.
    fn add_spi(
        &mut self,
        name: &str,
        base: u64,
        irq: u32,
        is_qspi: bool,
    ) -> Result<(), BuildError> {
        let (busses, ss_bits, txrx_bytes) = if is_qspi { (2, 2, 4) } else { (1, 4, 1) };
        let spi = self.add(
            "xilinx,spips",
            name,
            base,
            &[
                Property::from_u32("interrupts", irq),
                Property::from_u32("num-busses", busses),
                Property::from_u32("num-ss-bits", ss_bits),
                Property::from_u32("num-txrx-bytes", txrx_bytes),
            ],
        )?;
        if is_qspi {
            spi.map_mmio(QSPI_LINEAR_BASE);
        }
        let spi_path = format!("/{name}");
        for bus in 0..busses {
            for cs in 0..ss_bits {
                self.attach(
                    &spi_path,
                    &spi,
                    "m25p80",
                    &format!("spi{bus}/flash@{cs}"),
                    &[
                        Property::from_string("partname", SPI_FLASH_PART),
                        // line 0 is the controller interrupt
                        Property::from_u32("cs-line", bus * ss_bits + cs + 1),
                    ],
                )?;
            }
        }
        Ok(())
    }
}

pub fn build(
    request: &MachineRequest,
    factory: &dyn DeviceFactory,
    loader: &mut dyn KernelLoader,
) -> Result<BuiltMachine, BuildError> {
    let mut ram_size = request.ram_size();
    if ram_size > MAX_RAM_SIZE {
        log::warn!("RAM size {ram_size:#x} exceeds the board maximum, clamped to {MAX_RAM_SIZE:#x}");
        ram_size = MAX_RAM_SIZE;
    }

    let mut space = AddressSpace::new();
    let ext_ram = space.create("zynq.ext_ram", 0, ram_size, true);
    space.map(ext_ram, WindowId::SYSTEM, 0)?;
    let ocm = space.create("zynq.ocm_ram", OCM_BASE, OCM_SIZE, true);
    space.map(ocm, WindowId::SYSTEM, OCM_BASE)?;

    let mut board = LegacyBoard {
        factory,
        registry: DeviceRegistry::new(),
    };
    board.add(
        "cfi.pflash02",
        "pflash",
        PFLASH_BASE,
        &[
            Property::from_u32("size", PFLASH_SIZE),
            Property::from_u32("sector-length", PFLASH_SECTOR_SIZE),
            Property::from_u32("width", 1),
        ],
    )?;
    board.add("xilinx,zynq_slcr", "slcr", SLCR_BASE, &[])?;
    board.add(
        "a9mpcore_priv",
        "mpcore",
        MPCORE_PERIPHBASE,
        &[Property::from_u32("num-cpu", 1)],
    )?;

    for dev in DEVICES {
        board.add(
            dev.kind,
            dev.name,
            dev.base,
            &[Property::from_cells("interrupts", dev.irqs)],
        )?;
    }

    for (name, base, irq) in I2C_CONTROLLERS {
        board.add_i2c(name, base, irq)?;
    }
    for (name, base, irq, is_qspi) in SPI_CONTROLLERS {
        board.add_spi(name, base, irq, is_qspi)?;
    }

    let nics = request.nic_count() as usize;
    if nics > GEM_BASES.len() {
        log::warn!("Only {} network interfaces are wired, ignoring the rest", GEM_BASES.len());
    }
    for (i, (base, irq)) in GEM_BASES.into_iter().take(nics).enumerate() {
        board.add(
            "cadence_gem",
            &format!("gem{i}"),
            base,
            &[Property::from_u32("interrupts", irq)],
        )?;
    }

    let boot = BootInfo {
        loader_start: 0,
        ram_size,
        kernel: request.kernel().map(|p| p.to_path_buf()),
        initrd: request.initrd().map(|p| p.to_path_buf()),
        cmdline: request.cmdline().map(|s| s.to_string()),
        cpu_count: 1,
        secondary: None,
        board_id: BOARD_ID as u32,
        secure_boot: false,
        dtb: None,
    };
    if request.kernel().is_some() {
        loader.load(&boot).map_err(BuildError::KernelLoader)?;
    }

    Ok(BuiltMachine {
        kind: MachineKind::LegacyZynq,
        boot,
        space,
        registry: board.registry,
        effective_ram_size: ram_size,
        tree: DeviceTree::new(),
        memory: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{boot::LoggingLoader, devices::DeviceCatalog};

    #[test]
    fn ram_is_clamped_and_nics_are_wired() {
        let request = MachineRequest::new(4 << 30).with_nics(1);
        let machine = build(&request, &DeviceCatalog::with_board_kinds(&[]), &mut LoggingLoader)
            .unwrap();
        assert_eq!(machine.boot.ram_size, MAX_RAM_SIZE);
        assert_eq!(machine.boot.loader_start, 0);
        assert!(!machine.boot.secure_boot);
        assert!(machine.boot.secondary.is_none());
        assert_eq!(machine.space.ram_total(), MAX_RAM_SIZE + OCM_SIZE);

        assert!(machine.registry.contains("/gem0"));
        assert!(!machine.registry.contains("/gem1"));
        let qspi = machine.registry.get("/qspi").unwrap();
        assert_eq!(qspi.mmio(), vec![0xe000_d000, QSPI_LINEAR_BASE]);
        assert_eq!(
            qspi.property("num-busses").unwrap().value_as_u32().unwrap(),
            2
        );
        let ttc = machine.registry.get("/ttc1").unwrap();
        assert_eq!(
            ttc.property("interrupts").unwrap().value_as_cells(),
            vec![69, 70, 71]
        );
    }

    #[test]
    fn buses_carry_their_eeproms_and_flashes() {
        let request = MachineRequest::new(256 << 20);
        let machine = build(&request, &DeviceCatalog::with_board_kinds(&[]), &mut LoggingLoader)
            .unwrap();
        let count = |kind: &str| {
            machine
                .registry
                .iter()
                .filter(|(_, dev)| dev.kind.as_ref() == kind)
                .count()
        };
        assert_eq!(count("pca9548"), 2);
        assert_eq!(count("at.24c08"), 8);
        // 4 chip selects on each plain controller, 2 busses of 2 on the quad one
        assert_eq!(count("m25p80"), 12);

        let mux = machine.registry.get("/i2c1/mux@0").unwrap();
        let eeprom = machine.registry.get("/i2c1/mux@0/i2c@3/eeprom@54").unwrap();
        assert!(mux.child("i2c@3/eeprom@54").unwrap().same(eeprom));
        assert_eq!(eeprom.property("size").unwrap().value_as_u32().unwrap(), 1024);

        let flash = machine.registry.get("/qspi/spi1/flash@1").unwrap();
        assert_eq!(
            flash.property("partname").unwrap().value_as_str().unwrap(),
            "n25q128"
        );
        assert_eq!(flash.property("cs-line").unwrap().value_as_u32().unwrap(), 4);
        assert_eq!(machine.registry.get("/spi0").unwrap().children().len(), 4);
    }
}
