//! Machine construction.
//!
//! A build threads one [MachineBuildContext] through every stage:
//! 1. load the trees;
//! 2. board pre-init and tree quirks (Zynq-7000 only);
//! 3. memory node preparation;
//! 4. dependency-ordered instantiation;
//! 5. memory planning;
//! 6. board post-init, teardown of transient nodes and boot info assembly;
//! 7. the kernel loader, when a kernel was requested.
//!
//! Nothing is global, so independent builds in one process never see each other.

pub mod legacy;
pub mod zynq7000;

use dt::DeviceTree;

use crate::{
    boot::{BootInfo, KernelLoader, SecondaryBoot},
    devices::{
        BuilderTable, DeviceFactory, DeviceRegistry, instantiate, region::MemoryRegionBuilder,
    },
    error::BuildError,
    loader::{LoadedTrees, TreeSources, load_effective_tree},
    memory::{AddressSpace, MEMORY_REGION_COMPATIBLE, MemoryPlan, MemoryPlanner, MemoryVariant},
    quirks,
    request::{MachineRequest, Platform},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineKind {
    /// `arm-generic-fdt`: everything from the tree, low/high RAM split.
    Generic,
    /// `arm-generic-fdt-7series`: Zynq-7000 quirks and board devices.
    Zynq7000,
    /// `xilinx-zynq-a9`: fixed device table, no tree.
    LegacyZynq,
}

pub const GENERIC_MACHINE_NAME: &str = "arm-generic-fdt";
pub const ZYNQ7000_MACHINE_NAME: &str = "arm-generic-fdt-7series";
pub const DEPRECATED_MACHINE_NAME: &str = "arm-generic-fdt-plnx";
pub const LEGACY_MACHINE_NAME: &str = "xilinx-zynq-a9";

impl MachineKind {
    pub fn from_name(name: &str) -> Result<MachineKind, BuildError> {
        match name {
            GENERIC_MACHINE_NAME => Ok(MachineKind::Generic),
            ZYNQ7000_MACHINE_NAME => Ok(MachineKind::Zynq7000),
            DEPRECATED_MACHINE_NAME => {
                log::warn!(
                    "The '{DEPRECATED_MACHINE_NAME}' machine has been deprecated. Please use \
                     '{ZYNQ7000_MACHINE_NAME}' instead."
                );
                Ok(MachineKind::Zynq7000)
            }
            LEGACY_MACHINE_NAME => Ok(MachineKind::LegacyZynq),
            _ => Err(BuildError::Configuration(format!("unknown machine '{name}'"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MachineKind::Generic => GENERIC_MACHINE_NAME,
            MachineKind::Zynq7000 => ZYNQ7000_MACHINE_NAME,
            MachineKind::LegacyZynq => LEGACY_MACHINE_NAME,
        }
    }

    pub fn max_cpus(&self) -> u32 {
        match self {
            MachineKind::Generic => config::zynqmp::MAX_CPUS as u32,
            MachineKind::Zynq7000 => config::zynq7000::MAX_CPUS as u32,
            MachineKind::LegacyZynq => 1,
        }
    }

    pub fn default_platform(&self) -> Platform {
        match self {
            MachineKind::Generic => Platform::zynqmp(),
            MachineKind::Zynq7000 | MachineKind::LegacyZynq => Platform::zynq7000(),
        }
    }

    fn memory_variant(&self) -> MemoryVariant {
        match self {
            MachineKind::Generic => MemoryVariant::LowHighSplit,
            MachineKind::Zynq7000 | MachineKind::LegacyZynq => MemoryVariant::SingleWindow,
        }
    }
}

/// State of one machine build.
pub struct MachineBuildContext<'f> {
    pub kind: MachineKind,
    pub request: &'f MachineRequest,
    pub trees: LoadedTrees,
    pub space: AddressSpace,
    pub registry: DeviceRegistry,
    pub table: BuilderTable<'f>,
    pub factory: &'f dyn DeviceFactory,
    /// Transient node paths to delete before the tree leaves the build.
    pub transient: Vec<String>,
    pub cpu_count: u32,
    pub effective_ram_size: u64,
}

impl<'f> MachineBuildContext<'f> {
    fn new(
        kind: MachineKind,
        request: &'f MachineRequest,
        trees: LoadedTrees,
        factory: &'f dyn DeviceFactory,
        cpu_count: u32,
    ) -> MachineBuildContext<'f> {
        let mut table = BuilderTable::new(Some(factory));
        table.register_compatible(MEMORY_REGION_COMPATIBLE, Box::new(MemoryRegionBuilder));
        MachineBuildContext {
            kind,
            request,
            trees,
            space: AddressSpace::new(),
            registry: DeviceRegistry::new(),
            table,
            factory,
            transient: vec![],
            cpu_count,
            effective_ram_size: request.ram_size(),
        }
    }

    /// Delete the scaffolding, apply the late fixes and produce the boot record.
    fn assemble_boot_info(&mut self, plan: &MemoryPlan) -> Result<BootInfo, BuildError> {
        let tree = &mut self.trees.hardware;
        quirks::remove_transient(tree, &self.transient)?;
        if self.kind == MachineKind::Zynq7000 {
            quirks::force_usb_host_mode(tree)?;
        }
        let dtb = if self.trees.shared {
            Some(tree.to_fdt())
        } else {
            self.trees.software.clone()
        };
        let (smp_boot, smp_bootreg, board_id) = match self.kind {
            MachineKind::Generic => (
                config::zynqmp::SMP_BOOT_ADDR,
                config::zynqmp::SMP_BOOTREG_ADDR,
                config::zynqmp::BOARD_ID,
            ),
            _ => (
                config::zynq7000::SMP_BOOT_ADDR,
                config::zynq7000::SMP_BOOTREG_ADDR,
                config::zynq7000::BOARD_ID,
            ),
        };
        Ok(BootInfo {
            loader_start: plan.primary_base,
            ram_size: plan.primary_size,
            kernel: self.request.kernel().map(|p| p.to_path_buf()),
            initrd: self.request.initrd().map(|p| p.to_path_buf()),
            cmdline: self.request.cmdline().map(|s| s.to_string()),
            cpu_count: self.cpu_count,
            secondary: Some(SecondaryBoot::parked_at(smp_boot, smp_bootreg)),
            board_id: board_id as u32,
            secure_boot: true,
            dtb,
        })
    }
}

/// A finished machine.
#[derive(Debug)]
pub struct BuiltMachine {
    pub kind: MachineKind,
    pub boot: BootInfo,
    pub space: AddressSpace,
    pub registry: DeviceRegistry,
    pub effective_ram_size: u64,
    /// The hardware tree after teardown.
    pub tree: DeviceTree,
    pub memory: Option<MemoryPlan>,
}

/// Number of CPUs: `/cpus` children with `device_type = "cpu"`, else the request's count.
pub fn count_cpus(
    tree: &DeviceTree,
    request: &MachineRequest,
    max_cpus: u32,
) -> Result<u32, BuildError> {
    let described = if tree.contains("/cpus") {
        tree.children("/cpus")?
            .iter()
            .filter(|cpu| matches!(tree.get_prop_str(cpu, "device_type"), Ok(Some(t)) if t == "cpu"))
            .count() as u32
    } else {
        0
    };
    let count = if described > 0 {
        described
    } else {
        request.cpu_count()
    };
    if count == 0 || count > max_cpus {
        return Err(BuildError::Configuration(format!(
            "{count} CPUs requested, the machine supports 1 to {max_cpus}"
        )));
    }
    Ok(count)
}

pub struct Machine;

impl Machine {
    pub fn build(
        kind: MachineKind,
        request: &MachineRequest,
        sources: &TreeSources,
        factory: &dyn DeviceFactory,
        loader: &mut dyn KernelLoader,
    ) -> Result<BuiltMachine, BuildError> {
        log::info!("Building {} with {:#x} bytes of RAM", kind.name(), request.ram_size());
        if kind == MachineKind::LegacyZynq {
            return legacy::build(request, factory, loader);
        }

        let trees = load_effective_tree(sources)?;
        let cpu_count = count_cpus(&trees.hardware, request, kind.max_cpus())?;
        let mut ctx = MachineBuildContext::new(kind, request, trees, factory, cpu_count);

        if kind == MachineKind::Zynq7000 {
            zynq7000::pre_init(&mut ctx)?;
            zynq7000::apply_quirks(&mut ctx)?;
        }

        let planner = MemoryPlanner::new(
            kind.memory_variant(),
            request.platform().unwrap_or(kind.default_platform()),
        );
        let memory_node = planner.prepare(&mut ctx.trees.hardware, request.ram_size())?;
        instantiate(
            &ctx.trees.hardware,
            &ctx.table,
            &mut ctx.space,
            &mut ctx.registry,
        )?;
        let plan = planner.finalize(
            &ctx.trees.hardware,
            &memory_node,
            request.ram_size(),
            &mut ctx.space,
            &ctx.registry,
        )?;
        ctx.effective_ram_size = plan.effective_ram_size;

        if kind == MachineKind::Zynq7000 {
            zynq7000::post_init(&mut ctx)?;
        }

        let boot = ctx.assemble_boot_info(&plan)?;
        log::info!(
            "Boot info: RAM {:#x}+{:#x}, {} CPU(s), board {:#x}",
            boot.loader_start,
            boot.ram_size,
            boot.cpu_count,
            boot.board_id
        );
        if request.kernel().is_some() {
            loader.load(&boot).map_err(BuildError::KernelLoader)?;
        }

        Ok(BuiltMachine {
            kind,
            boot,
            space: ctx.space,
            registry: ctx.registry,
            effective_ram_size: ctx.effective_ram_size,
            tree: ctx.trees.hardware,
            memory: Some(plan),
        })
    }
}
