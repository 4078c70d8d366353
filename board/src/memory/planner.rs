//! Reconciliation of the RAM the tree describes with the RAM the user requested.
//!
//! The tree is authoritative when it already describes at least the requested amount: the
//! effective RAM size is raised to what it describes. When it describes less, the remainder is
//! added as `ddr-ram-low` / `ddr-ram-high` windows inside the main memory container.

use dt::{DeviceTree, Property, TreeError};

use crate::{
    devices::DeviceRegistry,
    error::BuildError,
    memory::{AddressSpace, WindowId},
    request::Platform,
};

/// Compatible string marking a node as a memory region.
pub const MEMORY_REGION_COMPATIBLE: &str = "qemu:memory-region";
/// Node created when the tree has no memory node.
pub const DEFAULT_MEMORY_NODE: &str = "/memory@0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryVariant {
    /// One RAM window; every unmapped region is mapped at its declared base.
    SingleWindow,
    /// RAM below a ceiling plus RAM at a fixed high base.
    LowHighSplit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryPlan {
    pub memory_node: String,
    pub primary: WindowId,
    pub primary_base: u64,
    pub primary_size: u64,
    /// RAM size the rest of the machine uses; may exceed the requested size.
    pub effective_ram_size: u64,
    /// Windows the planner added on top of the tree's regions.
    pub created: Vec<WindowId>,
}

pub struct MemoryPlanner {
    variant: MemoryVariant,
    platform: Platform,
}

/// `value` as big-endian cells, or [None] if it does not fit.
fn encode_cells(value: u64, cells: u32) -> Option<Vec<u32>> {
    let fits = match cells {
        0 => value == 0,
        1 => value <= u32::MAX as u64,
        _ => true,
    };
    fits.then(|| {
        (0..cells)
            .rev()
            .map(|i| if i >= 2 { 0 } else { (value >> (32 * i)) as u32 })
            .collect()
    })
}

impl MemoryPlanner {
    pub fn new(variant: MemoryVariant, platform: Platform) -> MemoryPlanner {
        MemoryPlanner { variant, platform }
    }

    pub fn variant(&self) -> MemoryVariant {
        self.variant
    }

    /// Make sure a memory node exists and carries the memory-region marker.
    ///
    /// Returns the canonical path of the memory node. Running it twice changes nothing.
    pub fn prepare(&self, tree: &mut DeviceTree, ram_size: u64) -> Result<String, BuildError> {
        let path = match tree.find_node_by_name("memory") {
            Some(path) => path,
            None => {
                let (addr_cells, size_cells) = tree.cell_widths("/")?;
                let mut reg = encode_cells(0, addr_cells).unwrap_or_default();
                reg.extend(encode_cells(ram_size, size_cells).ok_or_else(|| {
                    BuildError::Configuration(format!(
                        "{ram_size:#x} bytes of RAM do not fit in {size_cells} size cell(s)"
                    ))
                })?);
                let path = tree.add_node(DEFAULT_MEMORY_NODE)?;
                tree.set_property_cells(&path, "reg", &reg)?;
                log::info!("Added {path} describing {ram_size:#x} bytes");
                path
            }
        };
        if tree.get_property(&path, "compatible")?.is_none() {
            tree.set_property_string(&path, "compatible", MEMORY_REGION_COMPATIBLE)?;
            tree.set_property(&path, Property::from_u32("qemu,ram", 1))?;
            log::info!("Tagged {path} as a RAM region");
        }
        Ok(path)
    }

    /// Top-level RAM regions held by the memory node, with the address each one ends at.
    ///
    /// A region's `reg` is read as three cells `(high, low, size)` and ends at
    /// `(high << 32) + low + size`. Absent `container` and absent memory-node phandle both read
    /// as 0, so a memory node without a phandle holds every region without a container.
    pub fn described_regions(
        &self,
        tree: &DeviceTree,
        memory_node: &str,
    ) -> Result<Vec<(String, u64)>, TreeError> {
        let container = tree.phandle_of(memory_node)?.unwrap_or(0);
        let mut regions = Vec::new();
        for path in tree.find_nodes_by_compatible(MEMORY_REGION_COMPATIBLE) {
            if path == memory_node || tree.depth(&path)? != 1 {
                continue;
            }
            if tree.get_prop_cell_or(&path, "container", 0, 0)? != container {
                continue;
            }
            let cell = |idx| tree.get_prop_cell_or(&path, "reg", idx, 0).map(u64::from);
            let end = (cell(0)? << 32)
                .saturating_add(cell(1)?)
                .saturating_add(cell(2)?);
            log::trace!("{path} describes RAM up to {end:#x}");
            regions.push((path, end));
        }
        Ok(regions)
    }

    /// Highest end address among [Self::described_regions].
    pub fn described_ram(&self, tree: &DeviceTree, memory_node: &str) -> Result<u64, TreeError> {
        Ok(self
            .described_regions(tree, memory_node)?
            .into_iter()
            .map(|(_, end)| end)
            .max()
            .unwrap_or(0))
    }

    /// `(base, size)` of the low and high windows filling `described` up to `requested`.
    pub fn split(&self, described: u64, requested: u64) -> [Option<(u64, u64)>; 2] {
        let Platform {
            low_ram_ceiling: ceiling,
            high_ram_base: high_base,
        } = self.platform;
        if described >= requested {
            return [None, None];
        }
        let (low, high) = if requested <= ceiling {
            (Some((described, requested - described)), None)
        } else if described <= ceiling {
            (
                Some((described, ceiling - described)),
                Some((high_base, requested - ceiling)),
            )
        } else {
            // the tree already reaches past the ceiling
            (None, Some((high_base + (described - ceiling), requested - described)))
        };
        [
            low.filter(|(_, size)| *size > 0),
            high.filter(|(_, size)| *size > 0),
        ]
    }

    /// Place the regions after instantiation and settle the effective RAM size.
    pub fn finalize(
        &self,
        tree: &DeviceTree,
        memory_node: &str,
        ram_size: u64,
        space: &mut AddressSpace,
        registry: &DeviceRegistry,
    ) -> Result<MemoryPlan, BuildError> {
        let primary = registry
            .get(memory_node)
            .and_then(|h| h.region())
            .ok_or_else(|| {
                BuildError::Configuration(format!("{memory_node} produced no memory region"))
            })?;
        let window = space.window(primary)?;
        let (primary_base, primary_size) = (window.base, window.size);
        let mut plan = MemoryPlan {
            memory_node: memory_node.to_string(),
            primary,
            primary_base,
            primary_size,
            effective_ram_size: ram_size,
            created: vec![],
        };

        match self.variant {
            MemoryVariant::SingleWindow => {
                for path in tree.find_nodes_by_compatible(MEMORY_REGION_COMPATIBLE) {
                    let Some(id) = registry.get(&path).and_then(|h| h.region()) else {
                        continue;
                    };
                    if !space.is_mapped(id) {
                        let base = space.window(id)?.base;
                        space.map(id, WindowId::SYSTEM, base)?;
                    }
                }
            }
            MemoryVariant::LowHighSplit => {
                if !space.is_mapped(primary) {
                    space.map(primary, WindowId::SYSTEM, primary_base)?;
                }
                let regions = self.described_regions(tree, memory_node)?;
                // regions held only through the absent-phandle rule have no binding to map them
                for (path, _) in &regions {
                    let Some(id) = registry.get(path).and_then(|h| h.region()) else {
                        continue;
                    };
                    if !space.is_mapped(id) {
                        let base = space.window(id)?.base;
                        space.map(id, primary, base)?;
                    }
                }
                let described = regions.iter().map(|(_, end)| *end).max().unwrap_or(0);
                if described < ram_size {
                    let names = ["ddr-ram-low", "ddr-ram-high"];
                    for (name, window) in names.into_iter().zip(self.split(described, ram_size)) {
                        let Some((base, size)) = window else {
                            continue;
                        };
                        let id = space.create(name, base, size, true);
                        space.map(id, primary, base)?;
                        plan.created.push(id);
                    }
                } else {
                    log::warn!(
                        "Tree describes {described:#x} bytes of RAM, more than the requested \
                         {ram_size:#x}; using {described:#x}"
                    );
                    plan.effective_ram_size = described;
                }
            }
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: u64 = 1 << 30;

    fn planner() -> MemoryPlanner {
        MemoryPlanner::new(MemoryVariant::LowHighSplit, Platform::zynqmp())
    }

    fn region(tree: &mut DeviceTree, name: &str, reg: &[u32], container: Option<u32>) -> String {
        let path = tree.add_subnode("/", name).unwrap();
        tree.set_property_string(&path, "compatible", MEMORY_REGION_COMPATIBLE)
            .unwrap();
        tree.set_property_cells(&path, "reg", reg).unwrap();
        if let Some(ph) = container {
            tree.set_property_cells(&path, "container", &[ph]).unwrap();
        }
        path
    }

    #[test]
    fn prepare_adds_and_tags_a_memory_node_once() {
        let mut tree = DeviceTree::new();
        let path = planner().prepare(&mut tree, GIB).unwrap();
        assert_eq!(path, "/memory@0");
        // default root cells: two address cells, one size cell
        assert_eq!(
            tree.get_property(&path, "reg").unwrap().unwrap().value_as_cells(),
            vec![0, 0, GIB as u32]
        );
        assert_eq!(
            tree.get_prop_str(&path, "compatible").unwrap().as_deref(),
            Some(MEMORY_REGION_COMPATIBLE)
        );
        let before = tree.to_fdt();
        assert_eq!(planner().prepare(&mut tree, GIB).unwrap(), path);
        assert_eq!(tree.to_fdt(), before);
    }

    #[test]
    fn prepare_keeps_an_existing_compatible() {
        let mut tree = DeviceTree::new();
        tree.add_subnode("/", "memory").unwrap();
        tree.set_property_string("/memory", "compatible", "vendor,ram")
            .unwrap();
        planner().prepare(&mut tree, GIB).unwrap();
        assert_eq!(
            tree.get_prop_str("/memory", "compatible").unwrap().as_deref(),
            Some("vendor,ram")
        );
        assert!(tree.get_property("/memory", "qemu,ram").unwrap().is_none());
    }

    #[test]
    fn prepare_rejects_sizes_the_root_cannot_express() {
        let mut tree = DeviceTree::new();
        tree.set_property_cells("/", "#size-cells", &[1]).unwrap();
        assert!(matches!(
            planner().prepare(&mut tree, 8 * GIB),
            Err(BuildError::Configuration(_))
        ));
        tree.set_property_cells("/", "#size-cells", &[2]).unwrap();
        planner().prepare(&mut tree, 8 * GIB).unwrap();
        assert_eq!(tree.reg("/memory").unwrap(), vec![0..8 * GIB]);
    }

    #[test]
    fn scan_only_counts_top_level_regions_of_the_memory_container() {
        let mut tree = DeviceTree::new();
        let mem = region(&mut tree, "memory@0", &[0, 0, 0], None);
        tree.set_property_cells(&mem, "phandle", &[1]).unwrap();
        region(&mut tree, "ddr@0", &[0, 0, 0x4000_0000], Some(1));
        region(&mut tree, "ddr@40000000", &[0, 0x4000_0000, 0x2000_0000], Some(1));
        // wrong container
        region(&mut tree, "ocm@fffc0000", &[0, 0xfffc_0000, 0x4_0000], Some(2));
        // not top level
        tree.add_subnode("/ddr@0", "alias@0").unwrap();
        tree.set_property_string("/ddr@0/alias@0", "compatible", MEMORY_REGION_COMPATIBLE)
            .unwrap();
        tree.set_property_cells("/ddr@0/alias@0", "reg", &[0, 0, 0x7000_0000])
            .unwrap();
        tree.set_property_cells("/ddr@0/alias@0", "container", &[1])
            .unwrap();

        assert_eq!(planner().described_ram(&tree, &mem).unwrap(), 0x6000_0000);
    }

    #[test]
    fn scan_treats_missing_phandles_as_zero() {
        let mut tree = DeviceTree::new();
        let mem = region(&mut tree, "memory@0", &[0, 0, GIB as u32], None);
        region(&mut tree, "ddr@0", &[1, 0, 0x1000], None);
        assert_eq!(planner().described_ram(&tree, &mem).unwrap(), (1 << 32) + 0x1000);
    }

    #[test]
    fn split_follows_the_ceiling() {
        let p = planner();
        let (c, h) = (2 * GIB, 0x8_0000_0000);
        assert_eq!(p.split(0, GIB), [Some((0, GIB)), None]);
        assert_eq!(p.split(0, 3 * GIB), [Some((0, c)), Some((h, GIB))]);
        assert_eq!(p.split(c, 3 * GIB), [None, Some((h, GIB))]);
        assert_eq!(p.split(3 * GIB, 4 * GIB), [None, Some((h + GIB, GIB))]);
        assert_eq!(p.split(4 * GIB, GIB), [None, None]);
    }
}
