//! Structural patches applied to the hardware tree of Zynq-7000 boards.
//!
//! Each patch is idempotent. All of them run before memory planning; nodes they synthesize are
//! marked transient and must be deleted once instantiation has consumed them.

use dt::{DeviceTree, Property, TreeError, node::join_path};

/// Dual-capable QSPI controller.
pub const QSPI_COMPATIBLE: &str = "xlnx,zynq-qspi-1.0";
/// Name of the synthesized second flash device.
pub const QSPI_DUMMY_NAME: &str = "ps7-qspi-dummy@0";
/// USB controller whose PHY cannot be modelled.
pub const USB_COMPATIBLE: &str = "xlnx,ps7-usb-1.00.a";
/// Flag telling the guest not to initialise the interrupt controller.
pub const GIC_DISABLE_PROP: &str = "disable-linux-gic-init";
/// Configuration base address property of A9 cores.
pub const RESET_CBAR_PROP: &str = "reset-cbar";

/// Clone the first flash device of a dual QSPI controller onto the second bus.
///
/// Only runs when the controller has `is-dual = <1>` and a child. The controller gets
/// `#bus-cells = <1>` and the first child moves to bus 0; the clone also needs that child's
/// `compatible`. Returns the path of the transient clone.
pub fn clone_dual_qspi_flash(tree: &mut DeviceTree) -> Result<Option<String>, TreeError> {
    let Some(qspi) = tree.find_node_by_compatible(QSPI_COMPATIBLE) else {
        return Ok(None);
    };
    if tree.get_prop_cell_or(&qspi, "is-dual", 0, 0)? != 1 {
        return Ok(None);
    }
    let dummy = join_path(&qspi, QSPI_DUMMY_NAME);
    let Some(flash) = tree
        .children(&qspi)?
        .into_iter()
        .find(|child| *child != dummy)
    else {
        return Ok(None);
    };
    tree.set_property_cells(&qspi, "#bus-cells", &[1])?;
    // first flash on bus 0, chip select 0
    tree.set_property_cells(&flash, "reg", &[0, 0])?;
    let Some(compatible) = tree.get_property(&flash, "compatible")?.cloned() else {
        log::warn!("{flash} has no compatible, not cloning it for dual QSPI");
        return Ok(None);
    };
    if !tree.contains(&dummy) {
        tree.add_node(&dummy)?;
    }
    tree.set_property(&dummy, Property::new("compatible", compatible.data))?;
    // clone on bus 1, chip select 0
    tree.set_property_cells(&dummy, "reg", &[1, 0])?;
    tree.mark_transient(&dummy)?;
    log::info!("Cloned {flash} to {dummy} for dual QSPI");
    Ok(Some(dummy))
}

/// Set `disable-linux-gic-init` on the root unless a node named `interrupt-controller`
/// exists. Returns whether the flag is set.
pub fn gate_interrupt_controller(tree: &mut DeviceTree) -> Result<bool, TreeError> {
    if tree.find_node_by_name("interrupt-controller").is_some() {
        return Ok(false);
    }
    tree.set_property_cells("/", GIC_DISABLE_PROP, &[1])?;
    log::info!("No interrupt controller described, set {GIC_DISABLE_PROP}");
    Ok(true)
}

/// Write `reset-cbar = <base>` on every `arm,<cpu_model>` node, overwriting what is there.
/// Returns the patched paths.
pub fn inject_reset_cbar(
    tree: &mut DeviceTree,
    cpu_model: &str,
    base: u32,
) -> Result<Vec<String>, TreeError> {
    let cpus = tree.find_nodes_by_compatible(&format!("arm,{cpu_model}"));
    for cpu in cpus.iter() {
        tree.set_property_cells(cpu, RESET_CBAR_PROP, &[base])?;
    }
    log::info!("Set {RESET_CBAR_PROP} = {base:#x} on {} CPU node(s)", cpus.len());
    Ok(cpus)
}

/// Force the USB controller into host mode. Returns whether a controller was found.
pub fn force_usb_host_mode(tree: &mut DeviceTree) -> Result<bool, TreeError> {
    let Some(usb) = tree.find_node_by_compatible(USB_COMPATIBLE) else {
        return Ok(false);
    };
    tree.set_property_string(&usb, "dr_mode", "host")?;
    log::info!("Forced {usb} into host mode");
    Ok(true)
}

/// Delete the transient nodes; afterwards none may remain.
pub fn remove_transient(tree: &mut DeviceTree, paths: &[String]) -> Result<(), TreeError> {
    for path in paths {
        if tree.contains(path) {
            tree.delete_node(path)?;
            log::info!("Removed transient node {path}");
        }
    }
    for path in tree.transient_paths() {
        tree.delete_node(&path)?;
        log::warn!("Removed untracked transient node {path}");
    }
    debug_assert!(tree.transient_paths().is_empty());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qspi_tree(is_dual: u32) -> DeviceTree {
        let mut tree = DeviceTree::new();
        tree.add_node("/amba").unwrap();
        tree.add_node("/amba/spi@e000d000").unwrap();
        tree.set_property_string("/amba/spi@e000d000", "compatible", QSPI_COMPATIBLE)
            .unwrap();
        tree.set_property_cells("/amba/spi@e000d000", "is-dual", &[is_dual])
            .unwrap();
        tree.add_node("/amba/spi@e000d000/flash@0").unwrap();
        tree.set_property(
            "/amba/spi@e000d000/flash@0",
            Property::from_strlist("compatible", &["n25q128", "jedec,spi-nor"]),
        )
        .unwrap();
        tree.set_property_cells("/amba/spi@e000d000/flash@0", "spi-max-frequency", &[50_000_000])
            .unwrap();
        tree
    }

    #[test]
    fn dual_qspi_flash_is_cloned_once() {
        let mut tree = qspi_tree(1);
        let dummy = clone_dual_qspi_flash(&mut tree).unwrap().unwrap();
        assert_eq!(dummy, "/amba/spi@e000d000/ps7-qspi-dummy@0");
        let node = tree.get_node(&dummy).unwrap();
        assert_eq!(node.compatibles(), vec!["n25q128", "jedec,spi-nor"]);
        assert!(node.get_property("spi-max-frequency").is_none());
        assert_eq!(
            node.get_property("reg").unwrap().value_as_cells(),
            vec![1, 0]
        );
        assert_eq!(
            tree.get_property("/amba/spi@e000d000/flash@0", "reg")
                .unwrap()
                .unwrap()
                .value_as_cells(),
            vec![0, 0]
        );
        assert_eq!(
            tree.get_prop_u32("/amba/spi@e000d000", "#bus-cells").unwrap(),
            Some(1)
        );

        let count = tree.node_count();
        assert_eq!(clone_dual_qspi_flash(&mut tree).unwrap(), Some(dummy.clone()));
        assert_eq!(tree.node_count(), count);
        assert_eq!(tree.transient_paths(), vec![dummy.clone()]);

        remove_transient(&mut tree, &[dummy.clone()]).unwrap();
        assert!(!tree.contains(&dummy));
        assert!(tree.contains("/amba/spi@e000d000/flash@0"));
    }

    #[test]
    fn flash_without_compatible_is_readdressed_but_not_cloned() {
        let mut tree = qspi_tree(1);
        let flash = "/amba/spi@e000d000/flash@0";
        tree.delete_property(flash, "compatible").unwrap();
        tree.set_property_cells(flash, "reg", &[5]).unwrap();

        assert_eq!(clone_dual_qspi_flash(&mut tree).unwrap(), None);
        assert_eq!(
            tree.get_prop_u32("/amba/spi@e000d000", "#bus-cells").unwrap(),
            Some(1)
        );
        assert_eq!(
            tree.get_property(flash, "reg").unwrap().unwrap().value_as_cells(),
            vec![0, 0]
        );
        assert!(tree.transient_paths().is_empty());
    }

    #[test]
    fn single_qspi_is_left_alone() {
        let mut tree = qspi_tree(0);
        let before = tree.to_fdt();
        assert_eq!(clone_dual_qspi_flash(&mut tree).unwrap(), None);
        assert_eq!(tree.to_fdt(), before);
    }

    #[test]
    fn gic_gate_is_idempotent_and_respects_a_modelled_controller() {
        let mut tree = DeviceTree::new();
        assert!(gate_interrupt_controller(&mut tree).unwrap());
        let once = tree.to_fdt();
        assert!(gate_interrupt_controller(&mut tree).unwrap());
        assert_eq!(tree.to_fdt(), once);
        assert_eq!(tree.get_prop_u32("/", GIC_DISABLE_PROP).unwrap(), Some(1));

        let mut tree = DeviceTree::new();
        tree.add_node("/interrupt-controller@f8f01000").unwrap();
        assert!(!gate_interrupt_controller(&mut tree).unwrap());
        assert!(tree.get_property("/", GIC_DISABLE_PROP).unwrap().is_none());
    }

    #[test]
    fn reset_cbar_overwrites_every_matching_cpu() {
        let mut tree = DeviceTree::new();
        tree.add_node("/cpus").unwrap();
        for cpu in ["cpu@0", "cpu@1"] {
            let path = tree.add_subnode("/cpus", cpu).unwrap();
            tree.set_property_string(&path, "compatible", "arm,cortex-a9")
                .unwrap();
        }
        tree.set_property_cells("/cpus/cpu@1", RESET_CBAR_PROP, &[0x1234])
            .unwrap();
        let patched = inject_reset_cbar(&mut tree, "cortex-a9", 0xF8F0_0000).unwrap();
        assert_eq!(patched.len(), 2);
        for cpu in patched {
            assert_eq!(
                tree.get_prop_u32(&cpu, RESET_CBAR_PROP).unwrap(),
                Some(0xF8F0_0000)
            );
        }
        assert!(inject_reset_cbar(&mut tree, "cortex-a53", 0).unwrap().is_empty());
    }

    #[test]
    fn usb_fix_is_a_no_op_without_a_controller() {
        let mut tree = DeviceTree::new();
        assert!(!force_usb_host_mode(&mut tree).unwrap());
        tree.add_node("/usb@e0002000").unwrap();
        tree.set_property_string("/usb@e0002000", "compatible", USB_COMPATIBLE)
            .unwrap();
        tree.set_property_string("/usb@e0002000", "dr_mode", "otg")
            .unwrap();
        assert!(force_usb_host_mode(&mut tree).unwrap());
        assert_eq!(
            tree.get_prop_str("/usb@e0002000", "dr_mode").unwrap().as_deref(),
            Some("host")
        );
    }
}
