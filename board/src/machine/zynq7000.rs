//! Zynq-7000 board hooks around the tree-driven build.

use config::zynq7000::{MPCORE_PERIPHBASE, OCM_BASE, OCM_SIZE};
use dt::Property;

use crate::{
    devices::{DeviceHandle, mdio::MdioConnectBuilder},
    error::BuildError,
    machine::MachineBuildContext,
    memory::WindowId,
    quirks,
};

/// Registry prefix of objects no tree node owns.
pub const UNATTACHED: &str = "/unattached";

const NAND_MANUFACTURER: u32 = 0x20;
const NAND_CHIP_ID: u32 = 0xaa;
const SMC_MMIO: [u64; 2] = [0xe000_e000, 0xe100_0000];

fn create(
    ctx: &MachineBuildContext<'_>,
    kind: &str,
    name: &str,
    props: &[Property],
) -> Result<DeviceHandle, BuildError> {
    ctx.factory
        .create(kind, name, props)
        .map_err(|source| BuildError::Builder {
            node: format!("{UNATTACHED}/{name}"),
            source,
        })
}

/// On-chip memory, the static memory controller with its NAND chip, and the MDIO bus.
pub fn pre_init(ctx: &mut MachineBuildContext<'_>) -> Result<(), BuildError> {
    let ocm = ctx.space.create("zynq.ocm_ram", OCM_BASE, OCM_SIZE, true);
    ctx.space.map(ocm, WindowId::SYSTEM, OCM_BASE)?;

    let smc = create(ctx, "arm.pl35x", "pl353", &[Property::from_u32("x", 3)])?;
    let nand = create(
        ctx,
        "nand",
        "nand",
        &[
            Property::from_u32("manufacturer_id", NAND_MANUFACTURER),
            Property::from_u32("chip_id", NAND_CHIP_ID),
        ],
    )?;
    smc.add_child("nand", &nand);
    smc.set_link("dev1", &nand);
    for base in SMC_MMIO {
        smc.map_mmio(base);
    }
    ctx.registry.insert(&format!("{UNATTACHED}/pl353"), smc);

    // the buses themselves are plain containers; their children are still built
    ctx.table.block_compatible("simple-bus");

    let mdio = create(ctx, "mdio", "mdio", &[])?;
    ctx.registry
        .insert(&format!("{UNATTACHED}/mdio"), mdio.clone());
    ctx.table
        .register_node_name("mdio", Box::new(MdioConnectBuilder::new(mdio)));
    Ok(())
}

/// Tree patches that must land before memory planning.
pub fn apply_quirks(ctx: &mut MachineBuildContext<'_>) -> Result<(), BuildError> {
    let tree = &mut ctx.trees.hardware;
    if let Some(dummy) = quirks::clone_dual_qspi_flash(tree)? {
        ctx.transient.push(dummy);
    }
    quirks::gate_interrupt_controller(tree)?;
    quirks::inject_reset_cbar(tree, ctx.request.cpu_model(), MPCORE_PERIPHBASE as u32)?;
    Ok(())
}

/// The snoop control unit, sized to the final CPU count.
pub fn post_init(ctx: &mut MachineBuildContext<'_>) -> Result<(), BuildError> {
    let scu = create(
        ctx,
        "a9-scu",
        "a9-scu",
        &[Property::from_u32("num-cpu", ctx.cpu_count)],
    )?;
    scu.map_mmio(MPCORE_PERIPHBASE);
    ctx.registry.insert(&format!("{UNATTACHED}/a9-scu"), scu);
    Ok(())
}
