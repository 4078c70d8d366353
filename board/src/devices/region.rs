//! Built-in builder for `qemu:memory-region` nodes.

use crate::{
    devices::{
        builder::{BuildContext, BuildOutcome, Builder, NodeView, PendingBinding},
        object::DeviceHandle,
    },
    error::DeviceError,
    memory::MEMORY_REGION_COMPATIBLE,
};

/// Creates one memory window per region node.
///
/// Base and size come from the first `reg` entry, the RAM flag from `qemu,ram`. A node with
/// `container = <phandle>` is mapped into the container's window once that object exists;
/// other regions stay unmapped until the memory planner places them.
pub struct MemoryRegionBuilder;

impl Builder for MemoryRegionBuilder {
    fn name(&self) -> &'static str {
        "memory-region"
    }

    fn build(
        &self,
        node: &NodeView<'_>,
        ctx: &mut BuildContext<'_>,
    ) -> Result<BuildOutcome, DeviceError> {
        node.require("reg")?;
        let range = node
            .reg()?
            .into_iter()
            .next()
            .ok_or_else(|| DeviceError::InvalidProperty {
                kind: MEMORY_REGION_COMPATIBLE.to_string(),
                name: "reg".to_string(),
                reason: format!("no complete entry on {}", node.path),
            })?;
        let ram = node
            .property("qemu,ram")
            .and_then(|p| p.value_as_u32().ok())
            .is_some_and(|v| v != 0);
        let base = range.start;
        let window = ctx
            .space
            .create(node.path, base, range.end - range.start, ram);
        let handle = DeviceHandle::new_region(node.full_name(), MEMORY_REGION_COMPATIBLE, window);

        let Some(container) = node.property("container") else {
            return Ok(BuildOutcome::Built(handle));
        };
        let phandle = container.value_as_u32().map_err(dt::TreeError::from)?;
        let waits_for = node
            .tree
            .node_by_phandle(phandle)
            .unwrap_or_else(|| format!("<phandle {phandle:#x}>"));
        let path = node.path.to_string();
        let binding = PendingBinding::new(node.path, &waits_for, move |container, ctx| {
            let parent = container.region().ok_or(DeviceError::NotARegion {
                path: container.name.to_string(),
            })?;
            ctx.space.map(window, parent, base)?;
            log::trace!("{path} mapped into {}", container.name);
            Ok(())
        });
        Ok(BuildOutcome::Deferred { handle, binding })
    }
}
