use crate::{
    devices::{
        builder::{BuildContext, BuildOutcome, Builder, NodeView, PendingBinding},
        object::DeviceHandle,
    },
    error::DeviceError,
};

/// Connects the board's MDIO bus object to the Ethernet controller owning an `mdio` node.
///
/// The MDIO object is registered under the node's own path right away, so PHY nodes below it
/// can bind to it; attaching it to the controller waits until the parent object exists.
pub struct MdioConnectBuilder {
    mdio: DeviceHandle,
}

impl MdioConnectBuilder {
    pub fn new(mdio: DeviceHandle) -> MdioConnectBuilder {
        MdioConnectBuilder { mdio }
    }
}

impl Builder for MdioConnectBuilder {
    fn name(&self) -> &'static str {
        "mdio-phy-connect"
    }

    fn build(
        &self,
        node: &NodeView<'_>,
        _ctx: &mut BuildContext<'_>,
    ) -> Result<BuildOutcome, DeviceError> {
        let parent = node.parent_path()?.ok_or_else(|| DeviceError::Detached {
            path: node.path.to_string(),
        })?;
        let mdio = self.mdio.clone();
        let binding = PendingBinding::new(node.path, &parent, move |gem, _ctx| {
            gem.add_child("mdio_child", &mdio);
            gem.set_link("mdio", &mdio);
            log::info!("Connected MDIO bus to {}", gem.name);
            Ok(())
        });
        Ok(BuildOutcome::Deferred {
            handle: self.mdio.clone(),
            binding,
        })
    }
}
