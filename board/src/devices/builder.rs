//! Builder registration and lookup.
//!
//! Responsibilities:
//! - Provide the [Builder] trait for node builders and a per-build [BuilderTable] mapping node
//!   names and compatible strings to builders.
//! - Fall back to the device collaborator ([DeviceFactory]) for compatible strings it supports.
//! - Let a builder suspend through a [PendingBinding] until the object of another path exists.
//!
//! Lookup order for a node:
//! 1. a builder bound to the node's base name;
//! 2. each `compatible` entry in order, explicit builder first, then the factory.
//!
//! A node carrying a blocked compatible string is skipped entirely.

use core::{fmt::Debug, ops::Range};
use std::collections::{BTreeMap, BTreeSet};

use dt::{DeviceTree, Node, Property, TreeError};

use crate::{
    devices::object::{DeviceHandle, DeviceRegistry},
    error::DeviceError,
    memory::AddressSpace,
};

/// Read-only view of the node being built.
#[derive(Clone, Copy)]
pub struct NodeView<'a> {
    pub path: &'a str,
    pub node: &'a Node,
    pub tree: &'a DeviceTree,
}

impl<'a> NodeView<'a> {
    /// Base name of the node, without unit address.
    pub fn name(&self) -> &'a str {
        &self.node.node_name
    }

    pub fn full_name(&self) -> &'a str {
        &self.node.full_name
    }

    pub fn compatibles(&self) -> Vec<&'a str> {
        self.node.compatibles()
    }

    pub fn property(&self, name: &str) -> Option<&'a Property> {
        self.node.get_property(name)
    }

    /// A property that must be present.
    pub fn require(&self, name: &str) -> Result<&'a Property, DeviceError> {
        self.property(name).ok_or_else(|| DeviceError::MissingProperty {
            path: self.path.to_string(),
            name: name.to_string(),
        })
    }

    pub fn parent_path(&self) -> Result<Option<String>, TreeError> {
        self.tree.parent_of(self.path)
    }

    pub fn reg(&self) -> Result<Vec<Range<u64>>, TreeError> {
        self.tree.reg(self.path)
    }
}

/// What builders may touch while the instantiation pass runs.
///
/// The tree itself is read-only here; structural changes happen before or after the pass.
pub struct BuildContext<'a> {
    pub tree: &'a DeviceTree,
    pub space: &'a mut AddressSpace,
    pub(crate) registry: &'a mut DeviceRegistry,
    pub(crate) factory: Option<&'a dyn DeviceFactory>,
}

impl BuildContext<'_> {
    /// Register `handle` under `path`, which may be an auxiliary path the tree never names.
    pub fn register(&mut self, path: &str, handle: DeviceHandle) {
        let path = self
            .tree
            .canonical_path(path)
            .unwrap_or_else(|| path.to_string());
        crate::debug_ex!("Registered '{}' at {path}", handle.name);
        if self.registry.insert(&path, handle).is_some() {
            log::warn!("Object at {path} replaced");
        }
    }

    pub fn device(&self, path: &str) -> Option<DeviceHandle> {
        match self.tree.canonical_path(path) {
            Some(canonical) => self.registry.get(&canonical),
            None => self.registry.get(path),
        }
        .cloned()
    }

    pub fn factory(&self) -> Option<&dyn DeviceFactory> {
        self.factory
    }
}

/// Continuation run once the awaited object exists; receives that object.
pub type Resume = Box<dyn FnOnce(DeviceHandle, &mut BuildContext<'_>) -> Result<(), DeviceError>>;

/// A suspended construction step.
pub struct PendingBinding {
    pub node: String,
    pub waits_for: String,
    pub resume: Resume,
}

impl PendingBinding {
    pub fn new(
        node: &str,
        waits_for: &str,
        resume: impl FnOnce(DeviceHandle, &mut BuildContext<'_>) -> Result<(), DeviceError> + 'static,
    ) -> PendingBinding {
        PendingBinding {
            node: node.to_string(),
            waits_for: waits_for.to_string(),
            resume: Box::new(resume),
        }
    }
}

impl Debug for PendingBinding {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PendingBinding")
            .field("node", &self.node)
            .field("waits_for", &self.waits_for)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub enum BuildOutcome {
    /// The object is complete and gets registered under the node path.
    Built(DeviceHandle),
    /// The object is registered now; `binding` finishes it later.
    Deferred {
        handle: DeviceHandle,
        binding: PendingBinding,
    },
    /// Nothing is registered until `binding` resumes and registers it itself.
    Waiting(PendingBinding),
    /// The builder decided the node needs no object.
    Skipped,
}

/// Trait implemented by node builders.
pub trait Builder {
    fn name(&self) -> &'static str;
    fn build(&self, node: &NodeView<'_>, ctx: &mut BuildContext<'_>)
    -> Result<BuildOutcome, DeviceError>;
}

/// The device-instantiation collaborator: creates device objects of a kind from properties.
pub trait DeviceFactory {
    fn supports(&self, kind: &str) -> bool;
    fn create(&self, kind: &str, name: &str, props: &[Property])
    -> Result<DeviceHandle, DeviceError>;
}

pub enum Selected<'t> {
    Builder(&'t dyn Builder),
    Factory(&'t dyn DeviceFactory, &'t str),
}

/// Registry mapping node names and compatible strings to builders, for one build.
pub struct BuilderTable<'f> {
    by_name: BTreeMap<Box<str>, Box<dyn Builder>>,
    by_compat: BTreeMap<Box<str>, Box<dyn Builder>>,
    blocked: BTreeSet<Box<str>>,
    factory: Option<&'f dyn DeviceFactory>,
}

impl<'f> BuilderTable<'f> {
    pub fn new(factory: Option<&'f dyn DeviceFactory>) -> BuilderTable<'f> {
        BuilderTable {
            by_name: BTreeMap::new(),
            by_compat: BTreeMap::new(),
            blocked: BTreeSet::new(),
            factory,
        }
    }

    pub fn register_compatible(&mut self, compat: &str, builder: Box<dyn Builder>) {
        crate::debug_ex!("\tRegistered builder '{}' for {compat}.", builder.name());
        self.by_compat.insert(Box::from(compat), builder);
    }

    pub fn register_node_name(&mut self, name: &str, builder: Box<dyn Builder>) {
        crate::debug_ex!("\tRegistered builder '{}' for nodes named {name}.", builder.name());
        self.by_name.insert(Box::from(name), builder);
    }

    /// Mark `compat` as incompatible: nodes carrying it get no object.
    pub fn block_compatible(&mut self, compat: &str) {
        self.blocked.insert(Box::from(compat));
    }

    pub fn is_blocked(&self, node: &Node) -> bool {
        node.compatibles().iter().any(|c| self.blocked.contains(*c))
    }

    pub fn factory(&self) -> Option<&'f dyn DeviceFactory> {
        self.factory
    }

    /// Pick what constructs `node`, or [None] when nothing matches.
    pub fn select<'t>(&'t self, node: &'t Node) -> Option<Selected<'t>> {
        if self.is_blocked(node) {
            return None;
        }
        if let Some(builder) = self.by_name.get(node.node_name.as_ref()) {
            return Some(Selected::Builder(builder.as_ref()));
        }
        for compat in node.compatibles() {
            if let Some(builder) = self.by_compat.get(compat) {
                return Some(Selected::Builder(builder.as_ref()));
            }
            if let Some(factory) = self.factory.filter(|f| f.supports(compat)) {
                return Some(Selected::Factory(factory, compat));
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::catalog::DeviceCatalog;

    struct Named(&'static str);

    impl Builder for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        fn build(
            &self,
            _node: &NodeView<'_>,
            _ctx: &mut BuildContext<'_>,
        ) -> Result<BuildOutcome, DeviceError> {
            Ok(BuildOutcome::Skipped)
        }
    }

    fn node(name: &str, compat: &[&str]) -> Node {
        let mut node = Node::new(1, 0, name);
        node.props.push(Property::from_strlist("compatible", compat));
        node
    }

    fn selected_name(selected: Option<Selected<'_>>) -> Option<String> {
        match selected? {
            Selected::Builder(b) => Some(b.name().to_string()),
            Selected::Factory(_, kind) => Some(format!("factory:{kind}")),
        }
    }

    #[test]
    fn lookup_prefers_names_then_compatible_order() {
        let catalog = DeviceCatalog::new(&["cdns,gem", "xlnx,zynq-gem"]);
        let mut table = BuilderTable::new(Some(&catalog));
        table.register_compatible("xlnx,zynq-gem", Box::new(Named("zynq-gem")));
        table.register_node_name("mdio", Box::new(Named("mdio")));

        let gem = node("ethernet@e000b000", &["xlnx,zynq-gem", "cdns,gem"]);
        assert_eq!(selected_name(table.select(&gem)).as_deref(), Some("zynq-gem"));

        let generic = node("ethernet@e000c000", &["cdns,gem"]);
        assert_eq!(
            selected_name(table.select(&generic)).as_deref(),
            Some("factory:cdns,gem")
        );

        let mdio = node("mdio", &["cdns,gem"]);
        assert_eq!(selected_name(table.select(&mdio)).as_deref(), Some("mdio"));

        let unknown = node("serial@0", &["arm,pl011"]);
        assert!(table.select(&unknown).is_none());
    }

    #[test]
    fn blocked_compatibles_skip_the_node() {
        let catalog = DeviceCatalog::new(&["simple-bus"]);
        let mut table = BuilderTable::new(Some(&catalog));
        let amba = node("amba", &["simple-bus"]);
        assert!(table.select(&amba).is_some());
        table.block_compatible("simple-bus");
        assert!(table.select(&amba).is_none());
    }
}
