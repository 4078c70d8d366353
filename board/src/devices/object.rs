//! Device objects produced by a machine build.
//!
//! [DeviceHandle] owns a strong reference to a [Device]; [DeviceRef] stores a weak one and is
//! used for parent pointers and links, so a link cycle never keeps objects alive.
//! Consumers of [DeviceRef::get_handle] must handle the [None] case explicitly.

use std::{
    collections::BTreeMap,
    sync::{Arc, Weak},
};

use core::ops::Deref;
use dt::Property;
use spin::RwLock;

use crate::memory::WindowId;

#[derive(Debug)]
pub struct Device {
    pub name: Box<str>,
    /// Device kind, the compatible string it was created for.
    pub kind: Box<str>,
    region: Option<WindowId>,
    parent: RwLock<Option<DeviceRef>>,
    props: RwLock<Vec<Property>>,
    mmio: RwLock<Vec<u64>>,
    children: RwLock<Vec<(Box<str>, DeviceHandle)>>,
    links: RwLock<BTreeMap<Box<str>, DeviceRef>>,
}

#[derive(Debug, Clone)]
pub struct DeviceHandle {
    inner: Arc<Device>,
}

impl Deref for DeviceHandle {
    type Target = Device;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Debug, Clone)]
pub struct DeviceRef {
    inner: Weak<Device>,
}

impl DeviceRef {
    pub fn get_handle(&self) -> Option<DeviceHandle> {
        Some(DeviceHandle {
            inner: Weak::upgrade(&self.inner)?,
        })
    }
}

impl DeviceHandle {
    fn with_region(name: &str, kind: &str, region: Option<WindowId>) -> DeviceHandle {
        DeviceHandle {
            inner: Arc::new(Device {
                name: Box::from(name),
                kind: Box::from(kind),
                region,
                parent: RwLock::new(None),
                props: RwLock::new(vec![]),
                mmio: RwLock::new(vec![]),
                children: RwLock::new(vec![]),
                links: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    pub fn new(name: &str, kind: &str) -> DeviceHandle {
        Self::with_region(name, kind, None)
    }

    /// A memory-region object backed by window `region`.
    pub fn new_region(name: &str, kind: &str, region: WindowId) -> DeviceHandle {
        Self::with_region(name, kind, Some(region))
    }

    pub fn create_ref(&self) -> DeviceRef {
        DeviceRef {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether both handles refer to the same object.
    pub fn same(&self, other: &DeviceHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn region(&self) -> Option<WindowId> {
        self.region
    }

    pub fn property(&self, name: &str) -> Option<Property> {
        self.props
            .read()
            .iter()
            .find(|p| p.name.as_ref() == name)
            .cloned()
    }

    pub fn set_property(&self, prop: Property) {
        let mut props = self.props.write();
        match props.iter_mut().find(|p| p.name == prop.name) {
            Some(slot) => *slot = prop,
            None => props.push(prop),
        }
    }

    pub fn properties(&self) -> Vec<Property> {
        self.props.read().clone()
    }

    /// Record the next MMIO region of the device at `base`.
    pub fn map_mmio(&self, base: u64) {
        self.mmio.write().push(base);
    }

    pub fn mmio(&self) -> Vec<u64> {
        self.mmio.read().clone()
    }

    pub fn parent(&self) -> Option<DeviceHandle> {
        self.parent.read().as_ref()?.get_handle()
    }

    /// Adopt `child` under `name`, replacing its previous parent pointer.
    pub fn add_child(&self, name: &str, child: &DeviceHandle) {
        *child.parent.write() = Some(self.create_ref());
        let mut children = self.children.write();
        children.retain(|(n, _)| n.as_ref() != name);
        children.push((Box::from(name), child.clone()));
    }

    pub fn child(&self, name: &str) -> Option<DeviceHandle> {
        self.children
            .read()
            .iter()
            .find(|(n, _)| n.as_ref() == name)
            .map(|(_, c)| c.clone())
    }

    pub fn children(&self) -> Vec<(Box<str>, DeviceHandle)> {
        self.children.read().clone()
    }

    pub fn set_link(&self, name: &str, target: &DeviceHandle) {
        self.links
            .write()
            .insert(Box::from(name), target.create_ref());
    }

    pub fn link(&self, name: &str) -> Option<DeviceHandle> {
        self.links.read().get(name)?.get_handle()
    }
}

/// Objects of one build, keyed by the tree path (or auxiliary path) they were registered under.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    objects: BTreeMap<String, DeviceHandle>,
}

impl DeviceRegistry {
    pub fn new() -> DeviceRegistry {
        DeviceRegistry::default()
    }

    /// Register `handle` at `path`, returning the object it replaces.
    pub fn insert(&mut self, path: &str, handle: DeviceHandle) -> Option<DeviceHandle> {
        self.objects.insert(path.to_string(), handle)
    }

    pub fn get(&self, path: &str) -> Option<&DeviceHandle> {
        self.objects.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DeviceHandle)> {
        self.objects.iter().map(|(path, h)| (path.as_str(), h))
    }
}
