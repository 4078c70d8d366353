use crate::prop::{Property, PropertyError};
use core::ops::Range;
use utils::endian::{BigEndian32, EndianData, read_array};

/// Default `#address-cells` when the parent does not declare one.
pub const DEFAULT_ADDRESS_CELLS: u32 = 2;
/// Default `#size-cells` when the parent does not declare one.
pub const DEFAULT_SIZE_CELLS: u32 = 1;
/// Widest `#address-cells` / `#size-cells` accepted.
pub const MAX_CELLS: u32 = 4;

/// An in-memory hardware description tree.
///
/// Nodes live in a flat container and refer to each other by index; the root is its own parent.
/// All public operations are path based, and every mutation is visible to the next lookup.
#[derive(Debug, Clone)]
pub struct DeviceTree {
    pub root_id: usize,
    container: Vec<Node>,
    /// Memory reservation map carried over from the flattened header.
    pub mem_rsv_map: Vec<Range<u64>>,
    pub boot_cpuid_phys: u32,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub node_id: usize,
    pub parent_id: usize,
    pub full_name: Box<str>,
    pub node_name: Box<str>,
    pub unit_addr: Box<str>,
    pub children: Vec<usize>,
    pub props: Vec<Property>,
    pub node_type: NodeType,
}

#[derive(PartialEq, Eq, Debug, Clone, Copy)]
pub enum NodeType {
    Device,
    /// Pure description (`/chosen`, `/memory`, ...), never a device on its own.
    Description,
    /// Scaffolding synthesized by the machine builder; must be deleted before the tree is
    /// handed to anyone else.
    Transient,
}

impl NodeType {
    fn for_root_child(node_name: &str) -> NodeType {
        match node_name {
            "aliases" | "chosen" | "memory" | "reserved-memory" => NodeType::Description,
            _ => NodeType::Device,
        }
    }
}

impl Node {
    pub fn new(node_id: usize, parent_id: usize, full_name: &str) -> Node {
        let (node_name, unit_addr) = full_name.split_once('@').unwrap_or((full_name, ""));
        Node {
            node_id,
            parent_id,
            full_name: Box::from(full_name),
            node_name: Box::from(node_name),
            unit_addr: Box::from(unit_addr),
            children: vec![],
            props: vec![],
            node_type: NodeType::Device,
        }
    }

    pub fn get_property(&self, name: impl AsRef<str>) -> Option<&Property> {
        let name = name.as_ref();
        self.props.iter().find(|p| p.name.as_ref() == name)
    }

    /// Entries of the `compatible` string list, most specific first.
    pub fn compatibles(&self) -> Vec<&str> {
        self.get_property("compatible")
            .and_then(|p| p.value_as_strlist().ok())
            .unwrap_or_default()
    }

    pub fn is_compatible(&self, compat: &str) -> bool {
        self.compatibles().contains(&compat)
    }

    pub fn phandle(&self) -> Option<u32> {
        self.get_property("phandle")
            .or_else(|| self.get_property("linux,phandle"))
            .and_then(|p| p.value_as_u32().ok())
    }

    fn set_property(&mut self, prop: Property) {
        match self.props.iter_mut().find(|p| p.name == prop.name) {
            Some(slot) => *slot = prop,
            None => self.props.push(prop),
        }
    }

    /// Segment matching used by path lookups: an exact full-name match, or the base name when
    /// the segment carries no unit address.
    fn matches_segment(&self, section: &str) -> bool {
        self.full_name.as_ref() == section
            || (!section.contains('@') && self.node_name.as_ref() == section)
    }
}

impl Default for DeviceTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Construction and index-level access, used by the flattened-tree reader and writer.
impl DeviceTree {
    /// A tree holding only an empty root node.
    pub fn new() -> DeviceTree {
        DeviceTree {
            root_id: 0,
            container: vec![Node::new(0, 0, "")],
            mem_rsv_map: vec![],
            boot_cpuid_phys: 0,
        }
    }

    /// Assemble a tree from nodes whose ids are their container indices.
    pub(crate) fn from_parts(root_id: usize, container: Vec<Node>) -> DeviceTree {
        let mut tree = DeviceTree {
            root_id,
            container,
            mem_rsv_map: vec![],
            boot_cpuid_phys: 0,
        };
        for child_id in tree.container[root_id].children.clone() {
            let node = &mut tree.container[child_id];
            node.node_type = NodeType::for_root_child(&node.node_name);
        }
        tree
    }

    pub fn root(&self) -> &Node {
        &self.container[self.root_id]
    }

    pub fn is_root(&self, node: &Node) -> bool {
        self.get_parent(node).node_id == node.node_id
    }

    pub fn get_parent(&self, node: &Node) -> &Node {
        &self.container[node.parent_id]
    }

    pub fn get_children<'b>(&'b self, node: &Node) -> impl Iterator<Item = &'b Node> + use<'b> {
        node.children
            .clone()
            .into_iter()
            .map(move |x| &self.container[x])
    }

    pub fn node_count(&self) -> usize {
        self.container.len()
    }

    fn full_path(&self, node: &Node) -> String {
        if self.is_root(node) {
            String::new()
        } else {
            self.full_path(self.get_parent(node)) + "/" + node.full_name.as_ref()
        }
    }

    /// Canonical absolute path of `node`; the root is `/`.
    pub fn get_full_path(&self, node: &Node) -> String {
        let path = self.full_path(node);
        if path.is_empty() { String::from("/") } else { path }
    }

    fn resolve(&self, path: &str) -> Option<usize> {
        let mut node = &self.container[self.root_id];
        for section in path.split('/') {
            if section.trim().is_empty() {
                continue;
            }
            let exact = self
                .get_children(node)
                .find(|sub| sub.full_name.as_ref() == section);
            node = match exact {
                Some(sub) => sub,
                None => self.get_children(node).find(|sub| sub.matches_segment(section))?,
            };
        }
        Some(node.node_id)
    }

    fn id_of(&self, path: &str) -> Result<usize, TreeError> {
        self.resolve(path).ok_or_else(|| TreeError::NotFound {
            path: path.to_string(),
        })
    }

    pub fn get_node(&self, path: impl AsRef<str>) -> Option<&Node> {
        self.resolve(path.as_ref()).map(|id| &self.container[id])
    }

    pub fn get_node_mut(&mut self, path: impl AsRef<str>) -> Option<&mut Node> {
        let id = self.resolve(path.as_ref())?;
        Some(&mut self.container[id])
    }

    /// Pre-order walk from the root, yielding node ids.
    fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.container.len());
        let mut stack = vec![self.root_id];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.container[id].children.iter().rev());
        }
        order
    }
}

/// Path-addressed queries and mutations.
impl DeviceTree {
    /// Canonical paths of every node, parents before children, siblings in tree order.
    pub fn paths(&self) -> Vec<String> {
        self.preorder()
            .into_iter()
            .map(|id| self.get_full_path(&self.container[id]))
            .collect()
    }

    pub fn contains(&self, path: impl AsRef<str>) -> bool {
        self.resolve(path.as_ref()).is_some()
    }

    /// Canonical form of `path` (full node names), if it resolves.
    pub fn canonical_path(&self, path: impl AsRef<str>) -> Option<String> {
        self.get_node(path).map(|node| self.get_full_path(node))
    }

    pub fn find_node_by_compatible(&self, compat: &str) -> Option<String> {
        self.preorder()
            .into_iter()
            .map(|id| &self.container[id])
            .find(|node| node.is_compatible(compat))
            .map(|node| self.get_full_path(node))
    }

    pub fn find_nodes_by_compatible(&self, compat: &str) -> Vec<String> {
        self.preorder()
            .into_iter()
            .map(|id| &self.container[id])
            .filter(|node| node.is_compatible(compat))
            .map(|node| self.get_full_path(node))
            .collect()
    }

    /// First node, in pre-order, whose full name or base name equals `name`.
    pub fn find_node_by_name(&self, name: &str) -> Option<String> {
        self.preorder()
            .into_iter()
            .map(|id| &self.container[id])
            .find(|node| {
                !self.is_root(node)
                    && (node.full_name.as_ref() == name || node.node_name.as_ref() == name)
            })
            .map(|node| self.get_full_path(node))
    }

    pub fn get_property(
        &self,
        path: impl AsRef<str>,
        name: impl AsRef<str>,
    ) -> Result<Option<&Property>, TreeError> {
        let id = self.id_of(path.as_ref())?;
        Ok(self.container[id].get_property(name))
    }

    /// First cell of a property, `None` if the property is absent.
    pub fn get_prop_u32(
        &self,
        path: impl AsRef<str>,
        name: impl AsRef<str>,
    ) -> Result<Option<u32>, TreeError> {
        match self.get_property(path, name)? {
            Some(prop) => Ok(Some(prop.value_as_u32()?)),
            None => Ok(None),
        }
    }

    /// The `idx`-th cell of a property, or `default` when the property or cell is missing.
    pub fn get_prop_cell_or(
        &self,
        path: impl AsRef<str>,
        name: impl AsRef<str>,
        idx: usize,
        default: u32,
    ) -> Result<u32, TreeError> {
        Ok(self
            .get_property(path, name)?
            .and_then(|p| p.cell(idx))
            .unwrap_or(default))
    }

    pub fn get_prop_str(
        &self,
        path: impl AsRef<str>,
        name: impl AsRef<str>,
    ) -> Result<Option<String>, TreeError> {
        match self.get_property(path, name)? {
            Some(prop) => Ok(Some(prop.value_as_str()?.to_string())),
            None => Ok(None),
        }
    }

    pub fn set_property(&mut self, path: impl AsRef<str>, prop: Property) -> Result<(), TreeError> {
        let id = self.id_of(path.as_ref())?;
        self.container[id].set_property(prop);
        Ok(())
    }

    pub fn set_property_cells(
        &mut self,
        path: impl AsRef<str>,
        name: &str,
        cells: &[u32],
    ) -> Result<(), TreeError> {
        self.set_property(path, Property::from_cells(name, cells))
    }

    pub fn set_property_string(
        &mut self,
        path: impl AsRef<str>,
        name: &str,
        value: &str,
    ) -> Result<(), TreeError> {
        self.set_property(path, Property::from_string(name, value))
    }

    /// Remove a property; returns whether it was present.
    pub fn delete_property(
        &mut self,
        path: impl AsRef<str>,
        name: impl AsRef<str>,
    ) -> Result<bool, TreeError> {
        let id = self.id_of(path.as_ref())?;
        let props = &mut self.container[id].props;
        let before = props.len();
        props.retain(|p| p.name.as_ref() != name.as_ref());
        Ok(props.len() != before)
    }

    /// Add an empty child called `name` under `parent`, returning its canonical path.
    pub fn add_subnode(&mut self, parent: impl AsRef<str>, name: &str) -> Result<String, TreeError> {
        if name.is_empty() || name.contains('/') {
            return Err(TreeError::InvalidName {
                name: name.to_string(),
            });
        }
        let parent_id = self.id_of(parent.as_ref())?;
        if self
            .get_children(&self.container[parent_id])
            .any(|child| child.full_name.as_ref() == name)
        {
            let path = self.get_full_path(&self.container[parent_id]);
            return Err(TreeError::AlreadyExists {
                path: join_path(&path, name),
            });
        }
        let id = self.container.len();
        let mut node = Node::new(id, parent_id, name);
        if parent_id == self.root_id {
            node.node_type = NodeType::for_root_child(&node.node_name);
        }
        self.container.push(node);
        self.container[parent_id].children.push(id);
        Ok(self.get_full_path(&self.container[id]))
    }

    /// Add a node by absolute path; the parent must already exist.
    pub fn add_node(&mut self, path: &str) -> Result<String, TreeError> {
        let (parent, name) = path.rsplit_once('/').ok_or_else(|| TreeError::InvalidName {
            name: path.to_string(),
        })?;
        self.add_subnode(if parent.is_empty() { "/" } else { parent }, name)
    }

    /// Delete a node and its whole subtree.
    pub fn delete_node(&mut self, path: impl AsRef<str>) -> Result<(), TreeError> {
        let id = self.id_of(path.as_ref())?;
        if id == self.root_id {
            return Err(TreeError::RootImmutable);
        }
        let parent_id = self.container[id].parent_id;
        self.container[parent_id].children.retain(|c| *c != id);
        self.compact();
        Ok(())
    }

    /// Drop nodes no longer reachable from the root and renumber the survivors.
    fn compact(&mut self) {
        let order = self.preorder();
        let mut remap = vec![usize::MAX; self.container.len()];
        for (new_id, old_id) in order.iter().enumerate() {
            remap[*old_id] = new_id;
        }
        let mut old = core::mem::take(&mut self.container);
        let mut container = Vec::with_capacity(order.len());
        for old_id in order {
            let mut node = core::mem::replace(&mut old[old_id], Node::new(0, 0, ""));
            node.node_id = remap[old_id];
            node.parent_id = remap[node.parent_id];
            node.children = node.children.iter().map(|c| remap[*c]).collect();
            container.push(node);
        }
        self.root_id = 0;
        self.container = container;
    }

    pub fn children(&self, path: impl AsRef<str>) -> Result<Vec<String>, TreeError> {
        let id = self.id_of(path.as_ref())?;
        Ok(self
            .get_children(&self.container[id])
            .map(|child| self.get_full_path(child))
            .collect())
    }

    pub fn phandle_of(&self, path: impl AsRef<str>) -> Result<Option<u32>, TreeError> {
        let id = self.id_of(path.as_ref())?;
        Ok(self.container[id].phandle())
    }

    pub fn node_by_phandle(&self, phandle: u32) -> Option<String> {
        self.container
            .iter()
            .find(|node| node.phandle() == Some(phandle))
            .map(|node| self.get_full_path(node))
    }

    /// Number of edges between the root and the node; the root has depth 0.
    pub fn depth(&self, path: impl AsRef<str>) -> Result<usize, TreeError> {
        let mut node = &self.container[self.id_of(path.as_ref())?];
        let mut depth = 0;
        while !self.is_root(node) {
            node = self.get_parent(node);
            depth += 1;
        }
        Ok(depth)
    }

    pub fn parent_of(&self, path: impl AsRef<str>) -> Result<Option<String>, TreeError> {
        let node = &self.container[self.id_of(path.as_ref())?];
        if self.is_root(node) {
            return Ok(None);
        }
        Ok(Some(self.get_full_path(self.get_parent(node))))
    }

    pub fn node_type(&self, path: impl AsRef<str>) -> Result<NodeType, TreeError> {
        Ok(self.container[self.id_of(path.as_ref())?].node_type)
    }

    pub fn mark_transient(&mut self, path: impl AsRef<str>) -> Result<(), TreeError> {
        let id = self.id_of(path.as_ref())?;
        self.container[id].node_type = NodeType::Transient;
        Ok(())
    }

    pub fn transient_paths(&self) -> Vec<String> {
        self.preorder()
            .into_iter()
            .map(|id| &self.container[id])
            .filter(|node| node.node_type == NodeType::Transient)
            .map(|node| self.get_full_path(node))
            .collect()
    }

    /// `#address-cells` / `#size-cells` that apply to the children of `path`.
    pub fn cell_widths(&self, path: impl AsRef<str>) -> Result<(u32, u32), TreeError> {
        let id = self.id_of(path.as_ref())?;
        let node = &self.container[id];
        let width = |name: &str, default: u32| -> Result<u32, TreeError> {
            let cells = match node.get_property(name) {
                Some(prop) => prop.value_as_u32()?,
                None => default,
            };
            if cells > MAX_CELLS {
                return Err(TreeError::InvalidCells {
                    path: self.get_full_path(node),
                    name: name.to_string(),
                    cells,
                });
            }
            Ok(cells)
        };
        Ok((
            width("#address-cells", DEFAULT_ADDRESS_CELLS)?,
            width("#size-cells", DEFAULT_SIZE_CELLS)?,
        ))
    }

    /// Decode `reg` into address ranges using the parent's cell widths.
    pub fn reg(&self, path: impl AsRef<str>) -> Result<Vec<Range<u64>>, TreeError> {
        let path = path.as_ref();
        let node = &self.container[self.id_of(path)?];
        let (addr_cel, size_cel) = if self.is_root(node) {
            (DEFAULT_ADDRESS_CELLS, DEFAULT_SIZE_CELLS)
        } else {
            self.cell_widths(self.get_full_path(self.get_parent(node)))?
        };
        let reg = node
            .get_property("reg")
            .ok_or_else(|| PropertyError::PropNotFound {
                path: path.to_string(),
                name: "reg".to_string(),
            })?;
        let cells = read_array::<u32, BigEndian32>(&reg.data);
        let width = addr_cel.saturating_add(size_cel) as usize;
        if width == 0 {
            return Ok(vec![]);
        }
        Ok(cells
            .chunks_exact(width)
            .map(|entry| {
                let (addr, size) = entry.split_at(addr_cel as usize);
                let start = fold_cells(addr);
                start..start.saturating_add(fold_cells(size))
            })
            .collect())
    }
}

/// Combine big-endian cells into one value; cells beyond 64 bits shift out.
fn fold_cells(cells: &[u32]) -> u64 {
    cells
        .iter()
        .fold(0u64, |acc, c| acc.checked_shl(32).unwrap_or(0) | *c as u64)
}

pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("node '{path}' not found")]
    NotFound { path: String },
    #[error("node '{path}' already exists")]
    AlreadyExists { path: String },
    #[error("invalid node name '{name}'")]
    InvalidName { name: String },
    #[error("the root node cannot be deleted")]
    RootImmutable,
    #[error("{name} = <{cells}> on '{path}' exceeds {MAX_CELLS} cells")]
    InvalidCells {
        path: String,
        name: String,
        cells: u32,
    },
    #[error(transparent)]
    Property(#[from] PropertyError),
}
