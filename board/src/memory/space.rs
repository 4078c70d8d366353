use core::{fmt::Debug, ops::Range};

use utils::{range::RangeExt, range_set::SortedRangeSet};

use crate::memory::MemoryError;

/// Index of a window inside an [AddressSpace].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowId(usize);

impl WindowId {
    /// The system address space every top-level window is mapped into.
    pub const SYSTEM: WindowId = WindowId(0);

    pub fn index(&self) -> usize {
        self.0
    }
}

/// A contiguous range of the machine's address space.
///
/// `base` is relative to `container` once mapped, and the declared base before that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryWindow {
    pub name: Box<str>,
    pub base: u64,
    pub size: u64,
    pub mapped: bool,
    pub ram: bool,
    pub container: Option<WindowId>,
}

impl MemoryWindow {
    pub fn range(&self) -> Range<u64> {
        self.base..self.base.saturating_add(self.size)
    }
}

/// Owner of every memory window of one machine build.
///
/// Windows form a tree through their containers; the root is the system space. Mapped siblings
/// never overlap.
#[derive(Clone)]
pub struct AddressSpace {
    windows: Vec<MemoryWindow>,
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace {
    pub fn new() -> AddressSpace {
        AddressSpace {
            windows: vec![MemoryWindow {
                name: Box::from("system"),
                base: 0,
                size: u64::MAX,
                mapped: true,
                ram: false,
                container: None,
            }],
        }
    }

    /// Create an unmapped window with its declared base.
    pub fn create(&mut self, name: &str, base: u64, size: u64, ram: bool) -> WindowId {
        let id = WindowId(self.windows.len());
        self.windows.push(MemoryWindow {
            name: Box::from(name),
            base,
            size,
            mapped: false,
            ram,
            container: None,
        });
        log::trace!("Created memory window '{name}' ({size:#x} bytes)");
        id
    }

    pub fn window(&self, id: WindowId) -> Result<&MemoryWindow, MemoryError> {
        self.windows
            .get(id.0)
            .ok_or(MemoryError::UnknownWindow { id: id.0 })
    }

    pub fn find(&self, name: &str) -> Option<WindowId> {
        self.windows
            .iter()
            .position(|w| w.name.as_ref() == name)
            .map(WindowId)
    }

    pub fn is_mapped(&self, id: WindowId) -> bool {
        self.window(id).is_ok_and(|w| w.mapped)
    }

    /// Map `id` into `container` at the container-relative `base`.
    pub fn map(&mut self, id: WindowId, container: WindowId, base: u64) -> Result<(), MemoryError> {
        let window = self.window(id)?;
        let name = window.name.to_string();
        if window.mapped {
            return Err(MemoryError::AlreadyMapped { name });
        }
        self.window(container)?;
        if id == container || self.is_ancestor(id, container) {
            return Err(MemoryError::SelfContainer { name });
        }
        let range = base..base.saturating_add(window.size);
        if let Some((_, other)) = self
            .subregions(container)
            .find(|(_, other)| other.range().overlap(&range))
        {
            return Err(MemoryError::Overlap {
                name,
                other: other.name.to_string(),
                base,
            });
        }
        let window = &mut self.windows[id.0];
        window.base = base;
        window.container = Some(container);
        window.mapped = true;
        let size = window.size;
        log::info!(
            "Mapped '{name}' at {base:#x} in '{}' ({size:#x} bytes)",
            self.windows[container.0].name,
        );
        Ok(())
    }

    fn is_ancestor(&self, ancestor: WindowId, id: WindowId) -> bool {
        let mut current = self.windows[id.0].container;
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.windows[parent.0].container;
        }
        false
    }

    /// Mapped windows whose container is `container`.
    pub fn subregions(
        &self,
        container: WindowId,
    ) -> impl Iterator<Item = (WindowId, &MemoryWindow)> + '_ {
        self.iter()
            .filter(move |(_, w)| w.mapped && w.container == Some(container))
    }

    pub fn iter(&self) -> impl Iterator<Item = (WindowId, &MemoryWindow)> + '_ {
        self.windows
            .iter()
            .enumerate()
            .map(|(idx, w)| (WindowId(idx), w))
    }

    /// Absolute range of a window, if it is mapped all the way up to the system space.
    pub fn global_range(&self, id: WindowId) -> Option<Range<u64>> {
        if id == WindowId::SYSTEM {
            return Some(self.windows[0].range());
        }
        let window = self.windows.get(id.0)?;
        if !window.mapped {
            return None;
        }
        let parent = self.global_range(window.container?)?;
        let start = parent.start.saturating_add(window.base);
        Some(start..start.saturating_add(window.size))
    }

    /// Globally visible RAM windows that carry no mapped subregions of their own, with their
    /// absolute ranges.
    pub fn ram_windows(&self) -> Vec<(WindowId, Range<u64>)> {
        self.iter()
            .filter(|(id, w)| w.ram && self.subregions(*id).next().is_none())
            .filter_map(|(id, _)| Some((id, self.global_range(id)?)))
            .collect()
    }

    /// Sum of the sizes of [Self::ram_windows].
    pub fn ram_total(&self) -> u64 {
        self.ram_windows()
            .iter()
            .map(|(_, range)| range.end - range.start)
            .sum()
    }

    /// Union of the RAM ranges; its length equals [Self::ram_total] when no RAM is aliased.
    pub fn ram_coverage(&self) -> SortedRangeSet {
        let mut set = SortedRangeSet::new();
        for (_, range) in self.ram_windows() {
            set.add(range);
        }
        set
    }
}

impl Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (id, window) in self.iter().skip(1) {
            match self.global_range(id) {
                Some(range) => f.write_fmt(format_args!(
                    "{}[{:#x},{:#x}) ",
                    window.name, range.start, range.end
                ))?,
                None => f.write_fmt(format_args!("{}(unmapped) ", window.name))?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subregions_are_container_relative() {
        let mut space = AddressSpace::new();
        let ddr = space.create("memory@0", 0x1000_0000, 0x4000_0000, false);
        let low = space.create("ddr-ram-low", 0, 0x1000, true);
        assert_eq!(space.global_range(low), None);
        space.map(low, ddr, 0x2000).unwrap();
        // container not mapped yet
        assert_eq!(space.global_range(low), None);
        space.map(ddr, WindowId::SYSTEM, 0x1000_0000).unwrap();
        assert_eq!(space.global_range(low), Some(0x1000_2000..0x1000_3000));
        assert_eq!(space.ram_total(), 0x1000);
    }

    #[test]
    fn overlapping_siblings_are_rejected() {
        let mut space = AddressSpace::new();
        let a = space.create("a", 0, 0x1000, true);
        let b = space.create("b", 0, 0x1000, true);
        space.map(a, WindowId::SYSTEM, 0).unwrap();
        assert!(matches!(
            space.map(b, WindowId::SYSTEM, 0x800),
            Err(MemoryError::Overlap { .. })
        ));
        space.map(b, WindowId::SYSTEM, 0x1000).unwrap();
        assert!(matches!(
            space.map(b, WindowId::SYSTEM, 0x4000),
            Err(MemoryError::AlreadyMapped { .. })
        ));
        assert_eq!(space.ram_coverage().total_len(), space.ram_total());
    }

    #[test]
    fn a_window_cannot_contain_itself() {
        let mut space = AddressSpace::new();
        let a = space.create("a", 0, 0x1000, true);
        let b = space.create("b", 0, 0x100, true);
        space.map(b, a, 0).unwrap();
        assert!(matches!(
            space.map(a, b, 0),
            Err(MemoryError::SelfContainer { .. })
        ));
        assert!(matches!(
            space.map(a, a, 0),
            Err(MemoryError::SelfContainer { .. })
        ));
    }

    #[test]
    fn ram_containers_are_not_double_counted() {
        let mut space = AddressSpace::new();
        let mem = space.create("memory@0", 0, 0x8000, true);
        space.map(mem, WindowId::SYSTEM, 0).unwrap();
        assert_eq!(space.ram_total(), 0x8000);
        let low = space.create("ddr-ram-low", 0, 0x4000, true);
        space.map(low, mem, 0).unwrap();
        assert_eq!(space.ram_total(), 0x4000);
    }
}
