//! Circular loader lists over the registered module slots.
//!
//! Each loader record embeds three `LIST_ENTRY` pairs, one per list kind. Linking happens in
//! two steps: [`ModuleList::build`] decides the order as plain registry indices, then
//! [`ModuleList::links`] turns that order into `(node, next, prev)` addresses and
//! [`ModuleList::write`] patches them into guest memory. Only the last step touches memory,
//! and rerunning it with the same inputs rewrites the same bytes.

use strum::{Display, EnumIter};

use crate::{
    emulation::{
        loader::{
            module::{ModuleKey, ModuleRole},
            registry::ModuleRegistry,
        },
        memory::VirtualMemory,
    },
    Result,
};

/// The three orderings of the loader lists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ModuleListKind {
    /// `InLoadOrderLinks`, offset `0x00`
    LoadOrder,
    /// `InMemoryOrderLinks`, offset `0x08`
    MemoryOrder,
    /// `InInitializationOrderLinks`, offset `0x10`
    InitializationOrder,
}

impl ModuleListKind {
    /// Offset of this list's link pair inside a loader record.
    #[must_use]
    pub fn link_offset(self) -> u32 {
        match self {
            ModuleListKind::LoadOrder => 0x00,
            ModuleListKind::MemoryOrder => 0x08,
            ModuleListKind::InitializationOrder => 0x10,
        }
    }
}

/// One `(node, next, prev)` triple; all three are slot addresses plus the list's link offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ListLink {
    /// Address of the node's link pair
    pub node: u32,
    /// Forward link
    pub next: u32,
    /// Backward link
    pub prev: u32,
}

/// An ordered loader list, as registry indices.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleList {
    kind: ModuleListKind,
    order: Vec<usize>,
    slots: Vec<u32>,
}

impl ModuleList {
    /// Order the modules of `registry` for `kind`.
    ///
    /// `canonical` is the caller's module order (names or paths); `core_modules` are the two
    /// system modules forced to the front of the initialization-order list. Unresolvable names
    /// and missing anchors are logged and the list is built from what is available.
    #[must_use]
    pub fn build(
        kind: ModuleListKind,
        registry: &ModuleRegistry,
        canonical: &[&str],
        core_modules: [&str; 2],
    ) -> Self {
        let mut resolved: Vec<usize> = Vec::with_capacity(canonical.len());
        for name in canonical {
            match registry.index_of(&ModuleKey::new(name)) {
                Some(index) if !resolved.contains(&index) => resolved.push(index),
                Some(_) => {}
                None => {
                    log::warn!("Module '{}' not found, ldr data will be inconsistent", name);
                }
            }
        }

        let role = |index: usize| registry.entries()[index].role;
        let sentinel = registry
            .entries()
            .iter()
            .position(|entry| entry.role == ModuleRole::Sentinel);
        let mut order: Vec<usize> = Vec::with_capacity(resolved.len());

        match kind {
            ModuleListKind::LoadOrder | ModuleListKind::MemoryOrder => {
                match resolved
                    .iter()
                    .copied()
                    .find(|&index| role(index) == ModuleRole::Main)
                {
                    Some(main) => order.push(main),
                    None => log::warn!("No main module in {}, ldr data will be inconsistent", kind),
                }
                order.extend(
                    resolved
                        .iter()
                        .copied()
                        .filter(|&index| role(index) == ModuleRole::Ordinary),
                );
            }
            ModuleListKind::InitializationOrder => {
                let core: Vec<Option<usize>> = core_modules
                    .iter()
                    .map(|name| {
                        let index = registry.index_of(&ModuleKey::new(name))?;
                        resolved.contains(&index).then_some(index)
                    })
                    .collect();

                if core.iter().any(Option::is_none) {
                    log::warn!(
                        "Missing {} or {}, ldr data will be inconsistent",
                        core_modules[0],
                        core_modules[1]
                    );
                }

                order.extend(core.iter().flatten().copied());
                order.extend(resolved.iter().copied().filter(|&index| {
                    role(index) == ModuleRole::Ordinary && !core.contains(&Some(index))
                }));
            }
        }

        match sentinel {
            Some(sentinel) => order.push(sentinel),
            None => log::warn!("No sentinel module in {}, ldr data will be inconsistent", kind),
        }

        let slots = order
            .iter()
            .map(|&index| registry.entries()[index].slot)
            .collect();

        ModuleList { kind, order, slots }
    }

    /// The list kind.
    #[must_use]
    pub fn kind(&self) -> ModuleListKind {
        self.kind
    }

    /// Registry indices in list order.
    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Slot addresses in list order.
    #[must_use]
    pub fn slots(&self) -> &[u32] {
        &self.slots
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the list has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Link pairs closing the list into a ring.
    #[must_use]
    pub fn links(&self) -> Vec<ListLink> {
        let count = self.slots.len();
        let offset = self.kind.link_offset();

        (0..count)
            .map(|index| ListLink {
                node: self.slots[index] + offset,
                next: self.slots[(index + 1) % count] + offset,
                prev: self.slots[(index + count - 1) % count] + offset,
            })
            .collect()
    }

    /// Patch every node's link pair in guest memory.
    ///
    /// # Errors
    /// Returns an error if a slot is not mapped.
    pub fn write(&self, memory: &mut dyn VirtualMemory) -> Result<()> {
        log::debug!("Fix {} module list ({} nodes)", self.kind, self.len());

        for link in self.links() {
            memory.write_u32s(link.node, &[link.next, link.prev])?;
        }

        Ok(())
    }
}

/// Build and write the `kind` list in one step.
///
/// # Errors
/// Returns an error if a slot is not mapped.
pub fn link(
    memory: &mut dyn VirtualMemory,
    kind: ModuleListKind,
    registry: &ModuleRegistry,
    canonical: &[&str],
    core_modules: [&str; 2],
) -> Result<ModuleList> {
    let list = ModuleList::build(kind, registry, canonical, core_modules);
    list.write(memory)?;
    Ok(list)
}
