use std::io;

use bilge::prelude::*;
use log::debug;

use crate::{
    constants::{ENUM_TABLE_BASE, ENUM_TABLE_END, MAX_ENUM_ENTRIES},
    device::DeviceAdaptor,
};

use super::ModuleCode;

/// One 32-bit enumeration table entry as laid out by firmware
#[bitsize(32)]
#[derive(Clone, Copy, DebugBits, FromBits)]
struct EnumEntry {
    block_offset: u16,
    module: u8,
    flags: u4,
    version: u4,
}

/// Location and revision of one register module instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterDescriptor {
    /// Logical module
    pub module: ModuleCode,
    /// Instance index among modules with the same code
    pub index: usize,
    /// Byte offset of the register block in the window
    pub offset: u64,
    /// Register layout revision
    pub version: u8,
    /// Length of the register block in bytes
    pub size: u32,
    /// Raw entry flags
    pub flags: u8,
}

/// Register modules discovered on one card.
///
/// Built once when the card is opened; rebuilt only when firmware is reloaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnumerationTable {
    descriptors: Vec<RegisterDescriptor>,
}

impl EnumerationTable {
    /// Scans the enumeration table at the start of the register window
    ///
    /// # Errors
    /// Returns an error if a table entry cannot be read
    pub fn scan(dev: &dyn DeviceAdaptor) -> io::Result<Self> {
        Self::scan_at(dev, ENUM_TABLE_BASE)
    }

    /// Scans an enumeration table starting at `base`
    ///
    /// # Errors
    /// Returns an error if a table entry cannot be read
    pub fn scan_at(dev: &dyn DeviceAdaptor, base: u64) -> io::Result<Self> {
        let mut table = Self::default();
        for i in 0..MAX_ENUM_ENTRIES {
            #[allow(clippy::as_conversions, clippy::arithmetic_side_effects)]
            let addr = base + (i as u64) * 4;
            let entry = EnumEntry::from(dev.read_csr(addr)?);
            if entry.module() == ENUM_TABLE_END {
                break;
            }
            table.push(
                ModuleCode::from(entry.module()),
                u64::from(entry.block_offset()),
                entry.version().value(),
                entry.flags().value(),
            );
        }
        debug!("enumeration table: {} register modules", table.len());
        for desc in table.iter() {
            debug!(
                "  {} #{} at {:#06x} v{}",
                desc.module, desc.index, desc.offset, desc.version
            );
        }
        Ok(table)
    }

    /// Builds a table from `(module, offset, version)` triples, numbering
    /// instances in the order given.
    pub fn from_descriptors(entries: impl IntoIterator<Item = (ModuleCode, u64, u8)>) -> Self {
        let mut table = Self::default();
        for (module, offset, version) in entries {
            table.push(module, offset, version, 0);
        }
        table
    }

    fn push(&mut self, module: ModuleCode, offset: u64, version: u8, flags: u8) {
        let module = module.canonical();
        let index = self.count(module);
        self.descriptors.push(RegisterDescriptor {
            module,
            index,
            offset,
            version,
            size: module.block_size(),
            flags,
        });
    }

    /// Descriptor of the `index`-th instance of `module`
    #[must_use]
    pub fn descriptor(&self, module: ModuleCode, index: usize) -> Option<&RegisterDescriptor> {
        let module = module.canonical();
        self.descriptors
            .iter()
            .find(|d| d.module == module && d.index == index)
    }

    /// Base offset of the `index`-th instance of `module`, `None` if absent
    #[must_use]
    pub fn address(&self, module: ModuleCode, index: usize) -> Option<u64> {
        self.descriptor(module, index).map(|d| d.offset)
    }

    /// Register layout version of the `index`-th instance of `module`
    #[must_use]
    pub fn version(&self, module: ModuleCode, index: usize) -> Option<u8> {
        self.descriptor(module, index).map(|d| d.version)
    }

    /// Number of instances of `module`
    #[must_use]
    pub fn count(&self, module: ModuleCode) -> usize {
        let module = module.canonical();
        self.descriptors.iter().filter(|d| d.module == module).count()
    }

    /// All descriptors in table order
    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.descriptors.iter()
    }

    /// Number of module instances
    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the table lists no modules
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Encodes a table entry the way firmware lays it out.
#[cfg(test)]
pub(crate) fn encode_entry(module: u8, offset: u16, version: u8, flags: u8) -> u32 {
    EnumEntry::new(offset, module, u4::new(flags), u4::new(version)).into()
}

/// Writes a firmware-style enumeration table, with terminator, into `dev`.
#[cfg(test)]
pub(crate) fn write_table(dev: &crate::device::DummyDevice, entries: &[(ModuleCode, u16, u8)]) {
    let mut addr = ENUM_TABLE_BASE;
    for &(module, offset, version) in entries {
        dev.poke(addr, encode_entry(module.code(), offset, version, 0));
        addr += 4;
    }
    dev.poke(addr, encode_entry(ENUM_TABLE_END, 0, 0, 0));
}
