//! Logical register modules and the firmware enumeration table.
//!
//! Firmware lists every register module it implements in a table at the start
//! of the register window. Scanning it once after discovery turns a logical
//! `(module, instance)` pair into a physical offset and a version number.

mod table;

use std::fmt;

pub use table::{EnumerationTable, RegisterDescriptor};

#[cfg(test)]
pub(crate) use table::write_table;

/// Logical register module identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ModuleCode {
    /// Card-wide control and identification registers
    General,
    /// Clock/data lines of a software-driven two-wire bus
    TwoWireBus,
    /// Register-mediated two-wire bus controller
    BusController,
    /// Line framer
    Framer,
    /// Physical layer device
    Phy,
    /// Packet buffer manager
    Pbm,
    /// Capture stream
    Stream,
    /// Transmit/erf timing module
    Terf,
    /// Latched statistics counters
    Counters,
    /// Read-only identification ROM
    Rom,
    /// A module code this runtime has no name for
    Other(u8),
}

impl ModuleCode {
    /// Numeric code as stored in the enumeration table
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            ModuleCode::General => 0x00,
            ModuleCode::TwoWireBus => 0x01,
            ModuleCode::BusController => 0x02,
            ModuleCode::Framer => 0x03,
            ModuleCode::Phy => 0x04,
            ModuleCode::Pbm => 0x05,
            ModuleCode::Stream => 0x06,
            ModuleCode::Terf => 0x07,
            ModuleCode::Counters => 0x08,
            ModuleCode::Rom => 0x09,
            ModuleCode::Other(code) => code,
        }
    }

    /// The named variant for a raw code, so `Other(0x03)` becomes `Framer`
    #[must_use]
    pub fn canonical(self) -> Self {
        Self::from(self.code())
    }

    /// Length in bytes of one instance's register block
    #[must_use]
    pub const fn block_size(self) -> u32 {
        match self {
            ModuleCode::TwoWireBus | ModuleCode::BusController => 0x10,
            ModuleCode::Stream | ModuleCode::Terf => 0x40,
            ModuleCode::Phy => 0x80,
            ModuleCode::General | ModuleCode::Framer | ModuleCode::Pbm | ModuleCode::Counters => {
                0x100
            }
            ModuleCode::Rom => 0x1000,
            ModuleCode::Other(_) => 0x4,
        }
    }
}

impl From<u8> for ModuleCode {
    fn from(code: u8) -> Self {
        match code {
            0x00 => ModuleCode::General,
            0x01 => ModuleCode::TwoWireBus,
            0x02 => ModuleCode::BusController,
            0x03 => ModuleCode::Framer,
            0x04 => ModuleCode::Phy,
            0x05 => ModuleCode::Pbm,
            0x06 => ModuleCode::Stream,
            0x07 => ModuleCode::Terf,
            0x08 => ModuleCode::Counters,
            0x09 => ModuleCode::Rom,
            other => ModuleCode::Other(other),
        }
    }
}

impl From<ModuleCode> for u8 {
    fn from(module: ModuleCode) -> Self {
        module.code()
    }
}

impl fmt::Display for ModuleCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ModuleCode::Other(code) => write!(f, "module {code:#04x}"),
            ref named => write!(f, "{named:?}"),
        }
    }
}
