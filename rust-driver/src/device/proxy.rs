use std::io;

use super::DeviceAdaptor;

/// Adds a fixed module base to every register address.
///
/// Lets module code use register offsets relative to the base reported by the
/// enumeration table.
#[derive(Debug, Clone)]
pub struct OffsetProxy<Dev> {
    dev: Dev,
    base: u64,
}

impl<Dev> OffsetProxy<Dev> {
    /// Wraps `dev` so that address 0 maps to `base`
    pub fn new(dev: Dev, base: u64) -> Self {
        Self { dev, base }
    }

    /// The module base address
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Moves the proxy to a new base, e.g. after the enumeration table changed
    pub fn rebase(&mut self, base: u64) {
        self.base = base;
    }
}

impl<Dev: DeviceAdaptor> DeviceAdaptor for OffsetProxy<Dev> {
    fn read_csr(&self, addr: u64) -> io::Result<u32> {
        self.dev.read_csr(self.base.wrapping_add(addr))
    }

    fn write_csr(&self, addr: u64, data: u32) -> io::Result<()> {
        self.dev.write_csr(self.base.wrapping_add(addr), data)
    }
}
