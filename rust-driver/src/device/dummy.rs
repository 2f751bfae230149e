use std::{collections::HashMap, io, sync::Arc};

use parking_lot::Mutex;

use super::DeviceAdaptor;

/// Sparse register file; registers never written read as zero.
#[derive(Default, Clone, Debug)]
pub struct DummyDevice(Arc<Mutex<HashMap<u64, u32>>>);

impl DummyDevice {
    /// Creates an empty register file
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a register file pre-loaded with `regs`
    #[must_use]
    pub fn with_registers(regs: impl IntoIterator<Item = (u64, u32)>) -> Self {
        Self(Arc::new(Mutex::new(regs.into_iter().collect())))
    }

    /// Reads a register without going through the adaptor trait
    #[must_use]
    pub fn peek(&self, addr: u64) -> u32 {
        self.0.lock().get(&addr).copied().unwrap_or(0)
    }

    /// Writes a register without going through the adaptor trait
    pub fn poke(&self, addr: u64, data: u32) {
        let _ignore = self.0.lock().insert(addr, data);
    }
}

impl DeviceAdaptor for DummyDevice {
    fn read_csr(&self, addr: u64) -> io::Result<u32> {
        Ok(self.peek(addr))
    }

    fn write_csr(&self, addr: u64, data: u32) -> io::Result<()> {
        self.poke(addr, data);
        Ok(())
    }
}
