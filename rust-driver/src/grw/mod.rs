mod transport;

use std::sync::Arc;

use log::error;
use parking_lot::Mutex;

use crate::error::{Error, LastError, Result};

pub use transport::{
    bus_address, ControllerTransport, CsrTransport, GrwTransport, RomTransport, SharedTransport,
    TwoWireTransport,
};

/// What a write through a [`GenericReadWrite`] does with the mask
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnOperation {
    /// Masked writes read the register first and only replace the masked bits
    #[default]
    Plain,
    /// Masked writes store `value & mask` without reading
    Direct,
    /// Reads return latched event bits; writing zero afterwards writes the
    /// mask back to clear them
    ClearOnRead,
}

/// A transport bound to one address, with an optional mask and write mode.
///
/// Every access updates the last-error slot: a failure is kept until the
/// next access or until [`take_last_error`](Self::take_last_error).
#[derive(Debug)]
pub struct GenericReadWrite {
    transport: SharedTransport,
    address: u64,
    mask: u32,
    mode: OnOperation,
    last_error: Mutex<Option<LastError>>,
}

impl GenericReadWrite {
    /// Accessor for `address` on `transport`, covering all 32 bits
    pub fn new(transport: SharedTransport, address: u64) -> Self {
        Self {
            transport,
            address,
            mask: u32::MAX,
            mode: OnOperation::Plain,
            last_error: Mutex::new(None),
        }
    }

    /// Restricts masked accesses to `mask`
    #[must_use]
    pub fn with_mask(mut self, mask: u32) -> Self {
        self.mask = mask;
        self
    }

    /// Selects the write behaviour
    #[must_use]
    pub fn with_on_operation(mut self, mode: OnOperation) -> Self {
        self.mode = mode;
        self
    }

    /// Changes the write behaviour in place
    pub fn set_on_operation(&mut self, mode: OnOperation) {
        self.mode = mode;
    }

    /// A second accessor on the same transport, `delta` bytes further on
    #[must_use]
    pub fn sibling(&self, delta: u64) -> Self {
        Self::new(Arc::clone(&self.transport), self.address.wrapping_add(delta))
            .with_mask(self.mask)
            .with_on_operation(self.mode)
    }

    /// Bound address
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Moves the accessor after the register base changed
    pub fn set_address(&mut self, address: u64) {
        self.address = address;
    }

    /// Bound mask
    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Write behaviour
    pub fn on_operation(&self) -> OnOperation {
        self.mode
    }

    /// Outcome of the most recent failed access, if it was the last one
    pub fn last_error(&self) -> Option<LastError> {
        self.last_error.lock().clone()
    }

    /// Returns and clears the last error
    pub fn take_last_error(&self) -> Option<LastError> {
        self.last_error.lock().take()
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        let mut slot = self.last_error.lock();
        match result {
            Ok(value) => {
                *slot = None;
                Ok(value)
            }
            Err(err) => {
                error!("access to {:#x} failed: {err}", self.address);
                *slot = Some(LastError::from(&err));
                Err(err)
            }
        }
    }

    /// Reads the raw register value
    ///
    /// # Errors
    /// Returns the transport error, which is also kept as the last error
    pub fn read(&self) -> Result<u32> {
        self.record(self.transport.read(self.address))
    }

    /// Writes `value` as-is in one transport operation.
    ///
    /// On a [`OnOperation::ClearOnRead`] accessor only zero is accepted; it
    /// writes the mask back to clear the latched bits.
    ///
    /// # Errors
    /// Returns the transport error, which is also kept as the last error
    pub fn write(&self, value: u32) -> Result<()> {
        let result = match self.mode {
            OnOperation::ClearOnRead => self.clear(value),
            OnOperation::Plain | OnOperation::Direct => self.transport.write(self.address, value),
        };
        self.record(result)
    }

    fn clear(&self, value: u32) -> Result<()> {
        if value != 0 {
            return Err(Error::InvalidInput(format!(
                "clear-on-read register {:#x} only accepts zero, got {value:#x}",
                self.address
            )));
        }
        self.transport.write(self.address, self.mask)
    }

    /// Reads the register and keeps only the masked bits
    ///
    /// # Errors
    /// Returns the transport error, which is also kept as the last error
    pub fn read_masked(&self) -> Result<u32> {
        self.read().map(|raw| raw & self.mask)
    }

    /// Writes `value` into the masked bits.
    ///
    /// Bits of `value` outside the mask are dropped; the mask is not a field
    /// position, so `value` is not shifted.
    ///
    /// # Errors
    /// Returns the transport error, which is also kept as the last error
    pub fn write_masked(&self, value: u32) -> Result<()> {
        match self.mode {
            OnOperation::Plain if self.mask != u32::MAX => {
                let raw = self.read()?;
                self.write((raw & !self.mask) | (value & self.mask))
            }
            OnOperation::Plain | OnOperation::Direct => self.write(value & self.mask),
            OnOperation::ClearOnRead => self.write(value),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{
        bus::{
            controller::{tests::EmulatedController, BusController},
            responder::TwoWireResponder,
            BusLines, RetryBudget, TwoWireBus,
        },
        device::{DeviceAdaptor, DummyDevice},
    };

    use super::*;

    #[derive(Debug, Default)]
    struct CountingTransport {
        regs: DummyDevice,
        reads: Mutex<usize>,
        writes: Mutex<usize>,
    }

    impl GrwTransport for CountingTransport {
        fn read(&self, addr: u64) -> Result<u32> {
            *self.reads.lock() += 1;
            Ok(self.regs.read_csr(addr)?)
        }

        fn write(&self, addr: u64, value: u32) -> Result<()> {
            *self.writes.lock() += 1;
            Ok(self.regs.write_csr(addr, value)?)
        }
    }

    fn counting() -> Arc<CountingTransport> {
        Arc::new(CountingTransport::default())
    }

    #[test]
    fn read_and_write_are_single_operations() {
        let t = counting();
        let grw = GenericReadWrite::new(t.clone(), 0x10);
        grw.write(0xdead_beef).unwrap();
        assert_eq!(grw.read().unwrap(), 0xdead_beef);
        assert_eq!(*t.reads.lock(), 1);
        assert_eq!(*t.writes.lock(), 1);
    }

    #[test]
    fn plain_masked_write_preserves_other_bits() {
        let t = counting();
        t.regs.poke(0x20, 0xffff_0000);
        let grw = GenericReadWrite::new(t.clone(), 0x20).with_mask(0x0000_00f0);
        grw.write_masked(0x1234_5678).unwrap();
        assert_eq!(t.regs.peek(0x20), 0xffff_0070);
        assert_eq!(grw.read_masked().unwrap(), 0x70);
    }

    #[test]
    fn direct_masked_write_skips_the_read() {
        let t = counting();
        t.regs.poke(0x20, 0xffff_0000);
        let grw = GenericReadWrite::new(t.clone(), 0x20)
            .with_mask(0x0f)
            .with_on_operation(OnOperation::Direct);
        grw.write_masked(0xab).unwrap();
        assert_eq!(t.regs.peek(0x20), 0x0b);
        assert_eq!(*t.reads.lock(), 0);
    }

    #[test]
    fn clear_on_read_writes_mask_back() {
        let t = counting();
        t.regs.poke(0x30, 0b1010);
        let grw = GenericReadWrite::new(t.clone(), 0x30)
            .with_mask(0b1110)
            .with_on_operation(OnOperation::ClearOnRead);
        assert_eq!(grw.read_masked().unwrap(), 0b1010);
        grw.write(0).unwrap();
        assert_eq!(t.regs.peek(0x30), 0b1110);

        let err = grw.write(1).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(grw.last_error().map(|e| e.errno), Some(libc::EINVAL));
    }

    #[test]
    fn rom_rejects_writes_and_records_them() {
        let dev = DummyDevice::with_registers([(0x0, 0x0001_0203)]);
        let grw = GenericReadWrite::new(Arc::new(RomTransport::new(Arc::new(dev))), 0x0);
        assert_eq!(grw.read().unwrap(), 0x0001_0203);
        assert!(grw.last_error().is_none());
        assert!(matches!(grw.write(5), Err(Error::ReadOnly(_))));
        assert_eq!(grw.take_last_error().map(|e| e.errno), Some(libc::EPERM));
        assert!(grw.take_last_error().is_none());
    }

    #[test]
    fn success_clears_the_last_error() {
        let dev = DummyDevice::new();
        let grw = GenericReadWrite::new(Arc::new(RomTransport::new(Arc::new(dev))), 0x4);
        let _err = grw.write(1).unwrap_err();
        assert!(grw.last_error().is_some());
        let _value = grw.read().unwrap();
        assert!(grw.last_error().is_none());
    }

    #[test]
    fn sibling_shares_transport() {
        let t = counting();
        let low = GenericReadWrite::new(t.clone(), 0x100);
        let high = low.sibling(4);
        high.write(7).unwrap();
        assert_eq!(high.address(), 0x104);
        assert_eq!(t.regs.peek(0x104), 7);
    }

    #[test]
    fn same_accessor_runs_over_two_wire_bus() {
        let lines = BusLines::new(0x80, 0x1, 0x2);
        let responder = TwoWireResponder::new(lines);
        responder.add_device(0x4c);
        let bus = TwoWireBus::with_settle(Arc::new(responder.clone()), lines, Duration::ZERO);
        let transport = Arc::new(TwoWireTransport::new(Arc::new(bus)));

        let grw = GenericReadWrite::new(transport.clone(), bus_address(0x4c, 0x09)).with_mask(0x0f);
        responder.set_register(0x4c, 0x09, 0xa0);
        grw.write_masked(0x05).unwrap();
        assert_eq!(responder.register(0x4c, 0x09), 0xa5);
        assert_eq!(grw.read_masked().unwrap(), 0x05);

        let absent = GenericReadWrite::new(transport, bus_address(0x2e, 0x00));
        assert!(matches!(absent.read(), Err(Error::NoAck(0x2e))));
        assert_eq!(absent.last_error().map(|e| e.errno), Some(libc::ENXIO));
        assert!(matches!(absent.write(0x100), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn same_accessor_runs_over_bus_controller() {
        let emu = EmulatedController::new(2);
        emu.add_device(0x50);
        let ctrl = BusController::new(Arc::new(emu.clone()), 0x0, RetryBudget::new(10));
        let transport = Arc::new(ControllerTransport::new(Arc::new(ctrl)));
        let grw = GenericReadWrite::new(transport, bus_address(0x50, 0x03));
        grw.write(0x42).unwrap();
        assert_eq!(emu.register(0x50, 0x03), 0x42);
        assert_eq!(grw.read().unwrap(), 0x42);
    }
}
