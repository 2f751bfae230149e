use std::{fmt, sync::Arc};

use crate::{
    bus::{controller::BusController, TwoWireBus},
    device::{DeviceAdaptor, SharedDevice},
    error::{Error, Result},
};

/// Physical medium behind a [`GenericReadWrite`](super::GenericReadWrite).
///
/// Addresses are transport specific: byte offsets into the register window
/// for mapped registers, `device << 8 | register` for two-wire devices.
pub trait GrwTransport: Send + Sync + fmt::Debug {
    /// Reads one 32-bit value at `addr`
    ///
    /// # Errors
    /// Returns an error if the transport fails or the target did not answer
    fn read(&self, addr: u64) -> Result<u32>;

    /// Writes one 32-bit value at `addr`
    ///
    /// # Errors
    /// Returns an error if the transport fails or the target did not answer
    fn write(&self, addr: u64, value: u32) -> Result<()>;
}

/// Transport shared between the accessors of one card
pub type SharedTransport = Arc<dyn GrwTransport>;

/// Splits a two-wire GRW address into device address and register
fn split_bus_address(addr: u64) -> Result<(u8, u8)> {
    let dev = u8::try_from(addr >> 8)
        .map_err(|_err| Error::InvalidInput(format!("bus address {addr:#x} out of range")))?;
    #[allow(clippy::as_conversions, clippy::cast_possible_truncation)]
    let reg = (addr & 0xff) as u8;
    Ok((dev, reg))
}

/// Bus address of register `reg` on device `dev`
#[must_use]
pub fn bus_address(dev: u8, reg: u8) -> u64 {
    (u64::from(dev) << 8) | u64::from(reg)
}

fn to_byte(value: u32) -> Result<u8> {
    u8::try_from(value)
        .map_err(|_err| Error::InvalidInput(format!("{value:#x} does not fit a bus register")))
}

/// Memory-mapped card register
#[derive(Debug, Clone)]
pub struct CsrTransport {
    dev: SharedDevice,
}

impl CsrTransport {
    /// Transport over the card's register window
    pub fn new(dev: SharedDevice) -> Self {
        Self { dev }
    }
}

impl GrwTransport for CsrTransport {
    fn read(&self, addr: u64) -> Result<u32> {
        Ok(self.dev.read_csr(addr)?)
    }

    fn write(&self, addr: u64, value: u32) -> Result<()> {
        Ok(self.dev.write_csr(addr, value)?)
    }
}

/// Read-only memory, e.g. the card's identification ROM
#[derive(Debug, Clone)]
pub struct RomTransport {
    dev: SharedDevice,
}

impl RomTransport {
    /// Transport reading from the card's register window
    pub fn new(dev: SharedDevice) -> Self {
        Self { dev }
    }
}

impl GrwTransport for RomTransport {
    fn read(&self, addr: u64) -> Result<u32> {
        Ok(self.dev.read_csr(addr)?)
    }

    fn write(&self, addr: u64, _value: u32) -> Result<()> {
        Err(Error::ReadOnly(format!("ROM at {addr:#x}")))
    }
}

/// Device register behind the bit-banged two-wire bus.
///
/// A missing acknowledge is taken from the bus's sticky slot and returned as
/// [`Error::NoAck`].
#[derive(Debug, Clone)]
pub struct TwoWireTransport {
    bus: Arc<TwoWireBus>,
}

impl TwoWireTransport {
    /// Transport over `bus`
    pub fn new(bus: Arc<TwoWireBus>) -> Self {
        Self { bus }
    }

    fn check(&self) -> Result<()> {
        match self.bus.take_error() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

impl GrwTransport for TwoWireTransport {
    fn read(&self, addr: u64) -> Result<u32> {
        let (dev, reg) = split_bus_address(addr)?;
        let value = self.bus.read_register(dev, reg)?;
        self.check()?;
        Ok(u32::from(value))
    }

    fn write(&self, addr: u64, value: u32) -> Result<()> {
        let (dev, reg) = split_bus_address(addr)?;
        self.bus.write_register(dev, reg, to_byte(value)?)?;
        self.check()
    }
}

/// Device register behind the register-mediated bus controller
#[derive(Debug, Clone)]
pub struct ControllerTransport {
    ctrl: Arc<BusController>,
}

impl ControllerTransport {
    /// Transport over `ctrl`
    pub fn new(ctrl: Arc<BusController>) -> Self {
        Self { ctrl }
    }
}

impl GrwTransport for ControllerTransport {
    fn read(&self, addr: u64) -> Result<u32> {
        let (dev, reg) = split_bus_address(addr)?;
        self.ctrl.read(dev, reg).map(u32::from)
    }

    fn write(&self, addr: u64, value: u32) -> Result<()> {
        let (dev, reg) = split_bus_address(addr)?;
        self.ctrl.write(dev, reg, to_byte(value)?)
    }
}
