use bilge::prelude::*;
use log::debug;

use crate::{
    device::{DeviceAdaptor, SharedDevice},
    error::{Error, Result},
};

use super::{check_device_address, RetryBudget};

/// Command register, relative to the controller base
const CSR_COMMAND: u64 = 0x0;
/// Status register, relative to the controller base
const CSR_STATUS: u64 = 0x4;

#[bitsize(32)]
#[derive(Clone, Copy, DebugBits, FromBits)]
struct ControllerCommand {
    data: u8,
    register: u8,
    device: u7,
    read: bool,
    spare: u7,
    start: bool,
}

#[bitsize(32)]
#[derive(Clone, Copy, DebugBits, FromBits)]
struct ControllerStatus {
    busy: bool,
    nack: bool,
    spare0: u6,
    data: u8,
    spare1: u16,
}

/// Two-wire bus master implemented in card logic.
///
/// A transfer is started by writing the command register; the status register
/// is then polled until the busy bit clears.
#[derive(Debug, Clone)]
pub struct BusController {
    dev: SharedDevice,
    base: u64,
    budget: RetryBudget,
}

impl BusController {
    /// Controller whose registers start at `base`
    pub fn new(dev: SharedDevice, base: u64, budget: RetryBudget) -> Self {
        Self { dev, base, budget }
    }

    /// Register base
    pub fn base(&self) -> u64 {
        self.base
    }

    /// Moves the controller after the enumeration table was rebuilt
    pub fn rebase(&mut self, base: u64) {
        self.base = base;
    }

    /// Reads register `reg` of device `addr`
    ///
    /// # Errors
    /// Returns [`Error::InvalidInput`] for an address above 7 bits,
    /// [`Error::NoAck`] if the device did not answer and
    /// [`Error::RetryExhausted`] if the controller stayed busy
    pub fn read(&self, addr: u8, reg: u8) -> Result<u8> {
        let status = self.execute(addr, reg, 0, true)?;
        Ok(status.data())
    }

    /// Writes `value` to register `reg` of device `addr`
    ///
    /// # Errors
    /// Returns [`Error::NoAck`] if the device did not answer and
    /// [`Error::RetryExhausted`] if the controller stayed busy
    pub fn write(&self, addr: u8, reg: u8, value: u8) -> Result<()> {
        let _status = self.execute(addr, reg, value, false)?;
        Ok(())
    }

    fn execute(&self, addr: u8, reg: u8, data: u8, read: bool) -> Result<ControllerStatus> {
        let device = u7::new(check_device_address(addr)?);
        let cmd = ControllerCommand::new(data, reg, device, read, u7::new(0), true);
        self.dev
            .write_csr(self.base + CSR_COMMAND, u32::from(cmd))?;
        let what = format!("bus controller at {:#x}", self.base);
        let status = self.budget.poll(&what, || {
            let status = ControllerStatus::from(self.dev.read_csr(self.base + CSR_STATUS)?);
            Ok((!status.busy()).then_some(status))
        })?;
        if status.nack() {
            debug!("bus controller: no acknowledge from {addr:#04x}");
            return Err(Error::NoAck(addr));
        }
        Ok(status)
    }
}
