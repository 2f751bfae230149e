//! Software-driven two-wire bus.
//!
//! The clock and data lines are two bits of one card register. Every
//! transition is followed by a fixed settle delay; the sensor devices on this
//! bus silently misread when it is shortened.

/// Register-mediated bus controller
pub mod controller;

#[cfg(test)]
pub(crate) mod responder;

use std::{fmt, io, time::Duration};

use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::{
    device::{DeviceAdaptor, SharedDevice},
    error::{Error, Result},
};

/// Default delay after each line transition
pub const DEFAULT_SETTLE: Duration = Duration::from_micros(15);

/// Highest 7-bit device address
pub const MAX_DEVICE_ADDRESS: u8 = 0x7f;

/// Rejects device addresses that do not fit in 7 bits
///
/// # Errors
/// Returns [`Error::InvalidInput`] if `addr` is above [`MAX_DEVICE_ADDRESS`]
pub(crate) fn check_device_address(addr: u8) -> Result<u8> {
    if addr > MAX_DEVICE_ADDRESS {
        return Err(Error::InvalidInput(format!(
            "two-wire device address {addr:#04x} exceeds 7 bits"
        )));
    }
    Ok(addr)
}

/// Bounded number of attempts for a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    attempts: usize,
}

impl RetryBudget {
    /// A budget of `attempts` polls
    #[must_use]
    pub const fn new(attempts: usize) -> Self {
        Self { attempts }
    }

    /// Number of polls allowed
    #[must_use]
    pub const fn attempts(self) -> usize {
        self.attempts
    }

    /// Calls `poll` until it yields a value or the budget runs out.
    ///
    /// # Errors
    /// Returns [`Error::RetryExhausted`] when every attempt came back empty, or
    /// the first error `poll` returns.
    pub fn poll<T>(self, what: &str, mut poll: impl FnMut() -> Result<Option<T>>) -> Result<T> {
        for _ in 0..self.attempts {
            if let Some(value) = poll()? {
                return Ok(value);
            }
        }
        warn!("{what}: not ready after {} attempts", self.attempts);
        Err(Error::RetryExhausted {
            what: what.to_owned(),
            attempts: self.attempts,
        })
    }
}

/// Placement of the clock and data lines inside one register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusLines {
    /// Register holding both lines
    pub register: u64,
    /// Clock output bit
    pub clock_mask: u32,
    /// Data output bit
    pub data_mask: u32,
    /// Bit the data line is sampled from
    pub data_in_mask: u32,
}

impl BusLines {
    /// Lines driven and sampled through the same bits
    #[must_use]
    pub const fn new(register: u64, clock_mask: u32, data_mask: u32) -> Self {
        Self {
            register,
            clock_mask,
            data_mask,
            data_in_mask: data_mask,
        }
    }

    /// Samples the data line from a separate input bit
    #[must_use]
    pub const fn with_data_in(mut self, data_in_mask: u32) -> Self {
        self.data_in_mask = data_in_mask;
        self
    }
}

/// Sticky protocol error kept by the bus until taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// A byte sent to this device address was not acknowledged
    NoAck(u8),
}

impl From<BusError> for Error {
    fn from(err: BusError) -> Self {
        match err {
            BusError::NoAck(addr) => Error::NoAck(addr),
        }
    }
}

#[derive(Debug, Default)]
struct LineState {
    /// Last value written to the line register
    shadow: Option<u32>,
    sticky: Option<BusError>,
}

/// Bit-banged two-wire bus master
pub struct TwoWireBus {
    dev: SharedDevice,
    lines: BusLines,
    settle: Duration,
    state: Mutex<LineState>,
}

impl fmt::Debug for TwoWireBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwoWireBus")
            .field("lines", &self.lines)
            .field("settle", &self.settle)
            .finish_non_exhaustive()
    }
}

impl TwoWireBus {
    /// Creates a bus on `lines` with the default settle delay
    pub fn new(dev: SharedDevice, lines: BusLines) -> Self {
        Self::with_settle(dev, lines, DEFAULT_SETTLE)
    }

    /// Creates a bus with an explicit settle delay
    pub fn with_settle(dev: SharedDevice, lines: BusLines, settle: Duration) -> Self {
        Self {
            dev,
            lines,
            settle,
            state: Mutex::new(LineState::default()),
        }
    }

    /// Line placement
    pub fn lines(&self) -> BusLines {
        self.lines
    }

    /// Returns and clears the sticky protocol error
    pub fn take_error(&self) -> Option<BusError> {
        self.state.lock().sticky.take()
    }

    /// Runs `f` with exclusive control of the lines.
    ///
    /// # Errors
    /// Returns the first register access error
    pub fn session<R>(&self, f: impl FnOnce(&mut BusSession<'_>) -> io::Result<R>) -> Result<R> {
        let mut session = BusSession {
            bus: self,
            state: self.state.lock(),
        };
        session.ensure_idle()?;
        f(&mut session).map_err(Error::from)
    }

    /// Writes one device register: START, address, register, value, STOP.
    ///
    /// A missing acknowledge does not abort the sequence; it is left in the
    /// sticky error slot.
    ///
    /// # Errors
    /// Returns an error only if the line register cannot be accessed
    pub fn write_register(&self, addr: u8, reg: u8, value: u8) -> Result<()> {
        self.write_block(addr, reg, &[value])
    }

    /// Reads one device register using a repeated START.
    ///
    /// # Errors
    /// Returns an error only if the line register cannot be accessed
    pub fn read_register(&self, addr: u8, reg: u8) -> Result<u8> {
        let mut buf = [0; 1];
        self.read_block(addr, reg, &mut buf)?;
        Ok(buf[0])
    }

    /// Writes consecutive device registers starting at `reg`
    ///
    /// # Errors
    /// Returns an error if `addr` is not a 7-bit address or the line register
    /// cannot be accessed
    pub fn write_block(&self, addr: u8, reg: u8, data: &[u8]) -> Result<()> {
        let addr = check_device_address(addr)?;
        self.session(|s| {
            s.start()?;
            s.send(addr, addr << 1)?;
            s.send(addr, reg)?;
            for &byte in data {
                s.send(addr, byte)?;
            }
            s.stop()
        })
    }

    /// Reads consecutive device registers starting at `reg` into `buf`
    ///
    /// # Errors
    /// Returns an error if `addr` is not a 7-bit address or the line register
    /// cannot be accessed
    pub fn read_block(&self, addr: u8, reg: u8, buf: &mut [u8]) -> Result<()> {
        let addr = check_device_address(addr)?;
        self.session(|s| {
            s.start()?;
            s.send(addr, addr << 1)?;
            s.send(addr, reg)?;
            s.repeated_start()?;
            s.send(addr, (addr << 1) | 1)?;
            let len = buf.len();
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = s.read_byte(i + 1 < len)?;
            }
            s.stop()
        })
    }

    /// Checks whether a device answers at `addr`.
    ///
    /// # Errors
    /// Returns an error only if the line register cannot be accessed
    pub fn probe(&self, addr: u8) -> Result<bool> {
        let addr = check_device_address(addr)?;
        self.session(|s| {
            s.start()?;
            s.send(addr, addr << 1)?;
            s.stop()
        })?;
        Ok(self.take_error().is_none())
    }

    /// Probes each candidate address, returning those that answered
    ///
    /// # Errors
    /// Returns an error only if the line register cannot be accessed
    pub fn scan(&self, candidates: &[u8]) -> Result<Vec<u8>> {
        let mut found = Vec::new();
        for &addr in candidates {
            if self.probe(addr)? {
                debug!("two-wire device present at {addr:#04x}");
                found.push(addr);
            } else {
                debug!("no two-wire device at {addr:#04x}");
            }
        }
        Ok(found)
    }

    /// Polls device register `reg` until a bit of `mask` is set.
    ///
    /// A read that was not acknowledged counts as "not ready".
    ///
    /// # Errors
    /// Returns [`Error::RetryExhausted`] once the budget is spent
    pub fn wait_ready(&self, addr: u8, reg: u8, mask: u8, budget: RetryBudget) -> Result<u8> {
        let what = format!("two-wire device {addr:#04x} register {reg:#04x}");
        budget.poll(&what, || {
            let value = self.read_register(addr, reg)?;
            if self.take_error().is_some() {
                return Ok(None);
            }
            Ok((value & mask != 0).then_some(value))
        })
    }
}

/// Exclusive access to the bus lines for one transaction
pub struct BusSession<'a> {
    bus: &'a TwoWireBus,
    state: MutexGuard<'a, LineState>,
}

impl BusSession<'_> {
    fn ensure_idle(&mut self) -> io::Result<()> {
        if self.state.shadow.is_some() {
            return Ok(());
        }
        let lines = self.bus.lines;
        let raw = self.bus.dev.read_csr(lines.register)?;
        let idle = raw | lines.clock_mask | lines.data_mask;
        self.write(idle)
    }

    fn write(&mut self, value: u32) -> io::Result<()> {
        self.bus.dev.write_csr(self.bus.lines.register, value)?;
        self.state.shadow = Some(value);
        if !self.bus.settle.is_zero() {
            spin_sleep::sleep(self.bus.settle);
        }
        Ok(())
    }

    fn set_line(&mut self, mask: u32, high: bool) -> io::Result<()> {
        let current = self.state.shadow.unwrap_or(0);
        let value = if high { current | mask } else { current & !mask };
        self.write(value)
    }

    fn set_clock(&mut self, high: bool) -> io::Result<()> {
        self.set_line(self.bus.lines.clock_mask, high)
    }

    fn set_data(&mut self, high: bool) -> io::Result<()> {
        self.set_line(self.bus.lines.data_mask, high)
    }

    fn sample_data(&self) -> io::Result<bool> {
        let raw = self.bus.dev.read_csr(self.bus.lines.register)?;
        Ok(raw & self.bus.lines.data_in_mask != 0)
    }

    /// START, or repeated START when the clock is low: data falls while the
    /// clock is high.
    ///
    /// # Errors
    /// Returns an error if the line register cannot be written
    pub fn start(&mut self) -> io::Result<()> {
        self.set_data(true)?;
        self.set_clock(true)?;
        self.set_data(false)?;
        self.set_clock(false)
    }

    /// Repeated START between the write and read phases of one transaction
    ///
    /// # Errors
    /// Returns an error if the line register cannot be written
    pub fn repeated_start(&mut self) -> io::Result<()> {
        self.start()
    }

    /// STOP: data rises while the clock is high
    ///
    /// # Errors
    /// Returns an error if the line register cannot be written
    pub fn stop(&mut self) -> io::Result<()> {
        self.set_data(false)?;
        self.set_clock(true)?;
        self.set_data(true)
    }

    /// Shifts out one byte MSB first and returns whether it was acknowledged
    ///
    /// # Errors
    /// Returns an error if the line register cannot be accessed
    pub fn write_byte(&mut self, byte: u8) -> io::Result<bool> {
        for bit in (0..8).rev() {
            self.set_data(byte & (1 << bit) != 0)?;
            self.set_clock(true)?;
            self.set_clock(false)?;
        }
        self.set_data(true)?;
        self.set_clock(true)?;
        let nack = self.sample_data()?;
        self.set_clock(false)?;
        Ok(!nack)
    }

    /// Shifts in one byte MSB first, then acknowledges it if `ack`
    ///
    /// # Errors
    /// Returns an error if the line register cannot be accessed
    pub fn read_byte(&mut self, ack: bool) -> io::Result<u8> {
        self.set_data(true)?;
        let mut byte = 0;
        for _ in 0..8 {
            self.set_clock(true)?;
            byte = (byte << 1) | u8::from(self.sample_data()?);
            self.set_clock(false)?;
        }
        self.set_data(!ack)?;
        self.set_clock(true)?;
        self.set_clock(false)?;
        self.set_data(true)?;
        Ok(byte)
    }

    /// Writes a byte and records a sticky error for `addr` if it is not
    /// acknowledged. The transaction carries on either way.
    ///
    /// # Errors
    /// Returns an error if the line register cannot be accessed
    pub fn send(&mut self, addr: u8, byte: u8) -> io::Result<bool> {
        let ack = self.write_byte(byte)?;
        if !ack && self.state.sticky.is_none() {
            debug!("no acknowledge from two-wire device {addr:#04x}");
            self.state.sticky = Some(BusError::NoAck(addr));
        }
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Instant};

    use super::{responder::TwoWireResponder, *};

    const LINES: BusLines = BusLines::new(0x40, 0x1, 0x2);
    const SENSOR: u8 = 0x4c;

    fn bus(responder: &TwoWireResponder) -> TwoWireBus {
        TwoWireBus::with_settle(Arc::new(responder.clone()), LINES, Duration::ZERO)
    }

    #[test]
    fn acking_responder_records_no_errors() {
        let responder = TwoWireResponder::new(LINES);
        responder.add_device(SENSOR);
        let bus = bus(&responder);
        for i in 0..1000_u32 {
            let reg = (i % 16) as u8;
            let value = (i * 7) as u8;
            bus.write_register(SENSOR, reg, value).unwrap();
            assert!(bus.take_error().is_none());
            assert_eq!(bus.read_register(SENSOR, reg).unwrap(), value);
            assert!(bus.take_error().is_none());
        }
        // last write to register 3 came from i = 995
        assert_eq!(responder.register(SENSOR, 3), (995_u32 * 7) as u8);
    }

    #[test]
    fn addresses_above_seven_bits_never_reach_the_lines() {
        let responder = TwoWireResponder::new(LINES);
        responder.add_device(0x00);
        let bus = bus(&responder);
        for addr in [0x80, 0xcc, 0xff] {
            assert!(matches!(
                bus.write_register(addr, 0x01, 0x5a),
                Err(Error::InvalidInput(_))
            ));
            assert!(matches!(bus.read_register(addr, 0x01), Err(Error::InvalidInput(_))));
            assert!(matches!(bus.probe(addr), Err(Error::InvalidInput(_))));
        }
        assert_eq!(responder.starts(), 0);
        // 0x80 would otherwise have been sent as the general-call address
        assert_eq!(responder.register(0x00, 0x01), 0);
        assert!(bus.take_error().is_none());
    }

    #[test]
    fn nack_sets_one_sticky_error_and_completes_sequence() {
        let responder = TwoWireResponder::new(LINES);
        responder.add_device(SENSOR);
        let bus = bus(&responder);
        for _ in 0..10 {
            let starts = responder.starts();
            let stops = responder.stops();
            let _value = bus.read_register(0x2e, 0x00).unwrap();
            assert_eq!(bus.take_error(), Some(BusError::NoAck(0x2e)));
            assert_eq!(bus.take_error(), None);
            // START, repeated START and STOP all still happened
            assert_eq!(responder.starts() - starts, 2);
            assert_eq!(responder.stops() - stops, 1);
        }
    }

    #[test]
    fn block_transfers_use_auto_increment() {
        let responder = TwoWireResponder::new(LINES);
        responder.add_device(SENSOR);
        let bus = bus(&responder);
        bus.write_block(SENSOR, 0x10, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0; 4];
        bus.read_block(SENSOR, 0x10, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(responder.register(SENSOR, 0x13), 4);
        assert!(bus.take_error().is_none());
    }

    #[test]
    fn scan_skips_absent_addresses() {
        let responder = TwoWireResponder::new(LINES);
        responder.add_device(0x4c);
        responder.add_device(0x18);
        let bus = bus(&responder);
        let found = bus.scan(&[0x2e, 0x4c, 0x4d, 0x18]).unwrap();
        assert_eq!(found, vec![0x4c, 0x18]);
        assert!(bus.take_error().is_none());
    }

    #[test]
    fn wait_ready_gives_up_after_budget() {
        let responder = TwoWireResponder::new(LINES);
        responder.add_device(SENSOR);
        responder.set_never_ready(SENSOR, 0x02);
        let bus = bus(&responder);
        let err = bus
            .wait_ready(SENSOR, 0x02, 0x80, RetryBudget::new(50))
            .unwrap_err();
        assert!(matches!(err, Error::RetryExhausted { attempts: 50, .. }));
        assert_eq!(responder.reads_of(SENSOR, 0x02), 50);
    }

    #[test]
    fn wait_ready_returns_once_device_is_ready() {
        let responder = TwoWireResponder::new(LINES);
        responder.add_device(SENSOR);
        responder.set_ready_after(SENSOR, 0x02, 3, 0x81);
        let bus = bus(&responder);
        let status = bus
            .wait_ready(SENSOR, 0x02, 0x80, RetryBudget::new(10))
            .unwrap();
        assert_eq!(status, 0x81);
        assert_eq!(responder.reads_of(SENSOR, 0x02), 4);
    }

    #[test]
    fn wait_ready_treats_missing_device_as_not_ready() {
        let responder = TwoWireResponder::new(LINES);
        let bus = bus(&responder);
        let err = bus
            .wait_ready(SENSOR, 0x02, 0x80, RetryBudget::new(5))
            .unwrap_err();
        assert!(err.is_absent());
    }

    #[test]
    fn start_and_stop_follow_line_order() {
        let responder = TwoWireResponder::new(LINES);
        responder.add_device(SENSOR);
        let bus = bus(&responder);
        bus.probe(SENSOR).unwrap();
        let trace = responder.trace();
        // (clock, data) after each write: idle, START, ...
        assert_eq!(
            &trace[..5],
            &[
                (true, true),
                (true, true),
                (true, true),
                (true, false),
                (false, false)
            ]
        );
        let n = trace.len();
        assert_eq!(
            &trace[n - 3..],
            &[(false, false), (true, false), (true, true)]
        );
    }

    #[test]
    fn every_transition_waits_for_settle_delay() {
        let responder = TwoWireResponder::new(LINES);
        responder.add_device(SENSOR);
        let bus = TwoWireBus::new(Arc::new(responder.clone()), LINES);
        let before = responder.trace().len();
        let started = Instant::now();
        bus.write_register(SENSOR, 0x01, 0x5a).unwrap();
        let elapsed = started.elapsed();
        let transitions = responder.trace().len() - before;
        assert!(transitions > 40);
        let minimum = DEFAULT_SETTLE * u32::try_from(transitions).unwrap();
        assert!(elapsed >= minimum, "{elapsed:?} < {minimum:?}");
        assert_eq!(responder.register(SENSOR, 0x01), 0x5a);
    }

    #[test]
    fn separate_data_input_bit_is_sampled() {
        let lines = BusLines::new(0x40, 0x1, 0x2).with_data_in(0x100);
        let responder = TwoWireResponder::new(lines);
        responder.add_device(SENSOR);
        let bus = TwoWireBus::with_settle(Arc::new(responder.clone()), lines, Duration::ZERO);
        bus.write_register(SENSOR, 0x05, 0xa5).unwrap();
        assert_eq!(bus.read_register(SENSOR, 0x05).unwrap(), 0xa5);
        assert!(bus.take_error().is_none());
    }

    #[test]
    fn retry_budget_propagates_poll_errors() {
        let mut calls = 0;
        let err = RetryBudget::new(5)
            .poll::<()>("failing", || {
                calls += 1;
                Err(Error::InvalidInput("broken".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(calls, 1);
    }
}
