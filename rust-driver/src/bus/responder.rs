//! Simulated two-wire slave devices sitting on a line register.
//!
//! Decodes START/STOP and clock edges from writes to the line register and
//! pulls the data line low to acknowledge or to send zero bits, the way a
//! real open-drain device would.

use std::{collections::HashMap, io, sync::Arc};

use parking_lot::Mutex;

use crate::device::DeviceAdaptor;

use super::BusLines;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Receive { bits: u8, byte: u8 },
    AckOut,
    Transmit { bits: u8, byte: u8 },
    AckIn,
    Ignore,
}

#[derive(Debug, Clone, Copy)]
struct Readiness {
    reg: u8,
    remaining: Option<usize>,
    value: u8,
}

#[derive(Debug)]
struct Target {
    regs: [u8; 256],
    readiness: Option<Readiness>,
    reads: HashMap<u8, usize>,
}

impl Target {
    fn new() -> Self {
        Self {
            regs: [0; 256],
            readiness: None,
            reads: HashMap::new(),
        }
    }

    fn read(&mut self, reg: u8) -> u8 {
        *self.reads.entry(reg).or_insert(0) += 1;
        match self.readiness {
            Some(ref mut ready) if ready.reg == reg => match ready.remaining {
                None => 0,
                Some(0) => ready.value,
                Some(ref mut n) => {
                    *n -= 1;
                    0
                }
            },
            _ => self.regs[usize::from(reg)],
        }
    }
}

#[derive(Debug)]
struct State {
    lines: BusLines,
    scl: bool,
    master_sda: bool,
    drive_low: bool,
    phase: Phase,
    targets: HashMap<u8, Target>,
    selected: Option<u8>,
    read_mode: bool,
    byte_index: usize,
    pointer: u8,
    master_acked: bool,
    starts: usize,
    stops: usize,
    trace: Vec<(bool, bool)>,
}

impl State {
    fn sda(&self) -> bool {
        self.master_sda && !self.drive_low
    }

    fn on_write(&mut self, scl: bool, master_sda: bool) {
        self.trace.push((scl, master_sda));
        let prev_scl = self.scl;
        let prev_sda = self.sda();
        self.scl = scl;
        self.master_sda = master_sda;
        let sda = self.sda();
        match (prev_scl, scl) {
            (true, true) if prev_sda && !sda => self.on_start(),
            (true, true) if !prev_sda && sda => self.on_stop(),
            (false, true) => self.on_rising(sda),
            (true, false) => self.on_falling(),
            _ => {}
        }
    }

    fn on_start(&mut self) {
        self.starts += 1;
        self.phase = Phase::Receive { bits: 0, byte: 0 };
        self.byte_index = 0;
        self.selected = None;
        self.drive_low = false;
    }

    fn on_stop(&mut self) {
        self.stops += 1;
        self.phase = Phase::Idle;
        self.drive_low = false;
    }

    fn on_rising(&mut self, sda: bool) {
        match self.phase {
            Phase::Receive { bits, byte } => {
                self.phase = Phase::Receive {
                    bits: bits + 1,
                    byte: (byte << 1) | u8::from(sda),
                };
            }
            Phase::AckIn => self.master_acked = !sda,
            _ => {}
        }
    }

    fn on_falling(&mut self) {
        match self.phase {
            Phase::Receive { bits: 8, byte } => {
                if self.accept(byte) {
                    self.drive_low = true;
                    self.phase = Phase::AckOut;
                } else {
                    self.drive_low = false;
                    self.phase = Phase::Ignore;
                }
            }
            Phase::AckOut => {
                self.drive_low = false;
                if self.read_mode {
                    self.begin_transmit();
                } else {
                    self.phase = Phase::Receive { bits: 0, byte: 0 };
                }
            }
            Phase::Transmit { bits, byte } => {
                let bits = bits + 1;
                if bits == 8 {
                    self.drive_low = false;
                    self.phase = Phase::AckIn;
                } else {
                    self.drive_low = (byte << bits) & 0x80 == 0;
                    self.phase = Phase::Transmit { bits, byte };
                }
            }
            Phase::AckIn => {
                if self.master_acked {
                    self.begin_transmit();
                } else {
                    self.drive_low = false;
                    self.phase = Phase::Ignore;
                }
            }
            _ => {}
        }
    }

    fn begin_transmit(&mut self) {
        let byte = match self.selected.and_then(|addr| self.targets.get_mut(&addr)) {
            Some(target) => target.read(self.pointer),
            None => 0xff,
        };
        self.pointer = self.pointer.wrapping_add(1);
        self.drive_low = byte & 0x80 == 0;
        self.phase = Phase::Transmit { bits: 0, byte };
    }

    fn accept(&mut self, byte: u8) -> bool {
        let index = self.byte_index;
        self.byte_index += 1;
        if index == 0 {
            let addr = byte >> 1;
            if !self.targets.contains_key(&addr) {
                self.selected = None;
                return false;
            }
            self.selected = Some(addr);
            self.read_mode = byte & 1 == 1;
            return true;
        }
        let Some(target) = self.selected.and_then(|addr| self.targets.get_mut(&addr)) else {
            return false;
        };
        if index == 1 {
            self.pointer = byte;
        } else {
            target.regs[usize::from(self.pointer)] = byte;
            self.pointer = self.pointer.wrapping_add(1);
        }
        true
    }
}

/// Devices answering on a simulated line register
#[derive(Debug, Clone)]
pub(crate) struct TwoWireResponder(Arc<Mutex<State>>);

impl TwoWireResponder {
    pub(crate) fn new(lines: BusLines) -> Self {
        Self(Arc::new(Mutex::new(State {
            lines,
            scl: true,
            master_sda: true,
            drive_low: false,
            phase: Phase::Idle,
            targets: HashMap::new(),
            selected: None,
            read_mode: false,
            byte_index: 0,
            pointer: 0,
            master_acked: false,
            starts: 0,
            stops: 0,
            trace: Vec::new(),
        })))
    }

    pub(crate) fn add_device(&self, addr: u8) {
        let _ignore = self.0.lock().targets.insert(addr, Target::new());
    }

    pub(crate) fn remove_device(&self, addr: u8) {
        let _ignore = self.0.lock().targets.remove(&addr);
    }

    pub(crate) fn set_register(&self, addr: u8, reg: u8, value: u8) {
        if let Some(target) = self.0.lock().targets.get_mut(&addr) {
            target.regs[usize::from(reg)] = value;
        }
    }

    pub(crate) fn register(&self, addr: u8, reg: u8) -> u8 {
        self.0
            .lock()
            .targets
            .get(&addr)
            .map_or(0, |t| t.regs[usize::from(reg)])
    }

    /// `reg` reads as zero forever
    pub(crate) fn set_never_ready(&self, addr: u8, reg: u8) {
        self.set_readiness(addr, reg, None, 0);
    }

    /// `reg` reads as zero `polls` times, then as `value`
    pub(crate) fn set_ready_after(&self, addr: u8, reg: u8, polls: usize, value: u8) {
        self.set_readiness(addr, reg, Some(polls), value);
    }

    fn set_readiness(&self, addr: u8, reg: u8, remaining: Option<usize>, value: u8) {
        if let Some(target) = self.0.lock().targets.get_mut(&addr) {
            target.readiness = Some(Readiness {
                reg,
                remaining,
                value,
            });
        }
    }

    pub(crate) fn reads_of(&self, addr: u8, reg: u8) -> usize {
        self.0
            .lock()
            .targets
            .get(&addr)
            .and_then(|t| t.reads.get(&reg).copied())
            .unwrap_or(0)
    }

    pub(crate) fn starts(&self) -> usize {
        self.0.lock().starts
    }

    pub(crate) fn stops(&self) -> usize {
        self.0.lock().stops
    }

    /// `(clock, data)` as driven by the master, one entry per line write
    pub(crate) fn trace(&self) -> Vec<(bool, bool)> {
        self.0.lock().trace.clone()
    }
}

impl DeviceAdaptor for TwoWireResponder {
    fn read_csr(&self, addr: u64) -> io::Result<u32> {
        let state = self.0.lock();
        if addr != state.lines.register {
            return Ok(0);
        }
        let mut value = 0;
        if state.scl {
            value |= state.lines.clock_mask;
        }
        if state.sda() {
            value |= state.lines.data_in_mask;
        }
        Ok(value)
    }

    fn write_csr(&self, addr: u64, data: u32) -> io::Result<()> {
        let mut state = self.0.lock();
        if addr == state.lines.register {
            let scl = data & state.lines.clock_mask != 0;
            let sda = data & state.lines.data_mask != 0;
            state.on_write(scl, sda);
        }
        Ok(())
    }
}
