//! Simulated serial port, device bus and delay clock.
//!
//! This is the platform module for running the firmware core on a host, the
//! way a board support crate would provide the real pins: the tests and the
//! utility binary plug these into [`Programmer`](crate::Programmer) instead
//! of real hardware.

use core::convert::Infallible;
use std::collections::VecDeque;

use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::serial::{Read, Write};

use crate::bus::{BusIo, ControlLine};
use crate::PortIo;

/// In-memory serial port. Host-to-firmware bytes are queued with
/// [`push_host_bytes`](SimPort::push_host_bytes); firmware output accumulates
/// until taken.
pub struct SimPort {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    /// Last flow-control request the firmware made (true = stop sending).
    pub stop_requested: bool,
    /// Rising edges seen on the stop request, for tests.
    pub stop_events: u32,
    /// Baud rate reported by auto-detection.
    pub detected_baud: u32,
}

impl SimPort {
    pub fn new() -> Self {
        Self {
            rx: VecDeque::new(),
            tx: Vec::new(),
            stop_requested: false,
            stop_events: 0,
            detected_baud: 9600,
        }
    }

    /// Queue bytes as if the host had transmitted them.
    pub fn push_host_bytes(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    pub fn pending_input(&self) -> usize {
        self.rx.len()
    }

    /// Drain everything the firmware has sent so far.
    pub fn take_output(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.tx)
    }

    pub fn output(&self) -> &[u8] {
        &self.tx
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Read<u8> for SimPort {
    type Error = Infallible;

    fn read(&mut self) -> nb::Result<u8, Infallible> {
        self.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl Write<u8> for SimPort {
    type Error = Infallible;

    fn write(&mut self, byte: u8) -> nb::Result<(), Infallible> {
        self.tx.push(byte);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Infallible> {
        Ok(())
    }
}

impl PortIo<Infallible> for SimPort {
    fn set_cts(&mut self, stop: bool) -> Result<(), Infallible> {
        if stop && !self.stop_requested {
            self.stop_events += 1;
        }
        self.stop_requested = stop;
        Ok(())
    }

    fn init_baud(&mut self, baud: u32) -> Result<u32, Infallible> {
        if baud != 0 {
            self.detected_baud = baud;
        }
        Ok(self.detected_baud)
    }
}

/// Simulated programming socket with a device behind it.
///
/// The device model follows the pins: an address is committed on the falling
/// edge of ALE, a read returns the latched cell only while both the chip
/// enable and the read strobe are asserted, and a program pulse commits the
/// driven byte on its falling edge. Programming can only clear bits, as on a
/// real EPROM, so over-programming a non-blank cell yields a genuine verify
/// mismatch.
pub struct SimBus {
    mem: Vec<u8>,
    address_lines: u16,
    latched: u16,
    driven: Option<u8>,
    chip_enable: bool,
    program_enable: bool,
    read_strobe: bool,
    program_pulse: bool,
    /// Program pulses seen, for tests.
    pub pulses: u32,
    /// Enabled read samples seen, for tests.
    pub reads: u32,
}

impl SimBus {
    /// A blank device of `size` bytes, every cell erased.
    pub fn blank(size: usize) -> Self {
        Self::preloaded(vec![0xFF; size])
    }

    /// A device with the given contents.
    pub fn preloaded(mem: Vec<u8>) -> Self {
        Self {
            mem,
            address_lines: 0,
            latched: 0,
            driven: None,
            chip_enable: false,
            program_enable: false,
            read_strobe: false,
            program_pulse: false,
            pulses: 0,
            reads: 0,
        }
    }

    pub fn memory(&self) -> &[u8] {
        &self.mem
    }

    fn cell(&mut self) -> Option<&mut u8> {
        self.mem.get_mut(self.latched as usize)
    }
}

impl BusIo for SimBus {
    type Error = Infallible;

    fn set_address(&mut self, addr: u16) -> Result<(), Infallible> {
        self.address_lines = addr;
        Ok(())
    }

    fn drive_data(&mut self, byte: u8) -> Result<(), Infallible> {
        self.driven = Some(byte);
        Ok(())
    }

    fn release_data(&mut self) -> Result<(), Infallible> {
        self.driven = None;
        Ok(())
    }

    fn sample_data(&mut self) -> Result<u8, Infallible> {
        if self.chip_enable && self.read_strobe {
            self.reads += 1;
            Ok(self.mem.get(self.latched as usize).copied().unwrap_or(0xFF))
        } else {
            // Floating bus.
            Ok(0xFF)
        }
    }

    fn assert(&mut self, line: ControlLine) -> Result<(), Infallible> {
        match line {
            ControlLine::AddressLatch => {}
            ControlLine::ReadStrobe => self.read_strobe = true,
            ControlLine::ChipEnable => self.chip_enable = true,
            ControlLine::ProgramEnable => self.program_enable = true,
            ControlLine::ProgramPulse => self.program_pulse = true,
        }
        Ok(())
    }

    fn deassert(&mut self, line: ControlLine) -> Result<(), Infallible> {
        match line {
            ControlLine::AddressLatch => {
                // Falling edge commits the address lines.
                self.latched = self.address_lines;
            }
            ControlLine::ReadStrobe => self.read_strobe = false,
            ControlLine::ChipEnable => self.chip_enable = false,
            ControlLine::ProgramEnable => self.program_enable = false,
            ControlLine::ProgramPulse => {
                if self.program_pulse && self.program_enable {
                    if let Some(byte) = self.driven {
                        if let Some(cell) = self.cell() {
                            *cell &= byte;
                        }
                        self.pulses += 1;
                    }
                }
                self.program_pulse = false;
            }
        }
        Ok(())
    }
}

/// Delay provider that only accumulates, so tests can assert on elapsed
/// wall-clock time without actually sleeping.
pub struct SimDelay {
    elapsed_us: u64,
}

impl SimDelay {
    pub fn new() -> Self {
        Self { elapsed_us: 0 }
    }

    pub fn elapsed_us(&self) -> u64 {
        self.elapsed_us
    }
}

impl Default for SimDelay {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayUs<u16> for SimDelay {
    fn delay_us(&mut self, us: u16) {
        self.elapsed_us += u64::from(us);
    }
}

impl DelayMs<u16> for SimDelay {
    fn delay_ms(&mut self, ms: u16) {
        self.elapsed_us += u64::from(ms) * 1000;
    }
}

/// Activity indicator stand-in.
pub struct SimLed {
    pub lit: bool,
}

impl SimLed {
    pub fn new() -> Self {
        Self { lit: false }
    }
}

impl Default for SimLed {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputPin for SimLed {
    type Error = Infallible;

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.lit = true;
        Ok(())
    }

    fn set_low(&mut self) -> Result<(), Infallible> {
        self.lit = false;
        Ok(())
    }
}
