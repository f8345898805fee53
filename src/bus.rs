//! Parallel bus access: the pin-level seam and the phase sequencer.
//!
//! `BusIo` is what a board implementation provides: address lines, a
//! bidirectional data port and the control strobes. Assert/deassert are
//! logical; mapping to physical polarity (the 8755's `_CE1` is active low,
//! `CE2` active high) is the implementor's wiring concern.
//!
//! `BusSequencer` owns a `BusIo` plus a delay provider and turns a timing
//! profile and a logical phase into the pin dance. It holds no device state
//! of its own, which is what lets the engine run against a simulated bus.

use core::fmt::Debug;

use embedded_hal::blocking::delay::{DelayMs, DelayUs};

use crate::device::TimingProfile;

/// Logical control strobes of the programming socket.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ControlLine {
    /// ALE, commits the address into the device-side latches.
    AddressLatch,
    /// Output-enable strobe for a read cycle.
    ReadStrobe,
    /// General chip enable, held for the duration of an operation.
    ChipEnable,
    /// Enable asserted only around a programming pulse.
    ProgramEnable,
    /// The timed programming-voltage pulse itself.
    ProgramPulse,
}

/// Pin-level access to the programming socket.
pub trait BusIo {
    type Error: Debug;

    /// Present an address on the address lines.
    fn set_address(&mut self, addr: u16) -> Result<(), Self::Error>;
    /// Drive the data port as an output with the given value.
    fn drive_data(&mut self, byte: u8) -> Result<(), Self::Error>;
    /// Tristate the data port.
    fn release_data(&mut self) -> Result<(), Self::Error>;
    /// Sample the data port while it is an input.
    fn sample_data(&mut self) -> Result<u8, Self::Error>;
    fn assert(&mut self, line: ControlLine) -> Result<(), Self::Error>;
    fn deassert(&mut self, line: ControlLine) -> Result<(), Self::Error>;
}

pub struct BusSequencer<B, D> {
    bus: B,
    delay: D,
}

impl<B, D> BusSequencer<B, D>
where
    B: BusIo,
    D: DelayUs<u16> + DelayMs<u16>,
{
    pub fn new(bus: B, delay: D) -> Self {
        Self { bus, delay }
    }

    /// Give back the bus and the delay provider.
    pub fn release(self) -> (B, D) {
        (self.bus, self.delay)
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Hold the variant's read-enable line for the coming operation.
    pub fn begin_op(&mut self, t: &TimingProfile) -> Result<(), B::Error> {
        self.bus.assert(t.read_enable)?;
        self.delay.delay_us(t.bus_turnaround_us);
        Ok(())
    }

    /// Drop the read-enable line again. Runs on every exit path.
    pub fn end_op(&mut self, t: &TimingProfile) -> Result<(), B::Error> {
        self.bus.deassert(t.read_enable)
    }

    /// Present `addr` and pulse ALE to commit it into the device latches.
    pub fn latch_address(&mut self, t: &TimingProfile, addr: u16) -> Result<(), B::Error> {
        self.bus.set_address(addr)?;
        self.delay.delay_us(t.address_setup_us);
        self.bus.assert(ControlLine::AddressLatch)?;
        self.delay.delay_us(t.latch_pulse_us);
        self.bus.deassert(ControlLine::AddressLatch)?;
        self.delay.delay_us(t.latch_hold_us);
        Ok(())
    }

    /// One read cycle at the previously latched address.
    pub fn read_cycle(&mut self, t: &TimingProfile) -> Result<u8, B::Error> {
        self.bus.release_data()?;
        self.delay.delay_us(t.bus_turnaround_us);
        self.bus.assert(ControlLine::ReadStrobe)?;
        self.delay.delay_us(t.read_strobe_us);
        let byte = self.bus.sample_data()?;
        self.bus.deassert(ControlLine::ReadStrobe)?;
        self.delay.delay_us(t.bus_turnaround_us);
        Ok(byte)
    }

    /// Latch `addr` then read it.
    pub fn read_at(&mut self, t: &TimingProfile, addr: u16) -> Result<u8, B::Error> {
        self.latch_address(t, addr)?;
        self.read_cycle(t)
    }

    /// One programming pulse at the previously latched address.
    pub fn program_cycle(&mut self, t: &TimingProfile, byte: u8) -> Result<(), B::Error> {
        self.bus.drive_data(byte)?;
        self.delay.delay_us(t.data_setup_us);
        self.bus.assert(t.program_enable)?;
        self.delay.delay_us(t.program_setup_us);
        self.bus.assert(ControlLine::ProgramPulse)?;
        self.delay.delay_ms(t.program_pulse_ms);
        self.bus.deassert(ControlLine::ProgramPulse)?;
        self.delay.delay_us(t.program_recovery_us);
        self.bus.deassert(t.program_enable)?;
        Ok(())
    }
}
