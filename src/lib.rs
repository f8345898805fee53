//! Serial EPROM programmer firmware core.
//!
//! A host drives this firmware with short ASCII commands (`$` + opcode) over
//! a serial link; the firmware walks the target device's address space over
//! a parallel bus to read, blank-check or program it, streaming results back
//! over the same link. The hardware seams are `embedded-hal` traits plus the
//! [`PortIo`] and [`bus::BusIo`] extensions, so the same core runs against a
//! real socket or the simulator in [`sim`].

use core::fmt::Debug;
use core::marker::PhantomData;

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use embedded_hal::digital::v2::OutputPin;
use embedded_hal::serial::{Read, Write};

use thiserror::Error;

pub mod bus;
pub mod device;
pub mod protocol;
pub mod queue;
pub mod session;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

use bus::{BusIo, BusSequencer};
use device::DeviceKind;
use protocol::{Opcode, ROW_WIDTH};
use queue::Flow;
use session::Session;

/// Serial link collaborator: byte receive/transmit plus the out-of-band
/// control the firmware owns: the flow-control output asserted towards the
/// host and baud-rate (re)initialisation.
pub trait PortIo<E>: Write<u8, Error = E> + Read<u8, Error = E> {
    /// Drive the flow-control output. `stop` asks the host to pause.
    fn set_cts(&mut self, stop: bool) -> Result<(), E>;

    /// (Re)program the link baud rate, 0 meaning auto-detect. Returns the
    /// rate now in effect.
    fn init_baud(&mut self, baud: u32) -> Result<u32, E>;
}

/// Dispatcher state, observable for diagnostics.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    /// No envelope pending.
    Idle,
    /// Envelope seen, popping marker and opcode.
    Dispatching,
    /// An operation is running.
    Executing,
    /// Flushing the queue and clearing the flag.
    Cleanup,
}

#[derive(Debug, Error)]
pub enum Error<SE: Debug, BE: Debug> {
    /// Serial layer fault (framing/overrun live below this core).
    #[error("serial port fault: {0:?}")]
    Serial(SE),
    /// Parallel bus fault reported by the board layer.
    #[error("bus fault: {0:?}")]
    Bus(BE),
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Do not drive the flow-control output line
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub no_flow_control: bool,

    /// Idle delay between dispatcher polls, milliseconds
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "250"))]
    pub idle_delay_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            no_flow_control: false,
            idle_delay_ms: 250,
        }
    }
}

/// The programmer: serial port, bus sequencer, activity indicator and the
/// session shared with the receive interrupt.
pub struct Programmer<P, B, D, L, E> {
    port: P,
    seq: BusSequencer<B, D>,
    led: L,
    session: Session,
    options: Options,
    state: State,
    _err: PhantomData<E>,
}

impl<P, B, D, L, E> Programmer<P, B, D, L, E>
where
    P: PortIo<E>,
    B: BusIo,
    D: DelayUs<u16> + DelayMs<u16>,
    L: OutputPin,
    E: Debug,
{
    pub fn new(port: P, seq: BusSequencer<B, D>, led: L, options: Options) -> Self {
        Self {
            port,
            seq,
            led,
            session: Session::new(),
            options,
            state: State::Idle,
            _err: PhantomData,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Request cooperative termination from outside the dispatch loop.
    pub fn cancel(&mut self) {
        self.session.cancel();
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn bus(&self) -> &B {
        self.seq.bus()
    }

    /// One dispatcher pass: drain the serial port into the session, then run
    /// at most one pending command to completion (or abort). Cleanup runs
    /// unconditionally, so the loop always returns to [`State::Idle`].
    pub fn poll(&mut self) -> Result<State, Error<E, B::Error>> {
        self.pump()?;
        if !self.session.command_active() {
            let dropped = self.session.discard_stray();
            if dropped > 0 {
                warn!("discarded {} stray bytes", dropped);
                let flow = self.session.flow();
                self.apply_flow(flow)?;
                // Intake may have reopened; an envelope behind the stray
                // bytes is picked up in the same pass.
                self.pump()?;
            }
        }
        if !self.session.command_active() {
            self.state = State::Idle;
            return Ok(State::Idle);
        }

        self.state = State::Dispatching;
        let _ = self.led.set_high();

        let result = match self.session.take_envelope() {
            Some(op) => {
                self.state = State::Executing;
                self.dispatch(op)
            }
            None => Ok(()),
        };

        self.state = State::Cleanup;
        self.session.finish();
        let flow = self.session.flow();
        self.apply_flow(flow)?;
        let _ = self.led.set_low();
        self.state = State::Idle;

        result.map(|()| State::Idle)
    }

    /// Move pending serial bytes into the session.
    ///
    /// On a real target this work happens in the UART receive vector; here
    /// the port is polled from the main loop instead. An overflowing queue is
    /// a recoverable condition: the byte is dropped with a warning and the
    /// ring is left intact (flow control should have stopped the host well
    /// before this point).
    fn pump(&mut self) -> Result<(), Error<E, B::Error>> {
        loop {
            // While flow control says stop, the bytes stay with the host;
            // intake resumes once the consumer drains below the low
            // watermark.
            if self.session.flow() == Flow::Stop {
                return Ok(());
            }
            match self.port.read() {
                Ok(byte) => match self.session.isr_receive(byte) {
                    Ok(flow) => self.apply_flow(flow)?,
                    Err(e) => warn!("dropping byte 0x{:02x}: {}", byte, e),
                },
                Err(nb::Error::WouldBlock) => return Ok(()),
                Err(nb::Error::Other(e)) => return Err(Error::Serial(e)),
            }
        }
    }

    fn apply_flow(&mut self, flow: Flow) -> Result<(), Error<E, B::Error>> {
        if self.options.no_flow_control {
            return Ok(());
        }
        self.port.set_cts(flow == Flow::Stop).map_err(Error::Serial)
    }

    fn dispatch(&mut self, op: u8) -> Result<(), Error<E, B::Error>> {
        match Opcode::from_u8(op) {
            Some(Opcode::Read) => self.op_read(),
            Some(Opcode::Write) => self.op_write(),
            Some(Opcode::BlankCheck) => self.op_blank_check(),
            Some(Opcode::Identify) => self.op_identify(),
            Some(Opcode::SetDevice) => self.op_set_device(),
            Some(Opcode::Reset) => self.op_reset(),
            Some(Opcode::InitBaud) => self.op_init_baud(),
            None => {
                warn!("unknown command 0x{:02x}", op);
                self.send_line("unknown command")
            }
        }
    }

    /// Dump the full address space as `AAAA: DD DD .. DD` rows.
    fn op_read(&mut self) -> Result<(), Error<E, B::Error>> {
        let device = match self.require_device()? {
            Some(d) => d,
            None => return Ok(()),
        };
        let t = device.timing();
        self.seq.begin_op(t).map_err(Error::Bus)?;

        let mut col = 0;
        for addr in 0..device.size() {
            self.pump()?;
            if !self.session.command_active() {
                self.seq.end_op(t).map_err(Error::Bus)?;
                info!("read aborted at 0x{:04x}", addr);
                return self.send_line("Read aborted");
            }

            let data = self.seq.read_at(t, addr).map_err(Error::Bus)?;

            if col == 0 {
                self.send_bytes(&protocol::encode_addr(addr))?;
                self.send_str(": ")?;
            }
            self.send_bytes(&protocol::encode_byte(data))?;
            if col == ROW_WIDTH - 1 {
                col = 0;
                self.send_byte(b'\n')?;
            } else {
                self.send_byte(b' ')?;
                col += 1;
            }
        }

        self.seq.end_op(t).map_err(Error::Bus)
    }

    /// Scan for any cell not reading as the erased value. Stops at the first
    /// mismatch.
    fn op_blank_check(&mut self) -> Result<(), Error<E, B::Error>> {
        let device = match self.require_device()? {
            Some(d) => d,
            None => return Ok(()),
        };
        let t = device.timing();
        let erased = device.erased_value();
        self.seq.begin_op(t).map_err(Error::Bus)?;

        for addr in 0..device.size() {
            self.pump()?;
            if !self.session.command_active() {
                self.seq.end_op(t).map_err(Error::Bus)?;
                info!("blank check aborted at 0x{:04x}", addr);
                return self.send_line("Check aborted");
            }

            let data = self.seq.read_at(t, addr).map_err(Error::Bus)?;
            if data != erased {
                self.seq.end_op(t).map_err(Error::Bus)?;
                self.send_str("blank check fail: 0x")?;
                self.send_bytes(&protocol::encode_addr(addr))?;
                self.send_str(" = 0x")?;
                self.send_bytes(&protocol::encode_byte(data))?;
                return self.send_byte(b'\n');
            }
        }

        self.seq.end_op(t).map_err(Error::Bus)?;
        self.send_line("OK")
    }

    /// Program the device from the hex payload behind the envelope, reading
    /// each byte back immediately. No retry on mismatch.
    fn op_write(&mut self) -> Result<(), Error<E, B::Error>> {
        let device = match self.require_device()? {
            Some(d) => d,
            None => return Ok(()),
        };
        let t = device.timing();
        self.seq.begin_op(t).map_err(Error::Bus)?;

        for addr in 0..device.size() {
            // Payload digits, high nibble first.
            let hi = match self.pull_payload()? {
                Some(b) => b,
                None => {
                    self.seq.end_op(t).map_err(Error::Bus)?;
                    info!("write aborted at 0x{:04x}", addr);
                    return self.send_line("Write aborted");
                }
            };
            let lo = match self.pull_payload()? {
                Some(b) => b,
                None => {
                    self.seq.end_op(t).map_err(Error::Bus)?;
                    info!("write aborted at 0x{:04x}", addr);
                    return self.send_line("Write aborted");
                }
            };
            let data = match protocol::hex_pair(hi, lo) {
                Some(d) => d,
                None => {
                    self.seq.end_op(t).map_err(Error::Bus)?;
                    warn!("bad payload at 0x{:04x}", addr);
                    return self.send_line("bad payload");
                }
            };

            self.seq.latch_address(t, addr).map_err(Error::Bus)?;
            self.seq.program_cycle(t, data).map_err(Error::Bus)?;

            let back = self.seq.read_cycle(t).map_err(Error::Bus)?;
            if back != data {
                self.seq.end_op(t).map_err(Error::Bus)?;
                self.send_str("verify fail: 0x")?;
                self.send_bytes(&protocol::encode_addr(addr))?;
                self.send_str(" wrote 0x")?;
                self.send_bytes(&protocol::encode_byte(data))?;
                self.send_str(" read 0x")?;
                self.send_bytes(&protocol::encode_byte(back))?;
                return self.send_byte(b'\n');
            }
        }

        self.seq.end_op(t).map_err(Error::Bus)?;
        self.send_line("OK")
    }

    fn op_identify(&mut self) -> Result<(), Error<E, B::Error>> {
        let token = device::identify(self.session.device());
        self.send_line(token)
    }

    fn op_set_device(&mut self) -> Result<(), Error<E, B::Error>> {
        let code = match self.pull_payload()? {
            Some(c) => c,
            None => return self.send_line("set device aborted"),
        };
        if code == b'0' {
            self.session.select_device(None);
            info!("device deselected");
            return self.send_line("OK");
        }
        match DeviceKind::from_code(code) {
            Some(kind) => {
                self.session.select_device(Some(kind));
                info!("selected device {}", kind.name());
                self.send_line("OK")
            }
            None => {
                warn!("unknown device code 0x{:02x}", code);
                self.send_line("unknown device code")
            }
        }
    }

    fn op_reset(&mut self) -> Result<(), Error<E, B::Error>> {
        self.session.cancel();
        self.send_line("OK")
    }

    fn op_init_baud(&mut self) -> Result<(), Error<E, B::Error>> {
        let rate = self.port.init_baud(0).map_err(Error::Serial)?;
        info!("baud rate set to {}", rate);
        self.send_str("baudrate=")?;
        self.send_decimal(rate)?;
        self.send_byte(b'\n')
    }

    fn require_device(&mut self) -> Result<Option<DeviceKind>, Error<E, B::Error>> {
        match self.session.device() {
            Some(d) => Ok(Some(d)),
            None => {
                self.send_line("no device selected")?;
                Ok(None)
            }
        }
    }

    /// Block for the next payload byte, keeping the serial port pumped so
    /// flow control and the cancel byte still work. Returns `None` once the
    /// operation has been cancelled; otherwise this waits for the host,
    /// which owns all timeouts.
    fn pull_payload(&mut self) -> Result<Option<u8>, Error<E, B::Error>> {
        loop {
            if !self.session.command_active() {
                return Ok(None);
            }
            if let Some(byte) = self.session.pop() {
                let flow = self.session.flow();
                self.apply_flow(flow)?;
                return Ok(Some(byte));
            }
            self.pump()?;
        }
    }

    fn send_byte(&mut self, byte: u8) -> Result<(), Error<E, B::Error>> {
        block!(self.port.write(byte)).map_err(Error::Serial)
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), Error<E, B::Error>> {
        for &b in bytes {
            self.send_byte(b)?;
        }
        Ok(())
    }

    fn send_str(&mut self, s: &str) -> Result<(), Error<E, B::Error>> {
        self.send_bytes(s.as_bytes())
    }

    fn send_line(&mut self, s: &str) -> Result<(), Error<E, B::Error>> {
        self.send_str(s)?;
        self.send_byte(b'\n')
    }

    fn send_decimal(&mut self, mut v: u32) -> Result<(), Error<E, B::Error>> {
        let mut buf = [0u8; 10];
        let mut i = buf.len();
        loop {
            i -= 1;
            buf[i] = b'0' + (v % 10) as u8;
            v /= 10;
            if v == 0 {
                break;
            }
        }
        self.send_bytes(&buf[i..])
    }
}

#[cfg(any(test, feature = "sim"))]
impl Programmer<sim::SimPort, sim::SimBus, sim::SimDelay, sim::SimLed, core::convert::Infallible> {
    /// Programmer wired to the simulator, for tests and the utility binary.
    pub fn simulated(bus: sim::SimBus, options: Options) -> Self {
        Self::new(
            sim::SimPort::new(),
            BusSequencer::new(bus, sim::SimDelay::new()),
            sim::SimLed::new(),
            options,
        )
    }
}
