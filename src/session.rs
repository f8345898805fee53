//! The shared state between the receive interrupt and the main loop.
//!
//! Everything the two contexts touch lives in one owned aggregate: the
//! receive queue, the operation-active flag and the selected device. On a
//! real target the embedder wraps the session in its platform mutex (for
//! example `avr_device::interrupt::Mutex<RefCell<Session>>`) and calls
//! [`Session::isr_receive`] from the UART receive vector; the `&mut`
//! receivers are the critical section at the library level. The dispatcher
//! side must keep its borrows short since they hold off byte intake.

use crate::device::DeviceKind;
use crate::protocol::{CANCEL, MARKER};
use crate::queue::{Flow, Overflow, RxQueue};

pub struct Session {
    queue: RxQueue,
    cmd_active: bool,
    device: Option<DeviceKind>,
}

impl Session {
    /// Fresh session with the boot-default device selected.
    pub fn new() -> Self {
        Self {
            queue: RxQueue::new(),
            cmd_active: false,
            device: Some(DeviceKind::I8755),
        }
    }

    /// Receive path, interrupt context.
    ///
    /// The cancel byte clears the active flag without entering the queue, so
    /// a host abort gets through even while an operation is draining payload.
    /// Every other byte is queued, then the envelope recognizer runs: a `$`
    /// at the queue head with at least one byte behind it arms the flag. The
    /// opcode is not validated here; that is the dispatcher's job.
    ///
    /// Returns the flow state for the caller to mirror onto the CTS output.
    pub fn isr_receive(&mut self, byte: u8) -> Result<Flow, Overflow> {
        if byte == CANCEL {
            self.cmd_active = false;
            return Ok(self.queue.flow());
        }
        self.queue.push(byte)?;
        if self.queue.peek_first() == Some(MARKER) && self.queue.len() > 1 {
            self.cmd_active = true;
        }
        Ok(self.queue.flow())
    }

    /// True while an envelope is pending or an operation is running.
    pub fn command_active(&self) -> bool {
        self.cmd_active
    }

    /// Request cooperative termination of the running operation.
    pub fn cancel(&mut self) {
        self.cmd_active = false;
    }

    /// Consume the pending envelope, returning the raw opcode byte.
    ///
    /// The recognizer guarantees both bytes are present whenever the flag is
    /// set, so the two pops cannot come up empty here.
    pub fn take_envelope(&mut self) -> Option<u8> {
        if !self.cmd_active {
            return None;
        }
        let _marker = self.queue.pop()?;
        self.queue.pop()
    }

    /// Pull one payload byte, `None` when the host has not sent it yet.
    pub fn pop(&mut self) -> Option<u8> {
        self.queue.pop()
    }

    /// Drop leading bytes that can never start an envelope (line noise, or
    /// payload left over from an aborted write). Without this the queue
    /// could sit full of unconsumable bytes with flow control holding the
    /// host off forever. Re-arms the flag if a complete envelope surfaces
    /// at the head.
    pub fn discard_stray(&mut self) -> usize {
        let mut dropped = 0;
        while let Some(b) = self.queue.peek_first() {
            if b == MARKER {
                break;
            }
            self.queue.pop();
            dropped += 1;
        }
        if self.queue.peek_first() == Some(MARKER) && self.queue.len() > 1 {
            self.cmd_active = true;
        }
        dropped
    }

    /// End-of-command cleanup: flush the queue, force the flag down.
    pub fn finish(&mut self) {
        self.queue.clear();
        self.cmd_active = false;
    }

    pub fn flow(&self) -> Flow {
        self.queue.flow()
    }

    pub fn device(&self) -> Option<DeviceKind> {
        self.device
    }

    /// Replace the active descriptor. `None` deselects.
    pub fn select_device(&mut self, device: Option<DeviceKind>) {
        self.device = device;
    }

    pub fn bytes_pushed(&self) -> u32 {
        self.queue.bytes_pushed()
    }

    pub fn bytes_popped(&self) -> u32 {
        self.queue.bytes_popped()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_false_at_startup() {
        let s = Session::new();
        assert!(!s.command_active());
        assert_eq!(s.device(), Some(DeviceKind::I8755));
    }

    #[test]
    fn envelope_needs_marker_plus_one() {
        let mut s = Session::new();
        s.isr_receive(b'$').unwrap();
        assert!(!s.command_active());
        s.isr_receive(b'1').unwrap();
        assert!(s.command_active());
        assert_eq!(s.take_envelope(), Some(b'1'));
    }

    #[test]
    fn non_marker_head_never_arms() {
        let mut s = Session::new();
        s.isr_receive(b'x').unwrap();
        s.isr_receive(b'$').unwrap();
        s.isr_receive(b'1').unwrap();
        assert!(!s.command_active());
    }

    #[test]
    fn finish_clears_flag_and_queue() {
        let mut s = Session::new();
        s.isr_receive(b'$').unwrap();
        s.isr_receive(b'2').unwrap();
        s.isr_receive(b'A').unwrap();
        assert!(s.command_active());
        s.finish();
        assert!(!s.command_active());
        assert_eq!(s.pop(), None);
    }

    #[test]
    fn cancel_byte_bypasses_queue() {
        let mut s = Session::new();
        s.isr_receive(b'$').unwrap();
        s.isr_receive(b'1').unwrap();
        assert!(s.command_active());
        s.isr_receive(CANCEL).unwrap();
        assert!(!s.command_active());
        // Envelope bytes are still queued, the cancel byte is not.
        assert_eq!(s.pop(), Some(b'$'));
        assert_eq!(s.pop(), Some(b'1'));
        assert_eq!(s.pop(), None);
    }

    #[test]
    fn stray_bytes_are_discarded_up_to_a_marker() {
        let mut s = Session::new();
        for &b in b"3C3C$1" {
            s.isr_receive(b).unwrap();
        }
        assert!(!s.command_active());
        assert_eq!(s.discard_stray(), 4);
        // The envelope behind the noise is recognized.
        assert!(s.command_active());
        assert_eq!(s.take_envelope(), Some(b'1'));
    }

    #[test]
    fn payload_flows_behind_the_envelope() {
        let mut s = Session::new();
        for &b in b"$23C" {
            s.isr_receive(b).unwrap();
        }
        assert_eq!(s.take_envelope(), Some(b'2'));
        assert_eq!(s.pop(), Some(b'3'));
        assert_eq!(s.pop(), Some(b'C'));
        assert_eq!(s.pop(), None);
    }
}
