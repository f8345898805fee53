//! Receive queue with watermark flow control.
//!
//! Bytes arrive from the serial interrupt and are drained by the main loop.
//! The ring keeps the classic head/tail layout: `head` is the oldest unread
//! byte, `tail` the most recently written one, so the queue is empty exactly
//! when `tail + 1 == head` (mod capacity) and a push is refused when
//! advancing `tail` twice would land on `head`.

use thiserror::Error;

/// Ring capacity in bytes. Usable occupancy is one less.
pub const CAPACITY: usize = 1024;

/// Above this occupancy the firmware asks the host to stop sending.
pub const HIGH_WATER: usize = CAPACITY - 32;

/// At or below this occupancy the host may resume.
pub const LOW_WATER: usize = 32;

/// Push refused, ring left untouched.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Error)]
#[error("receive queue overflow")]
pub struct Overflow;

/// Requested state of the host-facing flow control line.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Flow {
    /// Host may transmit.
    Go,
    /// Host should pause transmission.
    Stop,
}

pub struct RxQueue {
    data: [u8; CAPACITY],
    head: usize,
    tail: usize,
    flow: Flow,
    bytes_pushed: u32,
    bytes_popped: u32,
}

fn step(i: usize) -> usize {
    if i == CAPACITY - 1 {
        0
    } else {
        i + 1
    }
}

impl RxQueue {
    pub fn new() -> Self {
        Self {
            data: [0; CAPACITY],
            head: 0,
            tail: CAPACITY - 1,
            flow: Flow::Go,
            bytes_pushed: 0,
            bytes_popped: 0,
        }
    }

    /// Append one byte, interrupt context.
    ///
    /// Flow control is recomputed inline here rather than through `len()` so
    /// the interrupt path does a single occupancy calculation.
    pub fn push(&mut self, byte: u8) -> Result<(), Overflow> {
        if step(step(self.tail)) == self.head {
            return Err(Overflow);
        }
        self.tail = step(self.tail);
        self.data[self.tail] = byte;
        self.bytes_pushed = self.bytes_pushed.wrapping_add(1);
        self.update_flow();
        Ok(())
    }

    /// Remove and return the oldest byte, `None` when empty.
    pub fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.data[self.head];
        self.head = step(self.head);
        self.bytes_popped = self.bytes_popped.wrapping_add(1);
        self.update_flow();
        Some(byte)
    }

    /// Oldest byte without removing it.
    pub fn peek_first(&self) -> Option<u8> {
        if self.is_empty() {
            None
        } else {
            Some(self.data[self.head])
        }
    }

    pub fn len(&self) -> usize {
        (step(self.tail) + CAPACITY - self.head) % CAPACITY
    }

    pub fn is_empty(&self) -> bool {
        step(self.tail) == self.head
    }

    /// Reset indices and zero the contents. Run once per completed command.
    pub fn clear(&mut self) {
        self.data = [0; CAPACITY];
        self.head = 0;
        self.tail = CAPACITY - 1;
        self.update_flow();
    }

    pub fn flow(&self) -> Flow {
        self.flow
    }

    pub fn bytes_pushed(&self) -> u32 {
        self.bytes_pushed
    }

    pub fn bytes_popped(&self) -> u32 {
        self.bytes_popped
    }

    // Hysteresis: occupancies strictly between the watermarks leave the
    // signal as it was.
    fn update_flow(&mut self) {
        let occupancy = self.len();
        if occupancy > HIGH_WATER {
            self.flow = Flow::Stop;
        } else if occupancy < LOW_WATER {
            self.flow = Flow::Go;
        }
    }
}

impl Default for RxQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = RxQueue::new();
        for b in 0..=255u8 {
            q.push(b).unwrap();
        }
        for b in 0..=255u8 {
            assert_eq!(q.pop(), Some(b));
        }
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn occupancy_tracks_pushes_and_pops() {
        let mut q = RxQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.len(), 0);

        for i in 0..100 {
            q.push(i as u8).unwrap();
            assert_eq!(q.len(), i + 1);
        }
        for i in 0..40 {
            q.pop().unwrap();
            assert_eq!(q.len(), 100 - i - 1);
        }
        assert_eq!(q.bytes_pushed(), 100);
        assert_eq!(q.bytes_popped(), 40);
        assert!(!q.is_empty());
    }

    #[test]
    fn full_queue_rejects_push_and_keeps_contents() {
        let mut q = RxQueue::new();
        for _ in 0..CAPACITY - 1 {
            q.push(0xAA).unwrap();
        }
        assert_eq!(q.push(0x55), Err(Overflow));
        assert_eq!(q.len(), CAPACITY - 1);
        for _ in 0..CAPACITY - 1 {
            assert_eq!(q.pop(), Some(0xAA));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn wraparound_preserves_order() {
        let mut q = RxQueue::new();
        // Drive head/tail most of the way around the ring first.
        for _ in 0..3 {
            for b in 0..200u8 {
                q.push(b).unwrap();
            }
            for b in 0..200u8 {
                assert_eq!(q.pop(), Some(b));
            }
        }
        for b in 0..=255u8 {
            q.push(b).unwrap();
        }
        for b in 0..=255u8 {
            assert_eq!(q.pop(), Some(b));
        }
    }

    #[test]
    fn flow_control_hysteresis() {
        let mut q = RxQueue::new();
        assert_eq!(q.flow(), Flow::Go);

        for _ in 0..HIGH_WATER {
            q.push(0).unwrap();
        }
        // At the watermark exactly, still inside the band.
        assert_eq!(q.flow(), Flow::Go);
        q.push(0).unwrap();
        assert_eq!(q.flow(), Flow::Stop);

        // Dip back below the high watermark: stays stopped.
        while q.len() > LOW_WATER {
            q.pop().unwrap();
            assert_eq!(q.flow(), Flow::Stop);
        }
        // One below the low watermark releases the line.
        q.pop().unwrap();
        assert_eq!(q.flow(), Flow::Go);
    }

    #[test]
    fn clear_resets_everything_but_counters() {
        let mut q = RxQueue::new();
        for _ in 0..HIGH_WATER + 5 {
            q.push(0xFF).unwrap();
        }
        assert_eq!(q.flow(), Flow::Stop);
        q.clear();
        assert!(q.is_empty());
        assert_eq!(q.pop(), None);
        assert_eq!(q.flow(), Flow::Go);
        assert_eq!(q.bytes_pushed(), (HIGH_WATER + 5) as u32);
    }
}
