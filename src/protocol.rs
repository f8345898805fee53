//! Wire protocol constants and the hex codec.
//!
//! Commands arrive as a two byte envelope, a `$` marker followed by one
//! opcode character. The write payload is a stream of ASCII hex digit pairs,
//! high nibble first, with no delimiters. Responses are ASCII lines.

/// Envelope marker.
pub const MARKER: u8 = b'$';

/// Out of band cancel (ETX / ctrl-C). Clears the active operation without
/// entering the queue.
pub const CANCEL: u8 = 0x03;

/// Bytes per row of read output.
pub const ROW_WIDTH: u16 = 16;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Opcode {
    /// Dump the full device address space as hex rows.
    Read,
    /// Program the device from a hex payload, verifying each byte.
    Write,
    /// Verify every address reads as the erased value.
    BlankCheck,
    /// Report the selected device variant.
    Identify,
    /// Select a device variant from a one byte code.
    SetDevice,
    /// Cancel any pending operation and flush the queue.
    Reset,
    /// Re-initialise the serial baud rate (auto-detect).
    InitBaud,
}

impl Opcode {
    pub fn from_u8(c: u8) -> Option<Self> {
        match c {
            b'1' => Some(Opcode::Read),
            b'2' => Some(Opcode::Write),
            b'3' => Some(Opcode::BlankCheck),
            b'4' => Some(Opcode::Identify),
            b'5' => Some(Opcode::SetDevice),
            b'9' => Some(Opcode::Reset),
            b'U' => Some(Opcode::InitBaud),
            _ => None,
        }
    }
}

/// Decode one ASCII hex digit, either case.
pub fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// Combine two payload digits, high nibble first.
pub fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    Some(hex_digit(hi)? << 4 | hex_digit(lo)?)
}

const DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// `0xAB` -> `b"AB"`.
pub fn encode_byte(b: u8) -> [u8; 2] {
    [DIGITS[(b >> 4) as usize], DIGITS[(b & 0x0F) as usize]]
}

/// `0xABCD` -> `b"ABCD"`.
pub fn encode_addr(a: u16) -> [u8; 4] {
    [
        DIGITS[(a >> 12 & 0xF) as usize],
        DIGITS[(a >> 8 & 0xF) as usize],
        DIGITS[(a >> 4 & 0xF) as usize],
        DIGITS[(a & 0xF) as usize],
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_mapping_is_closed() {
        assert_eq!(Opcode::from_u8(b'1'), Some(Opcode::Read));
        assert_eq!(Opcode::from_u8(b'2'), Some(Opcode::Write));
        assert_eq!(Opcode::from_u8(b'3'), Some(Opcode::BlankCheck));
        assert_eq!(Opcode::from_u8(b'4'), Some(Opcode::Identify));
        assert_eq!(Opcode::from_u8(b'5'), Some(Opcode::SetDevice));
        assert_eq!(Opcode::from_u8(b'9'), Some(Opcode::Reset));
        assert_eq!(Opcode::from_u8(b'U'), Some(Opcode::InitBaud));
        assert_eq!(Opcode::from_u8(b'0'), None);
        assert_eq!(Opcode::from_u8(b'$'), None);
    }

    #[test]
    fn hex_digits_both_cases() {
        assert_eq!(hex_digit(b'0'), Some(0));
        assert_eq!(hex_digit(b'9'), Some(9));
        assert_eq!(hex_digit(b'a'), Some(10));
        assert_eq!(hex_digit(b'F'), Some(15));
        assert_eq!(hex_digit(b'g'), None);
        assert_eq!(hex_digit(b' '), None);
    }

    #[test]
    fn pair_is_high_nibble_first() {
        assert_eq!(hex_pair(b'3', b'C'), Some(0x3C));
        assert_eq!(hex_pair(b'f', b'0'), Some(0xF0));
        assert_eq!(hex_pair(b'x', b'0'), None);
    }

    #[test]
    fn encoding_round_trips() {
        assert_eq!(&encode_byte(0x3C), b"3C");
        assert_eq!(&encode_byte(0x00), b"00");
        assert_eq!(&encode_addr(0x0010), b"0010");
        assert_eq!(&encode_addr(0xBEEF), b"BEEF");
        let [hi, lo] = encode_byte(0xA7);
        assert_eq!(hex_pair(hi, lo), Some(0xA7));
    }
}
