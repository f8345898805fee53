//! Device variants and their bus timing descriptors.
//!
//! One variant is selected at a time; selection swaps the whole descriptor
//! (size, address width, timing table, control-line roles) in one step so
//! the engine never mixes constants from two devices.

use crate::bus::ControlLine;

/// Supported target devices.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum DeviceKind {
    /// Intel 8755A, 2K x 8 EPROM with multiplexed address/data bus.
    I8755,
    /// Intel 8748, 1K x 8 EPROM on-chip program memory.
    I8748,
}

/// Per-phase minimum hold times and control-line roles for one variant.
///
/// All delays are wall-clock values handed to the delay provider, never
/// instruction counting.
pub struct TimingProfile {
    /// Address valid before the latch pulse, us.
    pub address_setup_us: u16,
    /// Latch strobe high time, us.
    pub latch_pulse_us: u16,
    /// Address hold after the latch falls, us.
    pub latch_hold_us: u16,
    /// Data bus direction turnaround, us.
    pub bus_turnaround_us: u16,
    /// Read strobe assertion before the data sample, us.
    pub read_strobe_us: u16,
    /// Data valid before the programming enable, us.
    pub data_setup_us: u16,
    /// Programming enable before the pulse, us.
    pub program_setup_us: u16,
    /// Program pulse width, ms.
    pub program_pulse_ms: u16,
    /// Recovery after the pulse falls, us.
    pub program_recovery_us: u16,
    /// Line held asserted while the device is being read.
    pub read_enable: ControlLine,
    /// Line asserted around the program pulse.
    pub program_enable: ControlLine,
}

const I8755_TIMING: TimingProfile = TimingProfile {
    address_setup_us: 1,
    latch_pulse_us: 1,
    latch_hold_us: 1,
    bus_turnaround_us: 5,
    read_strobe_us: 2,
    data_setup_us: 10,
    program_setup_us: 1,
    program_pulse_ms: 50,
    program_recovery_us: 1,
    read_enable: ControlLine::ChipEnable,
    program_enable: ControlLine::ProgramEnable,
};

const I8748_TIMING: TimingProfile = TimingProfile {
    address_setup_us: 4,
    latch_pulse_us: 2,
    latch_hold_us: 2,
    bus_turnaround_us: 10,
    read_strobe_us: 5,
    data_setup_us: 25,
    program_setup_us: 4,
    program_pulse_ms: 50,
    program_recovery_us: 10,
    read_enable: ControlLine::ChipEnable,
    program_enable: ControlLine::ProgramEnable,
};

impl DeviceKind {
    /// Map a one byte selection code from the wire. `None` for codes outside
    /// the closed set; deselection (`0`) is handled a level up.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            b'A' | b'a' => Some(DeviceKind::I8755),
            b'B' | b'b' => Some(DeviceKind::I8748),
            _ => None,
        }
    }

    /// Total addressable size in bytes.
    pub fn size(self) -> u16 {
        match self {
            DeviceKind::I8755 => 2048,
            DeviceKind::I8748 => 1024,
        }
    }

    /// Address bus width in bits.
    pub fn address_bits(self) -> u8 {
        match self {
            DeviceKind::I8755 => 11,
            DeviceKind::I8748 => 10,
        }
    }

    /// Value every cell reads as after erasure.
    pub fn erased_value(self) -> u8 {
        match self {
            DeviceKind::I8755 => 0xFF,
            DeviceKind::I8748 => 0xFF,
        }
    }

    pub fn timing(self) -> &'static TimingProfile {
        match self {
            DeviceKind::I8755 => &I8755_TIMING,
            DeviceKind::I8748 => &I8748_TIMING,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceKind::I8755 => "8755",
            DeviceKind::I8748 => "8748",
        }
    }
}

/// Identify token for the current selection. Total over both the selected
/// and unselected states.
pub fn identify(selected: Option<DeviceKind>) -> &'static str {
    match selected {
        Some(kind) => kind.name(),
        None => "none",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_codes() {
        assert_eq!(DeviceKind::from_code(b'A'), Some(DeviceKind::I8755));
        assert_eq!(DeviceKind::from_code(b'b'), Some(DeviceKind::I8748));
        assert_eq!(DeviceKind::from_code(b'C'), None);
        assert_eq!(DeviceKind::from_code(b'0'), None);
    }

    #[test]
    fn descriptor_constants() {
        assert_eq!(DeviceKind::I8755.size(), 2048);
        assert_eq!(DeviceKind::I8755.address_bits(), 11);
        assert_eq!(DeviceKind::I8748.size(), 1024);
        assert_eq!(DeviceKind::I8748.address_bits(), 10);
        assert_eq!(DeviceKind::I8755.timing().program_pulse_ms, 50);
    }

    #[test]
    fn identify_is_total() {
        assert_eq!(identify(Some(DeviceKind::I8755)), "8755");
        assert_eq!(identify(Some(DeviceKind::I8748)), "8748");
        assert_eq!(identify(None), "none");
    }
}
