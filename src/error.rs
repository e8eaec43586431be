//! Bus error classification
//!
//! Every error interrupt is folded into the node's [`ErrorRecord`]: one counter
//! per category, the accumulated [`ErrorCode`] and the last two timestamps.

use num_derive::FromPrimitive;

use crate::hal::BusErrorFlags;

bitflags::bitflags! {
    /// Categories observed on a node, accumulated until the record is reset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ErrorCode: u32 {
        const WARNING = 1 << 0;
        const PASSIVE = 1 << 1;
        const BUS_OFF = 1 << 2;
        const STUFF = 1 << 3;
        const FORM = 1 << 4;
        const ACKNOWLEDGMENT = 1 << 5;
        const BIT_RECESSIVE = 1 << 6;
        const BIT_DOMINANT = 1 << 7;
        const CRC = 1 << 8;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ErrorCode {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ErrorCode({=u32:#b})", self.bits())
    }
}

/// Index of a category in [`ErrorRecord::counters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCategory {
    Warning = 0,
    Passive = 1,
    BusOff = 2,
    Stuff = 3,
    Form = 4,
    Acknowledgment = 5,
    BitRecessive = 6,
    BitDominant = 7,
    Crc = 8,
}

impl ErrorCategory {
    pub const COUNT: usize = 9;

    pub const fn code(self) -> ErrorCode {
        ErrorCode::from_bits_retain(1 << self as u32)
    }
}

/// Last error code field of the error status register.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LastErrorCode {
    #[default]
    None = 0,
    Stuff = 1,
    Form = 2,
    Acknowledgment = 3,
    BitRecessive = 4,
    BitDominant = 5,
    Crc = 6,
    /// Set by software, never by the controller.
    Software = 7,
}

impl LastErrorCode {
    /// Decodes the 3 bit LEC field.
    pub fn from_register(lec: u8) -> Self {
        use num_traits::FromPrimitive as _;

        LastErrorCode::from_u8(lec & 0x07).unwrap_or_default()
    }

    pub const fn category(self) -> Option<ErrorCategory> {
        match self {
            LastErrorCode::Stuff => Some(ErrorCategory::Stuff),
            LastErrorCode::Form => Some(ErrorCategory::Form),
            LastErrorCode::Acknowledgment => Some(ErrorCategory::Acknowledgment),
            LastErrorCode::BitRecessive => Some(ErrorCategory::BitRecessive),
            LastErrorCode::BitDominant => Some(ErrorCategory::BitDominant),
            LastErrorCode::Crc => Some(ErrorCategory::Crc),
            LastErrorCode::None | LastErrorCode::Software => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorRecord {
    pub error_code: ErrorCode,
    pub counters: [u32; ErrorCategory::COUNT],
    pub timestamp: u32,
    pub previous_timestamp: u32,
}

impl ErrorRecord {
    pub fn count(&self, category: ErrorCategory) -> u32 {
        self.counters[category as usize]
    }

    /// Counts every condition present in `flags` and returns their codes.
    ///
    /// The returned code only covers this call; [`ErrorRecord::error_code`]
    /// keeps accumulating.
    pub fn classify(&mut self, flags: &BusErrorFlags) -> ErrorCode {
        let mut observed = ErrorCode::empty();
        let conditions = [
            (flags.warning, Some(ErrorCategory::Warning)),
            (flags.passive, Some(ErrorCategory::Passive)),
            (flags.bus_off, Some(ErrorCategory::BusOff)),
            (true, flags.last_error.category()),
        ];
        for (set, category) in conditions {
            if let (true, Some(category)) = (set, category) {
                self.counters[category as usize] = self.counters[category as usize].wrapping_add(1);
                observed |= category.code();
            }
        }
        self.error_code |= observed;
        observed
    }

    /// Shifts the current timestamp into the previous one.
    pub fn stamp(&mut self, now: u32) {
        self.previous_timestamp = self.timestamp;
        self.timestamp = now;
    }
}
