//! Management protocol
//!
//! Protocol 0 carries management frames. The first payload byte selects the
//! kind of message.
//!
//! The frames the relay sends on behalf of the daisy-chain are hardcoded
//! here, so the forwarder doesn't have to run them through the encoder. If
//! the management protocol changes, these tables need to change with it.

/// The protocol number of management frames
pub const MANAGEMENT_PROTOCOL: u8 = 0;

/// Management sub-messages, selected by the first payload byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum Management {
    /// Sent once by every board after power-up
    Hello = 0,
    /// The monitored signal bus produced data faster than it could be sent
    BusOverflow = 1,
    /// A malformed frame was received from the daisy-chain
    Malformed = 2,
    /// A frame arrived that already travelled through seven boards
    ChainTooLong = 3,
    /// The daisy-chain receive buffer overflowed, frames were dropped
    SoftOverflow = 4,
    /// The UART receive FIFO overflowed, bytes were lost
    HardOverflow = 5,
    /// Test harness messages
    Test = 6,
    /// DCC decoder state, e.g. accessory filter on/off
    DccOob = 7,
}

/// Unknown management sub-message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub struct UnknownManagement(pub u8);

impl TryFrom<u8> for Management {
    type Error = UnknownManagement;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Management::Hello,
            1 => Management::BusOverflow,
            2 => Management::Malformed,
            3 => Management::ChainTooLong,
            4 => Management::SoftOverflow,
            5 => Management::HardOverflow,
            6 => Management::Test,
            7 => Management::DccOob,
            other => return Err(UnknownManagement(other)),
        })
    }
}

impl From<Management> for u8 {
    fn from(val: Management) -> Self {
        val as u8
    }
}

/// Complete wire frame: "Malformed packet"
pub const MALFORMED_FRAME: [u8; 4] = [0x80, 0x02, 0x00, 0x02];
/// Complete wire frame: "Chain too long"
pub const CHAIN_TOO_LONG_FRAME: [u8; 4] = [0x80, 0x03, 0x00, 0x03];
/// Complete wire frame: "Soft overflow on incoming daisy-chain"
pub const SOFT_OVERFLOW_FRAME: [u8; 4] = [0x80, 0x04, 0x00, 0x04];
/// Complete wire frame: "Hard overflow on incoming daisy-chain"
pub const HARD_OVERFLOW_FRAME: [u8; 4] = [0x80, 0x05, 0x00, 0x05];

/// One byte stand-ins for frames, stored in the receive buffer
///
/// The upper nibble is always `0xF`, which can never be a legal frame-start
/// (it would carry address 7). The lower nibble mirrors the management code
/// that is eventually sent, only for recognisability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[repr(u8)]
pub enum PseudoFrame {
    /// Framing error, oversized frame, or any other malformation
    Malformed = 0xF2,
    /// A frame-start with the reserved address was received
    ChainTooLong = 0xF3,
    /// The UART reported a receive overrun
    HardOverflow = 0xF5,
}

impl PseudoFrame {
    /// Classify a one byte unit taken from the receive buffer.
    ///
    /// Anything that isn't a known code is malformed, including a legal
    /// frame-start that was never followed by a checksum.
    pub fn classify(byte: u8) -> Self {
        match byte {
            0xF3 => PseudoFrame::ChainTooLong,
            0xF5 => PseudoFrame::HardOverflow,
            _ => PseudoFrame::Malformed,
        }
    }

    /// The management frame reporting this condition upstream
    pub fn report(self) -> &'static [u8; 4] {
        match self {
            PseudoFrame::Malformed => &MALFORMED_FRAME,
            PseudoFrame::ChainTooLong => &CHAIN_TOO_LONG_FRAME,
            PseudoFrame::HardOverflow => &HARD_OVERFLOW_FRAME,
        }
    }
}

impl From<PseudoFrame> for u8 {
    fn from(val: PseudoFrame) -> Self {
        val as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encode_frame, testutil::MockLine};

    fn encoded(code: Management) -> Vec<u8> {
        let mut line = MockLine::idle();
        encode_frame(&mut line, MANAGEMENT_PROTOCOL, &[code.into()]);
        line.take()
    }

    #[test]
    fn fixed_frames_match_encoder() {
        assert_eq!(encoded(Management::Malformed), MALFORMED_FRAME);
        assert_eq!(encoded(Management::ChainTooLong), CHAIN_TOO_LONG_FRAME);
        assert_eq!(encoded(Management::SoftOverflow), SOFT_OVERFLOW_FRAME);
        assert_eq!(encoded(Management::HardOverflow), HARD_OVERFLOW_FRAME);
    }

    #[test]
    fn pseudo_frames_are_never_legal_starts() {
        for pf in [
            PseudoFrame::Malformed,
            PseudoFrame::ChainTooLong,
            PseudoFrame::HardOverflow,
        ] {
            let code = u8::from(pf);
            assert!(crate::StartByte::try_from(code).is_err());
            assert_eq!(PseudoFrame::classify(code), pf);
        }
    }

    #[test]
    fn unknown_one_byte_units_are_malformed() {
        assert_eq!(PseudoFrame::classify(0x83), PseudoFrame::Malformed);
        assert_eq!(PseudoFrame::classify(0xFF), PseudoFrame::Malformed);
    }

    #[test]
    fn management_codes() {
        assert_eq!(Management::try_from(4), Ok(Management::SoftOverflow));
        assert_eq!(Management::try_from(8), Err(UnknownManagement(8)));
        assert_eq!(u8::from(Management::DccOob), 7);
    }
}
