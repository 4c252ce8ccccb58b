//! # Railmon Comms
//!
//! This is the link layer of the railmon bus monitors. Every monitor board
//! sits in a daisy chain: it has an upstream neighbor (another board, or the
//! host PC at the very end) and optionally a downstream neighbor. Each board
//! both originates its own frames (observations from its signal decoders) and
//! relays every frame it hears from downstream, one hop further up.
//!
//! The line between two boards is a plain 8N1 UART at a fixed bit rate.
//!
//! ## Message Framing
//!
//! Frames are delimited in-band, by the top bit of each byte on the wire:
//!
//! * A byte with the top bit set is a **frame-start byte**. The remaining seven
//!   bits are `0bAAA_PPPP`: a three bit address and a four bit protocol.
//! * A byte with the top bit clear is a **body byte**, carrying seven bits of
//!   payload, side-channel or checksum data.
//!
//! Payload bytes are full 8-bit values, so their top bit is stripped before
//! they are put on the wire. The stripped bits are collected and, after every
//! run of seven payload bytes (or at the end of the frame), sent as one extra
//! **side-channel** body byte. Bit `i` of the side-channel byte holds the top
//! bit of the `i`th payload byte of that run.
//!
//! The last body byte of a frame is the **checksum**: the XOR of the
//! frame-start byte, every unclipped payload byte, and every side-channel
//! byte, with its top bit cleared.
//!
//! ```text
//! start   body x7   side   body x5   side   checksum
//! 1AAAPPPP 0DDDDDDD 0SSSSSSS 0DDDDDDD 00SSSSS  0CCCCCCC
//! ```
//!
//! A frame carries at most [`MAX_PAYLOAD`] payload bytes. A lone `0x80`
//! (address 0, protocol 0, nothing following) is an **Idle Frame**, sent
//! after the line has been quiet for a while.
//!
//! ## Addressing
//!
//! There are no destination addresses: everything flows towards the host. The
//! address field instead counts hops from the originating board. A board
//! always sends its own frames with address 0, and every relay adds one. An
//! incoming frame that already carries address 7 can't be relayed any further,
//! and is replaced by a "Chain too long" report.
//!
//! ## Relaying
//!
//! Reception runs in the UART receive interrupt (see [`receiver::Receiver`]).
//! It assembles frames into a single-producer, single-consumer ring buffer
//! (see [`ring::RingBuffer`]), and only publishes a frame once the start of
//! the next one has been seen. The polled main loop drains complete frames
//! with [`forwarder::Forwarder`], which bumps the address, patches the
//! checksum, and re-sends the frame upstream.
//!
//! Transport errors never leave the interrupt as errors. They are stored
//! in-band, as one byte pseudo-frames in the `0xF0..=0xFF` range (which can't
//! be legal frame-starts), and turned into fixed management frames by the
//! forwarder. See [`management`].

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

#[macro_use]
mod macros;

pub mod encoder;
pub mod forwarder;
pub mod frame;
pub mod idle;
pub mod management;
pub mod receiver;
pub mod ring;
pub mod source;

pub use crate::encoder::{encode_frame, send_hello, FrameWriter};
pub use crate::forwarder::Forwarder;
pub use crate::frame::{decode, Decoded, DecodeError, Deframer, Frame, FrameError};
pub use crate::idle::{DefaultLinkCfg, IdleTracker, LinkCfg, SyncPacer};
pub use crate::receiver::{LineStatus, Receiver};
pub use crate::ring::RingBuffer;
pub use crate::source::{send_from_source, PayloadSource};

/// The maximum number of payload bytes in one frame
pub const MAX_PAYLOAD: usize = 12;

/// The longest possible frame on the wire: start byte, payload, two
/// side-channel bytes and the checksum
pub const MAX_WIRE_LEN: usize = 1 + MAX_PAYLOAD + 2 + 1;

/// The highest address a relayable frame may carry
pub const MAX_ADDRESS: u8 = 6;

/// The address value that marks a frame as having travelled too far
pub const RESERVED_ADDRESS: u8 = 7;

/// The one byte keep-alive frame
pub const IDLE_FRAME: u8 = 0x80;

/// The default size of the daisy-chain receive buffer.
///
/// The lower bound is one maximally sized frame plus the start byte of the
/// next one. In practice it should be larger, as a received frame is not
/// necessarily relayed right away.
pub const RX_BUFFER_SIZE: usize = 32;

const START_FLAG: u8 = 0b1000_0000;

/// Is this a frame-start byte (or a pseudo-frame code)?
#[inline]
pub(crate) const fn is_start(byte: u8) -> bool {
    byte & START_FLAG != 0
}

/// Is this a frame-start byte carrying the reserved address?
#[inline]
pub(crate) const fn is_reserved(byte: u8) -> bool {
    byte >= 0xF0
}

/// The outgoing half of the serial line
///
/// This is implemented by the board support code on top of the UART transmit
/// queue, which is drained to the hardware by the "data register empty"
/// interrupt.
pub trait TxLine {
    /// Queue one byte for sending.
    ///
    /// If the transmit queue is full, this MUST spin until the interrupt has
    /// drained a byte. At a fixed bit rate this takes at most one byte period
    /// (about 174us at 57600 baud), as long as transmission is not suspended.
    fn put(&mut self, byte: u8);

    /// Queue a run of bytes for sending
    fn put_all(&mut self, bytes: &[u8]) {
        bytes.iter().for_each(|b| self.put(*b));
    }

    /// Has everything queued so far been shifted out completely?
    fn is_idle(&self) -> bool;

    /// Stop feeding queued bytes to the hardware.
    ///
    /// Returns whether feeding was active before the call, so that
    /// [`TxLine::resume`] is only called when there was something to resume.
    fn suspend(&mut self) -> bool;

    /// Resume feeding queued bytes to the hardware
    fn resume(&mut self);
}

/// A free-running hardware counter
///
/// The counter wraps silently. All users only ever look at differences,
/// computed with wrapping arithmetic.
pub trait Clock {
    /// The current counter value
    fn now(&self) -> u16;
}

/// Frame-start byte
///
/// A [StartByte] consists of:
///
/// * The start flag (always set)
/// * 3 address bits (`0..=6`, 7 is reserved)
/// * 4 protocol bits (`0..=15`)
///
/// e.g. `0b1_AAA_PPPP`, where A are address bits and P are protocol bits.
///
/// Protocol 0 is the management protocol, see [`management`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub struct StartByte {
    address: u8,
    protocol: u8,
}

/// Frame-start byte error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[non_exhaustive]
pub enum StartByteError {
    /// The top bit was clear, this is a body byte
    Body,
    /// The address field holds the reserved value 7
    Reserved,
}

impl StartByte {
    const ADDRESS_SHIFT: u8 = 4;
    const PROTOCOL_MASK: u8 = 0b0000_1111;

    /// Create a start byte, if `address` and `protocol` are in range
    pub const fn new(address: u8, protocol: u8) -> Option<Self> {
        if address > MAX_ADDRESS || protocol > Self::PROTOCOL_MASK {
            return None;
        }
        Some(Self { address, protocol })
    }

    /// The start byte of a frame originating at this board
    pub const fn local(protocol: u8) -> Self {
        Self {
            address: 0,
            protocol: protocol & Self::PROTOCOL_MASK,
        }
    }

    /// The hop count
    #[inline]
    pub fn address(&self) -> u8 {
        self.address
    }

    /// The protocol number
    #[inline]
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    /// The raw start byte this frame gets when relayed one hop further.
    ///
    /// A frame from address 6 leaves with the reserved address 7, and is
    /// turned into a "Chain too long" report by the next board.
    pub fn relayed(self) -> u8 {
        u8::from(self) + (1 << Self::ADDRESS_SHIFT)
    }
}

impl TryFrom<u8> for StartByte {
    type Error = StartByteError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if !is_start(value) {
            return Err(StartByteError::Body);
        }
        if is_reserved(value) {
            return Err(StartByteError::Reserved);
        }
        Ok(StartByte {
            address: (value & !START_FLAG) >> Self::ADDRESS_SHIFT,
            protocol: value & Self::PROTOCOL_MASK,
        })
    }
}

impl From<StartByte> for u8 {
    fn from(val: StartByte) -> Self {
        START_FLAG | (val.address << StartByte::ADDRESS_SHIFT) | val.protocol
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use core::cell::Cell;

    use crate::{Clock, TxLine};

    /// An outgoing line that records everything
    #[derive(Default)]
    pub struct MockLine {
        pub sent: Vec<u8>,
        pub idle: bool,
        pub suspended: bool,
        pub suspend_calls: usize,
    }

    impl MockLine {
        pub fn idle() -> Self {
            Self {
                idle: true,
                ..Default::default()
            }
        }

        pub fn take(&mut self) -> Vec<u8> {
            core::mem::take(&mut self.sent)
        }
    }

    impl TxLine for MockLine {
        fn put(&mut self, byte: u8) {
            assert!(!self.suspended, "put while suspended");
            self.sent.push(byte);
        }

        fn is_idle(&self) -> bool {
            self.idle
        }

        fn suspend(&mut self) -> bool {
            self.suspend_calls += 1;
            let was = !self.suspended;
            self.suspended = true;
            was
        }

        fn resume(&mut self) {
            self.suspended = false;
        }
    }

    /// A counter that advances by one on every read
    pub struct StepClock(pub Cell<u16>);

    impl Clock for StepClock {
        fn now(&self) -> u16 {
            let now = self.0.get();
            self.0.set(now.wrapping_add(1));
            now
        }
    }
}
