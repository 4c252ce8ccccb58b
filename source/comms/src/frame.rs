//! Frames, and decoding them from the wire
//!
//! Boards never decode relayed frames, they only patch the start byte and
//! checksum on the way through. Decoding is what the host end of the chain
//! does, so it lives here rather than in the forwarder.

use heapless::Vec;

use crate::{
    encoder::FrameWriter, is_start, StartByte, StartByteError, TxLine, IDLE_FRAME, MAX_PAYLOAD,
    MAX_WIRE_LEN,
};

/// One protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Frame {
    address: u8,
    protocol: u8,
    payload: Vec<u8, MAX_PAYLOAD>,
}

/// Errors when building a [Frame]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[non_exhaustive]
pub enum FrameError {
    /// The address was larger than [`MAX_ADDRESS`](crate::MAX_ADDRESS)
    AddressOutOfRange,
    /// The protocol was larger than 15
    ProtocolOutOfRange,
    /// The payload was longer than [`MAX_PAYLOAD`]
    PayloadTooLong,
}

impl Frame {
    /// Create a frame with an explicit hop count
    pub fn new(address: u8, protocol: u8, payload: &[u8]) -> Result<Self, FrameError> {
        if address > crate::MAX_ADDRESS {
            return Err(FrameError::AddressOutOfRange);
        }
        if protocol > 0x0F {
            return Err(FrameError::ProtocolOutOfRange);
        }
        let payload = Vec::from_slice(payload).map_err(|_| FrameError::PayloadTooLong)?;
        Ok(Self {
            address,
            protocol,
            payload,
        })
    }

    /// Create a frame originating at this board
    pub fn local(protocol: u8, payload: &[u8]) -> Result<Self, FrameError> {
        Self::new(0, protocol, payload)
    }

    /// The hop count from the originating board
    #[inline]
    pub fn address(&self) -> u8 {
        self.address
    }

    /// The protocol number
    #[inline]
    pub fn protocol(&self) -> u8 {
        self.protocol
    }

    /// Borrow the payload
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The frame-start byte of this frame
    pub fn start_byte(&self) -> StartByte {
        // Range checked on construction
        StartByte::new(self.address, self.protocol).unwrap_or(StartByte::local(self.protocol))
    }

    /// Encode this frame onto the line, keeping its address
    pub fn write_to<L: TxLine>(&self, line: &mut L) {
        let mut writer = FrameWriter::start_with(line, self.start_byte());
        writer.send_all(&self.payload);
        writer.end();
    }
}

/// A successfully decoded unit from the wire
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub enum Decoded {
    /// The lone keep-alive byte
    Idle,
    /// A complete, checksum-verified frame
    Frame(Frame),
}

/// Errors when decoding a frame from the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
#[non_exhaustive]
pub enum DecodeError {
    /// Nothing to decode
    Empty,
    /// The first byte was a body byte
    NotAStart,
    /// The start byte carried the reserved address
    ReservedAddress,
    /// A start byte other than the Idle Frame, with no checksum
    Truncated,
    /// A frame-start byte in the middle of the frame
    UnexpectedStart,
    /// A side-channel byte was missing, or had bits set past its run
    BadSideChannel,
    /// More than [`MAX_PAYLOAD`] payload bytes
    TooLong,
    /// The checksum didn't match
    Checksum {
        /// The checksum computed over the received bytes
        expected: u8,
        /// The checksum byte that was received
        found: u8,
    },
    /// Body bytes arrived with no frame to belong to, or overflowed the
    /// deframer
    Garbled,
}

/// Decode one complete frame, from its start byte up to and including the
/// checksum.
pub fn decode(wire: &[u8]) -> Result<Decoded, DecodeError> {
    let (&first, body) = wire.split_first().ok_or(DecodeError::Empty)?;
    let start = StartByte::try_from(first).map_err(|e| match e {
        StartByteError::Body => DecodeError::NotAStart,
        StartByteError::Reserved => DecodeError::ReservedAddress,
    })?;

    let Some((&checksum, data)) = body.split_last() else {
        return if first == IDLE_FRAME {
            Ok(Decoded::Idle)
        } else {
            Err(DecodeError::Truncated)
        };
    };
    if body.iter().any(|b| is_start(*b)) {
        return Err(DecodeError::UnexpectedStart);
    }

    let mut sum = first;
    let mut payload = Vec::new();

    // Each group is a run of up to seven payload bytes followed by the
    // side-channel byte holding their top bits
    for group in data.chunks(8) {
        let Some((&side, run)) = group.split_last() else {
            continue;
        };
        if run.is_empty() || (side >> run.len()) != 0 {
            return Err(DecodeError::BadSideChannel);
        }
        sum ^= side;
        for (i, b) in run.iter().enumerate() {
            let full = b | (((side >> i) & 1) << 7);
            sum ^= full;
            payload.push(full).map_err(|_| DecodeError::TooLong)?;
        }
    }

    let expected = sum & 0x7F;
    if expected != checksum {
        return Err(DecodeError::Checksum {
            expected,
            found: checksum,
        });
    }

    Ok(Decoded::Frame(Frame {
        address: start.address(),
        protocol: start.protocol(),
        payload,
    }))
}

/// Streaming frame splitter
///
/// Feed it the raw byte stream from the head of the chain. A frame is only
/// known to be complete once the next frame-start byte arrives, so each
/// decoded unit is returned one push "late". Call [`Deframer::finish`] when
/// the stream ends to get the last one.
pub struct Deframer<const N: usize = MAX_WIRE_LEN> {
    buf: Vec<u8, N>,
    garbled: bool,
}

impl<const N: usize> Default for Deframer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Deframer<N> {
    /// Create an empty deframer
    pub const fn new() -> Self {
        Self {
            buf: Vec::new(),
            garbled: false,
        }
    }

    /// Push one byte, returning the previous unit if this byte ended it
    pub fn push(&mut self, byte: u8) -> Option<Result<Decoded, DecodeError>> {
        if is_start(byte) {
            let done = self.finish();
            if self.buf.push(byte).is_err() {
                self.garbled = true;
            }
            return done;
        }

        if self.garbled {
            return None;
        }
        if self.buf.is_empty() || self.buf.push(byte).is_err() {
            self.buf.clear();
            self.garbled = true;
        }
        None
    }

    /// Decode whatever is buffered, and reset
    pub fn finish(&mut self) -> Option<Result<Decoded, DecodeError>> {
        let res = if self.garbled {
            Some(Err(DecodeError::Garbled))
        } else if self.buf.is_empty() {
            None
        } else {
            Some(decode(&self.buf))
        };
        self.buf.clear();
        self.garbled = false;
        res
    }
}
