//! Frame encoder
//!
//! Serializes frames onto the outgoing line, see the [crate docs](crate) for
//! the wire format.
//!
//! ```rust
//! use railmon_comms::{FrameWriter, TxLine};
//!
//! struct Capture(Vec<u8>);
//!
//! impl TxLine for Capture {
//!     fn put(&mut self, byte: u8) { self.0.push(byte) }
//!     fn is_idle(&self) -> bool { true }
//!     fn suspend(&mut self) -> bool { false }
//!     fn resume(&mut self) {}
//! }
//!
//! let mut line = Capture(Vec::new());
//! let mut frame = FrameWriter::start(&mut line, 0);
//! frame.send(0xFF);
//! frame.end();
//! assert_eq!(line.0, [0x80, 0x7F, 0x01, 0x7E]);
//! ```

use crate::{
    management::{Management, MANAGEMENT_PROTOCOL},
    StartByte, TxLine,
};

/// The number of payload bytes covered by one side-channel byte
const RUN_LEN: u8 = 7;

const BODY_MASK: u8 = 0b0111_1111;

/// An in-progress outgoing frame
///
/// Created by [`FrameWriter::start`], which sends the frame-start byte, and
/// finished by [`FrameWriter::end`], which sends the remaining side-channel
/// bits and the checksum. The writer holds the line for the whole frame, so
/// nothing else can be interleaved with it.
#[must_use = "a frame is incomplete until `end()` is called"]
pub struct FrameWriter<'a, L: TxLine> {
    line: &'a mut L,
    checksum: u8,
    side: u8,
    run: u8,
}

impl<'a, L: TxLine> FrameWriter<'a, L> {
    /// Start a frame with address 0 and the given protocol
    pub fn start(line: &'a mut L, protocol: u8) -> Self {
        Self::start_with(line, StartByte::local(protocol))
    }

    /// Start a frame with an explicit start byte
    pub fn start_with(line: &'a mut L, start: StartByte) -> Self {
        let start: u8 = start.into();
        line.put(start);
        Self {
            line,
            checksum: start,
            side: 0,
            run: 0,
        }
    }

    /// Send one payload byte.
    ///
    /// The top bit is stripped and kept for the next side-channel byte, which
    /// is sent after every seventh payload byte.
    pub fn send(&mut self, byte: u8) {
        self.side |= (byte >> 7) << self.run;
        self.run += 1;
        self.line.put(byte & BODY_MASK);
        self.checksum ^= byte;

        if self.run == RUN_LEN {
            self.flush_side();
        }
    }

    /// Send a run of payload bytes
    pub fn send_all(&mut self, bytes: &[u8]) {
        bytes.iter().for_each(|b| self.send(*b));
    }

    /// Finish the frame
    pub fn end(mut self) {
        if self.run != 0 {
            self.flush_side();
        }
        self.line.put(self.checksum & BODY_MASK);
    }

    fn flush_side(&mut self) {
        self.line.put(self.side);
        self.checksum ^= self.side;
        self.side = 0;
        self.run = 0;
    }
}

/// Send one complete frame with address 0
pub fn encode_frame<L: TxLine>(line: &mut L, protocol: u8, payload: &[u8]) {
    let mut frame = FrameWriter::start(line, protocol);
    frame.send_all(payload);
    frame.end();
}

/// Send the management "Hello" frame, announcing this board after power-up
pub fn send_hello<L: TxLine>(line: &mut L) {
    link_info!("Sending hello");
    encode_frame(line, MANAGEMENT_PROTOCOL, &[Management::Hello.into()]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MockLine;

    fn encoded(protocol: u8, payload: &[u8]) -> Vec<u8> {
        let mut line = MockLine::idle();
        encode_frame(&mut line, protocol, payload);
        line.take()
    }

    #[test]
    fn single_low_byte() {
        // The side-channel byte is sent even when it is all zeroes
        assert_eq!(encoded(3, &[0x41]), [0x83, 0x41, 0x00, 0x42]);
    }

    #[test]
    fn single_high_byte() {
        assert_eq!(encoded(0, &[0xFF]), [0x80, 0x7F, 0x01, 0x7E]);
    }

    #[test]
    fn empty_frame_has_no_side_channel() {
        assert_eq!(encoded(5, &[]), [0x85, 0x05]);
    }

    #[test]
    fn side_channel_after_seven_bytes() {
        let payload = [0x80, 0x01, 0x82, 0x03, 0x04, 0x05, 0x86, 0x87];
        let wire = encoded(1, &payload);
        assert_eq!(
            wire,
            [
                0x81, // start
                0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, // run of seven
                0b0100_0101, // top bits of bytes 0, 2 and 6
                0x07, // run of one
                0b0000_0001,
                0x45, // checksum
            ]
        );
        let expected = payload
            .iter()
            .fold(0x81 ^ 0b0100_0101 ^ 0b0000_0001, |acc, b| acc ^ b);
        assert_eq!(*wire.last().unwrap(), expected & 0x7F);
    }

    #[test]
    fn exactly_seven_bytes_has_one_side_channel() {
        let wire = encoded(2, &[0xFF; 7]);
        assert_eq!(wire.len(), 1 + 7 + 1 + 1);
        assert_eq!(wire[8], 0x7F);
        assert!(wire[1..].iter().all(|b| b & 0x80 == 0));
    }

    #[test]
    fn maximal_frame_length() {
        let wire = encoded(15, &[0xAA; crate::MAX_PAYLOAD]);
        assert_eq!(wire.len(), crate::MAX_WIRE_LEN);
    }

    #[test]
    fn hello() {
        let mut line = MockLine::idle();
        send_hello(&mut line);
        assert_eq!(line.sent, [0x80, 0x00, 0x00, 0x00]);
    }
}
