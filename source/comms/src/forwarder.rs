//! Relay of received frames
//!
//! The consumer half of the receive buffer. Called from the main loop, it
//! drains one complete unit per call and sends it upstream:
//!
//! * Data frames get their address bumped by one hop. Only the start byte
//!   changes, so the checksum is patched with the difference instead of
//!   being recomputed.
//! * Idle frames are consumed without being relayed.
//! * Pseudo-frames are replaced with the fixed management frame reporting
//!   them, sent with this board's address.
//!
//! A pending soft overflow is reported after whatever else was sent in the
//! same call, or on its own if there was nothing else to send.

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::{
    is_start,
    management::{PseudoFrame, SOFT_OVERFLOW_FRAME},
    ring::RingBuffer,
    StartByte, TxLine, IDLE_FRAME,
};

/// The consumer half of the receive buffer
///
/// Obtained from [`RingBuffer::split`].
pub struct Forwarder<'a, R: RawMutex, const N: usize> {
    ring: &'a RingBuffer<R, N>,
    tail: usize,
}

impl<'a, R: RawMutex, const N: usize> Forwarder<'a, R, N> {
    pub(crate) fn new(ring: &'a RingBuffer<R, N>) -> Self {
        Self {
            ring,
            tail: ring.tail(),
        }
    }

    /// Are there no complete frames waiting to be relayed?
    pub fn is_empty(&self) -> bool {
        self.ring.head() == self.tail
    }

    /// Relay at most one frame, plus a soft overflow report if one is pending.
    ///
    /// Returns whether anything was sent.
    pub fn forward<L: TxLine>(&mut self, line: &mut L) -> bool {
        loop {
            let head = self.ring.head();
            if self.tail == head {
                return self.report_overflow(line);
            }

            let first = self.pop();
            if !self.continues(head) {
                if first == IDLE_FRAME {
                    continue;
                }
                let code = PseudoFrame::classify(first);
                link_warn!("Reporting {=u8:X} upstream", u8::from(code));
                line.put_all(code.report());
                self.report_overflow(line);
                return true;
            }

            match StartByte::try_from(first) {
                Ok(start) => self.relay(line, start, head),
                Err(_) => {
                    // Nothing the receiver stores looks like this
                    link_warn!("Garbled unit {=u8:X} in receive buffer", first);
                    while self.continues(head) {
                        self.pop();
                    }
                    line.put_all(PseudoFrame::Malformed.report());
                }
            }
            self.report_overflow(line);
            return true;
        }
    }

    /// Send the rest of a data frame whose start byte was already taken.
    fn relay<L: TxLine>(&mut self, line: &mut L, start: StartByte, head: usize) {
        let relayed = start.relayed();
        let correction = u8::from(start) ^ relayed;
        line.put(relayed);

        // The last body byte is the checksum, hold each byte back until it
        // is known not to be the last one
        let mut pending = self.pop();
        while self.continues(head) {
            line.put(pending);
            pending = self.pop();
        }
        line.put(pending ^ correction);
    }

    fn report_overflow<L: TxLine>(&mut self, line: &mut L) -> bool {
        if self.ring.overflow().take() {
            link_warn!("Reporting soft overflow");
            line.put_all(&SOFT_OVERFLOW_FRAME);
            true
        } else {
            false
        }
    }

    /// Does the unit being read continue at `tail`?
    #[inline]
    fn continues(&self, head: usize) -> bool {
        self.tail != head && !is_start(self.ring.read(self.tail))
    }

    /// Take the byte at `tail`, handing its cell back to the receiver
    #[inline]
    fn pop(&mut self) -> u8 {
        let byte = self.ring.read(self.tail);
        self.tail = self.ring.next(self.tail);
        self.ring.set_tail(self.tail);
        byte
    }
}
