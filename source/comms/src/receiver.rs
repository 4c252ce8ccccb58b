//! Reception state machine
//!
//! Runs in the UART receive interrupt, one call per received byte. It must
//! finish quickly and never block: no loops, no logging above `trace`.
//!
//! Only when the start of a new frame is received does the previous frame
//! become visible to the [Forwarder][crate::Forwarder], by moving `head` past
//! it. Every error is stored in-band as a one byte [PseudoFrame], so the
//! forwarder needs no other channel to learn about them.
//!
//! Errors detected here:
//!
//! * UART framing error: reported as "Malformed packet"
//! * UART receive overrun: reported as "Hard overflow"
//! * A frame-start with the reserved address: reported as "Chain too long"
//! * A single frame filling the whole buffer: reported as "Malformed packet"
//! * The buffer filling up with older frames: the frame being received is
//!   dropped, and the sticky overflow flag is set

use embassy_sync::blocking_mutex::raw::RawMutex;

use crate::{is_reserved, is_start, management::PseudoFrame, ring::RingBuffer};

/// Error flags reported by the UART alongside a received byte
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt-logging", derive(defmt::Format))]
pub struct LineStatus {
    /// The stop bit was not found; the byte is garbage
    pub framing_error: bool,
    /// The receive FIFO overflowed; at least one byte before this one is lost
    pub overrun: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// No frame is open; body bytes are thrown away until the next frame-start
    Discarding,
    /// A frame is open at `head`, the next byte goes to `write`
    Open { write: usize },
}

/// The producer half of the receive buffer
///
/// Obtained from [`RingBuffer::split`].
pub struct Receiver<'a, R: RawMutex, const N: usize> {
    ring: &'a RingBuffer<R, N>,
    head: usize,
    mode: Mode,
}

impl<'a, R: RawMutex, const N: usize> Receiver<'a, R, N> {
    pub(crate) fn new(ring: &'a RingBuffer<R, N>) -> Self {
        Self {
            ring,
            head: ring.head(),
            mode: Mode::Discarding,
        }
    }

    /// Handle one receive interrupt.
    ///
    /// `byte` must always be read from the UART, even when `status` reports
    /// an error, to clear the interrupt.
    pub fn on_interrupt(&mut self, status: LineStatus, byte: u8) {
        if status.framing_error {
            self.on_framing_error();
        } else if status.overrun {
            self.on_overrun(byte);
        } else {
            self.on_byte(byte);
        }
    }

    /// The UART reported a framing error. The received byte is discarded.
    pub fn on_framing_error(&mut self) {
        link_trace!("rx framing error");
        let tail = self.ring.tail();
        self.inject(PseudoFrame::Malformed, None, tail);
    }

    /// The UART reported an overrun. `byte` is the one that survived.
    pub fn on_overrun(&mut self, byte: u8) {
        link_trace!("rx overrun");
        let tail = self.ring.tail();
        self.inject(PseudoFrame::HardOverflow, Some(byte), tail);
    }

    /// A byte was received without errors
    pub fn on_byte(&mut self, byte: u8) {
        let tail = self.ring.tail();

        match self.mode {
            Mode::Discarding => {
                if is_start(byte) {
                    // No previous frame to deliver, start right at the head
                    self.begin_at(self.head, byte, tail);
                }
            }
            Mode::Open { write } if write != tail => {
                if is_start(byte) {
                    // The open frame is complete, deliver it
                    self.begin_at(write, byte, tail);
                } else {
                    self.ring.write(write, byte);
                    self.mode = Mode::Open {
                        write: self.ring.next(write),
                    };
                }
            }
            Mode::Open { .. } if self.head == tail => {
                // The open frame fills the whole buffer by itself. It can
                // never be delivered, so it is too long.
                link_trace!("rx frame too long");
                if is_reserved(byte) {
                    // One report in its place is enough
                    self.begin_at(self.head, byte, tail);
                } else {
                    self.inject(PseudoFrame::Malformed, is_start(byte).then_some(byte), tail);
                }
            }
            Mode::Open { .. } => {
                // Full, but older frames are still waiting. Drop the open
                // frame and keep those.
                link_trace!("rx buffer full");
                self.ring.overflow().set();
                if is_start(byte) {
                    self.begin_at(self.head, byte, tail);
                } else {
                    self.mode = Mode::Discarding;
                }
            }
        }
    }

    /// Is the receiver throwing body bytes away until the next frame-start?
    pub fn is_discarding(&self) -> bool {
        self.mode == Mode::Discarding
    }

    /// Start a new unit with `byte` at `pos`.
    ///
    /// Everything before `pos` is complete and gets published. `pos` must be
    /// writable: either not `tail`, or the buffer is empty.
    fn begin_at(&mut self, pos: usize, byte: u8, tail: usize) {
        if is_reserved(byte) {
            let after = self.ring.next(pos);
            if after == tail {
                // No room to report it
                self.ring.overflow().set();
                self.publish(pos);
            } else {
                self.ring.write(pos, PseudoFrame::ChainTooLong.into());
                self.publish(after);
            }
            self.mode = Mode::Discarding;
        } else if is_start(byte) {
            self.ring.write(pos, byte);
            self.publish(pos);
            self.mode = Mode::Open {
                write: self.ring.next(pos),
            };
        } else {
            self.publish(pos);
            self.mode = Mode::Discarding;
        }
    }

    /// Replace the open frame (if any) with `code`, then start a new unit
    /// with `next`, if there is one.
    fn inject(&mut self, code: PseudoFrame, next: Option<u8>, tail: usize) {
        let pos = self.head;
        let after = self.ring.next(pos);

        if after == tail {
            // No room to report the error. Keep the new byte if it starts a
            // frame, so at least the next frame gets through.
            self.ring.overflow().set();
            match next {
                Some(byte) => self.begin_at(pos, byte, tail),
                None => self.mode = Mode::Discarding,
            }
            return;
        }

        self.ring.write(pos, code.into());
        match next {
            Some(byte) => self.begin_at(after, byte, tail),
            None => {
                self.publish(after);
                self.mode = Mode::Discarding;
            }
        }
    }

    #[inline]
    fn publish(&mut self, pos: usize) {
        self.head = pos;
        self.ring.set_head(pos);
    }
}
