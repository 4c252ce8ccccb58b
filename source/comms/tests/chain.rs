//! Whole-chain tests
//!
//! Several boards are wired up in memory: the output of one board's
//! forwarder becomes the input of the next board's receiver, and the host
//! decodes whatever comes out at the top.

use std::cell::Cell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use railmon_comms::{
    decode, send_from_source, send_hello, Clock, DecodeError, Decoded, DefaultLinkCfg, Deframer,
    Forwarder, Frame, IdleTracker, LineStatus, PayloadSource, Receiver, RingBuffer, SyncPacer,
    TxLine, IDLE_FRAME,
};
use railmon_comms::management::{Management, CHAIN_TOO_LONG_FRAME, MALFORMED_FRAME};

type Board = RingBuffer<CriticalSectionRawMutex>;

/// An outgoing line that records everything and drains instantly
#[derive(Default)]
struct Wire {
    bytes: Vec<u8>,
    paused: bool,
    pauses: usize,
}

impl TxLine for Wire {
    fn put(&mut self, byte: u8) {
        assert!(!self.paused);
        self.bytes.push(byte);
    }

    fn is_idle(&self) -> bool {
        true
    }

    fn suspend(&mut self) -> bool {
        self.pauses += 1;
        !std::mem::replace(&mut self.paused, true)
    }

    fn resume(&mut self) {
        self.paused = false;
    }
}

/// A counter that advances by `step` on every read
struct Counter {
    now: Cell<u16>,
    step: u16,
}

impl Clock for Counter {
    fn now(&self) -> u16 {
        let now = self.now.get();
        self.now.set(now.wrapping_add(self.step));
        now
    }
}

/// Everything the host decodes from `bytes`
fn host_decode(bytes: &[u8]) -> Vec<Result<Decoded, DecodeError>> {
    let mut de: Deframer = Deframer::new();
    let mut out: Vec<_> = bytes.iter().filter_map(|b| de.push(*b)).collect();
    out.extend(de.finish());
    out
}

/// Pass `bytes` through one board, draining it completely
fn hop(
    rx: &mut Receiver<'_, CriticalSectionRawMutex, 32>,
    fwd: &mut Forwarder<'_, CriticalSectionRawMutex, 32>,
    bytes: &[u8],
) -> Vec<u8> {
    bytes.iter().for_each(|b| rx.on_byte(*b));
    // Closes the last frame
    rx.on_byte(IDLE_FRAME);

    let mut up = Wire::default();
    while fwd.forward(&mut up) {}
    up.bytes
}

#[test]
fn frame_travels_up_the_chain() {
    let boards: Vec<Board> = (0..9).map(|_| RingBuffer::new()).collect();
    let mut halves: Vec<_> = boards.iter().map(|b| b.split().unwrap()).collect();

    let first = Frame::local(5, &[0x01, 0x82, 0x03]).unwrap();
    let mut wire = Wire::default();
    first.write_to(&mut wire);
    let mut bytes = wire.bytes;

    for (n, (rx, fwd)) in halves.iter_mut().enumerate() {
        bytes = hop(rx, fwd, &bytes);
        let hops = n as u8 + 1;

        match hops {
            1..=6 => {
                let expected = Frame::new(hops, 5, first.payload()).unwrap();
                assert_eq!(decode(&bytes), Ok(Decoded::Frame(expected)));
            }
            // Leaves the seventh board with the reserved address
            7 => {
                assert_eq!(bytes[0], 0xF5);
                assert_eq!(decode(&bytes), Err(DecodeError::ReservedAddress));
            }
            // The eighth board reports it instead
            8 => assert_eq!(bytes, CHAIN_TOO_LONG_FRAME),
            // ... and the report travels on like any other frame
            _ => {
                let Ok(Decoded::Frame(f)) = decode(&bytes) else {
                    panic!("{bytes:02X?}");
                };
                assert_eq!(f.address(), 1);
                assert_eq!(f.payload(), [u8::from(Management::ChainTooLong)]);
            }
        }
    }
}

#[test]
fn line_errors_become_reports() {
    let board: Board = RingBuffer::new();
    let (mut rx, mut fwd) = board.split().unwrap();
    let mut up = Wire::default();

    // A frame broken by a framing error, then a good one
    [0x83, 0x41].iter().for_each(|b| rx.on_byte(*b));
    rx.on_interrupt(
        LineStatus {
            framing_error: true,
            overrun: false,
        },
        0x00,
    );
    [0x00, 0x42, 0x81, 0x01, 0x80].iter().for_each(|b| rx.on_byte(*b));

    while fwd.forward(&mut up) {}

    let mut expected = MALFORMED_FRAME.to_vec();
    expected.extend([0x91, 0x11]);
    assert_eq!(up.bytes, expected);
}

struct Packets(Vec<u8>);

impl PayloadSource for Packets {
    fn would_block(&self) -> bool {
        self.0.is_empty()
    }

    fn get(&mut self) -> u8 {
        self.0.remove(0)
    }
}

#[test]
fn two_board_main_loop() {
    // Board A, furthest from the host, sends hello and one packet
    let mut a_out = Wire::default();
    send_hello(&mut a_out);
    let mut a_src = Packets(vec![2, 0xDE, 0xAD]);
    assert!(send_from_source(&mut a_out, 4, &mut a_src));

    // Board B runs its main loop, with A's output arriving in between
    let board: Board = RingBuffer::new();
    let (mut rx, mut fwd) = board.split().unwrap();
    let clock = Counter {
        now: Cell::new(0),
        step: 0x80,
    };
    let mut up = Wire::default();
    let mut b_src = Packets(vec![1, 0x07]);

    send_hello(&mut up);
    let mut idle = IdleTracker::new::<DefaultLinkCfg>();
    let mut pacer = SyncPacer::new::<DefaultLinkCfg>(clock.now());
    let mut incoming = a_out.bytes.into_iter();

    for _ in 0..400 {
        // One byte arrives per pass
        if let Some(b) = incoming.next() {
            rx.on_byte(b);
        }

        let mut active = fwd.forward(&mut up);
        active |= send_from_source(&mut up, 4, &mut b_src);

        let now = clock.now();
        idle.tick(&mut up, now, active);
        pacer.poll(&mut up, &clock, now);
    }

    // A's last frame is only published by the next frame-start
    rx.on_byte(IDLE_FRAME);
    while fwd.forward(&mut up) {}

    let units = host_decode(&up.bytes);
    let frames: Vec<_> = units
        .iter()
        .filter_map(|u| match u {
            Ok(Decoded::Frame(f)) => Some((f.address(), f.protocol(), f.payload().to_vec())),
            Ok(Decoded::Idle) => None,
            Err(e) => panic!("{e:?}"),
        })
        .collect();

    assert_eq!(
        frames,
        [
            (0, 0, vec![u8::from(Management::Hello)]),
            (0, 4, vec![0x07]),
            (1, 0, vec![u8::from(Management::Hello)]),
            (1, 4, vec![0xDE, 0xAD]),
        ]
    );

    let idles = units.iter().filter(|u| matches!(u, Ok(Decoded::Idle))).count();
    assert_eq!(idles, 1);
    assert!(up.pauses >= 1);
}
