//! Daisy-chain receive buffer
//!
//! This is a single-producer, single-consumer ring buffer of bytes, split
//! between the UART receive interrupt (the [Receiver]) and the main loop (the
//! [Forwarder]).
//!
//! * `head` marks the end of the last complete frame. Only the producer
//!   writes it.
//! * `tail` marks the next byte the consumer will read. Only the consumer
//!   writes it.
//!
//! Everything in `tail..head` is complete, immutable frames. The producer
//! keeps the frame it is currently receiving past `head`, and only moves
//! `head` once that frame is complete. The consumer therefore never sees a
//! partial frame.
//!
//! As neither index is written from both sides, only `load` and `store` are
//! needed, which also works on targets without CAS atomics. The one flag
//! written from both sides, the sticky overflow flag, is a [StickyFlag]
//! behind a blocking mutex.

use core::{
    cell::Cell,
    sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering},
};

use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};

use crate::{forwarder::Forwarder, receiver::Receiver, RX_BUFFER_SIZE};

/// A flag set from one context, and tested-and-cleared from another
pub struct StickyFlag<R: RawMutex> {
    inner: Mutex<R, Cell<bool>>,
}

impl<R: RawMutex> StickyFlag<R> {
    /// Create a cleared flag
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(false)),
        }
    }

    /// Set the flag
    pub fn set(&self) {
        self.inner.lock(|f| f.set(true));
    }

    /// Is the flag currently set?
    pub fn is_set(&self) -> bool {
        self.inner.lock(|f| f.get())
    }

    /// Clear the flag, returning whether it was set.
    ///
    /// Test and clear happen inside one lock, so a `set` from the other
    /// context can't be lost in between.
    pub fn take(&self) -> bool {
        self.inner.lock(|f| f.replace(false))
    }
}

impl<R: RawMutex> Default for StickyFlag<R> {
    fn default() -> Self {
        Self::new()
    }
}

/// Storage for the daisy-chain receive buffer
///
/// Intended for static usage:
///
/// ```rust
/// use railmon_comms::RingBuffer;
/// use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
///
/// static RX_BUF: RingBuffer<CriticalSectionRawMutex> = RingBuffer::new();
/// ```
///
/// and then [split][RingBuffer::split] once at startup, handing the
/// [Receiver] to the interrupt handler and the [Forwarder] to the main loop.
pub struct RingBuffer<R: RawMutex, const N: usize = RX_BUFFER_SIZE> {
    cells: [AtomicU8; N],
    head: AtomicUsize,
    tail: AtomicUsize,
    overflow: StickyFlag<R>,
    taken: AtomicBool,
}

impl<R: RawMutex, const N: usize> RingBuffer<R, N> {
    // Two cells is the least that can hold a pseudo-frame plus the start
    // of the next frame
    const CAPACITY_OK: () = assert!(N >= 2, "RingBuffer needs at least two cells");

    /// Create an empty buffer
    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::CAPACITY_OK;
        #[allow(clippy::declare_interior_mutable_const)]
        const EMPTY: AtomicU8 = AtomicU8::new(0);
        Self {
            cells: [EMPTY; N],
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            overflow: StickyFlag::new(),
            taken: AtomicBool::new(false),
        }
    }

    /// Attempt to take the producer and consumer halves of the buffer
    ///
    /// The first call will return Some, all later calls will return None.
    /// Uses a [critical section][critical_section::with] to ensure it only
    /// works once, even on targets without CAS atomics.
    pub fn split(&self) -> Option<(Receiver<'_, R, N>, Forwarder<'_, R, N>)> {
        critical_section::with(|_| {
            let old = self.taken.load(Ordering::Acquire);
            self.taken.store(true, Ordering::Release);
            !old
        })
        .then(|| (Receiver::new(self), Forwarder::new(self)))
    }

    /// The sticky overflow flag
    ///
    /// Set by the [Receiver] whenever it had to throw data away for lack of
    /// room, cleared by the [Forwarder] when it reports the overflow.
    #[inline]
    pub fn overflow(&self) -> &StickyFlag<R> {
        &self.overflow
    }

    /// The number of bytes of complete frames waiting to be relayed
    pub fn published_len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + N - tail) % N
    }

    /// Are there no complete frames waiting?
    pub fn is_empty(&self) -> bool {
        self.published_len() == 0
    }

    /// The index after `idx`, wrapping at the end of the buffer
    #[inline]
    pub(crate) fn next(&self, idx: usize) -> usize {
        if idx + 1 >= N {
            0
        } else {
            idx + 1
        }
    }

    #[inline]
    pub(crate) fn read(&self, idx: usize) -> u8 {
        self.cells[idx].load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn write(&self, idx: usize, byte: u8) {
        self.cells[idx].store(byte, Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn head(&self) -> usize {
        self.head.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_head(&self, idx: usize) {
        self.head.store(idx, Ordering::Release)
    }

    #[inline]
    pub(crate) fn tail(&self) -> usize {
        self.tail.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_tail(&self, idx: usize) {
        self.tail.store(idx, Ordering::Release)
    }
}

impl<R: RawMutex, const N: usize> Default for RingBuffer<R, N> {
    fn default() -> Self {
        Self::new()
    }
}
