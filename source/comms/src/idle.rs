//! Idle frames and sync pauses on the outgoing line
//!
//! Both timers run off the high byte of the free-running [Clock], so a
//! "coarse tick" is 256 counter ticks (about 24ms on the reference board).
//! Elapsed time is always computed with wrapping subtraction, and a timer
//! fires once the elapsed coarse ticks are strictly greater than its
//! threshold.

use embassy_time::Duration;

use crate::{Clock, TxLine, IDLE_FRAME};

/// Link timing configuration
///
/// Implement this for a board to describe its counter and line rate.
pub trait LinkCfg {
    /// Rate of the free-running counter behind [Clock]
    const TICK_HZ: u32;

    /// Bit rate of the outgoing line
    const BAUD: u32;

    /// How long the line must be quiet before an Idle Frame is sent
    const IDLE_TIMEOUT: Duration;

    /// How often the outgoing line is paused for bit re-synchronization
    const SYNC_INTERVAL: Duration;

    /// Length of the sync pause, in bit periods
    const SYNC_PAUSE_BITS: u32;
}

/// The reference board: an 11.0592MHz clock with the counter at /1024,
/// running the line at 57600 baud.
pub struct DefaultLinkCfg;

impl LinkCfg for DefaultLinkCfg {
    const TICK_HZ: u32 = 11_059_200 / 1024;
    const BAUD: u32 = 57_600;
    const IDLE_TIMEOUT: Duration = Duration::from_millis(100);
    const SYNC_INTERVAL: Duration = Duration::from_secs(2);
    const SYNC_PAUSE_BITS: u32 = 9;
}

/// `dur` in counter ticks, rounded to nearest
fn ticks(dur: Duration, hz: u32) -> u64 {
    (dur.as_micros() * u64::from(hz) + 500_000) / 1_000_000
}

/// `dur` in coarse ticks, saturating
fn coarse_ticks(dur: Duration, hz: u32) -> u8 {
    (ticks(dur, hz) >> 8).min(u64::from(u8::MAX)) as u8
}

/// Idle threshold of `C`, in coarse ticks
pub fn idle_threshold<C: LinkCfg>() -> u8 {
    coarse_ticks(C::IDLE_TIMEOUT, C::TICK_HZ)
}

/// Sync interval of `C`, in coarse ticks
pub fn sync_interval<C: LinkCfg>() -> u8 {
    coarse_ticks(C::SYNC_INTERVAL, C::TICK_HZ)
}

/// Sync pause of `C`, in counter ticks
///
/// Rounded up, plus one, as the counter may already be almost a full tick
/// further than its reading when the pause starts.
pub fn sync_pause_ticks<C: LinkCfg>() -> u8 {
    let hz = u64::from(C::TICK_HZ);
    let bits = u64::from(C::SYNC_PAUSE_BITS);
    let baud = u64::from(C::BAUD.max(1));
    let least = (hz * bits).div_ceil(baud);
    (least + 1).min(u64::from(u8::MAX)) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdleState {
    /// Frames were sent recently, waiting for the line to drain
    Busy,
    /// The line drained at this coarse time
    Quiet { since: u8 },
    /// The Idle Frame was sent, nothing more until the next real frame
    Announced,
}

/// Sends one Idle Frame once the line has been quiet for long enough
pub struct IdleTracker {
    state: IdleState,
    threshold: u8,
    last_active: bool,
}

impl IdleTracker {
    /// Create a tracker. It starts out busy, as a board always sends Hello
    /// right after power-up.
    pub fn new<C: LinkCfg>() -> Self {
        Self {
            state: IdleState::Busy,
            threshold: idle_threshold::<C>(),
            last_active: true,
        }
    }

    /// A real frame was queued for sending, start over.
    pub fn restart(&mut self) {
        self.state = IdleState::Busy;
    }

    /// Check the line, sending the Idle Frame when it is due.
    ///
    /// Must only be called while nothing has been queued since the last
    /// [`IdleTracker::restart`]. Returns whether the Idle Frame was sent.
    pub fn poll<L: TxLine>(&mut self, line: &mut L, now: u16) -> bool {
        let now_hi = (now >> 8) as u8;
        match self.state {
            IdleState::Busy => {
                if line.is_idle() {
                    self.state = IdleState::Quiet { since: now_hi };
                }
                false
            }
            IdleState::Quiet { since } if now_hi.wrapping_sub(since) > self.threshold => {
                link_debug!("Line idle, sending idle frame");
                line.put(IDLE_FRAME);
                self.state = IdleState::Announced;
                true
            }
            IdleState::Quiet { .. } | IdleState::Announced => false,
        }
    }

    /// One pass of the main loop: `active` is whether anything was sent in
    /// this pass.
    ///
    /// The tracker only starts counting once a whole pass went by without
    /// sending anything.
    pub fn tick<L: TxLine>(&mut self, line: &mut L, now: u16, active: bool) -> bool {
        let was_active = core::mem::replace(&mut self.last_active, active);
        if active || was_active {
            self.restart();
            false
        } else {
            self.poll(line, now)
        }
    }
}

/// Schedules the periodic sync pause
pub struct SyncPacer {
    last: u8,
    interval: u8,
    pause: u8,
}

impl SyncPacer {
    /// Create a pacer, counting the first interval from `now`
    pub fn new<C: LinkCfg>(now: u16) -> Self {
        Self {
            last: (now >> 8) as u8,
            interval: sync_interval::<C>(),
            pause: sync_pause_ticks::<C>(),
        }
    }

    /// Run the sync pause if it is due. Returns whether it ran.
    ///
    /// Must not be called between [`FrameWriter::start`][crate::FrameWriter::start]
    /// and [`FrameWriter::end`][crate::FrameWriter::end].
    pub fn poll<L: TxLine, C: Clock>(&mut self, line: &mut L, clock: &C, now: u16) -> bool {
        let now_hi = (now >> 8) as u8;
        if now_hi.wrapping_sub(self.last) <= self.interval {
            return false;
        }
        sync_pause(line, clock, self.pause);
        self.last = now_hi;
        true
    }
}

/// Pause the outgoing line for `ticks` counter ticks after the last queued
/// byte has been shifted out.
///
/// Only the low byte of the counter is looked at, so `ticks` must be well
/// below 256. Spins for the whole pause.
pub fn sync_pause<L: TxLine, C: Clock>(line: &mut L, clock: &C, ticks: u8) {
    let was_active = line.suspend();

    // At most one byte period, as nothing new is fed to the UART
    while !line.is_idle() {
        core::hint::spin_loop();
    }

    let start = clock.now() as u8;
    while (clock.now() as u8).wrapping_sub(start) < ticks {
        core::hint::spin_loop();
    }

    if was_active {
        line.resume();
    }
}
