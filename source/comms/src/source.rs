//! Local telemetry
//!
//! Frames originating at this board come from one of the bus decoders. They
//! all hand out packets the same way, through [PayloadSource].

use heapless::Vec;

use crate::{
    encoder::encode_frame,
    management::{Management, MANAGEMENT_PROTOCOL},
    TxLine, MAX_PAYLOAD,
};

/// A queue of decoded packets from a monitored bus
///
/// Packets are stored as a length byte followed by that many data bytes.
pub trait PayloadSource {
    /// Is there no complete packet waiting?
    fn would_block(&self) -> bool;

    /// Take the next byte. Only called while a packet is available, or
    /// while reading the rest of one.
    fn get(&mut self) -> u8;

    /// Clear the "monitored bus overflowed" flag, returning whether it was
    /// set.
    fn take_overflow(&mut self) -> bool {
        false
    }
}

/// Send at most one packet from `source` as a frame of `protocol`.
///
/// A pending bus overflow is reported first. In that case a data frame is
/// still sent as well, to relieve pressure on the source's buffer.
///
/// Returns whether anything was sent.
pub fn send_from_source<L, S>(line: &mut L, protocol: u8, source: &mut S) -> bool
where
    L: TxLine,
    S: PayloadSource,
{
    let mut sent = false;

    if source.take_overflow() {
        link_warn!("Monitored bus overflowed");
        encode_frame(line, MANAGEMENT_PROTOCOL, &[Management::BusOverflow.into()]);
        sent = true;
    }

    if source.would_block() {
        return sent;
    }

    let len = source.get();
    let mut payload: Vec<u8, MAX_PAYLOAD> = Vec::new();
    let mut truncated = false;
    for _ in 0..len {
        truncated |= payload.push(source.get()).is_err();
    }

    if truncated {
        link_error!("Dropping {=u8} byte packet for protocol {=u8}", len, protocol);
        return sent;
    }

    encode_frame(line, protocol, &payload);
    true
}
