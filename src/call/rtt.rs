//! Correlation of outbound packet serials with send times for RTT sampling.

use crate::seq;
use crate::seq::Serial;

use log::trace;

pub const PROBE_SLOTS: usize = 4;

/// How an RTT sample was obtained.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RttSampleKind {
    PingResponse,
    RequestedAck,
}

#[derive(Clone, Copy)]
struct Probe {
    serial: Serial,
    sent_at_us: u64,
}

/// A small table of in-flight RTT probes. The transmit path arms a slot
/// when it sends a probe-worthy packet; an ACK referencing that serial
/// consumes the slot and yields the send time. Probes older than a
/// consumed one are obsolete and dropped without a sample.
pub struct RttProbeTable {
    slots: [Option<Probe>; PROBE_SLOTS],
}

impl RttProbeTable {
    pub fn new() -> Self {
        Self {
            slots: [None; PROBE_SLOTS],
        }
    }

    /// Records an outbound probe. Returns false if all slots are busy, in
    /// which case the probe is simply not tracked.
    pub fn arm(&mut self, serial: Serial, sent_at_us: u64) -> bool {
        for slot in self.slots.iter_mut() {
            if slot.is_none() {
                *slot = Some(Probe { serial, sent_at_us });
                return true;
            }
        }

        false
    }

    /// Consumes the probe matching `acked_serial`, returning its send
    /// time. Slots holding serials older than the match are cancelled.
    pub fn complete(&mut self, acked_serial: Serial) -> Option<u64> {
        let mut matched = None;

        for slot in self.slots.iter_mut() {
            if let Some(probe) = slot {
                if probe.serial == acked_serial {
                    matched = Some(probe.sent_at_us);
                    *slot = None;
                } else if seq::before(probe.serial, acked_serial) {
                    trace!("obsolete rtt probe for serial {}", probe.serial);
                    *slot = None;
                }
            }
        }

        matched
    }
}
