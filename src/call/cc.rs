// This congestion control scheme follows TCP Reno in spirit, with the
// window counted in packets rather than bytes:
// https://intronetworks.cs.luc.edu/current/html/reno.html
//
// Beyond the usual slow start and congestion avoidance, the machine has an
// explicit packet-loss mode entered on the first reported NAK and a fast
// retransmit mode entered after three duplicate loss indications. The
// window never leaves [1, MAX_WINDOW].

use super::{AckSummary, MAX_WINDOW};

use log::trace;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    SlowStart,
    CongestAvoidance,
    PacketLoss,
    FastRetransmit,
}

/// What an ack-driven congestion update asks of the surrounding machinery.
#[derive(Clone, Copy, Debug, Default)]
pub struct CongestOutcome {
    /// At least one packet should be retransmitted; poke the resend
    /// scheduler.
    pub resend: bool,
    /// Previously-unsent data may be sent beyond the window to advance the
    /// ACK state; wake the sender.
    pub extra_granted: bool,
}

pub struct Congestion {
    mode: Mode,
    cwnd: u32,
    ssthresh: u32,

    // Acks accumulated toward the next avoidance-mode window increase
    cumulative_acks: u32,
    // Consecutive loss indications without progress
    dup_acks: u32,
    // Credit for sending new data past cwnd while probing a loss episode
    extra: u32,

    // Start of the current RTT-length observation period
    period_start_us: u64,

    // A retransmission timeout occurred; applied on the next ack
    retrans_timeout: bool,
}

enum Exit {
    // Window update settled; clear the cumulative ack count
    Settled,
    // Probing continues; keep accumulating acks
    Probing,
}

impl Congestion {
    pub fn new(initial_cwnd: u32) -> Self {
        Self {
            mode: Mode::SlowStart,
            cwnd: initial_cwnd.clamp(1, MAX_WINDOW),
            ssthresh: MAX_WINDOW,
            cumulative_acks: 0,
            dup_acks: 0,
            extra: 0,
            period_start_us: 0,
            retrans_timeout: false,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    /// Current extra-transmit credit beyond the congestion window.
    pub fn extra(&self) -> u32 {
        self.extra
    }

    /// Notes a retransmission timeout reported by the resend scheduler.
    /// The window collapse is applied when the next ack is processed.
    pub fn note_retrans_timeout(&mut self) {
        self.retrans_timeout = true;
    }

    /// Runs the congestion machine for one processed ACK.
    ///
    /// `flight_size` is the number of transmitted-but-unacknowledged
    /// packets after this ack's window updates. `srtt_us` is the peer's
    /// smoothed RTT, absent until a first sample exists; without it,
    /// avoidance-mode growth stalls. `tx_top_is_last` reports whether the
    /// newest transmitted packet carries the stream terminator, in which
    /// case there is no further data to request.
    pub fn on_ack(
        &mut self,
        summary: &AckSummary,
        flight_size: u32,
        now_us: u64,
        srtt_us: Option<u64>,
        tx_top_is_last: bool,
    ) -> CongestOutcome {
        let mut cwnd = self.cwnd;
        let mut outcome = CongestOutcome::default();

        if self.retrans_timeout {
            self.retrans_timeout = false;
            self.ssthresh = (flight_size / 2).max(2);
            cwnd = 1;

            if cwnd >= self.ssthresh && self.mode == Mode::SlowStart {
                self.mode = Mode::CongestAvoidance;
                self.period_start_us = now_us;
                self.cumulative_acks = 0;
            }
        }

        self.cumulative_acks +=
            u32::from(summary.nr_new_acks) + u32::from(summary.nr_rot_new_acks);
        if self.cumulative_acks > 255 {
            self.cumulative_acks = 255;
        }

        let exit = match self.mode {
            Mode::SlowStart => {
                if summary.nr_nacks > 0 {
                    self.enter_packet_loss();
                    outcome.extra_granted = self.grant_extra(tx_top_is_last);
                    Exit::Probing
                } else {
                    if self.cumulative_acks > 0 {
                        cwnd += 1;
                    }

                    if cwnd >= self.ssthresh {
                        self.mode = Mode::CongestAvoidance;
                        self.period_start_us = now_us;
                        trace!("congestion: slow start reached ssthresh {}", self.ssthresh);
                    }

                    Exit::Settled
                }
            }

            Mode::CongestAvoidance => {
                if summary.nr_nacks > 0 {
                    self.enter_packet_loss();
                    outcome.extra_granted = self.grant_extra(tx_top_is_last);
                    Exit::Probing
                } else if let Some(srtt_us) = srtt_us {
                    // Count the acks landing in one RTT-length period and
                    // widen the window if it was kept full
                    if now_us < self.period_start_us.saturating_add(srtt_us) {
                        Exit::Probing
                    } else {
                        self.period_start_us = now_us;

                        if self.cumulative_acks >= cwnd {
                            cwnd += 1;
                        }

                        Exit::Settled
                    }
                } else {
                    // No RTT estimate yet; cannot pace growth
                    Exit::Settled
                }
            }

            Mode::PacketLoss => {
                if summary.nr_nacks == 0 {
                    self.resume_normality(cwnd, now_us);
                    Exit::Settled
                } else if summary.new_low_nack {
                    // A fresh loss episode; restart duplicate counting
                    self.dup_acks = 1;
                    if self.extra > 1 {
                        self.extra = 1;
                    }

                    outcome.extra_granted = self.grant_extra(tx_top_is_last);
                    Exit::Probing
                } else {
                    self.dup_acks += 1;

                    if self.dup_acks < 3 {
                        outcome.extra_granted = self.grant_extra(tx_top_is_last);
                        Exit::Probing
                    } else {
                        trace!("congestion: fast retransmit, flight {}", flight_size);

                        self.mode = Mode::FastRetransmit;
                        self.ssthresh = (flight_size / 2).max(2);
                        cwnd = self.ssthresh + 3;
                        self.extra = 0;
                        self.dup_acks = 0;
                        outcome.resend = true;

                        Exit::Settled
                    }
                }
            }

            Mode::FastRetransmit => {
                if !summary.new_low_nack {
                    if summary.nr_new_acks == 0 {
                        cwnd += 1;
                    }

                    self.dup_acks += 1;
                    if self.dup_acks == 2 {
                        self.dup_acks = 0;
                        outcome.resend = true;
                    }

                    Exit::Settled
                } else {
                    cwnd = self.ssthresh;

                    if summary.nr_nacks == 0 {
                        self.resume_normality(cwnd, now_us);
                    }

                    Exit::Settled
                }
            }
        };

        if let Exit::Settled = exit {
            self.cumulative_acks = 0;
        }

        self.cwnd = cwnd.clamp(1, MAX_WINDOW);

        outcome
    }

    fn enter_packet_loss(&mut self) {
        trace!("congestion: nack seen, entering packet loss");

        self.mode = Mode::PacketLoss;
        self.dup_acks = 0;
    }

    fn resume_normality(&mut self, cwnd: u32, now_us: u64) {
        trace!("congestion: nacks cleared");

        self.dup_acks = 0;
        self.extra = 0;
        self.period_start_us = now_us;

        self.mode = if cwnd < self.ssthresh {
            Mode::SlowStart
        } else {
            Mode::CongestAvoidance
        };
    }

    fn grant_extra(&mut self, tx_top_is_last: bool) -> bool {
        // No point asking for more data once the terminator is in flight
        if !tx_top_is_last {
            self.extra += 1;
            true
        } else {
            false
        }
    }
}
