//! Per-call transport state: the windows, the congestion machine, and the
//! dispatcher that applies one classified packet to them.
//!
//! A `Call` performs no I/O and never blocks. Every outward effect (ack
//! proposals, resend scheduling, application wakeups, completion) is
//! raised through the [`CallContext`] supplied to each entry point.
//!
//! All mutating methods take `&mut self`: the exclusive borrow is the
//! per-call processing lock. An owner that shares a call across threads
//! wraps it in a mutex and holds that mutex for the duration of each entry
//! point; packets for one call must be applied in network-delivery order.

use crate::seq;
use crate::seq::{Seq, Serial};
use crate::wire;
use crate::wire::{
    AckInfo, AckReason, PacketType, ProtocolViolation, FLAG_REQUEST_ACK, JUMBO_DATALEN,
    RX_PROTOCOL_ERROR,
};

use std::sync::Arc;

use log::{debug, trace, warn};

mod cc;
mod rtt;
mod rx_window;
mod tx_window;

pub use cc::{CongestOutcome, Congestion, Mode};
pub use rtt::{RttProbeTable, RttSampleKind};
pub use rx_window::{Insert, RxWindow};
pub use tx_window::{TxAnnotation, TxWindow};

/// Slots in each of the transmit and receive rings.
pub const RING_SIZE: u32 = 64;
const RING_MASK: u32 = RING_SIZE - 1;

/// Ceiling on window sizes; one below the ring capacity so a full window
/// never wraps onto its own tail.
pub const MAX_WINDOW: u32 = RING_SIZE - 1;

// Tolerated partially-duplicate jumbo datagrams before NOSPACE
const JUMBO_BAD_LIMIT: u8 = 3;

// Completion error values, errno-style
pub const ECONNABORTED: i32 = 103;
pub const EPROTO: i32 = 71;

/// Per-call tunables.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Receive window advertised to the peer, in packets.
    pub rx_winsize: u32,
    /// Segment size the transmit path will use; sizes the initial
    /// congestion window.
    pub tx_segment_size: usize,
    /// Overrides the segment-size-derived initial congestion window.
    pub initial_cwnd: Option<u32>,
    /// Drop every eighth inbound packet before processing, for loss-path
    /// testing.
    pub inject_rx_loss: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rx_winsize: MAX_WINDOW,
            tx_segment_size: JUMBO_DATALEN,
            initial_cwnd: None,
            inject_rx_loss: false,
        }
    }
}

fn initial_cwnd(segment_size: usize) -> u32 {
    if segment_size > 2190 {
        2
    } else if segment_size > 1095 {
        3
    } else {
        4
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallState {
    ClientSendRequest,
    ClientAwaitReply,
    ClientRecvReply,
    ServerRecvRequest,
    ServerSendReply,
    ServerAwaitAck,
    Complete,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompletionKind {
    Succeeded,
    RemotelyAborted,
    LocallyAborted,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Completion {
    pub kind: CompletionKind,
    pub abort_code: u32,
    pub error: i32,
}

/// Counts produced while applying one ACK (or a rotation event) to the
/// transmit window, consumed by the congestion machine and discarded.
#[derive(Clone, Copy, Debug, Default)]
pub struct AckSummary {
    pub nr_acks: u8,
    pub nr_nacks: u8,
    pub nr_new_acks: u8,
    pub nr_new_nacks: u8,
    pub nr_rot_new_acks: u8,
    pub new_low_nack: bool,
    pub rotated_last: bool,
}

/// Everything a call asks of its surroundings.
pub trait CallContext {
    /// Proposes sending an ACK with the given reason, referencing the
    /// serial that prompted it. `immediate` bypasses delay batching;
    /// `can_delay` permits merging with a later proposal.
    fn propose_ack(&mut self, reason: AckReason, serial: Serial, immediate: bool, can_delay: bool);

    /// At least one transmitted packet should be retransmitted.
    fn schedule_resend(&mut self);

    /// Wakes whoever is waiting on this call: a receiver with newly
    /// deliverable data, or a sender granted window space.
    fn notify_socket(&mut self);

    /// Delivers one round-trip-time sample to the peer's aggregate state.
    fn add_rtt_sample(&mut self, kind: RttSampleKind, sent_at_us: u64, resp_time_us: u64);

    /// The peer's smoothed RTT, or None before the first sample.
    fn rtt_estimate_us(&self) -> Option<u64>;

    /// The call reached a terminal state.
    fn call_complete(&mut self, kind: CompletionKind, abort_code: u32, error: i32);

    /// The peer reported its transport parameters in an ACK trailer.
    fn peer_ack_info(&mut self, _info: &AckInfo) {}
}

// Decision produced by the DATA subpacket walk; consumed by the proposal
// tail of input_data.
struct DataDecision {
    reason: Option<AckReason>,
    serial: Serial,
    immediate: bool,
}

pub struct Call {
    debug_id: u32,
    config: Config,
    client: bool,

    state: CallState,
    completion: Option<Completion>,

    tx: TxWindow,
    rx: RxWindow,
    congestion: Congestion,
    rtt_probes: RttProbeTable,

    // The stream terminator has been rotated out of the transmit window
    tx_last: bool,

    // Serial of the newest ACK whose window information was applied
    acks_latest: Serial,

    // Partially-duplicate jumbo datagrams seen so far
    nr_jumbo_bad: u8,

    // Peer's advertised receive window, from the ACK info trailer
    peer_rwind: u32,

    // Receive slots freed since the last idle ack proposal
    rx_freed: u32,

    lose_counter: u8,
}

impl Call {
    pub fn client(debug_id: u32, config: Config) -> Self {
        Self::new(debug_id, config, true)
    }

    pub fn server(debug_id: u32, config: Config) -> Self {
        Self::new(debug_id, config, false)
    }

    fn new(debug_id: u32, config: Config, client: bool) -> Self {
        Self {
            debug_id,
            config,
            client,
            state: if client {
                CallState::ClientSendRequest
            } else {
                CallState::ServerRecvRequest
            },
            completion: None,
            tx: TxWindow::new(),
            rx: RxWindow::new(config.rx_winsize),
            congestion: Congestion::new(
                config
                    .initial_cwnd
                    .unwrap_or_else(|| initial_cwnd(config.tx_segment_size)),
            ),
            rtt_probes: RttProbeTable::new(),
            tx_last: false,
            acks_latest: 0,
            nr_jumbo_bad: 0,
            peer_rwind: MAX_WINDOW,
            rx_freed: 0,
            lose_counter: 0,
        }
    }

    pub fn debug_id(&self) -> u32 {
        self.debug_id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn completion(&self) -> Option<Completion> {
        self.completion
    }

    pub fn is_complete(&self) -> bool {
        self.state == CallState::Complete
    }

    pub fn tx_window(&self) -> &TxWindow {
        &self.tx
    }

    pub fn rx_window(&self) -> &RxWindow {
        &self.rx
    }

    pub fn congestion(&self) -> &Congestion {
        &self.congestion
    }

    /// Peer's advertised receive window, bounding how far the send path
    /// may run ahead of the hard ack.
    pub fn peer_rwind(&self) -> u32 {
        self.peer_rwind
    }

    /// Applies one classified inbound packet to this call.
    ///
    /// Packets arriving after completion are discarded unprocessed.
    pub fn handle_packet<C: CallContext>(
        &mut self,
        packet: &wire::Packet<'_>,
        now_us: u64,
        ctx: &mut C,
    ) {
        if self.state == CallState::Complete {
            trace!(
                "c={} discarding {:?} for completed call",
                self.debug_id,
                packet.header.packet_type
            );
            return;
        }

        if self.config.inject_rx_loss {
            let lose = self.lose_counter;
            self.lose_counter = lose.wrapping_add(1);

            if lose & 7 == 7 {
                debug!(
                    "c={} injected loss of serial {}",
                    self.debug_id, packet.header.serial
                );
                return;
            }
        }

        match packet.header.packet_type {
            PacketType::Data => self.input_data(packet, ctx),
            PacketType::Ack => self.input_ack(packet, now_us, ctx),
            PacketType::Abort => self.input_abort(packet, ctx),
            PacketType::AckAll => self.input_ackall(ctx),
            PacketType::Busy => {
                // The retry and lifespan policy for a busy server lives
                // with the call's owner
                trace!("c={} peer busy, ignored", self.debug_id);
            }
            PacketType::Version => {}
        }
    }

    /// Places a packet in the transmit window for sending. Queueing the
    /// terminator moves the call into its awaiting phase. Returns the
    /// assigned sequence number, or None if the window is full or the
    /// call is not in a sending phase.
    pub fn queue_tx(&mut self, data: Arc<[u8]>, last: bool) -> Option<Seq> {
        let next_state = match self.state {
            CallState::ClientSendRequest => CallState::ClientAwaitReply,
            CallState::ServerSendReply => CallState::ServerAwaitAck,
            _ => return None,
        };

        let seq = self.tx.append(data, last)?;

        if last {
            self.state = next_state;
            trace!("c={} queued terminator at seq {}", self.debug_id, seq);
        }

        Some(seq)
    }

    /// Takes the next in-order received packet, advancing the receive
    /// window. Consuming the terminator ends the receive phase.
    pub fn recv_next<C: CallContext>(&mut self, ctx: &mut C) -> Option<Box<[u8]>> {
        match self.state {
            CallState::ClientRecvReply | CallState::ServerRecvRequest => {}
            _ => return None,
        }

        let (seq, data, last) = self.rx.take_next()?;

        trace!("c={} delivered seq {}", self.debug_id, seq);

        if last {
            self.end_rx_phase(ctx);
        } else {
            self.rx_freed += 1;

            if self.rx_freed >= 2 {
                // The window reopened; tell the peer, no hurry
                self.rx_freed = 0;
                ctx.propose_ack(AckReason::Idle, 0, false, true);
            }
        }

        Some(data)
    }

    /// Records an outbound RTT probe for the given serial.
    pub fn rtt_probe_sent(&mut self, serial: Serial, now_us: u64) -> bool {
        self.rtt_probes.arm(serial, now_us)
    }

    /// Notes a retransmission timeout; the congestion window collapse is
    /// applied when the next ack arrives.
    pub fn note_retransmit_timeout(&mut self) {
        self.congestion.note_retrans_timeout();
    }

    /// Borrows a packet for retransmission, marking its slot pending.
    pub fn retransmit_packet(&mut self, seq: Seq) -> Option<Arc<[u8]>> {
        self.tx.mark_retrans(seq)
    }

    /// Aborts the call locally with the given code.
    pub fn abort<C: CallContext>(&mut self, abort_code: u32, ctx: &mut C) {
        self.set_completion(CompletionKind::LocallyAborted, abort_code, ECONNABORTED, ctx);
    }

    fn input_data<C: CallContext>(&mut self, packet: &wire::Packet<'_>, ctx: &mut C) {
        let header = &packet.header;

        // A reply implies the peer has the whole request: the transmit
        // phase completes implicitly
        if matches!(
            self.state,
            CallState::ClientSendRequest | CallState::ClientAwaitReply
        ) && !self.receiving_reply(ctx)
        {
            return;
        }

        let decision = match self.process_data_subpackets(packet) {
            Ok(decision) => decision,
            Err(violation) => return self.proto_abort(violation, ctx),
        };

        match decision.reason {
            Some(reason) => ctx.propose_ack(reason, decision.serial, decision.immediate, true),
            None => ctx.propose_ack(AckReason::Delay, header.serial, false, true),
        }

        // New in-order data is ready for the application
        if header.seq == self.rx.hard_ack().wrapping_add(1) {
            ctx.notify_socket();
        }
    }

    // Walks the DATA subpackets, mutating the receive window and deciding
    // the single highest-priority ack to propose for the datagram.
    fn process_data_subpackets(
        &mut self,
        packet: &wire::Packet<'_>,
    ) -> Result<DataDecision, ProtocolViolation> {
        let header = &packet.header;
        let is_jumbo = packet.is_jumbo();

        let mut decision = DataDecision {
            reason: None,
            serial: header.serial,
            immediate: false,
        };

        if self.rx.beyond_window(header.seq) {
            decision.reason = Some(AckReason::ExceedsWindow);
            return Ok(decision);
        }

        if is_jumbo {
            if self.nr_jumbo_bad > JUMBO_BAD_LIMIT {
                decision.reason = Some(AckReason::NoSpace);
                return Ok(decision);
            }
        } else {
            // A plain packet shows the sender backed off jumbos; restart
            // duplicate detection
            self.nr_jumbo_bad = 0;
        }

        // One budget charge per datagram, however many duplicate
        // subpackets it carries
        let mut jumbo_charged = false;

        let mut final_serial = header.serial;
        let mut final_queued = false;
        let mut final_last = false;

        for (index, subpacket) in packet.subpackets().enumerate() {
            let seq = header.seq.wrapping_add(index as u32);
            let serial = header.serial.wrapping_add(index as u32);

            final_serial = serial;
            final_queued = false;
            final_last = subpacket.is_last();

            match self.rx.insert(seq, subpacket.data, subpacket.is_last())? {
                Insert::DuplicateLow => {
                    decision.reason = Some(AckReason::Duplicate);
                    decision.serial = serial;
                }

                Insert::DuplicateSlot => {
                    if is_jumbo && !jumbo_charged {
                        self.nr_jumbo_bad = self.nr_jumbo_bad.saturating_add(1);
                        jumbo_charged = true;
                    }

                    if decision.reason != Some(AckReason::Duplicate) {
                        decision.reason = Some(AckReason::Duplicate);
                        decision.serial = serial;
                    }
                    decision.immediate = true;
                }

                Insert::ExceedsWindow => {
                    decision.reason = Some(AckReason::ExceedsWindow);
                    decision.serial = serial;

                    if is_jumbo && !jumbo_charged {
                        self.nr_jumbo_bad = self.nr_jumbo_bad.saturating_add(1);
                        jumbo_charged = true;
                    }

                    break;
                }

                Insert::Accepted {
                    filled_hole,
                    out_of_sequence,
                } => {
                    if subpacket.wants_ack() && decision.reason.is_none() {
                        decision.reason = Some(AckReason::Requested);
                        decision.serial = serial;
                    }

                    if filled_hole {
                        if decision.reason.is_none() {
                            decision.reason = Some(AckReason::Delay);
                            decision.serial = serial;
                        }
                        decision.immediate = true;
                    }

                    if out_of_sequence {
                        decision.reason = Some(AckReason::OutOfSequence);
                        decision.serial = serial;
                    }

                    final_queued = true;
                }
            }
        }

        // Accepting the terminator is worth an ack even without a request
        if final_queued && final_last && decision.reason.is_none() {
            decision.reason = Some(AckReason::Delay);
            decision.serial = final_serial;
        }

        Ok(decision)
    }

    // The client saw the first packet of the reply: everything sent must
    // be deliverable, so rotate it all and leave the transmit phase.
    fn receiving_reply<C: CallContext>(&mut self, ctx: &mut C) -> bool {
        if !self.tx_last {
            let top = self.tx.top();
            let mut summary = AckSummary::default();

            self.tx.rotate(top, &mut summary);

            if summary.rotated_last {
                self.tx_last = true;
            }
        }

        if !self.tx_last {
            self.proto_abort(ProtocolViolation::ReplyBeforeLastSent, ctx);
            return false;
        }

        self.end_tx_phase(true, ctx);
        true
    }

    fn input_ack<C: CallContext>(
        &mut self,
        packet: &wire::Packet<'_>,
        now_us: u64,
        ctx: &mut C,
    ) {
        let header = &packet.header;

        let body = match wire::serial::read_ack_body(packet.payload) {
            Ok(body) => body,
            Err(violation) => return self.proto_abort(violation, ctx),
        };

        let hard_ack = body.first_packet.wrapping_sub(1);

        // An ack referencing a probed serial closes the RTT sample
        let sample_kind = match body.reason {
            AckReason::PingResponse => Some(RttSampleKind::PingResponse),
            AckReason::Requested => Some(RttSampleKind::RequestedAck),
            _ => None,
        };

        if let Some(kind) = sample_kind {
            if let Some(sent_at_us) = self.rtt_probes.complete(body.acked_serial) {
                ctx.add_rtt_sample(kind, sent_at_us, now_us);
            }
        }

        if body.reason == AckReason::Ping {
            ctx.propose_ack(AckReason::PingResponse, header.serial, true, true);
        } else if header.flags & FLAG_REQUEST_ACK != 0 {
            ctx.propose_ack(AckReason::Requested, header.serial, true, true);
        }

        // Window information from a reordered older ack is stale
        if seq::before_eq(header.serial, self.acks_latest) {
            debug!(
                "c={} discarding old ack serial {} <= {}",
                self.debug_id, header.serial, self.acks_latest
            );
            return;
        }
        self.acks_latest = header.serial;

        match wire::serial::read_ack_info(packet.payload, body.n_acks) {
            Ok(Some(info)) => {
                self.peer_rwind = info.rwind.min(MAX_WINDOW);
                ctx.peer_ack_info(&info);
            }
            Ok(None) => {}
            Err(violation) => return self.proto_abort(violation, ctx),
        }

        if body.first_packet == 0 {
            return self.proto_abort(ProtocolViolation::ZeroFirstSoftAck, ctx);
        }

        // Acks only matter while we are, or just were, transmitting
        match self.state {
            CallState::ClientSendRequest
            | CallState::ClientAwaitReply
            | CallState::ServerSendReply
            | CallState::ServerAwaitAck => {}
            _ => {
                trace!("c={} ack outside transmit phase, ignored", self.debug_id);
                return;
            }
        }

        if seq::before(hard_ack, self.tx.hard_ack()) || seq::after(hard_ack, self.tx.top()) {
            return self.proto_abort(ProtocolViolation::AckOutsideWindow, ctx);
        }

        if u32::from(body.n_acks) > self.tx.top().wrapping_sub(hard_ack) {
            return self.proto_abort(ProtocolViolation::SoftAckOverflow, ctx);
        }

        let mut summary = AckSummary::default();

        if seq::after(hard_ack, self.tx.hard_ack()) {
            self.tx.rotate(hard_ack, &mut summary);

            if summary.rotated_last {
                self.tx_last = true;
            }
        }

        if body.n_acks > 0 {
            let acks = match wire::serial::soft_acks(packet.payload, body.n_acks) {
                Ok(acks) => acks,
                Err(violation) => return self.proto_abort(violation, ctx),
            };

            if let Err(violation) = self.tx.apply_soft_acks(body.first_packet, acks, &mut summary)
            {
                return self.proto_abort(violation, ctx);
            }
        }

        if self.tx_last {
            self.end_tx_phase(false, ctx);
            return;
        }

        // Everything outstanding is soft-acked and the terminator is in
        // flight; ping for the final hard ack rather than waiting it out
        if self.client
            && self.tx.top_is_last()
            && u32::from(summary.nr_acks) == self.tx.top().wrapping_sub(hard_ack)
        {
            ctx.propose_ack(AckReason::Ping, header.serial, false, true);
        }

        let flight_size = self.tx.outstanding() - u32::from(summary.nr_acks);

        let outcome = self.congestion.on_ack(
            &summary,
            flight_size,
            now_us,
            ctx.rtt_estimate_us(),
            self.tx.top_is_last(),
        );

        if outcome.resend {
            ctx.schedule_resend();
        }

        if outcome.extra_granted {
            ctx.notify_socket();
        }
    }

    fn input_ackall<C: CallContext>(&mut self, ctx: &mut C) {
        let top = self.tx.top();
        let mut summary = AckSummary::default();

        self.tx.rotate(top, &mut summary);

        if summary.rotated_last {
            self.tx_last = true;
            self.end_tx_phase(false, ctx);
        }
    }

    fn input_abort<C: CallContext>(&mut self, packet: &wire::Packet<'_>, ctx: &mut C) {
        let abort_code = wire::serial::read_abort_code(packet.payload);

        trace!("c={} remote abort, code {}", self.debug_id, abort_code);

        self.set_completion(
            CompletionKind::RemotelyAborted,
            abort_code,
            ECONNABORTED,
            ctx,
        );
    }

    fn end_tx_phase<C: CallContext>(&mut self, reply_begun: bool, ctx: &mut C) {
        match self.state {
            CallState::ClientSendRequest | CallState::ClientAwaitReply => {
                self.state = if reply_begun {
                    CallState::ClientRecvReply
                } else {
                    CallState::ClientAwaitReply
                };

                trace!("c={} transmit phase ended, {:?}", self.debug_id, self.state);
            }
            CallState::ServerAwaitAck => {
                self.set_completion(CompletionKind::Succeeded, 0, 0, ctx);
            }
            _ => {
                debug!(
                    "c={} transmit phase end in unexpected state {:?}",
                    self.debug_id, self.state
                );
            }
        }
    }

    fn end_rx_phase<C: CallContext>(&mut self, ctx: &mut C) {
        match self.state {
            CallState::ClientRecvReply => {
                self.set_completion(CompletionKind::Succeeded, 0, 0, ctx);
            }
            CallState::ServerRecvRequest => {
                self.state = CallState::ServerSendReply;
                trace!("c={} request received, sending reply", self.debug_id);
            }
            _ => {}
        }
    }

    fn proto_abort<C: CallContext>(&mut self, violation: ProtocolViolation, ctx: &mut C) {
        warn!("c={} protocol error: {}", self.debug_id, violation);

        self.set_completion(
            CompletionKind::LocallyAborted,
            RX_PROTOCOL_ERROR,
            EPROTO,
            ctx,
        );
    }

    fn set_completion<C: CallContext>(
        &mut self,
        kind: CompletionKind,
        abort_code: u32,
        error: i32,
        ctx: &mut C,
    ) {
        if self.state == CallState::Complete {
            return;
        }

        self.state = CallState::Complete;
        self.completion = Some(Completion {
            kind,
            abort_code,
            error,
        });

        ctx.call_complete(kind, abort_code, error);
        ctx.notify_socket();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{classify, serial::write_header, Header, FLAG_LAST_PACKET};

    #[derive(Default)]
    struct RecordingContext {
        acks: Vec<(AckReason, Serial, bool)>,
        resends: u32,
        notifies: u32,
        samples: Vec<(RttSampleKind, u64, u64)>,
        srtt_us: Option<u64>,
        completions: Vec<(CompletionKind, u32, i32)>,
    }

    impl CallContext for RecordingContext {
        fn propose_ack(
            &mut self,
            reason: AckReason,
            serial: Serial,
            immediate: bool,
            _can_delay: bool,
        ) {
            self.acks.push((reason, serial, immediate));
        }

        fn schedule_resend(&mut self) {
            self.resends += 1;
        }

        fn notify_socket(&mut self) {
            self.notifies += 1;
        }

        fn add_rtt_sample(&mut self, kind: RttSampleKind, sent_at_us: u64, resp_time_us: u64) {
            self.samples.push((kind, sent_at_us, resp_time_us));
        }

        fn rtt_estimate_us(&self) -> Option<u64> {
            self.srtt_us
        }

        fn call_complete(&mut self, kind: CompletionKind, abort_code: u32, error: i32) {
            self.completions.push((kind, abort_code, error));
        }
    }

    fn data_header(seq: Seq, serial: Serial, flags: u8) -> Header {
        Header {
            epoch: 1,
            cid: 0x4000_0000,
            call_number: 1,
            seq,
            serial,
            packet_type: PacketType::Data,
            flags,
            user_status: 0,
            security_index: 0,
            service_id: 0,
        }
    }

    fn datagram(header: &Header, payload: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0u8; wire::HEADER_SIZE];
        write_header(&mut bytes, header).unwrap();
        bytes.extend_from_slice(payload);
        bytes
    }

    fn deliver(call: &mut Call, bytes: &[u8], ctx: &mut RecordingContext) {
        let packet = classify(bytes).unwrap();
        call.handle_packet(&packet, 0, ctx);
    }

    #[test]
    fn server_receives_request_in_order() {
        let mut call = Call::server(1, Config::default());
        let mut ctx = RecordingContext::default();

        let bytes = datagram(&data_header(1, 10, 0), b"one");
        deliver(&mut call, &bytes, &mut ctx);

        let bytes = datagram(&data_header(2, 11, FLAG_LAST_PACKET), b"two");
        deliver(&mut call, &bytes, &mut ctx);

        // Only the packet landing at the in-order edge notified the
        // application; the second queued behind undelivered data
        assert_eq!(ctx.notifies, 1);

        assert_eq!(call.recv_next(&mut ctx).unwrap().as_ref(), b"one");
        assert_eq!(call.state(), CallState::ServerRecvRequest);
        assert_eq!(call.recv_next(&mut ctx).unwrap().as_ref(), b"two");
        assert_eq!(call.state(), CallState::ServerSendReply);
    }

    #[test]
    fn loss_injection_drops_every_eighth() {
        let config = Config {
            inject_rx_loss: true,
            ..Config::default()
        };

        let mut call = Call::server(1, config);
        let mut ctx = RecordingContext::default();

        for i in 0..16u32 {
            let bytes = datagram(&data_header(i + 1, i + 1, 0), b"x");
            deliver(&mut call, &bytes, &mut ctx);
        }

        // Packets 8 and 16 were dropped before processing
        assert_eq!(call.rx_window().top(), 15);
        assert_eq!(call.rx_window().expect_next(), 16);
    }

    #[test]
    fn packets_after_completion_are_discarded() {
        let mut call = Call::server(1, Config::default());
        let mut ctx = RecordingContext::default();

        let mut header = data_header(0, 5, 0);
        header.packet_type = PacketType::Abort;
        let bytes = datagram(&header, &wire::RX_USER_ABORT.to_be_bytes());

        deliver(&mut call, &bytes, &mut ctx);

        assert!(call.is_complete());
        assert_eq!(
            call.completion().unwrap(),
            Completion {
                kind: CompletionKind::RemotelyAborted,
                abort_code: wire::RX_USER_ABORT,
                error: ECONNABORTED,
            }
        );

        // Subsequent data mutates nothing
        let bytes = datagram(&data_header(1, 6, 0), b"late");
        deliver(&mut call, &bytes, &mut ctx);

        assert_eq!(call.rx_window().top(), 0);
    }

    #[test]
    fn ping_gets_an_immediate_response() {
        let mut call = Call::server(1, Config::default());
        let mut ctx = RecordingContext::default();

        let mut payload = vec![0u8; wire::serial::ACK_BODY_SIZE];
        let body = wire::AckBody {
            acked_serial: 0,
            first_packet: 1,
            previous_packet: 0,
            reason: AckReason::Ping,
            n_acks: 0,
        };
        <wire::AckBody as wire::serial::Serial>::write(&mut payload, &body).unwrap();

        let mut header = data_header(0, 9, 0);
        header.packet_type = PacketType::Ack;
        let bytes = datagram(&header, &payload);

        deliver(&mut call, &bytes, &mut ctx);

        assert_eq!(ctx.acks, vec![(AckReason::PingResponse, 9, true)]);
        assert!(!call.is_complete());
    }

    #[test]
    fn stale_ack_serial_is_ignored() {
        let mut call = Call::client(1, Config::default());
        let mut ctx = RecordingContext::default();

        for i in 0..4 {
            call.queue_tx(Arc::from(&b"p"[..]), i == 3).unwrap();
        }

        let ack = |serial: Serial, first: Seq| {
            let mut payload = vec![0u8; wire::serial::ACK_BODY_SIZE];
            let body = wire::AckBody {
                acked_serial: 0,
                first_packet: first,
                previous_packet: 0,
                reason: AckReason::Delay,
                n_acks: 0,
            };
            <wire::AckBody as wire::serial::Serial>::write(&mut payload, &body).unwrap();

            let mut header = data_header(0, serial, 0);
            header.packet_type = PacketType::Ack;
            datagram(&header, &payload)
        };

        deliver(&mut call, &ack(20, 3), &mut ctx);
        assert_eq!(call.tx_window().hard_ack(), 2);

        // An older serial reporting a larger hard ack is stale
        deliver(&mut call, &ack(19, 4), &mut ctx);
        assert_eq!(call.tx_window().hard_ack(), 2);

        deliver(&mut call, &ack(21, 4), &mut ctx);
        assert_eq!(call.tx_window().hard_ack(), 3);
    }
}
