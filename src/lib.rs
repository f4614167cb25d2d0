/*

rxcall implements the receiving half of the RxRPC reliable transport: the
state machine that takes classified inbound packets for one call and turns
them into window updates, congestion decisions, acknowledgment proposals,
and call lifecycle transitions. It is sans-I/O: sockets, timers, the ack
transmitter, and the retransmission scheduler all live with the caller and
are reached through the CallContext trait.

# Calls over connections

RxRPC multiplexes many request/response exchanges ("calls") over a shared
UDP connection. Each DATA packet carries a 32-bit per-call sequence number
and a 32-bit per-connection serial number. Sequences order the data stream
of one call; serials identify individual transmissions, so a retransmitted
packet keeps its sequence but takes a fresh serial. Acks reference both:
the hard-ack point and soft-ack vector speak about sequences, while the
"serial that prompted this ack" field lets the sender correlate round
trips.

# Windows

Both directions run a 64-slot ring indexed by sequence modulo the ring
size. The transmit window keeps every packet from the hard-ack point to
the newest transmission, each slot annotated as unacked, soft-acked,
nacked, or retransmit-pending. A hard ack rotates the window: slots up to
the new edge are released and anything not previously soft-acked counts as
newly acknowledged for congestion purposes.

The receive window accepts packets in any arrival order inside the
advertised window, rejects duplicates, and tracks the next expected
sequence. Delivery to the application drains the ring strictly in order
and advances the receive hard-ack edge, reopening the window.

# Congestion control

The window is counted in packets and adjusted in the TCP Reno manner,
informed by https://intronetworks.cs.luc.edu/current/html/reno.html, with
two explicit probing modes layered on: the first nack moves the machine
into packet-loss mode, and three duplicate loss indications there trigger
fast retransmit (ssthresh = max(flight/2, 2), cwnd = ssthresh + 3). In
congestion avoidance the window only widens once per smoothed-RTT period,
and only if the peer kept the window full; with no RTT sample yet, growth
waits.

# Acknowledgment decisions

Each inbound DATA datagram produces at most one ack proposal, the highest
priority applicable: duplicate and window-overflow conditions short-circuit,
an explicit request-ack bit yields REQUESTED, skipped sequences yield
OUT_OF_SEQUENCE, and plain in-order data settles for a delayable DELAY ack
(promoted to immediate when it fills a hole). Jumbo datagrams whose
subpackets keep duplicating previously received data are eventually
answered with NOSPACE, telling the peer to stop sending jumbos.

# Validation

Structural damage (truncated header, unknown packet type, broken jumbo
chain) drops the datagram before it reaches a call. Semantic violations
discovered during processing, such as hard-ack regression, a soft-ack
vector wider than the outstanding range, a first-soft-ack of zero, or a
moved stream terminator, abort the call with RX_PROTOCOL_ERROR. A remote
ABORT completes the call with the carried code, defaulting to
RX_CALL_DEAD when the body is unreadable.

*/

mod call;
mod seq;
mod wire;

pub use call::{
    AckSummary, Call, CallContext, CallState, Completion, CompletionKind, CongestOutcome,
    Congestion, Config, Insert, Mode, RttProbeTable, RttSampleKind, RxWindow, TxAnnotation,
    TxWindow, ECONNABORTED, EPROTO, MAX_WINDOW, RING_SIZE,
};
pub use seq::{after, after_eq, before, before_eq, Seq, Serial};
pub use wire::{
    classify, serial, AckBody, AckInfo, AckReason, Header, Packet, PacketType, ProtocolViolation,
    Subpacket, FLAG_CLIENT_INITIATED, FLAG_JUMBO_PACKET, FLAG_LAST_PACKET, FLAG_MORE_PACKETS,
    FLAG_REQUEST_ACK, FLAG_SLOW_START_OK, HEADER_SIZE, JUMBO_DATALEN, RX_CALL_DEAD,
    RX_PROTOCOL_ERROR, RX_USER_ABORT,
};
pub use wire::Subpackets;
