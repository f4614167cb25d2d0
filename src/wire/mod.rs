//! RxRPC wire format: the common packet header, DATA jumbo chains, and the
//! ACK/ABORT packet bodies.
//!
//! Everything on the wire is big-endian. A datagram that fails structural
//! validation here is dropped whole by the dispatcher; body-level problems
//! discovered during call processing abort only the affected call.

pub mod serial;

use crate::seq::{Seq, Serial};

use thiserror::Error;

pub const HEADER_SIZE: usize = 28;

// DATA subpacket framing within a jumbo datagram
pub const JUMBO_DATALEN: usize = 1412;
pub const JUMBO_HEADER_SIZE: usize = 4;
pub const JUMBO_SUBPKTLEN: usize = JUMBO_DATALEN + JUMBO_HEADER_SIZE;

// Header flag bits
pub const FLAG_CLIENT_INITIATED: u8 = 0x01;
pub const FLAG_REQUEST_ACK: u8 = 0x02;
pub const FLAG_LAST_PACKET: u8 = 0x04;
pub const FLAG_MORE_PACKETS: u8 = 0x08;
pub const FLAG_JUMBO_PACKET: u8 = 0x20;
pub const FLAG_SLOW_START_OK: u8 = 0x20;

// Abort codes, as transmitted (32-bit two's complement on the wire)
pub const RX_CALL_DEAD: u32 = 0xffff_ffff; // -1
pub const RX_PROTOCOL_ERROR: u32 = 0xffff_fffb; // -5
pub const RX_USER_ABORT: u32 = 0xffff_fffa; // -6

// Soft-ack vector byte values
pub const ACK_TYPE_NACK: u8 = 0;
pub const ACK_TYPE_ACK: u8 = 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PacketType {
    Data,
    Ack,
    Busy,
    Abort,
    AckAll,
    Version,
}

impl PacketType {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Data),
            2 => Some(Self::Ack),
            3 => Some(Self::Busy),
            4 => Some(Self::Abort),
            5 => Some(Self::AckAll),
            13 => Some(Self::Version),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::Data => 1,
            Self::Ack => 2,
            Self::Busy => 3,
            Self::Abort => 4,
            Self::AckAll => 5,
            Self::Version => 13,
        }
    }
}

/// Reason attached to a proposed or received ACK packet.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AckReason {
    Requested,
    Duplicate,
    OutOfSequence,
    ExceedsWindow,
    NoSpace,
    Ping,
    PingResponse,
    Delay,
    Idle,
    /// Reserved/unrecognized reason byte; processed but never generated.
    Invalid,
}

impl AckReason {
    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => Self::Requested,
            2 => Self::Duplicate,
            3 => Self::OutOfSequence,
            4 => Self::ExceedsWindow,
            5 => Self::NoSpace,
            6 => Self::Ping,
            7 => Self::PingResponse,
            8 => Self::Delay,
            9 => Self::Idle,
            _ => Self::Invalid,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::Requested => 1,
            Self::Duplicate => 2,
            Self::OutOfSequence => 3,
            Self::ExceedsWindow => 4,
            Self::NoSpace => 5,
            Self::Ping => 6,
            Self::PingResponse => 7,
            Self::Delay => 8,
            Self::Idle => 9,
            Self::Invalid => 0,
        }
    }
}

/// Structural or semantic protocol violations. Violations detected while
/// classifying a datagram drop the datagram; violations detected while
/// processing a call's packet abort that call with `RX_PROTOCOL_ERROR`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum ProtocolViolation {
    #[error("datagram too short for packet header")]
    ShortHeader,
    #[error("unrecognized packet type")]
    UnknownPacketType,
    #[error("jumbo continuation flagged on last packet")]
    JumboContinuationOnLast,
    #[error("jumbo subpacket truncated")]
    JumboShortSubpacket,
    #[error("ACK body truncated")]
    ShortAck,
    #[error("ACK info trailer truncated")]
    ShortAckInfo,
    #[error("soft-ack vector truncated")]
    ShortSoftAcks,
    #[error("invalid soft-ack byte")]
    BadAckType,
    #[error("ACK first packet of zero")]
    ZeroFirstSoftAck,
    #[error("hard-ack outside transmit window")]
    AckOutsideWindow,
    #[error("soft-ack count exceeds outstanding range")]
    SoftAckOverflow,
    #[error("last-packet flag moved to a different sequence")]
    LastSequenceChanged,
    #[error("data received beyond the last packet")]
    DataAfterLast,
    #[error("reply began before request fully sent")]
    ReplyBeforeLastSent,
}

/// Parsed common header. Field order matches the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
    pub epoch: u32,
    pub cid: u32,
    pub call_number: u32,
    pub seq: Seq,
    pub serial: Serial,
    pub packet_type: PacketType,
    pub flags: u8,
    pub user_status: u8,
    pub security_index: u8,
    pub service_id: u16,
}

/// Fixed portion of an ACK packet body.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AckBody {
    pub acked_serial: Serial,
    pub first_packet: Seq,
    pub previous_packet: Seq,
    pub reason: AckReason,
    pub n_acks: u8,
}

/// Optional trailer carrying the peer's transport parameters.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AckInfo {
    pub rx_mtu: u32,
    pub max_mtu: u32,
    pub rwind: u32,
    pub jumbo_max: u32,
}

/// One DATA subpacket after jumbo expansion. `flags` is the effective flag
/// byte for this subpacket: the outer header's for the first, each jumbo
/// continuation header's for the rest.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Subpacket<'a> {
    pub flags: u8,
    pub data: &'a [u8],
}

impl<'a> Subpacket<'a> {
    pub fn is_last(&self) -> bool {
        self.flags & FLAG_LAST_PACKET != 0
    }

    pub fn wants_ack(&self) -> bool {
        self.flags & FLAG_REQUEST_ACK != 0
    }
}

/// A classified datagram: validated header plus the undecoded payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Packet<'a> {
    pub header: Header,
    pub payload: &'a [u8],
    nr_subpackets: u8,
}

impl<'a> Packet<'a> {
    pub fn nr_subpackets(&self) -> u8 {
        self.nr_subpackets
    }

    pub fn is_jumbo(&self) -> bool {
        self.nr_subpackets > 1
    }

    /// Iterates the DATA subpackets. Valid only after `classify` accepted
    /// the datagram; the chain structure has already been checked.
    pub fn subpackets(&self) -> Subpackets<'a> {
        Subpackets {
            flags: self.header.flags,
            rest: self.payload,
            done: false,
        }
    }
}

pub struct Subpackets<'a> {
    flags: u8,
    rest: &'a [u8],
    done: bool,
}

impl<'a> Iterator for Subpackets<'a> {
    type Item = Subpacket<'a>;

    fn next(&mut self) -> Option<Subpacket<'a>> {
        if self.done {
            return None;
        }

        if self.flags & FLAG_JUMBO_PACKET != 0 {
            // Validated: a full subpacket plus continuation header follows
            let data = &self.rest[..JUMBO_DATALEN];
            let flags = self.flags;

            self.flags = self.rest[JUMBO_DATALEN];
            self.rest = &self.rest[JUMBO_SUBPKTLEN..];

            Some(Subpacket {
                flags: flags & !FLAG_JUMBO_PACKET,
                data,
            })
        } else {
            self.done = true;

            Some(Subpacket {
                flags: self.flags,
                data: self.rest,
            })
        }
    }
}

/// Checks the jumbo subpacket chain of a DATA payload, returning the
/// subpacket count.
///
/// Each continuation must be followed by exactly `JUMBO_DATALEN` payload
/// bytes plus a continuation header; a continuation flag combined with the
/// last-packet flag, or a truncated subpacket, rejects the whole datagram.
fn validate_jumbo(mut flags: u8, payload: &[u8]) -> Result<u8, ProtocolViolation> {
    let mut nr_subpackets: u8 = 1;
    let mut offset = 0;

    while flags & FLAG_JUMBO_PACKET != 0 {
        if flags & FLAG_LAST_PACKET != 0 {
            return Err(ProtocolViolation::JumboContinuationOnLast);
        }

        if payload.len() - offset < JUMBO_SUBPKTLEN {
            return Err(ProtocolViolation::JumboShortSubpacket);
        }

        flags = payload[offset + JUMBO_DATALEN];
        offset += JUMBO_SUBPKTLEN;

        nr_subpackets = nr_subpackets.saturating_add(1);
    }

    Ok(nr_subpackets)
}

/// Classifies a raw datagram: parses the common header, rejects unknown
/// packet types, and validates jumbo DATA structure. The returned packet
/// borrows the payload beyond the header.
pub fn classify(datagram: &[u8]) -> Result<Packet<'_>, ProtocolViolation> {
    let (header, size) = serial::read_header(datagram)?;
    let payload = &datagram[size..];

    let nr_subpackets = match header.packet_type {
        PacketType::Data if header.flags & FLAG_JUMBO_PACKET != 0 => {
            validate_jumbo(header.flags, payload)?
        }
        _ => 1,
    };

    Ok(Packet {
        header,
        payload,
        nr_subpackets,
    })
}
