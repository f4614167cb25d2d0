//! Packet builders and a recording context shared by the flow tests.

use rxcall::serial::{write_header, Serial as WireSerial, ACK_BODY_SIZE};
use rxcall::{
    AckBody, AckInfo, AckReason, CallContext, CompletionKind, Header, PacketType, RttSampleKind,
    Serial, HEADER_SIZE, JUMBO_DATALEN,
};

#[derive(Default)]
pub struct RecordingContext {
    pub acks: Vec<(AckReason, Serial, bool)>,
    pub resends: u32,
    pub notifies: u32,
    pub samples: Vec<(RttSampleKind, u64, u64)>,
    pub srtt_us: Option<u64>,
    pub completions: Vec<(CompletionKind, u32, i32)>,
    pub infos: Vec<AckInfo>,
}

impl RecordingContext {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn last_ack(&self) -> Option<(AckReason, Serial, bool)> {
        self.acks.last().copied()
    }
}

impl CallContext for RecordingContext {
    fn propose_ack(&mut self, reason: AckReason, serial: Serial, immediate: bool, _can_delay: bool) {
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

    fn peer_ack_info(&mut self, info: &AckInfo) {
        self.infos.push(*info);
    }
}

pub fn header(packet_type: PacketType, seq: u32, serial: Serial, flags: u8) -> Header {
    Header {
        epoch: 1,
        cid: 0x4000_0000,
        call_number: 1,
        seq,
        serial,
        packet_type,
        flags,
        user_status: 0,
        security_index: 0,
        service_id: 2034,
    }
}

pub fn datagram(header_fields: &Header, payload: &[u8]) -> Vec<u8> {
    let mut bytes = vec![0u8; HEADER_SIZE];
    write_header(&mut bytes, header_fields).unwrap();
    bytes.extend_from_slice(payload);
    bytes
}

pub fn data_packet(seq: u32, serial: Serial, flags: u8, payload: &[u8]) -> Vec<u8> {
    datagram(&header(PacketType::Data, seq, serial, flags), payload)
}

/// A two-subpacket jumbo DATA datagram: one full-size subpacket, a
/// continuation header carrying `second_flags`, then `second` payload.
pub fn jumbo_packet(seq: u32, serial: Serial, second_flags: u8, second: &[u8]) -> Vec<u8> {
    let mut payload = vec![0xAA; JUMBO_DATALEN];
    payload.push(second_flags);
    payload.extend_from_slice(&[0, 0, 0]);
    payload.extend_from_slice(second);

    datagram(
        &header(PacketType::Data, seq, serial, rxcall::FLAG_JUMBO_PACKET),
        &payload,
    )
}

pub fn ack_packet(
    serial: Serial,
    acked_serial: Serial,
    first_packet: u32,
    reason: AckReason,
    acks: &[u8],
    info: Option<AckInfo>,
) -> Vec<u8> {
    let body = AckBody {
        acked_serial,
        first_packet,
        previous_packet: 0,
        reason,
        n_acks: acks.len() as u8,
    };

    let mut payload = vec![0u8; ACK_BODY_SIZE];
    <AckBody as WireSerial>::write(&mut payload, &body).unwrap();
    payload.extend_from_slice(acks);

    if let Some(info) = info {
        // Pad the soft-ack vector end to 4-byte alignment
        while payload.len() % 4 != 0 {
            payload.push(0);
        }

        let offset = payload.len();
        payload.resize(offset + 16, 0);
        <AckInfo as WireSerial>::write(&mut payload[offset..], &info).unwrap();
    }

    datagram(&header(PacketType::Ack, 0, serial, 0), &payload)
}

pub fn abort_packet(serial: Serial, body: &[u8]) -> Vec<u8> {
    datagram(&header(PacketType::Abort, 0, serial, 0), body)
}

pub fn ackall_packet(serial: Serial) -> Vec<u8> {
    datagram(&header(PacketType::AckAll, 0, serial, 0), &[])
}
