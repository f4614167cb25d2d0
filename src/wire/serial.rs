use super::*;

pub const ACK_BODY_SIZE: usize = 14;
pub const ACK_INFO_SIZE: usize = 16;
pub const ABORT_SIZE: usize = 4;

pub struct Reader<'a> {
    ptr: *const u8,
    bytes_read: usize,
    _lifetime: std::marker::PhantomData<&'a ()>,
}

impl<'a> Reader<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            ptr: buffer.as_ptr(),
            bytes_read: 0,
            _lifetime: Default::default(),
        }
    }

    pub fn bytes_read(&self) -> usize {
        self.bytes_read
    }

    pub unsafe fn read_u8(&mut self) -> u8 {
        let value = *self.ptr;
        self.ptr = self.ptr.offset(1);
        self.bytes_read += 1;
        value
    }

    pub unsafe fn read_u16(&mut self) -> u16 {
        let mut value = 0;
        value |= (*self.ptr.offset(0) as u16) << 8;
        value |= *self.ptr.offset(1) as u16;
        self.ptr = self.ptr.offset(2);
        self.bytes_read += 2;
        value
    }

    pub unsafe fn read_u32(&mut self) -> u32 {
        let mut value = 0;
        value |= (*self.ptr.offset(0) as u32) << 24;
        value |= (*self.ptr.offset(1) as u32) << 16;
        value |= (*self.ptr.offset(2) as u32) << 8;
        value |= *self.ptr.offset(3) as u32;
        self.ptr = self.ptr.offset(4);
        self.bytes_read += 4;
        value
    }
}

pub struct Writer<'a> {
    ptr: *mut u8,
    bytes_written: usize,
    _lifetime: std::marker::PhantomData<&'a ()>,
}

impl<'a> Writer<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            ptr: buffer.as_mut_ptr(),
            bytes_written: 0,
            _lifetime: Default::default(),
        }
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written
    }

    pub unsafe fn write_u8(&mut self, value: u8) {
        *self.ptr = value;
        self.ptr = self.ptr.offset(1);
        self.bytes_written += 1;
    }

    pub unsafe fn write_u16(&mut self, value: u16) {
        *self.ptr.offset(0) = (value >> 8) as u8;
        *self.ptr.offset(1) = (value) as u8;
        self.ptr = self.ptr.offset(2);
        self.bytes_written += 2;
    }

    pub unsafe fn write_u32(&mut self, value: u32) {
        *self.ptr.offset(0) = (value >> 24) as u8;
        *self.ptr.offset(1) = (value >> 16) as u8;
        *self.ptr.offset(2) = (value >> 8) as u8;
        *self.ptr.offset(3) = (value) as u8;
        self.ptr = self.ptr.offset(4);
        self.bytes_written += 4;
    }
}

pub trait BlockSerial {
    const SIZE: usize;

    unsafe fn read(rd: &mut Reader) -> Self
    where
        Self: Sized;

    unsafe fn write(wr: &mut Writer, obj: &Self);
}

pub trait Serial<'a> {
    fn read(buffer: &'a [u8]) -> Option<(Self, usize)>
    where
        Self: Sized;

    fn write(buffer: &mut [u8], obj: &Self) -> Option<usize>;
}

impl<'a, T> Serial<'a> for T
where
    T: BlockSerial,
{
    fn read(buffer: &'a [u8]) -> Option<(Self, usize)> {
        if buffer.len() < T::SIZE {
            return None;
        }

        let rd = &mut Reader::new(buffer);

        let obj = unsafe { T::read(rd) };

        debug_assert_eq!(rd.bytes_read(), T::SIZE);

        Some((obj, rd.bytes_read()))
    }

    fn write(buffer: &mut [u8], obj: &Self) -> Option<usize> {
        if buffer.len() < T::SIZE {
            return None;
        }

        let mut wr = Writer::new(buffer);

        unsafe {
            T::write(&mut wr, obj);
        }

        debug_assert_eq!(wr.bytes_written(), T::SIZE);

        Some(wr.bytes_written())
    }
}

impl BlockSerial for AckBody {
    const SIZE: usize = ACK_BODY_SIZE;

    unsafe fn read(rd: &mut Reader) -> Self {
        let acked_serial = rd.read_u32();
        let first_packet = rd.read_u32();
        let previous_packet = rd.read_u32();
        let reason = AckReason::from_wire(rd.read_u8());
        let n_acks = rd.read_u8();

        Self {
            acked_serial,
            first_packet,
            previous_packet,
            reason,
            n_acks,
        }
    }

    unsafe fn write(wr: &mut Writer, obj: &Self) {
        wr.write_u32(obj.acked_serial);
        wr.write_u32(obj.first_packet);
        wr.write_u32(obj.previous_packet);
        wr.write_u8(obj.reason.to_wire());
        wr.write_u8(obj.n_acks);
    }
}

impl BlockSerial for AckInfo {
    const SIZE: usize = ACK_INFO_SIZE;

    unsafe fn read(rd: &mut Reader) -> Self {
        let rx_mtu = rd.read_u32();
        let max_mtu = rd.read_u32();
        let rwind = rd.read_u32();
        let jumbo_max = rd.read_u32();

        Self {
            rx_mtu,
            max_mtu,
            rwind,
            jumbo_max,
        }
    }

    unsafe fn write(wr: &mut Writer, obj: &Self) {
        wr.write_u32(obj.rx_mtu);
        wr.write_u32(obj.max_mtu);
        wr.write_u32(obj.rwind);
        wr.write_u32(obj.jumbo_max);
    }
}

/// Parses the 28-byte common header at the front of a datagram.
pub fn read_header(datagram: &[u8]) -> Result<(Header, usize), ProtocolViolation> {
    if datagram.len() < HEADER_SIZE {
        return Err(ProtocolViolation::ShortHeader);
    }

    let mut rd = Reader::new(datagram);

    let header = unsafe {
        let epoch = rd.read_u32();
        let cid = rd.read_u32();
        let call_number = rd.read_u32();
        let seq = rd.read_u32();
        let serial = rd.read_u32();
        let type_byte = rd.read_u8();
        let flags = rd.read_u8();
        let user_status = rd.read_u8();
        let security_index = rd.read_u8();
        let _rsvd = rd.read_u16();
        let service_id = rd.read_u16();

        let packet_type =
            PacketType::from_wire(type_byte).ok_or(ProtocolViolation::UnknownPacketType)?;

        Header {
            epoch,
            cid,
            call_number,
            seq,
            serial,
            packet_type,
            flags,
            user_status,
            security_index,
            service_id,
        }
    };

    debug_assert_eq!(rd.bytes_read(), HEADER_SIZE);

    Ok((header, HEADER_SIZE))
}

/// Writes a common header; the inverse of `read_header`.
pub fn write_header(buffer: &mut [u8], header: &Header) -> Option<usize> {
    if buffer.len() < HEADER_SIZE {
        return None;
    }

    let mut wr = Writer::new(buffer);

    unsafe {
        wr.write_u32(header.epoch);
        wr.write_u32(header.cid);
        wr.write_u32(header.call_number);
        wr.write_u32(header.seq);
        wr.write_u32(header.serial);
        wr.write_u8(header.packet_type.to_wire());
        wr.write_u8(header.flags);
        wr.write_u8(header.user_status);
        wr.write_u8(header.security_index);
        wr.write_u16(0);
        wr.write_u16(header.service_id);
    }

    debug_assert_eq!(wr.bytes_written(), HEADER_SIZE);

    Some(HEADER_SIZE)
}

/// Offset of the info trailer within an ACK payload: the soft-ack vector
/// end, rounded up to 4-byte alignment.
pub fn ack_info_offset(n_acks: u8) -> usize {
    let end = ACK_BODY_SIZE + n_acks as usize;
    (end + 3) & !3
}

/// Reads the fixed ACK body from an ACK packet payload.
pub fn read_ack_body(payload: &[u8]) -> Result<AckBody, ProtocolViolation> {
    match <AckBody as Serial>::read(payload) {
        Some((body, _)) => Ok(body),
        None => Err(ProtocolViolation::ShortAck),
    }
}

/// Borrows the soft-ack vector following the fixed ACK body.
pub fn soft_acks(payload: &[u8], n_acks: u8) -> Result<&[u8], ProtocolViolation> {
    let end = ACK_BODY_SIZE + n_acks as usize;

    if payload.len() < end {
        return Err(ProtocolViolation::ShortSoftAcks);
    }

    Ok(&payload[ACK_BODY_SIZE..end])
}

/// Reads the optional info trailer. Absent entirely is fine; present but
/// truncated is a violation.
pub fn read_ack_info(payload: &[u8], n_acks: u8) -> Result<Option<AckInfo>, ProtocolViolation> {
    let offset = ack_info_offset(n_acks);

    if payload.len() <= offset {
        return Ok(None);
    }

    match <AckInfo as Serial>::read(&payload[offset..]) {
        Some((info, _)) => Ok(Some(info)),
        None => Err(ProtocolViolation::ShortAckInfo),
    }
}

/// Reads an ABORT packet's code, substituting the documented default when
/// the body is absent or truncated.
pub fn read_abort_code(payload: &[u8]) -> u32 {
    if payload.len() < ABORT_SIZE {
        return RX_CALL_DEAD;
    }

    let mut rd = Reader::new(payload);

    unsafe { rd.read_u32() }
}
