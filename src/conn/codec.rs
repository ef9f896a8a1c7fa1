//! MySQL client wire framing and primitive decoders.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// MySQL packet header size: 3 bytes length + 1 byte sequence
pub const PACKET_HEADER_SIZE: usize = 4;

pub const COM_QUERY: u8 = 0x03;
pub const COM_PING: u8 = 0x0e;

/// MySQL wire protocol packet
#[derive(Debug, Clone)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_id,
            payload: payload.into(),
        }
    }

    /// A command packet: opcode byte followed by its argument
    pub fn command(opcode: u8, arg: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(1 + arg.len());
        payload.push(opcode);
        payload.extend_from_slice(arg);
        Self::new(0, payload)
    }

    /// Encode packet to bytes (header + payload)
    pub fn encode(&self, dst: &mut BytesMut) {
        let len = self.payload.len();
        // 3 bytes for length (little endian)
        dst.put_u8((len & 0xFF) as u8);
        dst.put_u8(((len >> 8) & 0xFF) as u8);
        dst.put_u8(((len >> 16) & 0xFF) as u8);
        // 1 byte for sequence id
        dst.put_u8(self.sequence_id);
        // Payload
        dst.extend_from_slice(&self.payload);
    }

    /// Try to decode packet from bytes, returns None if not enough data
    pub fn decode(src: &mut BytesMut) -> Option<Self> {
        if src.len() < PACKET_HEADER_SIZE {
            return None;
        }

        // Length (3 bytes, little endian)
        let len = src[0] as usize | ((src[1] as usize) << 8) | ((src[2] as usize) << 16);

        let total_len = PACKET_HEADER_SIZE + len;
        if src.len() < total_len {
            return None;
        }

        let sequence_id = src[3];
        src.advance(PACKET_HEADER_SIZE);
        let payload = src.split_to(len).freeze();

        Some(Self {
            sequence_id,
            payload,
        })
    }
}

/// Packet codec for use with tokio Framed
#[derive(Debug, Default)]
pub struct PacketCodec;

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(Packet::decode(src))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

/// Capability flags negotiated during the handshake
#[allow(dead_code)]
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 14;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Capabilities requested by the monitor client.
    ///
    /// CLIENT_DEPRECATE_EOF is not requested: some backends advertise it but
    /// still send EOF packets, and the classic resultset framing is
    /// unambiguous without it.
    pub const DEFAULT_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
        | CLIENT_PROTOCOL_41
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH;
}

/// Check if packet is an OK packet
pub fn is_ok_packet(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == 0x00
}

/// Check if packet is an ERR packet
pub fn is_err_packet(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == 0xFF
}

/// Check if packet is an EOF packet (classic framing)
pub fn is_eof_packet(payload: &[u8]) -> bool {
    !payload.is_empty() && payload[0] == 0xFE && payload.len() < 9
}

/// Read a length-encoded integer, advancing the slice. None on truncation.
pub fn read_lenenc_int(buf: &mut &[u8]) -> Option<u64> {
    if buf.is_empty() {
        return None;
    }
    let first = buf[0];
    match first {
        0..=0xFA => {
            buf.advance(1);
            Some(first as u64)
        }
        0xFC if buf.len() >= 3 => {
            let v = u16::from_le_bytes([buf[1], buf[2]]) as u64;
            buf.advance(3);
            Some(v)
        }
        0xFD if buf.len() >= 4 => {
            let v = u32::from_le_bytes([buf[1], buf[2], buf[3], 0]) as u64;
            buf.advance(4);
            Some(v)
        }
        0xFE if buf.len() >= 9 => {
            let v = u64::from_le_bytes([
                buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8],
            ]);
            buf.advance(9);
            Some(v)
        }
        _ => None,
    }
}

/// Read a length-encoded string, advancing the slice.
///
/// `Ok(None)` is a SQL NULL (0xFB marker); the outer None is truncation.
pub fn read_lenenc_str(buf: &mut &[u8]) -> Option<Option<String>> {
    if buf.is_empty() {
        return None;
    }
    if buf[0] == 0xFB {
        buf.advance(1);
        return Some(None);
    }
    let len = read_lenenc_int(buf)? as usize;
    if buf.len() < len {
        return None;
    }
    let s = String::from_utf8_lossy(&buf[..len]).to_string();
    buf.advance(len);
    Some(Some(s))
}

/// Extract the column name (5th length-encoded string) from a
/// ColumnDefinition41 packet payload.
pub fn column_name(payload: &[u8]) -> Option<String> {
    let mut buf = payload;
    // catalog, schema, table, org_table precede the name
    for _ in 0..4 {
        read_lenenc_str(&mut buf)?;
    }
    read_lenenc_str(&mut buf)?
}
