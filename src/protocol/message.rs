use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::core::Secret;
use super::validate::{check_packet_id, check_zeroes, Rejection};

/// Stage A request payload
pub const GREETING: &[u8] = b"hello world\0";

/// A fixed-size payload carried by one of the protocol's frames
pub trait Payload: Sized {
    /// Exact unpadded payload size
    const LEN: usize;

    fn put(&self, dst: &mut BytesMut);

    /// Reads the fields from a buffer already known to hold `LEN` bytes
    fn get(src: &mut &[u8]) -> Self;

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::LEN);
        self.put(&mut buf);
        buf.freeze()
    }

    fn parse(payload: &[u8]) -> Result<Self, Rejection> {
        if payload.len() != Self::LEN {
            return Err(Rejection::LengthMismatch {
                expected: Self::LEN as u32,
                actual: payload.len() as u32,
            });
        }
        let mut src = payload;
        Ok(Self::get(&mut src))
    }
}

/// Stage A response: parameters of the datagram transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreetingReply {
    /// Number of packets to transfer
    pub num: u32,
    /// Zero bytes following each packet id
    pub length: u32,
    /// Port of the transfer endpoint
    pub udp_port: u32,
    pub secret_a: Secret,
}

impl Payload for GreetingReply {
    const LEN: usize = 16;

    fn put(&self, dst: &mut BytesMut) {
        dst.put_u32(self.num);
        dst.put_u32(self.length);
        dst.put_u32(self.udp_port);
        dst.put_u32(self.secret_a.0);
    }

    fn get(src: &mut &[u8]) -> Self {
        GreetingReply {
            num: src.get_u32(),
            length: src.get_u32(),
            udp_port: src.get_u32(),
            secret_a: Secret(src.get_u32()),
        }
    }
}

/// Stage B acknowledgment of a single packet id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub packet_id: u32,
}

impl Payload for Ack {
    const LEN: usize = 4;

    fn put(&self, dst: &mut BytesMut) {
        dst.put_u32(self.packet_id);
    }

    fn get(src: &mut &[u8]) -> Self {
        Ack {
            packet_id: src.get_u32(),
        }
    }
}

/// Stage B terminal response: where the stream stage listens
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferReply {
    pub tcp_port: u32,
    pub secret_b: Secret,
}

impl Payload for TransferReply {
    const LEN: usize = 8;

    fn put(&self, dst: &mut BytesMut) {
        dst.put_u32(self.tcp_port);
        dst.put_u32(self.secret_b.0);
    }

    fn get(src: &mut &[u8]) -> Self {
        TransferReply {
            tcp_port: src.get_u32(),
            secret_b: Secret(src.get_u32()),
        }
    }
}

/// Stage C response: shape of the frames the initiator must stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSetup {
    /// Number of frames
    pub num2: u32,
    /// Payload length of each frame
    pub len2: u32,
    pub secret_c: Secret,
    /// Byte every payload is filled with
    pub fill: u8,
}

impl Payload for StreamSetup {
    const LEN: usize = 13;

    fn put(&self, dst: &mut BytesMut) {
        dst.put_u32(self.num2);
        dst.put_u32(self.len2);
        dst.put_u32(self.secret_c.0);
        dst.put_u8(self.fill);
    }

    fn get(src: &mut &[u8]) -> Self {
        StreamSetup {
            num2: src.get_u32(),
            len2: src.get_u32(),
            secret_c: Secret(src.get_u32()),
            fill: src.get_u8(),
        }
    }
}

/// Stage D terminal response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamReply {
    pub secret_d: Secret,
}

impl Payload for StreamReply {
    const LEN: usize = 4;

    fn put(&self, dst: &mut BytesMut) {
        dst.put_u32(self.secret_d.0);
    }

    fn get(src: &mut &[u8]) -> Self {
        StreamReply {
            secret_d: Secret(src.get_u32()),
        }
    }
}

/// Stage B request payload: `packet_id` followed by `length` zero bytes
pub fn transfer_packet(packet_id: u32, length: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + length as usize);
    buf.put_u32(packet_id);
    buf.put_bytes(0, length as usize);
    buf.freeze()
}

/// Extracts the packet id of a length-checked transfer payload
pub fn parse_transfer_packet(payload: &[u8], num: u32) -> Result<u32, Rejection> {
    if payload.len() < 4 {
        return Err(Rejection::content("transfer payload shorter than a packet id"));
    }
    let packet_id = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    check_packet_id(packet_id, num)?;
    check_zeroes(&payload[4..])?;
    Ok(packet_id)
}

/// Narrows an advertised 32-bit port field
pub fn port(raw: u32) -> Result<u16, Rejection> {
    u16::try_from(raw)
        .ok()
        .filter(|&p| p != 0)
        .ok_or_else(|| Rejection::content(format!("advertised port {} is not a valid port", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_literal() {
        assert_eq!(GREETING.len(), 12);
        assert_eq!(GREETING.last(), Some(&0));
    }

    #[test]
    fn test_payload_layouts() {
        let reply = GreetingReply {
            num: 3,
            length: 8,
            udp_port: 40_000,
            secret_a: Secret(77),
        };
        let bytes = reply.to_bytes();
        assert_eq!(bytes.len(), GreetingReply::LEN);
        assert_eq!(&bytes[8..12], &40_000u32.to_be_bytes());
        assert_eq!(GreetingReply::parse(&bytes).unwrap(), reply);

        let setup = StreamSetup {
            num2: 2,
            len2: 4,
            secret_c: Secret(0x0102_0304),
            fill: b'X',
        };
        let bytes = setup.to_bytes();
        assert_eq!(&bytes[..], &[0, 0, 0, 2, 0, 0, 0, 4, 1, 2, 3, 4, b'X']);
        assert_eq!(StreamSetup::parse(&bytes).unwrap(), setup);

        let reply = TransferReply {
            tcp_port: 5000,
            secret_b: Secret(9),
        };
        assert_eq!(TransferReply::parse(&reply.to_bytes()).unwrap(), reply);
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert_eq!(
            Ack::parse(&[0, 0, 0, 1, 0]),
            Err(Rejection::LengthMismatch { expected: 4, actual: 5 })
        );
        assert!(StreamReply::parse(&[0, 0]).is_err());
    }

    #[test]
    fn test_transfer_packet_shape() {
        let payload = transfer_packet(3, 8);
        assert_eq!(payload.len(), 12);
        assert_eq!(parse_transfer_packet(&payload, 5), Ok(3));
        assert!(parse_transfer_packet(&payload, 3).is_err());

        let mut dirty = payload.to_vec();
        dirty[7] = 1;
        assert!(matches!(
            parse_transfer_packet(&dirty, 5),
            Err(Rejection::ContentMismatch(_))
        ));
    }

    #[test]
    fn test_port_narrowing() {
        assert_eq!(port(443), Ok(443));
        assert!(port(0).is_err());
        assert!(port(70_000).is_err());
    }
}
