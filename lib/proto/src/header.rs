use crate::error::{ErrorType, NetworkError, NetworkResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Size in bytes of the framed message header on the wire: four 32-bit
/// fields, fixed big-endian regardless of host architecture.
pub const HEADER_SIZE: usize = 16;

/// The fixed header prefixing every framed message (`broadcast_message`,
/// gather replies that opt into framing, multicast chunk headers). Layout
/// is part of the wire contract and must not change without bumping
/// `PROTOCOL_ID`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
    pub sender_rank: u32,
    pub send_kind: u32,
    pub type_tag: u32,
    pub payload_length: u32,
}

impl Header {
    #[inline]
    pub fn write<W: Write>(&self, mut stream: W) -> NetworkResult<()> {
        stream.write_u32::<BigEndian>(self.sender_rank)?;
        stream.write_u32::<BigEndian>(self.send_kind)?;
        stream.write_u32::<BigEndian>(self.type_tag)?;
        stream.write_u32::<BigEndian>(self.payload_length)?;
        Ok(())
    }

    #[inline]
    pub fn read<R: Read>(mut stream: R) -> NetworkResult<Header> {
        Ok(Header {
            sender_rank: stream.read_u32::<BigEndian>()?,
            send_kind: stream.read_u32::<BigEndian>()?,
            type_tag: stream.read_u32::<BigEndian>()?,
            payload_length: stream.read_u32::<BigEndian>()?,
        })
    }

    #[inline]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.write(&mut buf[..]).expect("fixed-size buffer write cannot fail");
        buf
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> NetworkResult<Header> {
        Header::read(&bytes[..])
    }
}

/// A fully materialized framed message: header plus owned payload bytes.
/// This is what `broadcast_message` hands back to callers on the receiving
/// side, and what the external bus relay forwards to slaves.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Message {
    pub sender_rank: u32,
    pub send_kind: u32,
    pub type_tag: u32,
    pub payload: Vec<u8>,
}

/// Maximum payload this implementation will allocate for a single framed
/// message; guards against a corrupt or hostile length field turning into
/// an unbounded allocation.
pub const MAX_PAYLOAD_LENGTH: u32 = 256 * 1024 * 1024;

impl Message {
    #[inline]
    pub fn new(sender_rank: u32, send_kind: u32, type_tag: u32, payload: Vec<u8>) -> Message {
        Message {
            sender_rank,
            send_kind,
            type_tag,
            payload,
        }
    }

    #[inline]
    pub fn header(&self) -> NetworkResult<Header> {
        let payload_length = u32::try_from(self.payload.len())
            .map_err(|_| NetworkError::Fatal(ErrorType::PayloadTooLarge))?;

        if payload_length > MAX_PAYLOAD_LENGTH {
            return Err(NetworkError::Fatal(ErrorType::PayloadTooLarge));
        }

        Ok(Header {
            sender_rank: self.sender_rank,
            send_kind: self.send_kind,
            type_tag: self.type_tag,
            payload_length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_bytes() {
        let header = Header {
            sender_rank: 0,
            send_kind: 42,
            type_tag: 7,
            payload_length: 5,
        };

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);

        let decoded = Header::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn message_header_matches_payload_length() {
        let message = Message::new(0, 42, 7, b"hello".to_vec());
        let header = message.header().unwrap();

        assert_eq!(header.sender_rank, 0);
        assert_eq!(header.send_kind, 42);
        assert_eq!(header.type_tag, 7);
        assert_eq!(header.payload_length, 5);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let message = Message::new(0, 0, 0, vec![0u8; (MAX_PAYLOAD_LENGTH + 1) as usize]);
        assert_eq!(message.header(), Err(NetworkError::Fatal(ErrorType::PayloadTooLarge)));
    }
}
