// OBEX packet framing - pure data structures, no I/O
//
//   opcode(1) | total_length(2, big-endian, includes these 3 bytes) | fixed fields | headers
use crate::error::CodecError;
use crate::header::HeaderIter;
use crate::types::{FINAL_BIT, PACKET_PREFIX_LEN};
use obex_buffer::ByteBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketPrefix {
    pub opcode: u8,
    pub length: u16,
}

impl PacketPrefix {
    /// Read the prefix of the packet at the front of `bytes`.
    pub fn peek(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < PACKET_PREFIX_LEN {
            return Err(CodecError::TruncatedInput {
                needed: PACKET_PREFIX_LEN - bytes.len(),
            });
        }
        let length = u16::from_be_bytes([bytes[1], bytes[2]]);
        if (length as usize) < PACKET_PREFIX_LEN {
            return Err(CodecError::MalformedPacket("packet length below 3"));
        }
        Ok(PacketPrefix {
            opcode: bytes[0],
            length,
        })
    }
}

/// Length of the first complete packet buffered in `bytes`.
///
/// `TruncatedInput` means the packet is not complete yet; keep reading.
pub fn complete_packet_len(bytes: &[u8]) -> Result<usize, CodecError> {
    let prefix = PacketPrefix::peek(bytes)?;
    let len = prefix.length as usize;
    if bytes.len() < len {
        return Err(CodecError::TruncatedInput {
            needed: len - bytes.len(),
        });
    }
    Ok(len)
}

// One complete packet, borrowed from the receive buffer
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub opcode: u8,
    pub fixed: &'a [u8],       // Fields between the length and the first header
    pub headers: &'a [u8],
}

impl<'a> Packet<'a> {
    pub fn parse(bytes: &'a [u8], fixed_len: usize) -> Result<Self, CodecError> {
        let len = complete_packet_len(bytes)?;
        if len < PACKET_PREFIX_LEN + fixed_len {
            return Err(CodecError::MalformedPacket("packet shorter than its fixed fields"));
        }
        let body = &bytes[PACKET_PREFIX_LEN..len];
        Ok(Packet {
            opcode: bytes[0],
            fixed: &body[..fixed_len],
            headers: &body[fixed_len..],
        })
    }

    pub fn is_final(&self) -> bool {
        self.opcode & FINAL_BIT != 0
    }

    pub fn len(&self) -> usize {
        PACKET_PREFIX_LEN + self.fixed.len() + self.headers.len()
    }

    pub fn header_iter(&self) -> HeaderIter<'a> {
        HeaderIter::new(self.headers)
    }
}

/// Start assembling an outgoing packet: clear `buf` and leave room for the prefix.
pub fn begin_packet(buf: &mut ByteBuffer) -> Result<(), CodecError> {
    buf.clear();
    buf.reserve_end(PACKET_PREFIX_LEN)?;
    Ok(())
}

/// Fill in the prefix once every field and header has been appended.
pub fn finish_packet(buf: &mut ByteBuffer, opcode: u8) -> Result<(), CodecError> {
    let len = buf.len();
    if len < PACKET_PREFIX_LEN || len > u16::MAX as usize {
        return Err(CodecError::MalformedPacket("outgoing packet length out of range"));
    }
    buf[0] = opcode;
    buf[1..3].copy_from_slice(&(len as u16).to_be_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Header;

    fn sample_packet() -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        begin_packet(&mut buf).unwrap();
        buf.append(&[0x10, 0x00, 0x10, 0x00]).unwrap();
        Header::name("x").encode(&mut buf).unwrap();
        finish_packet(&mut buf, 0x80).unwrap();
        buf.to_vec()
    }

    #[test]
    fn prefix_needs_three_bytes() {
        assert_eq!(
            PacketPrefix::peek(&[0x80, 0x00]),
            Err(CodecError::TruncatedInput { needed: 1 })
        );
        assert!(PacketPrefix::peek(&[0x80, 0x00, 0x02]).is_err());
    }

    #[test]
    fn declared_length_beyond_input_is_truncated() {
        let packet = sample_packet();
        for cut in 0..packet.len() {
            assert!(complete_packet_len(&packet[..cut]).unwrap_err().is_truncated());
        }
        assert_eq!(complete_packet_len(&packet), Ok(packet.len()));
    }

    #[test]
    fn trailing_bytes_belong_to_the_next_packet() {
        let mut bytes = sample_packet();
        let first_len = bytes.len();
        bytes.extend_from_slice(&[0xFF, 0x00, 0x03]);
        let packet = Packet::parse(&bytes, 4).unwrap();
        assert_eq!(packet.len(), first_len);
        assert!(packet.is_final());
        assert_eq!(packet.fixed, &[0x10, 0x00, 0x10, 0x00]);
        let names: Vec<_> = packet.header_iter().map(|h| h.unwrap()).collect();
        assert_eq!(names, vec![Header::name("x")]);
    }

    #[test]
    fn fixed_fields_must_fit() {
        assert!(Packet::parse(&[0x80, 0x00, 0x05, 0x10, 0x00], 4).is_err());
    }
}
