// OBEX header codec - tagged values, no I/O
//
// The top two bits of the identifier byte select how the value is encoded:
//   00  unicode text, 2 byte length prefix, UTF-16BE, null terminated
//   01  byte sequence, 2 byte length prefix
//   10  1 byte quantity
//   11  4 byte quantity, big-endian
// Length prefixes count the identifier and the prefix itself.
use crate::error::CodecError;
use obex_buffer::ByteBuffer;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    Unicode,
    Bytes,
    U8,
    U32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeaderId(pub u8);

impl HeaderId {
    pub const COUNT: HeaderId = HeaderId(0xC0);
    pub const NAME: HeaderId = HeaderId(0x01);
    pub const TYPE: HeaderId = HeaderId(0x42);
    pub const LENGTH: HeaderId = HeaderId(0xC3);
    pub const TIME: HeaderId = HeaderId(0x44);
    pub const DESCRIPTION: HeaderId = HeaderId(0x05);
    pub const TARGET: HeaderId = HeaderId(0x46);
    pub const HTTP: HeaderId = HeaderId(0x47);
    pub const BODY: HeaderId = HeaderId(0x48);
    pub const END_OF_BODY: HeaderId = HeaderId(0x49);
    pub const WHO: HeaderId = HeaderId(0x4A);
    pub const CONNECTION_ID: HeaderId = HeaderId(0xCB);
    pub const APP_PARAMETERS: HeaderId = HeaderId(0x4C);
    pub const AUTH_CHALLENGE: HeaderId = HeaderId(0x4D);
    pub const AUTH_RESPONSE: HeaderId = HeaderId(0x4E);
    pub const CREATOR: HeaderId = HeaderId(0xCF);
    pub const WAN_UUID: HeaderId = HeaderId(0x50);
    pub const OBJECT_CLASS: HeaderId = HeaderId(0x51);
    pub const SESSION_PARAMETERS: HeaderId = HeaderId(0x52);
    pub const SESSION_SEQUENCE: HeaderId = HeaderId(0x93);
    pub const ACTION_ID: HeaderId = HeaderId(0x94);
    pub const DEST_NAME: HeaderId = HeaderId(0x15);
    pub const PERMISSIONS: HeaderId = HeaderId(0xD6);
    pub const SRM: HeaderId = HeaderId(0x97);
    pub const SRM_PARAMETERS: HeaderId = HeaderId(0x98);

    pub fn kind(self) -> HeaderKind {
        match self.0 & 0xC0 {
            0x00 => HeaderKind::Unicode,
            0x40 => HeaderKind::Bytes,
            0x80 => HeaderKind::U8,
            _ => HeaderKind::U32,
        }
    }

    pub fn is_body(self) -> bool {
        self == HeaderId::BODY || self == HeaderId::END_OF_BODY
    }
}

// Values of the SRM header
pub mod srm {
    pub const DISABLE: u8 = 0x00;
    pub const ENABLE: u8 = 0x01;
    pub const SUPPORTED: u8 = 0x02;

    /// SRM-Parameters value asking the receiver to wait for one more packet.
    pub const PARAM_WAIT: u8 = 0x01;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    Unicode(String),
    Bytes(Vec<u8>),
    U8(u8),
    U32(u32),
}

impl HeaderValue {
    pub fn kind(&self) -> HeaderKind {
        match self {
            HeaderValue::Unicode(_) => HeaderKind::Unicode,
            HeaderValue::Bytes(_) => HeaderKind::Bytes,
            HeaderValue::U8(_) => HeaderKind::U8,
            HeaderValue::U32(_) => HeaderKind::U32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    id: HeaderId,
    value: HeaderValue,
}

impl Header {
    /// Pair an identifier with a value; the value kind must match the id's top bits.
    pub fn new(id: HeaderId, value: HeaderValue) -> Result<Self, CodecError> {
        if id.kind() != value.kind() {
            return Err(CodecError::KindMismatch { id: id.0 });
        }
        Ok(Header { id, value })
    }

    pub fn name(name: &str) -> Self {
        Header {
            id: HeaderId::NAME,
            value: HeaderValue::Unicode(name.to_string()),
        }
    }

    pub fn description(text: &str) -> Self {
        Header {
            id: HeaderId::DESCRIPTION,
            value: HeaderValue::Unicode(text.to_string()),
        }
    }

    /// MIME type; sent as null terminated ASCII.
    pub fn mime_type(mime: &str) -> Self {
        let mut bytes = mime.as_bytes().to_vec();
        bytes.push(0);
        Header {
            id: HeaderId::TYPE,
            value: HeaderValue::Bytes(bytes),
        }
    }

    pub fn length(len: u32) -> Self {
        Header {
            id: HeaderId::LENGTH,
            value: HeaderValue::U32(len),
        }
    }

    pub fn connection_id(id: u32) -> Self {
        Header {
            id: HeaderId::CONNECTION_ID,
            value: HeaderValue::U32(id),
        }
    }

    pub fn target(uuid: &[u8]) -> Self {
        Header {
            id: HeaderId::TARGET,
            value: HeaderValue::Bytes(uuid.to_vec()),
        }
    }

    pub fn who(uuid: &[u8]) -> Self {
        Header {
            id: HeaderId::WHO,
            value: HeaderValue::Bytes(uuid.to_vec()),
        }
    }

    pub fn body(chunk: Vec<u8>) -> Self {
        Header {
            id: HeaderId::BODY,
            value: HeaderValue::Bytes(chunk),
        }
    }

    pub fn end_of_body(chunk: Vec<u8>) -> Self {
        Header {
            id: HeaderId::END_OF_BODY,
            value: HeaderValue::Bytes(chunk),
        }
    }

    pub fn srm(mode: u8) -> Self {
        Header {
            id: HeaderId::SRM,
            value: HeaderValue::U8(mode),
        }
    }

    pub fn srm_parameters(param: u8) -> Self {
        Header {
            id: HeaderId::SRM_PARAMETERS,
            value: HeaderValue::U8(param),
        }
    }

    pub fn id(&self) -> HeaderId {
        self.id
    }

    pub fn value(&self) -> &HeaderValue {
        &self.value
    }

    pub fn into_value(self) -> HeaderValue {
        self.value
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            HeaderValue::Unicode(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.value {
            HeaderValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self.value {
            HeaderValue::U8(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self.value {
            HeaderValue::U32(v) => Some(v),
            _ => None,
        }
    }

    /// Bytes this header occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        match &self.value {
            HeaderValue::Unicode(s) if s.is_empty() => 3,
            HeaderValue::Unicode(s) => 3 + 2 * (s.encode_utf16().count() + 1),
            HeaderValue::Bytes(b) => 3 + b.len(),
            HeaderValue::U8(_) => 2,
            HeaderValue::U32(_) => 5,
        }
    }

    /// Append the wire form of this header to `buf`.
    pub fn encode(&self, buf: &mut ByteBuffer) -> Result<(), CodecError> {
        let len = self.encoded_len();
        if len > u16::MAX as usize {
            return Err(CodecError::HeaderTooLarge {
                id: self.id.0,
                len,
                mtu: u16::MAX as usize,
            });
        }
        let out = buf.reserve_end(len)?;
        out[0] = self.id.0;
        match &self.value {
            HeaderValue::Unicode(s) => {
                out[1..3].copy_from_slice(&(len as u16).to_be_bytes());
                // An empty string is sent without a terminator.
                if !s.is_empty() {
                    for (i, unit) in s.encode_utf16().chain(std::iter::once(0)).enumerate() {
                        out[3 + 2 * i..5 + 2 * i].copy_from_slice(&unit.to_be_bytes());
                    }
                }
            }
            HeaderValue::Bytes(b) => {
                out[1..3].copy_from_slice(&(len as u16).to_be_bytes());
                out[3..].copy_from_slice(b);
            }
            HeaderValue::U8(v) => out[1] = *v,
            HeaderValue::U32(v) => out[1..5].copy_from_slice(&v.to_be_bytes()),
        }
        Ok(())
    }

    /// Decode one header from the front of `bytes`, returning it and the
    /// number of bytes consumed.
    ///
    /// Returns `TruncatedInput` when `bytes` ends inside the header and
    /// `UnsupportedHeaderKind` (carrying the full header length) when the
    /// value is not well formed text; the caller may skip that many bytes.
    pub fn decode(bytes: &[u8]) -> Result<(Header, usize), CodecError> {
        let Some(&first) = bytes.first() else {
            return Err(CodecError::TruncatedInput { needed: 1 });
        };
        let id = HeaderId(first);
        match id.kind() {
            HeaderKind::U8 => {
                if bytes.len() < 2 {
                    return Err(CodecError::TruncatedInput { needed: 2 - bytes.len() });
                }
                Ok((Header { id, value: HeaderValue::U8(bytes[1]) }, 2))
            }
            HeaderKind::U32 => {
                if bytes.len() < 5 {
                    return Err(CodecError::TruncatedInput { needed: 5 - bytes.len() });
                }
                let v = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
                Ok((Header { id, value: HeaderValue::U32(v) }, 5))
            }
            kind => {
                if bytes.len() < 3 {
                    return Err(CodecError::TruncatedInput { needed: 3 - bytes.len() });
                }
                let len = u16::from_be_bytes([bytes[1], bytes[2]]) as usize;
                if len < 3 {
                    return Err(CodecError::MalformedPacket("header length below 3"));
                }
                if bytes.len() < len {
                    return Err(CodecError::TruncatedInput { needed: len - bytes.len() });
                }
                let data = &bytes[3..len];
                let value = if kind == HeaderKind::Bytes {
                    HeaderValue::Bytes(data.to_vec())
                } else {
                    let text = decode_utf16be(data)
                        .ok_or(CodecError::UnsupportedHeaderKind { id: first, len })?;
                    HeaderValue::Unicode(text)
                };
                Ok((Header { id, value }, len))
            }
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.value {
            HeaderValue::Unicode(s) => write!(f, "0x{:02x}={:?}", self.id.0, s),
            HeaderValue::Bytes(b) => write!(f, "0x{:02x}=<{} bytes>", self.id.0, b.len()),
            HeaderValue::U8(v) => write!(f, "0x{:02x}={}", self.id.0, v),
            HeaderValue::U32(v) => write!(f, "0x{:02x}={}", self.id.0, v),
        }
    }
}

fn decode_utf16be(data: &[u8]) -> Option<String> {
    if data.len() % 2 != 0 {
        return None;
    }
    let mut units: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    if units.last() == Some(&0) {
        units.pop();
    }
    String::from_utf16(&units).ok()
}

/// Walks the header region of one complete packet.
///
/// Inside a complete packet a header running past the end is malformed, not
/// truncated. Unsupported headers are yielded as errors but iteration continues
/// past them.
pub struct HeaderIter<'a> {
    bytes: &'a [u8],
}

impl<'a> HeaderIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        HeaderIter { bytes }
    }
}

impl<'a> Iterator for HeaderIter<'a> {
    type Item = Result<Header, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.bytes.is_empty() {
            return None;
        }
        match Header::decode(self.bytes) {
            Ok((header, used)) => {
                self.bytes = &self.bytes[used..];
                Some(Ok(header))
            }
            Err(CodecError::UnsupportedHeaderKind { id, len }) => {
                self.bytes = &self.bytes[len..];
                Some(Err(CodecError::UnsupportedHeaderKind { id, len }))
            }
            Err(CodecError::TruncatedInput { .. }) => {
                self.bytes = &[];
                Some(Err(CodecError::MalformedPacket("header exceeds packet length")))
            }
            Err(e) => {
                self.bytes = &[];
                Some(Err(e))
            }
        }
    }
}

/// Decode every header of a packet, skipping unsupported ones.
pub fn decode_headers(bytes: &[u8]) -> Result<Vec<Header>, CodecError> {
    let mut headers = Vec::new();
    for item in HeaderIter::new(bytes) {
        match item {
            Ok(header) => headers.push(header),
            Err(CodecError::UnsupportedHeaderKind { .. }) => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(headers)
}
