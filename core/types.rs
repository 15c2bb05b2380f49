// Core types used across all OBEX components
use std::fmt;

pub const OBEX_VERSION: u8 = 0x10;

/// Smallest packet size every OBEX peer must accept.
pub const OBEX_MINIMUM_MTU: u16 = 255;
pub const OBEX_DEFAULT_MTU: u16 = 1024;
pub const OBEX_MAXIMUM_MTU: u16 = 0xFFFF;

/// High bit of an opcode: last packet of a logical request/response.
pub const FINAL_BIT: u8 = 0x80;

/// opcode(1) + total length(2)
pub const PACKET_PREFIX_LEN: usize = 3;

// Request opcode (without the final bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Opcode(pub u8);

impl Opcode {
    pub const CONNECT: Opcode = Opcode(0x00);
    pub const DISCONNECT: Opcode = Opcode(0x01);
    pub const PUT: Opcode = Opcode(0x02);
    pub const GET: Opcode = Opcode(0x03);
    pub const SETPATH: Opcode = Opcode(0x05);
    pub const ACTION: Opcode = Opcode(0x06);
    pub const SESSION: Opcode = Opcode(0x07);
    pub const ABORT: Opcode = Opcode(0x7F);

    /// Split a wire opcode byte into the command and its final bit.
    pub fn from_wire(byte: u8) -> (Opcode, bool) {
        (Opcode(byte & !FINAL_BIT), byte & FINAL_BIT != 0)
    }

    pub fn to_wire(self, last: bool) -> u8 {
        if last {
            self.0 | FINAL_BIT
        } else {
            self.0
        }
    }

    /// Length of the fixed fields a request with this opcode carries
    /// between the length field and the first header.
    pub fn request_prefix_len(self) -> usize {
        match self {
            Opcode::CONNECT => ConnectParams::LEN,
            Opcode::SETPATH => 2,
            _ => 0,
        }
    }

    /// Same as `request_prefix_len` for the response to this request.
    pub fn response_prefix_len(self) -> usize {
        match self {
            Opcode::CONNECT => ConnectParams::LEN,
            _ => 0,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::CONNECT => "CONNECT",
            Opcode::DISCONNECT => "DISCONNECT",
            Opcode::PUT => "PUT",
            Opcode::GET => "GET",
            Opcode::SETPATH => "SETPATH",
            Opcode::ACTION => "ACTION",
            Opcode::SESSION => "SESSION",
            Opcode::ABORT => "ABORT",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(0x{:02x})", self.name(), self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseGroup {
    Informational,
    Success,
    Redirect,
    ClientError,
    ServerError,
    Database,
    Unknown,
}

// Response code (without the final bit, which responses always carry)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseCode(pub u8);

impl ResponseCode {
    pub const CONTINUE: ResponseCode = ResponseCode(0x10);
    pub const SWITCH_PROTOCOLS: ResponseCode = ResponseCode(0x11);
    pub const SUCCESS: ResponseCode = ResponseCode(0x20);
    pub const CREATED: ResponseCode = ResponseCode(0x21);
    pub const ACCEPTED: ResponseCode = ResponseCode(0x22);
    pub const NON_AUTHORITATIVE: ResponseCode = ResponseCode(0x23);
    pub const NO_CONTENT: ResponseCode = ResponseCode(0x24);
    pub const RESET_CONTENT: ResponseCode = ResponseCode(0x25);
    pub const PARTIAL_CONTENT: ResponseCode = ResponseCode(0x26);
    pub const MULTIPLE_CHOICES: ResponseCode = ResponseCode(0x30);
    pub const MOVED_PERMANENTLY: ResponseCode = ResponseCode(0x31);
    pub const MOVED_TEMPORARILY: ResponseCode = ResponseCode(0x32);
    pub const SEE_OTHER: ResponseCode = ResponseCode(0x33);
    pub const NOT_MODIFIED: ResponseCode = ResponseCode(0x34);
    pub const USE_PROXY: ResponseCode = ResponseCode(0x35);
    pub const BAD_REQUEST: ResponseCode = ResponseCode(0x40);
    pub const UNAUTHORIZED: ResponseCode = ResponseCode(0x41);
    pub const PAYMENT_REQUIRED: ResponseCode = ResponseCode(0x42);
    pub const FORBIDDEN: ResponseCode = ResponseCode(0x43);
    pub const NOT_FOUND: ResponseCode = ResponseCode(0x44);
    pub const METHOD_NOT_ALLOWED: ResponseCode = ResponseCode(0x45);
    pub const NOT_ACCEPTABLE: ResponseCode = ResponseCode(0x46);
    pub const PROXY_AUTH_REQUIRED: ResponseCode = ResponseCode(0x47);
    pub const REQUEST_TIMEOUT: ResponseCode = ResponseCode(0x48);
    pub const CONFLICT: ResponseCode = ResponseCode(0x49);
    pub const GONE: ResponseCode = ResponseCode(0x4A);
    pub const LENGTH_REQUIRED: ResponseCode = ResponseCode(0x4B);
    pub const PRECONDITION_FAILED: ResponseCode = ResponseCode(0x4C);
    pub const ENTITY_TOO_LARGE: ResponseCode = ResponseCode(0x4D);
    pub const URL_TOO_LARGE: ResponseCode = ResponseCode(0x4E);
    pub const UNSUPPORTED_MEDIA_TYPE: ResponseCode = ResponseCode(0x4F);
    pub const INTERNAL_SERVER_ERROR: ResponseCode = ResponseCode(0x50);
    pub const NOT_IMPLEMENTED: ResponseCode = ResponseCode(0x51);
    pub const BAD_GATEWAY: ResponseCode = ResponseCode(0x52);
    pub const SERVICE_UNAVAILABLE: ResponseCode = ResponseCode(0x53);
    pub const GATEWAY_TIMEOUT: ResponseCode = ResponseCode(0x54);
    pub const VERSION_NOT_SUPPORTED: ResponseCode = ResponseCode(0x55);
    pub const DATABASE_FULL: ResponseCode = ResponseCode(0x60);
    pub const DATABASE_LOCKED: ResponseCode = ResponseCode(0x61);

    pub fn from_wire(byte: u8) -> ResponseCode {
        ResponseCode(byte & !FINAL_BIT)
    }

    /// Responses are always sent with the final bit set.
    pub fn to_wire(self) -> u8 {
        self.0 | FINAL_BIT
    }

    pub fn group(self) -> ResponseGroup {
        match self.0 >> 4 {
            0x1 => ResponseGroup::Informational,
            0x2 => ResponseGroup::Success,
            0x3 => ResponseGroup::Redirect,
            0x4 => ResponseGroup::ClientError,
            0x5 => ResponseGroup::ServerError,
            0x6 => ResponseGroup::Database,
            _ => ResponseGroup::Unknown,
        }
    }

    pub fn is_success(self) -> bool {
        self.group() == ResponseGroup::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResponseCode::CONTINUE => "Continue",
            ResponseCode::SWITCH_PROTOCOLS => "Switching protocols",
            ResponseCode::SUCCESS => "OK, Success",
            ResponseCode::CREATED => "Created",
            ResponseCode::ACCEPTED => "Accepted",
            ResponseCode::NON_AUTHORITATIVE => "Non-authoritative information",
            ResponseCode::NO_CONTENT => "No content",
            ResponseCode::RESET_CONTENT => "Reset content",
            ResponseCode::PARTIAL_CONTENT => "Partial content",
            ResponseCode::MULTIPLE_CHOICES => "Multiple choices",
            ResponseCode::MOVED_PERMANENTLY => "Moved permanently",
            ResponseCode::MOVED_TEMPORARILY => "Moved temporarily",
            ResponseCode::SEE_OTHER => "See other",
            ResponseCode::NOT_MODIFIED => "Not modified",
            ResponseCode::USE_PROXY => "Use Proxy",
            ResponseCode::BAD_REQUEST => "Bad request",
            ResponseCode::UNAUTHORIZED => "Unauthorized",
            ResponseCode::PAYMENT_REQUIRED => "Payment required",
            ResponseCode::FORBIDDEN => "Forbidden",
            ResponseCode::NOT_FOUND => "Not found",
            ResponseCode::METHOD_NOT_ALLOWED => "Method not allowed",
            ResponseCode::NOT_ACCEPTABLE => "Not Acceptable",
            ResponseCode::PROXY_AUTH_REQUIRED => "Proxy authentication required",
            ResponseCode::REQUEST_TIMEOUT => "Request time out",
            ResponseCode::CONFLICT => "Conflict",
            ResponseCode::GONE => "Gone",
            ResponseCode::LENGTH_REQUIRED => "Length required",
            ResponseCode::PRECONDITION_FAILED => "Precondition failed",
            ResponseCode::ENTITY_TOO_LARGE => "Requested entity too large",
            ResponseCode::URL_TOO_LARGE => "Requested URL too large",
            ResponseCode::UNSUPPORTED_MEDIA_TYPE => "Unsupported media type",
            ResponseCode::INTERNAL_SERVER_ERROR => "Internal server error",
            ResponseCode::NOT_IMPLEMENTED => "Not implemented",
            ResponseCode::BAD_GATEWAY => "Bad gateway",
            ResponseCode::SERVICE_UNAVAILABLE => "Service unavailable",
            ResponseCode::GATEWAY_TIMEOUT => "Gateway timeout",
            ResponseCode::VERSION_NOT_SUPPORTED => "HTTP version not supported",
            ResponseCode::DATABASE_FULL => "Database full",
            ResponseCode::DATABASE_LOCKED => "Database locked",
            _ => "Unknown response",
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.as_str(), self.0)
    }
}

// Fixed fields of CONNECT requests and responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectParams {
    pub version: u8,
    pub flags: u8,
    pub mtu: u16,              // Maximum packet length the sender accepts
}

impl ConnectParams {
    pub const LEN: usize = 4;

    pub fn new(mtu: u16) -> Self {
        ConnectParams {
            version: OBEX_VERSION,
            flags: 0,
            mtu,
        }
    }

    pub fn to_bytes(&self) -> [u8; 4] {
        let mtu = self.mtu.to_be_bytes();
        [self.version, self.flags, mtu[0], mtu[1]]
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::LEN {
            return None;
        }
        Some(ConnectParams {
            version: bytes[0],
            flags: bytes[1],
            mtu: u16::from_be_bytes([bytes[2], bytes[3]]),
        })
    }
}

// SETPATH request flags
pub mod setpath {
    /// Go up one level before applying the name.
    pub const BACKUP: u8 = 0x01;
    /// Do not create the folder if it does not exist.
    pub const DONT_CREATE: u8 = 0x02;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_final_bit_split() {
        assert_eq!(Opcode::from_wire(0x82), (Opcode::PUT, true));
        assert_eq!(Opcode::from_wire(0x02), (Opcode::PUT, false));
        assert_eq!(Opcode::ABORT.to_wire(true), 0xFF);
        assert_eq!(Opcode::CONNECT.to_wire(true), 0x80);
    }

    #[test]
    fn response_groups() {
        assert_eq!(ResponseCode::from_wire(0xA0), ResponseCode::SUCCESS);
        assert_eq!(ResponseCode::CONTINUE.to_wire(), 0x90);
        assert_eq!(ResponseCode::CONTINUE.group(), ResponseGroup::Informational);
        assert_eq!(ResponseCode::NOT_FOUND.group(), ResponseGroup::ClientError);
        assert_eq!(ResponseCode::DATABASE_LOCKED.group(), ResponseGroup::Database);
        assert!(ResponseCode::CREATED.is_success());
        assert_eq!(ResponseCode(0x7E).as_str(), "Unknown response");
    }

    #[test]
    fn connect_params_layout() {
        let params = ConnectParams::new(0x1000);
        assert_eq!(params.to_bytes(), [0x10, 0x00, 0x10, 0x00]);
        assert_eq!(ConnectParams::from_bytes(&[0x10, 0x00, 0x20, 0x00]).unwrap().mtu, 0x2000);
        assert!(ConnectParams::from_bytes(&[0x10, 0x00]).is_none());
    }
}
