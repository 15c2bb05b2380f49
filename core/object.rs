// Active object: one request or response in flight
use crate::error::CodecError;
use crate::header::{srm, Header, HeaderId};
use crate::protocol::Packet;
use crate::types::{Opcode, ResponseCode, PACKET_PREFIX_LEN};
use obex_buffer::ByteBuffer;
use std::collections::VecDeque;

/// What one inbound packet contributed to an object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Received {
    pub body_len: usize,
    pub srm: Option<u8>,
    pub srm_wait: bool,
    pub skipped: usize,        // Unsupported headers dropped
}

#[derive(Debug, Clone)]
pub struct Object {
    cmd: Opcode,

    // Outgoing side: request headers on a client, response headers on a server
    tx_fixed: Vec<u8>,
    tx_headers: VecDeque<Header>,
    tx_body: Option<Vec<u8>>,
    tx_body_offset: usize,
    eob_sent: bool,
    tx_srm_wait: bool,             // Last packet asked the peer to wait
    tx_started: bool,
    tx_done: bool,

    // Incoming side, concatenated across packets
    rx_fixed: Vec<u8>,
    rx_headers: Vec<Header>,
    rx_body: Vec<u8>,
    rx_end_of_body: bool,
    rx_packets: usize,

    continue_rsp: ResponseCode,
    last_rsp: ResponseCode,
    response: Option<ResponseCode>,
    abort: bool,
}

impl Object {
    pub fn new(cmd: Opcode) -> Self {
        Object {
            cmd,
            tx_fixed: Vec::new(),
            tx_headers: VecDeque::new(),
            tx_body: None,
            tx_body_offset: 0,
            eob_sent: false,
            tx_srm_wait: false,
            tx_started: false,
            tx_done: false,
            rx_fixed: Vec::new(),
            rx_headers: Vec::new(),
            rx_body: Vec::new(),
            rx_end_of_body: false,
            rx_packets: 0,
            continue_rsp: ResponseCode::CONTINUE,
            last_rsp: ResponseCode::NOT_IMPLEMENTED,
            response: None,
            abort: false,
        }
    }

    pub fn connect() -> Self {
        Object::new(Opcode::CONNECT)
    }

    pub fn disconnect() -> Self {
        Object::new(Opcode::DISCONNECT)
    }

    /// PUT of `body` under `name`, announcing its length when it fits the
    /// 32-bit Length header.
    pub fn put(name: &str, body: Vec<u8>) -> Self {
        let mut obj = Object::new(Opcode::PUT);
        obj.add_header(Header::name(name));
        if let Some(length) = length_header(body.len()) {
            obj.add_header(length);
        }
        obj.set_body(body);
        obj
    }

    pub fn get(name: &str) -> Self {
        let mut obj = Object::new(Opcode::GET);
        obj.add_header(Header::name(name));
        obj
    }

    pub fn setpath(name: &str, flags: u8) -> Self {
        let mut obj = Object::new(Opcode::SETPATH);
        obj.set_path_flags(flags);
        obj.add_header(Header::name(name));
        obj
    }

    pub fn cmd(&self) -> Opcode {
        self.cmd
    }

    pub fn add_header(&mut self, header: Header) {
        self.tx_headers.push_back(header);
    }

    /// Queue a header ahead of everything not yet sent.
    pub fn push_front_header(&mut self, header: Header) {
        self.tx_headers.push_front(header);
    }

    /// Body to stream as Body headers, closed by an empty End-of-Body.
    pub fn set_body(&mut self, body: Vec<u8>) {
        self.tx_body = Some(body);
        self.tx_body_offset = 0;
        self.eob_sent = false;
    }

    /// Fixed fields sent before the first header of the first packet.
    pub fn set_fixed(&mut self, fixed: Vec<u8>) {
        self.tx_fixed = fixed;
    }

    pub fn set_path_flags(&mut self, flags: u8) {
        self.tx_fixed = vec![flags, 0];
    }

    /// Responses a server sends while more packets follow and for the last one.
    pub fn set_response(&mut self, continue_rsp: ResponseCode, last_rsp: ResponseCode) {
        self.continue_rsp = continue_rsp;
        self.last_rsp = last_rsp;
    }

    pub fn continue_response(&self) -> ResponseCode {
        self.continue_rsp
    }

    pub fn last_response(&self) -> ResponseCode {
        self.last_rsp
    }

    /// Most recent response received for this request.
    pub fn response(&self) -> Option<ResponseCode> {
        self.response
    }

    pub fn set_received_response(&mut self, rsp: ResponseCode) {
        self.response = Some(rsp);
    }

    pub fn headers(&self) -> &[Header] {
        &self.rx_headers
    }

    pub fn header(&self, id: HeaderId) -> Option<&Header> {
        self.rx_headers.iter().find(|h| h.id() == id)
    }

    pub fn body(&self) -> &[u8] {
        &self.rx_body
    }

    pub fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.rx_body)
    }

    pub fn end_of_body_seen(&self) -> bool {
        self.rx_end_of_body
    }

    /// Fixed fields of the last packet that carried any.
    pub fn fixed(&self) -> &[u8] {
        &self.rx_fixed
    }

    pub fn packets_received(&self) -> usize {
        self.rx_packets
    }

    pub fn tx_started(&self) -> bool {
        self.tx_started
    }

    pub fn tx_done(&self) -> bool {
        self.tx_done
    }

    pub fn tx_body_sent(&self) -> usize {
        self.tx_body_offset
    }

    /// True when the packet last filled carried SRM-Parameters = wait.
    pub fn srm_wait_sent(&self) -> bool {
        self.tx_srm_wait
    }

    pub fn mark_abort(&mut self) {
        self.abort = true;
    }

    pub fn abort_requested(&self) -> bool {
        self.abort
    }

    /// Append as much pending outgoing data as fits in a packet of `mtu`
    /// bytes. `buf` already holds the packet prefix. Returns true when
    /// nothing is left, i.e. this is the final packet.
    ///
    /// A packet that carries a body chunk is never final: the final packet
    /// carries the empty End-of-Body.
    pub fn fill_packet(&mut self, buf: &mut ByteBuffer, mtu: usize) -> Result<bool, CodecError> {
        self.tx_srm_wait = false;
        if !self.tx_started {
            buf.append(&self.tx_fixed)?;
            self.tx_started = true;
        }

        while let Some(header) = self.tx_headers.front() {
            let len = header.encoded_len();
            if buf.len() + len > mtu {
                if buf.len() == PACKET_PREFIX_LEN {
                    return Err(CodecError::HeaderTooLarge {
                        id: header.id().0,
                        len,
                        mtu,
                    });
                }
                return Ok(false);
            }
            let wait = header.id() == HeaderId::SRM_PARAMETERS && header.as_u8() == Some(srm::PARAM_WAIT);
            header.encode(buf)?;
            self.tx_headers.pop_front();
            self.tx_srm_wait |= wait;
        }

        if let Some(body) = &self.tx_body {
            let remaining = body.len() - self.tx_body_offset;
            let room = mtu.saturating_sub(buf.len());
            if remaining > 0 {
                if room <= 3 {
                    return Ok(false);
                }
                let chunk = remaining.min(room - 3);
                let start = self.tx_body_offset;
                let out = buf.reserve_end(3 + chunk)?;
                out[0] = HeaderId::BODY.0;
                out[1..3].copy_from_slice(&((3 + chunk) as u16).to_be_bytes());
                out[3..].copy_from_slice(&body[start..start + chunk]);
                self.tx_body_offset += chunk;
                return Ok(false);
            }
            if !self.eob_sent {
                if room < 3 {
                    return Ok(false);
                }
                buf.append(&[HeaderId::END_OF_BODY.0, 0x00, 0x03])?;
                self.eob_sent = true;
            }
        }

        self.tx_done = true;
        Ok(true)
    }

    /// Merge one inbound packet into the object. Body chunks are concatenated,
    /// SRM headers are reported instead of stored.
    pub fn receive(&mut self, packet: &Packet) -> Result<Received, CodecError> {
        let mut received = Received::default();
        if !packet.fixed.is_empty() {
            self.rx_fixed = packet.fixed.to_vec();
        }
        for item in packet.header_iter() {
            match item {
                Ok(header) if header.id().is_body() => {
                    let chunk = header.as_bytes().unwrap_or_default();
                    self.rx_body.try_reserve(chunk.len())?;
                    self.rx_body.extend_from_slice(chunk);
                    received.body_len += chunk.len();
                    if header.id() == HeaderId::END_OF_BODY {
                        self.rx_end_of_body = true;
                    }
                }
                Ok(header) if header.id() == HeaderId::SRM => received.srm = header.as_u8(),
                Ok(header) if header.id() == HeaderId::SRM_PARAMETERS => {
                    received.srm_wait = header.as_u8() == Some(srm::PARAM_WAIT);
                }
                Ok(header) => self.rx_headers.push(header),
                Err(CodecError::UnsupportedHeaderKind { .. }) => received.skipped += 1,
                Err(e) => return Err(e),
            }
        }
        self.rx_packets += 1;
        Ok(received)
    }
}

fn length_header(len: usize) -> Option<Header> {
    u32::try_from(len).ok().map(Header::length)
}
