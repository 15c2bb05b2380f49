// Session: the OBEX protocol state machine
//
// The consumer drives a session by calling `handle_input` in a loop. Each
// call either sends one packet (when it is this side's turn) or waits for
// input, frames every complete packet that arrived and dispatches it.
// Events are delivered synchronously from inside that call.
use crate::config::{ResponseMode, SessionConfig};
use crate::error::{ObexError, UsageError};
use crate::event::{Event, EventHandler, EventKind};
use obex_buffer::ByteBuffer;
use obex_core::{
    begin_packet, finish_packet, srm, CodecError, ConnectParams, Header, Object, Opcode, Packet,
    PacketPrefix, ResponseCode, FINAL_BIT, OBEX_MINIMUM_MTU,
};
use obex_transport::{InitFlags, Interface, Readiness, Transport, TransportBinding};
use std::any::Any;
use std::collections::TryReserveError;
use std::io;
use std::mem;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    RequestSending,
    AwaitingResponse,
    ResponseReceived,
    AwaitingRequest,
    RequestReceived,
    ResponseSending,
    Aborting,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Client,
    Server,
}

// Single Response Mode bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct SrmFlags(u8);

impl SrmFlags {
    const ENABLED: SrmFlags = SrmFlags(0x01);
    const WAIT_REMOTE: SrmFlags = SrmFlags(0x02);   // Peer asked for one non-SRM turn
    const CONFIGURING: SrmFlags = SrmFlags(0x04);   // Enable sent or seen, not yet agreed
    const WAIT_LOCAL: SrmFlags = SrmFlags(0x08);    // We asked the peer for one non-SRM turn

    fn contains(self, other: SrmFlags) -> bool {
        self.0 & other.0 == other.0
    }

    fn insert(&mut self, other: SrmFlags) {
        self.0 |= other.0;
    }

    fn remove(&mut self, other: SrmFlags) {
        self.0 &= !other.0;
    }
}

pub struct Session {
    mode: Mode,
    state: State,
    rsp_mode: ResponseMode,
    init_flags: InitFlags,
    srm: SrmFlags,

    mtu_rx: u16,
    mtu_tx: u16,
    mtu_tx_max: u16,
    config_mtu_tx_max: u16,

    tx_msg: ByteBuffer,
    rx_msg: ByteBuffer,

    object: Option<Object>,
    lent: bool,                    // Active object is out in an event
    responding: bool,              // Server: request complete, response under way
    deferred_cancel: Option<bool>,
    last_response: Option<ResponseCode>,

    // Client: a dropped request may still be open on the peer
    reset_pending: bool,           // Send an ABORT ahead of the next request
    resetting: bool,               // That ABORT is out, its answer not yet in
    late_finals: usize,            // Final responses still owed for dropped requests

    handler: Option<Box<dyn EventHandler>>,
    events: usize,

    transport: TransportBinding,
    interfaces: Vec<Interface>,
    user_data: Option<Box<dyn Any + Send>>,
}

impl Session {
    fn new(
        mode: Mode,
        transport: impl Into<TransportBinding>,
        config: SessionConfig,
        handler: impl EventHandler + 'static,
    ) -> Self {
        Session {
            mode,
            state: State::Disconnected,
            rsp_mode: config.rsp_mode,
            init_flags: config.flags,
            srm: SrmFlags::default(),
            mtu_rx: config.mtu_rx.max(OBEX_MINIMUM_MTU),
            mtu_tx: OBEX_MINIMUM_MTU,
            mtu_tx_max: config.mtu_tx_max.max(OBEX_MINIMUM_MTU),
            config_mtu_tx_max: config.mtu_tx_max.max(OBEX_MINIMUM_MTU),
            tx_msg: ByteBuffer::with_capacity(config.mtu_tx_max as usize),
            rx_msg: ByteBuffer::with_capacity(config.mtu_rx as usize),
            object: None,
            lent: false,
            responding: false,
            deferred_cancel: None,
            last_response: None,
            reset_pending: false,
            resetting: false,
            late_finals: 0,
            handler: Some(Box::new(handler)),
            events: 0,
            transport: transport.into(),
            interfaces: Vec::new(),
            user_data: None,
        }
    }

    pub fn client(
        transport: impl Into<TransportBinding>,
        config: SessionConfig,
        handler: impl EventHandler + 'static,
    ) -> Self {
        Session::new(Mode::Client, transport, config, handler)
    }

    pub fn server(
        transport: impl Into<TransportBinding>,
        config: SessionConfig,
        handler: impl EventHandler + 'static,
    ) -> Self {
        Session::new(Mode::Server, transport, config, handler)
    }

    pub fn set_event_handler(&mut self, handler: impl EventHandler + 'static) {
        self.handler = Some(Box::new(handler));
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn response_mode(&self) -> ResponseMode {
        self.rsp_mode
    }

    pub fn set_response_mode(&mut self, mode: ResponseMode) {
        self.rsp_mode = mode;
    }

    pub fn mtu_rx(&self) -> u16 {
        self.mtu_rx
    }

    pub fn mtu_tx(&self) -> u16 {
        self.mtu_tx
    }

    pub fn mtu_tx_max(&self) -> u16 {
        self.mtu_tx_max
    }

    /// True while no request or response is in flight.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle | State::Disconnected) && self.object.is_none()
    }

    /// Final response code of the last completed exchange.
    pub fn last_response(&self) -> Option<ResponseCode> {
        self.last_response
    }

    /// The active object. `None` while it is lent to an event.
    pub fn object(&self) -> Option<&Object> {
        self.object.as_ref()
    }

    pub fn object_mut(&mut self) -> Option<&mut Object> {
        self.object.as_mut()
    }

    pub fn transport(&self) -> &TransportBinding {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut TransportBinding {
        &mut self.transport
    }

    pub fn set_user_data<T: Any + Send>(&mut self, data: T) {
        self.user_data = Some(Box::new(data));
    }

    pub fn user_data<T: Any + Send>(&self) -> Option<&T> {
        self.user_data.as_ref().and_then(|d| d.downcast_ref())
    }

    pub fn user_data_mut<T: Any + Send>(&mut self) -> Option<&mut T> {
        self.user_data.as_mut().and_then(|d| d.downcast_mut())
    }

    /// Connect the transport (client role).
    pub fn transport_connect(&mut self) -> Result<(), ObexError> {
        if self.mode != Mode::Client {
            return Err(UsageError::WrongMode.into());
        }
        let mtu = self.transport.connect()?;
        self.link_up(mtu);
        info!(
            "{} transport connected, tx mtu limit {}",
            self.transport.kind(),
            self.mtu_tx_max
        );
        Ok(())
    }

    /// Attach to a discovered interface, then connect.
    pub fn interface_connect(&mut self, intf: &Interface) -> Result<(), ObexError> {
        self.transport.select_interface(intf)?;
        self.transport_connect()
    }

    /// Release the transport. Safe to call on a disconnected session.
    pub fn transport_disconnect(&mut self) -> Result<(), ObexError> {
        if self.state != State::Disconnected {
            debug!("disconnecting {} transport", self.transport.kind());
        }
        self.object = None;
        self.reset_exchange();
        self.clear_peer_reset();
        self.rx_msg.clear();
        self.state = State::Disconnected;
        self.transport.disconnect()?;
        Ok(())
    }

    /// Start listening for a peer (server role).
    pub fn server_register(&mut self) -> Result<(), ObexError> {
        if self.mode != Mode::Server {
            return Err(UsageError::NotServer.into());
        }
        self.transport.listen(self.init_flags)?;
        let mtu = self.transport.mtu();
        self.link_up(mtu);
        info!("{} transport registered as server", self.transport.kind());
        Ok(())
    }

    fn link_up(&mut self, transport_mtu: u16) {
        self.mtu_tx_max = self
            .config_mtu_tx_max
            .min(transport_mtu)
            .max(OBEX_MINIMUM_MTU);
        self.mtu_tx = OBEX_MINIMUM_MTU;
        self.rx_msg.clear();
        self.tx_msg.clear();
        self.clear_peer_reset();
        self.state = State::Idle;
    }

    /// Enumerate attachable interfaces of the transport. The list is kept
    /// until `free_interfaces` or the next enumeration.
    pub fn enumerate_interfaces(&mut self) -> Result<&[Interface], ObexError> {
        self.interfaces = self.transport.discover_interfaces()?;
        Ok(&self.interfaces)
    }

    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    pub fn free_interfaces(&mut self) {
        self.interfaces.clear();
    }

    /// Submit a request. The pump sends it.
    pub fn request(&mut self, mut object: Object) -> Result<(), ObexError> {
        if self.mode != Mode::Client {
            return Err(UsageError::WrongMode.into());
        }
        if self.object.is_some() || self.lent {
            return Err(UsageError::RequestOutstanding.into());
        }
        if self.state == State::Disconnected {
            return Err(UsageError::NotConnected.into());
        }

        let cmd = object.cmd();
        if cmd == Opcode::CONNECT && !object.tx_started() {
            object.set_fixed(ConnectParams::new(self.mtu_rx).to_bytes().to_vec());
        }
        self.reset_exchange();
        if matches!(cmd, Opcode::PUT | Opcode::GET) && self.srm_allowed() {
            object.push_front_header(Header::srm(srm::ENABLE));
            self.srm.insert(SrmFlags::CONFIGURING);
        }

        debug!("request {} submitted", cmd);
        self.object = Some(object);
        self.last_response = None;
        self.state = State::RequestSending;
        Ok(())
    }

    /// Cancel the active request. With `nice` an ABORT is exchanged with the
    /// peer first (server: the request is refused); otherwise the request is
    /// dropped at once and a late response shows up as `Unexpected`. A
    /// client that dropped a request the peer had started on sends an ABORT
    /// ahead of its next request.
    pub fn cancel_request(&mut self, nice: bool) -> Result<(), ObexError> {
        if self.lent {
            self.deferred_cancel = Some(nice);
            return Ok(());
        }
        let Some(obj) = self.object.as_mut() else {
            return Err(UsageError::NoActiveRequest.into());
        };

        if !nice {
            debug!("request {} dropped", obj.cmd());
            let (started, sent_all) = (obj.tx_started(), obj.tx_done());
            if self.mode == Mode::Client {
                if self.resetting {
                    // The ABORT ahead of this request is still unanswered.
                    self.resetting = false;
                    self.reset_pending = true;
                    self.late_finals += 1;
                } else if started {
                    match self.state {
                        State::Aborting => self.late_finals += 1,
                        State::AwaitingResponse if sent_all => {
                            self.late_finals += 1;
                            self.reset_pending = true;
                        }
                        _ => self.reset_pending = true,
                    }
                }
            }
            self.reset_exchange();
            self.state = State::Idle;
            self.deliver(EventKind::Abort, None, None, true);
            return Ok(());
        }

        obj.mark_abort();
        debug!("request {} will be aborted", obj.cmd());
        if self.mode == Mode::Client
            && self.state == State::AwaitingResponse
            && self.srm.contains(SrmFlags::ENABLED)
        {
            // Responses stream in without our turn coming up.
            self.state = State::RequestSending;
        }
        Ok(())
    }

    /// Drive the session: send one pending packet, or wait up to `timeout`
    /// (forever on `None`) for input and process it. Returns the number of
    /// events delivered.
    pub fn handle_input(&mut self, timeout: Option<Duration>) -> Result<usize, ObexError> {
        if self.state == State::Disconnected {
            return Err(UsageError::NotConnected.into());
        }
        self.events = 0;
        match self.pump(timeout) {
            Ok(()) => Ok(self.events),
            Err(ObexError::ResourceExhausted(e)) => self.resource_exhausted(e),
            Err(e) => Err(e),
        }
    }

    fn pump(&mut self, timeout: Option<Duration>) -> Result<(), ObexError> {
        if self.wants_to_send() {
            if self.srm_streaming() {
                // Let the peer's abort or error overtake the stream.
                self.receive(Some(Duration::ZERO))?;
            }
            if self.wants_to_send() {
                self.send_next()?;
            }
            return Ok(());
        }
        self.receive(timeout)
    }

    fn wants_to_send(&self) -> bool {
        matches!(self.state, State::RequestSending | State::ResponseSending)
    }

    fn srm_allowed(&self) -> bool {
        self.rsp_mode == ResponseMode::Single && !self.init_flags.contains(InitFlags::SRM_DISABLED)
    }

    fn srm_streaming(&self) -> bool {
        self.srm.contains(SrmFlags::ENABLED)
            && !self.srm.contains(SrmFlags::WAIT_REMOTE)
            && !self.srm.contains(SrmFlags::WAIT_LOCAL)
    }

    fn srm_agreed(&mut self) {
        debug!("single response mode enabled");
        self.srm.remove(SrmFlags::CONFIGURING);
        self.srm.insert(SrmFlags::ENABLED);
    }

    // Inbound packet: note whether the peer asked for a non-SRM turn. Any
    // wait we asked for is used up by this packet. Returns whether SRM
    // streaming applies to the turn this packet starts.
    fn srm_turn(&mut self, peer_waits: bool) -> bool {
        if peer_waits {
            self.srm.insert(SrmFlags::WAIT_REMOTE);
        } else {
            self.srm.remove(SrmFlags::WAIT_REMOTE);
        }
        let streaming = self.srm_streaming();
        self.srm.remove(SrmFlags::WAIT_LOCAL);
        streaming
    }

    // Outbound packet written: the peer's wait is used up, ours starts.
    // Returns whether we may keep sending without an answer.
    fn srm_sent(&mut self, wait_sent: bool) -> bool {
        let streaming = self.srm_streaming() && !wait_sent;
        self.srm.remove(SrmFlags::WAIT_REMOTE);
        if wait_sent {
            self.srm.insert(SrmFlags::WAIT_LOCAL);
        }
        streaming
    }

    fn reset_exchange(&mut self) {
        self.srm = SrmFlags::default();
        self.responding = false;
    }

    fn clear_peer_reset(&mut self) {
        self.reset_pending = false;
        self.resetting = false;
        self.late_finals = 0;
    }

    fn receive(&mut self, timeout: Option<Duration>) -> Result<(), ObexError> {
        let readiness = match self.transport.poll_input(timeout) {
            Ok(r) => r,
            Err(e) => return self.link_error(e),
        };
        match readiness {
            Readiness::Idle => return Ok(()),
            Readiness::Accepted => {
                info!("peer connected");
                self.mtu_tx = OBEX_MINIMUM_MTU;
                self.deliver(EventKind::AcceptHint, None, None, false);
                return Ok(());
            }
            Readiness::Readable => {}
        }

        match self.transport.read(&mut self.rx_msg, self.mtu_rx as usize) {
            Ok(0) => {
                return self.link_error(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer closed the link",
                ))
            }
            Ok(n) => trace!("read {} bytes, {} buffered", n, self.rx_msg.len()),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                return Ok(())
            }
            Err(e) => return self.link_error(e),
        }
        self.process_rx()
    }

    // Dispatch every complete packet in the receive buffer, in order.
    fn process_rx(&mut self) -> Result<(), ObexError> {
        while self.state != State::Disconnected {
            let prefix = match PacketPrefix::peek(&self.rx_msg) {
                Ok(p) => p,
                Err(e) if e.is_truncated() => break,
                Err(e) => {
                    self.protocol_violation(e);
                    break;
                }
            };
            if prefix.length > self.mtu_rx {
                self.protocol_violation(CodecError::MalformedPacket("packet exceeds receive MTU"));
                break;
            }
            let len = prefix.length as usize;
            if self.rx_msg.len() < len {
                trace!("packet 0x{:02x}: {} of {} bytes", prefix.opcode, self.rx_msg.len(), len);
                break;
            }

            let rx = mem::take(&mut self.rx_msg);
            let outcome = self.dispatch(&rx[..len]);
            self.rx_msg = rx;
            match outcome {
                Ok(()) => self.rx_msg.remove_begin(len),
                Err(ObexError::Protocol(e)) => {
                    self.protocol_violation(e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, bytes: &[u8]) -> Result<(), ObexError> {
        trace!("rx packet 0x{:02x}, {} bytes", bytes[0], bytes.len());
        match self.mode {
            Mode::Client => self.client_input(bytes),
            Mode::Server => self.server_input(bytes),
        }
    }

    fn client_input(&mut self, bytes: &[u8]) -> Result<(), ObexError> {
        let rsp = ResponseCode::from_wire(bytes[0]);
        let cmd = match self.object.as_ref() {
            Some(obj) => obj.cmd(),
            None => {
                warn!("response {} with no request outstanding", rsp);
                if rsp != ResponseCode::CONTINUE {
                    self.late_finals = self.late_finals.saturating_sub(1);
                }
                self.deliver(EventKind::Unexpected, None, Some(rsp), false);
                return Ok(());
            }
        };
        if self.resetting {
            return self.reset_input(rsp);
        }
        let expected = match self.state {
            State::AwaitingResponse | State::Aborting => true,
            State::RequestSending => self.srm.contains(SrmFlags::ENABLED),
            _ => false,
        };
        if !expected {
            warn!("response {} while {:?}", rsp, self.state);
            self.deliver(EventKind::Unexpected, None, Some(rsp), false);
            return Ok(());
        }

        let fixed_len = if cmd == Opcode::CONNECT && bytes.len() >= 3 + ConnectParams::LEN {
            cmd.response_prefix_len()
        } else {
            0
        };
        let packet = Packet::parse(bytes, fixed_len)?;

        if self.state == State::Aborting {
            if rsp == ResponseCode::CONTINUE {
                trace!("ignoring CONTINUE while aborting");
                return Ok(());
            }
            debug!("abort of {} acknowledged with {}", cmd, rsp);
            self.last_response = Some(rsp);
            self.reset_exchange();
            self.state = State::Idle;
            self.deliver(EventKind::Abort, None, Some(rsp), true);
            return Ok(());
        }

        let (received, tx_done) = match self.object.as_mut() {
            Some(obj) => (obj.receive(&packet)?, obj.tx_done()),
            None => return Ok(()),
        };
        if received.skipped > 0 {
            warn!("skipped {} unsupported headers", received.skipped);
        }
        if received.srm == Some(srm::ENABLE) && self.srm.contains(SrmFlags::CONFIGURING) {
            self.srm_agreed();
        }
        let streaming = self.srm_turn(received.srm_wait);

        if rsp == ResponseCode::CONTINUE {
            self.deliver(EventKind::Progress, None, Some(rsp), false);
            let Some(obj) = self.object.as_ref() else {
                return Ok(());
            };
            self.state = if obj.abort_requested() || !tx_done || !streaming {
                State::RequestSending
            } else {
                State::AwaitingResponse
            };
            return Ok(());
        }

        if cmd == Opcode::CONNECT && rsp.is_success() {
            self.negotiate_mtu(packet.fixed)?;
        }
        if let Some(obj) = self.object.as_mut() {
            obj.set_received_response(rsp);
        }
        debug!("request {} done: {}", cmd, rsp);
        self.last_response = Some(rsp);
        self.reset_exchange();
        self.state = State::ResponseReceived;
        self.deliver(EventKind::RequestDone, None, Some(rsp), true);
        if self.state == State::ResponseReceived {
            self.state = State::Idle;
        }
        Ok(())
    }

    fn server_input(&mut self, bytes: &[u8]) -> Result<(), ObexError> {
        let (cmd, last) = Opcode::from_wire(bytes[0]);

        if cmd == Opcode::ABORT {
            Packet::parse(bytes, 0)?;
            self.send_bare_response(ResponseCode::SUCCESS)?;
            self.reset_exchange();
            if self.object.is_some() {
                debug!("peer aborted the request");
                self.state = State::Idle;
                self.deliver(EventKind::Abort, None, Some(ResponseCode::SUCCESS), true);
            } else {
                debug!("ABORT with no request active");
            }
            return Ok(());
        }

        match self.object.as_ref().map(Object::cmd) {
            None => {
                trace!("new {} request", cmd);
                self.reset_exchange();
                self.object = Some(Object::new(cmd));
                self.state = State::AwaitingRequest;
                self.deliver(EventKind::RequestHint, Some(cmd), None, false);
                if self.object.is_none() {
                    return Ok(());
                }
            }
            Some(active) if active != cmd => {
                warn!("{} packet during {} request", cmd, active);
                self.send_bare_response(ResponseCode::BAD_REQUEST)?;
                self.reset_exchange();
                self.state = State::Idle;
                self.deliver(
                    EventKind::ParseError(CodecError::MalformedPacket("opcode differs from active request")),
                    None,
                    Some(ResponseCode::BAD_REQUEST),
                    true,
                );
                return Ok(());
            }
            Some(_) => {}
        }

        let packet = Packet::parse(bytes, cmd.request_prefix_len())?;
        let (received, first, abort) = match self.object.as_mut() {
            Some(obj) => {
                let received = obj.receive(&packet)?;
                (received, obj.packets_received() == 1, obj.abort_requested())
            }
            None => return Ok(()),
        };
        if received.skipped > 0 {
            warn!("skipped {} unsupported headers", received.skipped);
        }
        if first
            && received.srm == Some(srm::ENABLE)
            && matches!(cmd, Opcode::PUT | Opcode::GET)
            && self.srm_allowed()
        {
            debug!("peer requested single response mode");
            self.srm.insert(SrmFlags::CONFIGURING);
        }
        let streaming = self.srm_turn(received.srm_wait);
        if first && cmd == Opcode::CONNECT {
            self.negotiate_mtu(packet.fixed)?;
        }

        if abort || self.responding {
            // Our turn: the next response packet, or the refusal.
            self.state = State::ResponseSending;
            return Ok(());
        }

        if !last {
            self.deliver(EventKind::Progress, None, None, false);
            let Some(obj) = self.object.as_ref() else {
                return Ok(());
            };
            if obj.abort_requested() {
                self.state = State::ResponseSending;
                return Ok(());
            }
            self.state = State::AwaitingRequest;
            if !streaming {
                let rsp = obj.continue_response();
                self.send_continue(rsp)?;
            }
            return Ok(());
        }

        self.state = State::RequestReceived;
        let echo_srm = self.srm.contains(SrmFlags::CONFIGURING) && !self.srm.contains(SrmFlags::ENABLED);
        if let Some(obj) = self.object.as_mut() {
            if cmd == Opcode::CONNECT {
                obj.set_fixed(ConnectParams::new(self.mtu_rx).to_bytes().to_vec());
            }
            if echo_srm {
                obj.push_front_header(Header::srm(srm::ENABLE));
            }
        }
        self.deliver(EventKind::Request, None, None, false);
        if self.object.is_some() {
            self.responding = true;
            self.state = State::ResponseSending;
        }
        Ok(())
    }

    fn negotiate_mtu(&mut self, fixed: &[u8]) -> Result<(), CodecError> {
        let params = ConnectParams::from_bytes(fixed)
            .ok_or(CodecError::MalformedPacket("CONNECT parameters missing"))?;
        self.mtu_tx = params.mtu.min(self.mtu_tx_max).max(OBEX_MINIMUM_MTU);
        info!(
            "peer OBEX version 0x{:02x}, mtu {}; tx mtu now {}",
            params.version, params.mtu, self.mtu_tx
        );
        Ok(())
    }

    fn send_next(&mut self) -> Result<(), ObexError> {
        match self.mode {
            Mode::Client => self.send_request_packet(),
            Mode::Server => self.send_response_packet(),
        }
    }

    fn send_request_packet(&mut self) -> Result<(), ObexError> {
        let mtu = self.mtu_tx as usize;
        let Some(obj) = self.object.as_mut() else {
            self.state = State::Idle;
            return Ok(());
        };
        let cmd = obj.cmd();

        if obj.abort_requested() {
            begin_packet(&mut self.tx_msg)?;
            finish_packet(&mut self.tx_msg, Opcode::ABORT.to_wire(true))?;
            self.write_packet()?;
            debug!("ABORT sent for {}", cmd);
            // Its answer also settles any dropped request.
            self.reset_pending = false;
            self.state = State::Aborting;
            return Ok(());
        }

        if self.reset_pending {
            begin_packet(&mut self.tx_msg)?;
            finish_packet(&mut self.tx_msg, Opcode::ABORT.to_wire(true))?;
            self.write_packet()?;
            debug!("ABORT sent to reset the peer before {}", cmd);
            self.reset_pending = false;
            self.resetting = true;
            self.state = State::AwaitingResponse;
            return Ok(());
        }

        begin_packet(&mut self.tx_msg)?;
        let last = match obj.fill_packet(&mut self.tx_msg, mtu) {
            Ok(last) => last,
            Err(e) => return self.local_failure(e),
        };
        let wait_sent = obj.srm_wait_sent();
        finish_packet(&mut self.tx_msg, cmd.to_wire(last))?;
        self.write_packet()?;

        let streaming = self.srm_sent(wait_sent);
        if !last && streaming {
            self.deliver(EventKind::Progress, None, None, false);
        } else {
            self.state = State::AwaitingResponse;
        }
        Ok(())
    }

    fn send_response_packet(&mut self) -> Result<(), ObexError> {
        let mtu = self.mtu_tx as usize;
        let Some(obj) = self.object.as_mut() else {
            self.state = State::Idle;
            return Ok(());
        };
        let cmd = obj.cmd();

        if obj.abort_requested() {
            let rsp = ResponseCode::INTERNAL_SERVER_ERROR;
            self.send_bare_response(rsp)?;
            debug!("request {} refused after cancel", cmd);
            self.last_response = Some(rsp);
            self.reset_exchange();
            self.state = State::Idle;
            self.deliver(EventKind::Abort, None, Some(rsp), true);
            return Ok(());
        }

        begin_packet(&mut self.tx_msg)?;
        let last = match obj.fill_packet(&mut self.tx_msg, mtu) {
            Ok(last) => last,
            Err(e) => return self.local_failure(e),
        };
        let rsp = if last {
            obj.last_response()
        } else {
            obj.continue_response()
        };
        let wait_sent = obj.srm_wait_sent();
        finish_packet(&mut self.tx_msg, rsp.to_wire())?;
        self.write_packet()?;

        if self.srm.contains(SrmFlags::CONFIGURING) {
            self.srm_agreed();
        }
        if last {
            debug!("response {} to {} sent", rsp, cmd);
            self.last_response = Some(rsp);
            self.reset_exchange();
            self.state = State::Idle;
            self.deliver(EventKind::RequestDone, None, Some(rsp), true);
            return Ok(());
        }

        if self.srm_sent(wait_sent) {
            self.deliver(EventKind::Progress, None, Some(rsp), false);
        } else {
            self.state = State::AwaitingRequest;
        }
        Ok(())
    }

    fn send_bare_response(&mut self, rsp: ResponseCode) -> Result<(), ObexError> {
        begin_packet(&mut self.tx_msg)?;
        finish_packet(&mut self.tx_msg, rsp.to_wire())?;
        self.write_packet()
    }

    // Answer to a non-final request packet; carries the SRM echo if one is due.
    fn send_continue(&mut self, rsp: ResponseCode) -> Result<(), ObexError> {
        begin_packet(&mut self.tx_msg)?;
        if self.srm.contains(SrmFlags::CONFIGURING) && !self.srm.contains(SrmFlags::ENABLED) {
            Header::srm(srm::ENABLE).encode(&mut self.tx_msg)?;
            self.srm_agreed();
        }
        finish_packet(&mut self.tx_msg, rsp.to_wire())?;
        self.write_packet()
    }

    fn write_packet(&mut self) -> Result<(), ObexError> {
        trace!(
            "tx packet 0x{:02x}, {} bytes{}",
            self.tx_msg[0],
            self.tx_msg.len(),
            if self.tx_msg[0] & FINAL_BIT != 0 { " (final)" } else { "" }
        );
        match self.transport.write(&self.tx_msg) {
            Ok(_) => Ok(()),
            Err(e) => self.link_error(e),
        }
    }

    // The active object could not be encoded. It is dropped; the link stays.
    fn local_failure<T>(&mut self, e: CodecError) -> Result<T, ObexError> {
        warn!("can't encode {:?}: {}", self.object.as_ref().map(Object::cmd), e);
        self.object = None;
        self.reset_exchange();
        self.state = State::Idle;
        Err(e.into())
    }

    fn protocol_violation(&mut self, e: CodecError) {
        warn!("protocol violation: {}", e);
        self.rx_msg.clear();
        self.reset_exchange();
        self.state = State::Idle;
        self.deliver(EventKind::ParseError(e), None, None, true);
    }

    fn link_error<T>(&mut self, e: io::Error) -> Result<T, ObexError> {
        warn!("{} link failed: {}", self.transport.kind(), e);
        self.rx_msg.clear();
        self.reset_exchange();
        self.clear_peer_reset();
        let keep = self.mode == Mode::Server && self.init_flags.contains(InitFlags::KEEP_SERVER);
        self.state = if keep { State::Idle } else { State::Disconnected };
        self.deliver(EventKind::LinkError(e.kind()), None, None, true);
        if let Err(close) = self.transport.disconnect() {
            debug!("disconnect after link error failed: {}", close);
        }
        Err(ObexError::Transport(e))
    }

    // An allocation failed mid-exchange. Nothing half built survives and
    // the session ends.
    fn resource_exhausted<T>(&mut self, e: TryReserveError) -> Result<T, ObexError> {
        warn!("out of memory, closing the session: {}", e);
        self.object = None;
        self.rx_msg.clear();
        self.tx_msg.clear();
        self.reset_exchange();
        self.clear_peer_reset();
        self.state = State::Disconnected;
        if let Err(close) = self.transport.disconnect() {
            debug!("disconnect after allocation failure failed: {}", close);
        }
        Err(ObexError::ResourceExhausted(e))
    }

    // Responses while the ABORT sent ahead of a new request is unanswered.
    // Late answers to dropped requests come first; CONTINUE never acks an
    // ABORT.
    fn reset_input(&mut self, rsp: ResponseCode) -> Result<(), ObexError> {
        if rsp == ResponseCode::CONTINUE || self.late_finals > 0 {
            if rsp != ResponseCode::CONTINUE {
                self.late_finals -= 1;
            }
            warn!("late response {} to a dropped request", rsp);
            self.deliver(EventKind::Unexpected, None, Some(rsp), false);
            return Ok(());
        }
        debug!("peer reset acknowledged with {}", rsp);
        self.resetting = false;
        self.state = State::RequestSending;
        Ok(())
    }

    // Hand an event to the consumer. The active object travels with the
    // event; with `release` it is dropped afterwards.
    fn deliver(
        &mut self,
        kind: EventKind,
        cmd: Option<Opcode>,
        rsp: Option<ResponseCode>,
        release: bool,
    ) {
        let mut object = self.object.take();
        // An unexpected packet belongs to no request, not even the active one.
        let cmd = match kind {
            EventKind::Unexpected => cmd,
            _ => cmd.or(object.as_ref().map(Object::cmd)),
        };
        self.events += 1;
        debug!("event {:?} cmd {:?} rsp {:?} in {:?}", kind, cmd, rsp, self.state);

        match self.handler.take() {
            Some(mut handler) => {
                self.lent = !release && object.is_some();
                handler.on_event(
                    self,
                    Event {
                        kind,
                        cmd,
                        rsp,
                        object: object.as_mut(),
                    },
                );
                self.lent = false;
                if self.handler.is_none() {
                    self.handler = Some(handler);
                }
            }
            None => trace!("event raised inside a callback dropped"),
        }

        if !release && self.object.is_none() {
            self.object = object;
        }
        if let Some(nice) = self.deferred_cancel.take() {
            if let Err(e) = self.cancel_request(nice) {
                debug!("cancel from callback ignored: {}", e);
            }
        }
    }
}
