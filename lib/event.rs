// Events reported to the session consumer
use crate::session::Session;
use obex_core::{CodecError, Object, Opcode, ResponseCode};
use std::io;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A packet of a multi-packet request or response went through.
    Progress,
    /// Server: the first packet of a new request arrived.
    RequestHint,
    /// Server: the request is complete; set the response on the object.
    Request,
    /// The request/response exchange finished.
    RequestDone,
    /// The link failed; the session is disconnected.
    LinkError(io::ErrorKind),
    /// Invalid data from the peer. The active object was dropped.
    ParseError(CodecError),
    /// The active request was cancelled, locally or by the peer.
    Abort,
    /// A packet that no outstanding request explains.
    Unexpected,
    /// Server: a peer connected to the listening transport.
    AcceptHint,
}

/// One event. `object` is the active object, lent for the duration of the
/// callback. After `RequestDone`, `Abort`, `ParseError` and `LinkError` it
/// is dropped when the callback returns.
#[derive(Debug)]
pub struct Event<'a> {
    pub kind: EventKind,
    pub cmd: Option<Opcode>,
    pub rsp: Option<ResponseCode>,
    pub object: Option<&'a mut Object>,
}

pub trait EventHandler: Send {
    fn on_event(&mut self, session: &mut Session, event: Event<'_>);
}

/// Handler built from a closure.
pub struct FnHandler<F>(F);

pub fn from_fn<F>(f: F) -> FnHandler<F>
where
    F: FnMut(&mut Session, Event<'_>) + Send,
{
    FnHandler(f)
}

impl<F> EventHandler for FnHandler<F>
where
    F: FnMut(&mut Session, Event<'_>) + Send,
{
    fn on_event(&mut self, session: &mut Session, event: Event<'_>) {
        (self.0)(session, event)
    }
}

/// Handler that ignores everything.
pub struct NoopHandler;

impl EventHandler for NoopHandler {
    fn on_event(&mut self, _session: &mut Session, _event: Event<'_>) {}
}
