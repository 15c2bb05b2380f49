// Shared harness: sessions over the in-memory pipe, events collected on channels
#![allow(dead_code)]

use crossbeam::channel::{unbounded, Receiver, Sender};
use obex::*;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Record {
    pub kind: EventKind,
    pub cmd: Option<Opcode>,
    pub rsp: Option<ResponseCode>,
    pub body: Vec<u8>,
    pub name: Option<String>,
    pub packets: usize,
}

fn record(event: &Event<'_>) -> Record {
    let obj = event.object.as_deref();
    Record {
        kind: event.kind.clone(),
        cmd: event.cmd,
        rsp: event.rsp,
        body: obj.map(|o| o.body().to_vec()).unwrap_or_default(),
        name: obj
            .and_then(|o| o.header(HeaderId::NAME))
            .and_then(|h| h.as_str())
            .map(str::to_string),
        packets: obj.map(Object::packets_received).unwrap_or_default(),
    }
}

/// Records every event.
pub fn recorder(tx: Sender<Record>) -> impl EventHandler {
    from_fn(move |_: &mut Session, event: Event<'_>| {
        let _ = tx.send(record(&event));
    })
}

/// Records every event and answers each request with SUCCESS; GET requests
/// get `get_body` back.
pub fn responder(tx: Sender<Record>, get_body: Vec<u8>) -> impl EventHandler {
    from_fn(move |_: &mut Session, event: Event<'_>| {
        let rec = record(&event);
        if let (EventKind::Request, Some(obj)) = (&event.kind, event.object) {
            if obj.cmd() == Opcode::GET {
                obj.set_body(get_body.clone());
            }
            obj.set_response(ResponseCode::CONTINUE, ResponseCode::SUCCESS);
        }
        let _ = tx.send(rec);
    })
}

pub struct Pair {
    pub client: Session,
    pub client_events: Receiver<Record>,
    pub server: Session,
    pub server_events: Receiver<Record>,
}

pub fn pipe_pair(
    client_config: SessionConfig,
    server_config: SessionConfig,
    client_chunk: Option<usize>,
    get_body: Vec<u8>,
) -> Pair {
    let (a, b) = PipeTransport::pair();
    let a = match client_chunk {
        Some(size) => a.with_chunk_size(size),
        None => a,
    };
    let (ctx, crx) = unbounded();
    let (stx, srx) = unbounded();

    let mut server = Session::server(b, server_config, responder(stx, get_body));
    server.server_register().unwrap();
    let mut client = Session::client(a, client_config, recorder(ctx));
    client.transport_connect().unwrap();

    Pair {
        client,
        client_events: crx,
        server,
        server_events: srx,
    }
}

/// A server session whose peer end is driven by hand.
pub fn raw_server(config: SessionConfig, get_body: Vec<u8>) -> (Session, Receiver<Record>, PipeTransport) {
    let (a, mut peer) = PipeTransport::pair();
    peer.connect().unwrap();
    let (tx, rx) = unbounded();
    let mut server = Session::server(a, config, responder(tx, get_body));
    server.server_register().unwrap();
    (server, rx, peer)
}

/// Every byte the session has written to `peer` so far.
pub fn drain(peer: &mut PipeTransport) -> Vec<u8> {
    let mut buf = ByteBuffer::new();
    while peer.poll_input(Some(Duration::ZERO)).unwrap() == Readiness::Readable {
        if peer.read(&mut buf, 0xFFFF).unwrap() == 0 {
            break;
        }
    }
    buf.to_vec()
}

impl Pair {
    /// Alternate both pumps until both sessions are idle.
    pub fn settle(&mut self) {
        for _ in 0..1_000_000 {
            if self.client.is_idle() && self.server.is_idle() {
                return;
            }
            self.step();
        }
        panic!(
            "exchange did not settle: client {:?}, server {:?}",
            self.client.state(),
            self.server.state()
        );
    }

    pub fn step(&mut self) {
        self.client.handle_input(Some(Duration::ZERO)).unwrap();
        self.server.handle_input(Some(Duration::ZERO)).unwrap();
    }

    pub fn run(&mut self, object: Object) -> Option<ResponseCode> {
        self.client.request(object).unwrap();
        self.settle();
        self.client.last_response()
    }

    pub fn client_records(&self) -> Vec<Record> {
        self.client_events.try_iter().collect()
    }

    pub fn server_records(&self) -> Vec<Record> {
        self.server_events.try_iter().collect()
    }
}

pub fn count(records: &[Record], kind: EventKind) -> usize {
    records.iter().filter(|r| r.kind == kind).count()
}

pub fn last_of(records: &[Record], kind: EventKind) -> Option<&Record> {
    records.iter().rev().find(|r| r.kind == kind)
}

pub fn sample_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}
