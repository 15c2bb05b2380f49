// In-memory transport pair backed by crossbeam channels
//
// Each side owns the sending half of one channel and the receiving half of
// the other. Writes can be split into fixed size chunks so the receiver sees
// the same bytes with a different chunking.
use crate::traits::{not_connected, Readiness, Transport};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use obex_buffer::ByteBuffer;
use obex_core::OBEX_MAXIMUM_MTU;
use std::io::{self, Result};
use std::time::Duration;
use tracing::trace;

pub struct PipeTransport {
    tx: Option<Sender<Vec<u8>>>,
    rx: Receiver<Vec<u8>>,
    pending: ByteBuffer,
    peer_closed: bool,
    connected: bool,
    chunk: Option<usize>,
    mtu: u16,
}

impl PipeTransport {
    /// Two connected ends.
    pub fn pair() -> (PipeTransport, PipeTransport) {
        let (a_tx, b_rx) = unbounded();
        let (b_tx, a_rx) = unbounded();
        (PipeTransport::new(a_tx, a_rx), PipeTransport::new(b_tx, b_rx))
    }

    fn new(tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) -> Self {
        PipeTransport {
            tx: Some(tx),
            rx,
            pending: ByteBuffer::new(),
            peer_closed: false,
            connected: false,
            chunk: None,
            mtu: OBEX_MAXIMUM_MTU,
        }
    }

    /// Deliver every write as chunks of at most `size` bytes.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk = Some(size.max(1));
        self
    }

    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    fn queue(&mut self, chunk: Vec<u8>) -> Result<()> {
        self.pending
            .append(&chunk)
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))
    }
}

impl Transport for PipeTransport {
    fn connect(&mut self) -> Result<u16> {
        if self.tx.is_none() {
            return Err(not_connected());
        }
        self.connected = true;
        Ok(self.mtu)
    }

    fn disconnect(&mut self) -> Result<()> {
        // Dropping the sender lets the peer read an orderly close.
        self.tx = None;
        self.connected = false;
        Ok(())
    }

    fn listen(&mut self, _flags: crate::traits::InitFlags) -> Result<()> {
        self.connect().map(|_| ())
    }

    fn read(&mut self, buf: &mut ByteBuffer, max_len: usize) -> Result<usize> {
        if !self.connected {
            return Err(not_connected());
        }
        if self.pending.is_empty() {
            match self.rx.try_recv() {
                Ok(chunk) => self.queue(chunk)?,
                Err(TryRecvError::Empty) => {
                    return Err(io::Error::new(io::ErrorKind::WouldBlock, "no data"));
                }
                Err(TryRecvError::Disconnected) => self.peer_closed = true,
            }
        }
        let n = self.pending.len().min(max_len);
        buf.append(&self.pending[..n])
            .map_err(|e| io::Error::new(io::ErrorKind::OutOfMemory, e))?;
        self.pending.remove_begin(n);
        trace!("pipe read {} bytes", n);
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let tx = match (&self.tx, self.connected) {
            (Some(tx), true) => tx,
            _ => return Err(not_connected()),
        };
        let size = self.chunk.unwrap_or(data.len()).max(1);
        for chunk in data.chunks(size) {
            tx.send(chunk.to_vec())
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer dropped"))?;
        }
        Ok(data.len())
    }

    fn poll_input(&mut self, timeout: Option<Duration>) -> Result<Readiness> {
        if !self.connected {
            return Err(not_connected());
        }
        if !self.pending.is_empty() || self.peer_closed {
            return Ok(Readiness::Readable);
        }
        let next = match timeout {
            Some(d) if d.is_zero() => self.rx.try_recv().map_err(|e| match e {
                TryRecvError::Empty => RecvTimeoutError::Timeout,
                TryRecvError::Disconnected => RecvTimeoutError::Disconnected,
            }),
            Some(d) => self.rx.recv_timeout(d),
            None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match next {
            Ok(chunk) => {
                self.queue(chunk)?;
                Ok(Readiness::Readable)
            }
            Err(RecvTimeoutError::Timeout) => Ok(Readiness::Idle),
            Err(RecvTimeoutError::Disconnected) => {
                self.peer_closed = true;
                Ok(Readiness::Readable)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }
}
