// TCP transport implementation
use crate::poll::wait_readable;
use crate::traits::{not_connected, read_into, InitFlags, Readiness, Transport};
use nix::sys::socket::{setsockopt, sockopt};
use obex_buffer::ByteBuffer;
use obex_core::OBEX_MAXIMUM_MTU;
use std::io::{self, Result, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsFd;
use std::time::Duration;
use tracing::{debug, info};

/// IANA port for OBEX over TCP.
pub const OBEX_PORT: u16 = 650;

pub struct TcpTransport {
    peer: Option<SocketAddr>,
    bind: SocketAddr,
    buffer_size: Option<usize>,
    mtu: u16,
    keep_server: bool,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Transport that connects to `peer`.
    pub fn client(peer: SocketAddr) -> Self {
        TcpTransport {
            peer: Some(peer),
            bind: SocketAddr::from((Ipv4Addr::UNSPECIFIED, OBEX_PORT)),
            buffer_size: None,
            mtu: OBEX_MAXIMUM_MTU,
            keep_server: false,
            listener: None,
            stream: None,
        }
    }

    /// Transport that listens on `bind` for one peer at a time.
    pub fn server(bind: SocketAddr) -> Self {
        TcpTransport {
            peer: None,
            bind,
            ..TcpTransport::client(bind)
        }
    }

    /// Override SO_SNDBUF and SO_RCVBUF of the connected socket.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    pub fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match (&self.stream, &self.listener) {
            (Some(stream), _) => stream.local_addr().ok(),
            (None, Some(listener)) => listener.local_addr().ok(),
            _ => None,
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.as_ref().and_then(|s| s.peer_addr().ok())
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    fn configure(&self, stream: &TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        if let Some(size) = self.buffer_size {
            setsockopt(stream, sockopt::SndBuf, &size).map_err(io::Error::from)?;
            setsockopt(stream, sockopt::RcvBuf, &size).map_err(io::Error::from)?;
        }
        Ok(())
    }

    fn accept(&mut self) -> Result<Readiness> {
        let Some(listener) = self.listener.as_ref() else {
            return Err(not_connected());
        };
        let (stream, peer) = listener.accept()?;
        self.configure(&stream)?;
        info!("TCP transport accepted {}", peer);
        self.stream = Some(stream);
        if !self.keep_server {
            self.listener = None;
        }
        Ok(Readiness::Accepted)
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> Result<u16> {
        if self.stream.is_some() {
            return Ok(self.mtu);
        }
        let peer = self
            .peer
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no peer address"))?;
        let stream = TcpStream::connect(peer)?;
        self.configure(&stream)?;
        info!("TCP transport connected to {}", peer);
        self.stream = Some(stream);
        Ok(self.mtu)
    }

    fn disconnect(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            debug!("TCP transport closing connection");
            let _ = stream.shutdown(Shutdown::Both);
        }
        if !self.keep_server {
            self.listener = None;
        }
        Ok(())
    }

    fn listen(&mut self, flags: InitFlags) -> Result<()> {
        let listener = TcpListener::bind(self.bind)?;
        info!("TCP transport listening on {}", listener.local_addr()?);
        self.keep_server = flags.contains(InitFlags::KEEP_SERVER);
        self.listener = Some(listener);
        Ok(())
    }

    fn read(&mut self, buf: &mut ByteBuffer, max_len: usize) -> Result<usize> {
        match self.stream.as_mut() {
            Some(stream) => read_into(stream, buf, max_len),
            None => Err(not_connected()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        match self.stream.as_mut() {
            Some(stream) => {
                stream.write_all(data)?;
                Ok(data.len())
            }
            None => Err(not_connected()),
        }
    }

    fn poll_input(&mut self, timeout: Option<Duration>) -> Result<Readiness> {
        if let Some(stream) = self.stream.as_ref() {
            return Ok(if wait_readable(stream.as_fd(), timeout)? {
                Readiness::Readable
            } else {
                Readiness::Idle
            });
        }
        let pending = match self.listener.as_ref() {
            Some(listener) => wait_readable(listener.as_fd(), timeout)?,
            None => return Err(not_connected()),
        };
        if pending {
            self.accept()
        } else {
            Ok(Readiness::Idle)
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }
}
