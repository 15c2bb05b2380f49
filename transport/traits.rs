// Transport abstraction - one contract for every physical medium
use crate::interface::Interface;
use obex_buffer::ByteBuffer;
use std::io::{self, Read, Result};
use std::ops::BitOr;
use std::time::Duration;

/// Outcome of waiting for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Timeout expired without activity.
    Idle,
    /// Bytes (or an orderly close) can be read.
    Readable,
    /// A listening transport accepted a peer.
    Accepted,
}

// Initialization flags shared by a session and its transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitFlags(u32);

impl InitFlags {
    /// Keep the listening socket open after accepting a peer.
    pub const KEEP_SERVER: InitFlags = InitFlags(0x02);
    /// Never negotiate Single Response Mode.
    pub const SRM_DISABLED: InitFlags = InitFlags(0x100);

    pub const fn empty() -> Self {
        InitFlags(0)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: InitFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: InitFlags) {
        self.0 |= other.0;
    }
}

impl BitOr for InitFlags {
    type Output = InitFlags;

    fn bitor(self, rhs: InitFlags) -> InitFlags {
        InitFlags(self.0 | rhs.0)
    }
}

pub trait Transport: Send {
    /// Establish the link and return the largest packet this medium carries.
    /// A failed connect holds no resources.
    fn connect(&mut self) -> Result<u16>;

    /// Release the link. Disconnecting twice is not an error.
    fn disconnect(&mut self) -> Result<()>;

    /// Start accepting a peer (server role).
    fn listen(&mut self, _flags: InitFlags) -> Result<()> {
        Err(unsupported("listen"))
    }

    /// Append the bytes of one medium read to `buf` and return their count;
    /// 0 means the peer closed the link. Media with a fixed transfer unit
    /// may place more than `max_len` bytes.
    fn read(&mut self, buf: &mut ByteBuffer, max_len: usize) -> Result<usize>;

    /// Write all of `data`, fragmenting as the medium requires.
    fn write(&mut self, data: &[u8]) -> Result<usize>;

    /// Wait up to `timeout` (forever on `None`) for input.
    fn poll_input(&mut self, timeout: Option<Duration>) -> Result<Readiness>;

    fn is_connected(&self) -> bool;

    /// Largest packet this medium carries.
    fn mtu(&self) -> u16;

    /// Enumerate attachable interfaces. Always-addressed media have none.
    fn discover_interfaces(&mut self) -> Result<Vec<Interface>> {
        Ok(Vec::new())
    }

    /// Choose the interface the next `connect` attaches to.
    fn select_interface(&mut self, _intf: &Interface) -> Result<()> {
        Err(unsupported("interface selection"))
    }
}

pub(crate) fn unsupported(what: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        format!("{} not supported by this transport", what),
    )
}

pub(crate) fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "Not connected")
}

pub(crate) fn out_of_memory<E: std::error::Error + Send + Sync + 'static>(e: E) -> io::Error {
    io::Error::new(io::ErrorKind::OutOfMemory, e)
}

/// One `read` from a byte stream straight into the tail of `buf`.
pub(crate) fn read_into<R: Read>(src: &mut R, buf: &mut ByteBuffer, max_len: usize) -> Result<usize> {
    let region = buf.reserve_end(max_len).map_err(out_of_memory)?;
    match src.read(region) {
        Ok(n) => {
            buf.remove_end(max_len - n);
            Ok(n)
        }
        Err(e) => {
            buf.remove_end(max_len);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_combine() {
        let flags = InitFlags::KEEP_SERVER | InitFlags::SRM_DISABLED;
        assert!(flags.contains(InitFlags::KEEP_SERVER));
        assert!(!InitFlags::empty().contains(InitFlags::SRM_DISABLED));
    }

    #[test]
    fn read_into_trims_to_actual() {
        let mut buf = ByteBuffer::from(&[1u8][..]);
        let mut src: &[u8] = &[2, 3];
        assert_eq!(read_into(&mut src, &mut buf, 16).unwrap(), 2);
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
    }
}
