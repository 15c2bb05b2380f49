// Serial cable transport: raw tty line with optional AT command setup
use crate::poll::wait_readable;
use crate::traits::{not_connected, read_into, Readiness, Transport};
use nix::sys::termios::{
    self, BaudRate, ControlFlags, FlushArg, SetArg, SpecialCharacterIndices, Termios,
};
use obex_buffer::ByteBuffer;
use obex_core::OBEX_MAXIMUM_MTU;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Result, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Longest AT response accepted before giving up.
const AT_RESPONSE_MAX: usize = 500;
const AT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CableType {
    /// The line carries OBEX as soon as it is open.
    Direct,
    /// Phones that switch to OBEX after `AT*EOBEX`.
    Ericsson,
}

pub struct SerialTransport {
    path: PathBuf,
    cable: CableType,
    baud: BaudRate,
    file: Option<File>,
    saved: Option<Termios>,    // Attributes to restore on disconnect
}

impl SerialTransport {
    pub fn new(path: impl AsRef<Path>, cable: CableType) -> Self {
        SerialTransport {
            path: path.as_ref().to_path_buf(),
            cable,
            baud: BaudRate::B115200,
            file: None,
            saved: None,
        }
    }

    pub fn with_baud_rate(mut self, baud: BaudRate) -> Self {
        self.baud = baud;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn configure(&self, file: &File, saved: &Termios) -> Result<()> {
        let mut tio = saved.clone();
        termios::cfmakeraw(&mut tio);
        termios::cfsetspeed(&mut tio, self.baud)?;
        tio.control_flags |= ControlFlags::CLOCAL | ControlFlags::CREAD;
        tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
        termios::tcflush(file, FlushArg::TCIOFLUSH)?;
        termios::tcsetattr(file, SetArg::TCSANOW, &tio)?;

        // Opened non-blocking so a missing carrier cannot hang open();
        // reads are gated by poll from here on.
        // SAFETY: plain fcntl on a descriptor owned by `file`.
        if unsafe { libc::fcntl(file.as_raw_fd(), libc::F_SETFL, 0) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn negotiate(&self, file: &mut File) -> Result<()> {
        match self.cable {
            CableType::Direct => Ok(()),
            CableType::Ericsson => {
                expect_at(file, "ATZ\r", "OK")?;
                expect_at(file, "AT*EOBEX\r", "CONNECT")
            }
        }
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> Result<u16> {
        if self.file.is_some() {
            return Ok(OBEX_MAXIMUM_MTU);
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(&self.path)?;
        let saved = termios::tcgetattr(&file)?;

        let result = self
            .configure(&file, &saved)
            .and_then(|_| self.negotiate(&mut file));
        if let Err(e) = result {
            warn!("serial setup on {} failed: {}", self.path.display(), e);
            let _ = termios::tcsetattr(&file, SetArg::TCSANOW, &saved);
            return Err(e);
        }

        info!("serial transport open on {} ({:?})", self.path.display(), self.cable);
        self.file = Some(file);
        self.saved = Some(saved);
        Ok(OBEX_MAXIMUM_MTU)
    }

    fn disconnect(&mut self) -> Result<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        if let Some(saved) = self.saved.take() {
            if let Err(e) = termios::tcsetattr(&file, SetArg::TCSANOW, &saved) {
                debug!("can't restore terminal attributes: {}", e);
            }
        }
        debug!("serial transport closed {}", self.path.display());
        Ok(())
    }

    fn read(&mut self, buf: &mut ByteBuffer, max_len: usize) -> Result<usize> {
        match self.file.as_mut() {
            Some(file) => read_into(file, buf, max_len),
            None => Err(not_connected()),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        match self.file.as_mut() {
            Some(file) => {
                file.write_all(data)?;
                Ok(data.len())
            }
            None => Err(not_connected()),
        }
    }

    fn poll_input(&mut self, timeout: Option<Duration>) -> Result<Readiness> {
        match self.file.as_ref() {
            Some(file) if wait_readable(file.as_fd(), timeout)? => Ok(Readiness::Readable),
            Some(_) => Ok(Readiness::Idle),
            None => Err(not_connected()),
        }
    }

    fn is_connected(&self) -> bool {
        self.file.is_some()
    }

    fn mtu(&self) -> u16 {
        OBEX_MAXIMUM_MTU
    }
}

/// Send `cmd` and require the first response line to be `expected`.
fn expect_at(file: &mut File, cmd: &str, expected: &str) -> Result<()> {
    let rsp = at_command(file, cmd, AT_TIMEOUT)?;
    if rsp.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::ConnectionRefused,
            format!("{} answered {:?}, expected {}", cmd.trim(), rsp, expected),
        ))
    }
}

fn at_command(file: &mut File, cmd: &str, timeout: Duration) -> Result<String> {
    debug!("AT > {}", cmd.trim());
    file.write_all(cmd.as_bytes())?;

    let deadline = Instant::now() + timeout;
    let mut collected = Vec::new();
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() || !wait_readable(file.as_fd(), Some(left))? {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no AT response"));
        }
        let mut chunk = [0u8; 64];
        let n = file.read(&mut chunk)?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "line closed"));
        }
        collected.extend_from_slice(&chunk[..n]);
        if let Some(rsp) = parse_at_response(&collected, cmd) {
            debug!("AT < {}", rsp);
            return Ok(rsp);
        }
        if collected.len() > AT_RESPONSE_MAX {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "AT response too long"));
        }
    }
}

/// First complete, non-empty response line that is not the echo of `cmd`.
pub fn parse_at_response(buf: &[u8], cmd: &str) -> Option<String> {
    let text = String::from_utf8_lossy(buf);
    let echo = cmd.trim();
    let mut lines: Vec<&str> = text.split(['\r', '\n']).collect();
    // The last piece has no terminator yet.
    lines.pop();
    lines
        .into_iter()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.eq_ignore_ascii_case(echo))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_skips_echo_and_blank_lines() {
        assert_eq!(
            parse_at_response(b"ATZ\r\r\nOK\r\n", "ATZ\r"),
            Some("OK".to_string())
        );
        assert_eq!(
            parse_at_response(b"\r\nCONNECT\r\n", "AT*EOBEX\r"),
            Some("CONNECT".to_string())
        );
    }

    #[test]
    fn unterminated_line_is_not_a_response() {
        assert_eq!(parse_at_response(b"ATZ\r\nOK", "ATZ\r"), None);
        assert_eq!(parse_at_response(b"", "ATZ\r"), None);
    }

    #[test]
    fn missing_device_holds_nothing() {
        let mut serial = SerialTransport::new("/nonexistent/ttyOBEX", CableType::Direct);
        assert!(serial.connect().is_err());
        assert!(!serial.is_connected());
        serial.disconnect().unwrap();
    }
}
