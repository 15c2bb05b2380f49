// Closed set of transports a session can drive, plus an escape hatch for
// caller-supplied media.
use crate::interface::Interface;
use crate::pipe::PipeTransport;
use crate::serial::SerialTransport;
use crate::tcp::TcpTransport;
use crate::traits::{InitFlags, Readiness, Transport};
use crate::usb::UsbTransport;
use obex_buffer::ByteBuffer;
use std::io::Result;
use std::time::Duration;

pub enum TransportBinding {
    Tcp(TcpTransport),
    Usb(UsbTransport),
    Serial(SerialTransport),
    Pipe(PipeTransport),
    Custom(Box<dyn Transport>),
}

impl TransportBinding {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportBinding::Tcp(_) => "tcp",
            TransportBinding::Usb(_) => "usb",
            TransportBinding::Serial(_) => "serial",
            TransportBinding::Pipe(_) => "pipe",
            TransportBinding::Custom(_) => "custom",
        }
    }

    fn inner(&mut self) -> &mut dyn Transport {
        match self {
            TransportBinding::Tcp(t) => t,
            TransportBinding::Usb(t) => t,
            TransportBinding::Serial(t) => t,
            TransportBinding::Pipe(t) => t,
            TransportBinding::Custom(t) => t.as_mut(),
        }
    }

    fn inner_ref(&self) -> &dyn Transport {
        match self {
            TransportBinding::Tcp(t) => t,
            TransportBinding::Usb(t) => t,
            TransportBinding::Serial(t) => t,
            TransportBinding::Pipe(t) => t,
            TransportBinding::Custom(t) => t.as_ref(),
        }
    }
}

impl Transport for TransportBinding {
    fn connect(&mut self) -> Result<u16> {
        self.inner().connect()
    }

    fn disconnect(&mut self) -> Result<()> {
        self.inner().disconnect()
    }

    fn listen(&mut self, flags: InitFlags) -> Result<()> {
        self.inner().listen(flags)
    }

    fn read(&mut self, buf: &mut ByteBuffer, max_len: usize) -> Result<usize> {
        self.inner().read(buf, max_len)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.inner().write(data)
    }

    fn poll_input(&mut self, timeout: Option<Duration>) -> Result<Readiness> {
        self.inner().poll_input(timeout)
    }

    fn is_connected(&self) -> bool {
        self.inner_ref().is_connected()
    }

    fn mtu(&self) -> u16 {
        self.inner_ref().mtu()
    }

    fn discover_interfaces(&mut self) -> Result<Vec<Interface>> {
        self.inner().discover_interfaces()
    }

    fn select_interface(&mut self, intf: &Interface) -> Result<()> {
        self.inner().select_interface(intf)
    }
}

impl From<TcpTransport> for TransportBinding {
    fn from(t: TcpTransport) -> Self {
        TransportBinding::Tcp(t)
    }
}

impl From<UsbTransport> for TransportBinding {
    fn from(t: UsbTransport) -> Self {
        TransportBinding::Usb(t)
    }
}

impl From<SerialTransport> for TransportBinding {
    fn from(t: SerialTransport) -> Self {
        TransportBinding::Serial(t)
    }
}

impl From<PipeTransport> for TransportBinding {
    fn from(t: PipeTransport) -> Self {
        TransportBinding::Pipe(t)
    }
}

impl From<Box<dyn Transport>> for TransportBinding {
    fn from(t: Box<dyn Transport>) -> Self {
        TransportBinding::Custom(t)
    }
}
