// CDC class-specific descriptor parsing for USB OBEX functions
//
// The extra bytes of a CDC control interface are a run of descriptors, each
// starting with bLength and bDescriptorType. Every step is checked against
// the bytes left so a bad bLength ends the walk instead of reading past it.
use std::io;
use tracing::{debug, trace};

pub const USB_DT_CS_INTERFACE: u8 = 0x24;
pub const CDC_HEADER_TYPE: u8 = 0x00;
pub const CDC_UNION_TYPE: u8 = 0x06;
pub const CDC_OBEX_TYPE: u8 = 0x15;
pub const CDC_OBEX_SERVICE_ID_TYPE: u8 = 0x19;

pub const USB_CDC_CLASS: u8 = 0x02;
pub const USB_CDC_OBEX_SUBCLASS: u8 = 0x0b;

pub const USB_ENDPOINT_IN: u8 = 0x80;
pub const USB_ENDPOINT_TYPE_MASK: u8 = 0x03;
pub const USB_ENDPOINT_TYPE_BULK: u8 = 0x02;

/// Iterates raw descriptors, yielding each one's full bytes.
pub struct DescriptorIter<'a> {
    rest: &'a [u8],
}

impl<'a> DescriptorIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        DescriptorIter { rest: bytes }
    }
}

impl<'a> Iterator for DescriptorIter<'a> {
    type Item = io::Result<&'a [u8]>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let len = self.rest[0] as usize;
        let err = if len < 2 {
            Some("descriptor length below 2")
        } else if len > self.rest.len() {
            Some("descriptor runs past the buffer")
        } else {
            None
        };
        if let Some(msg) = err {
            self.rest = &[];
            return Some(Err(io::Error::new(io::ErrorKind::InvalidData, msg)));
        }
        let (desc, rest) = self.rest.split_at(len);
        self.rest = rest;
        Some(Ok(desc))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CdcUnion {
    pub master: u8,
    pub slave: u8,
}

/// The class-specific descriptors an OBEX control interface carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CdcFunctional {
    pub union: Option<CdcUnion>,
    pub obex_version: Option<u16>,
    pub service: Option<Vec<u8>>,
}

pub fn parse_functional(extra: &[u8]) -> io::Result<CdcFunctional> {
    let mut functional = CdcFunctional::default();
    for desc in DescriptorIter::new(extra) {
        let desc = desc?;
        if desc.len() < 3 || desc[1] != USB_DT_CS_INTERFACE {
            trace!("skipping descriptor type 0x{:02x}", desc[1]);
            continue;
        }
        match desc[2] {
            CDC_UNION_TYPE if desc.len() >= 5 => {
                if functional.union.is_some() {
                    debug!("more than one union descriptor, skipping");
                    continue;
                }
                functional.union = Some(CdcUnion {
                    master: desc[3],
                    slave: desc[4],
                });
            }
            CDC_OBEX_TYPE if desc.len() >= 5 => {
                functional.obex_version = Some(u16::from_le_bytes([desc[3], desc[4]]));
            }
            CDC_OBEX_SERVICE_ID_TYPE if functional.service.is_none() => {
                functional.service = Some(desc[3..].to_vec());
            }
            CDC_HEADER_TYPE => {}
            other => trace!("ignoring class descriptor subtype 0x{:02x}, length {}", other, desc.len()),
        }
    }
    Ok(functional)
}
