// Discovered interfaces handed to the consumer
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interface {
    Usb(UsbInterface),
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Interface::Usb(usb) => write!(
                f,
                "USB {:04x}:{:04x} bus {} dev {} intf {} {} {}",
                usb.vendor_id,
                usb.product_id,
                usb.bus_number,
                usb.device_address,
                usb.interface_number,
                usb.manufacturer.as_deref().unwrap_or("?"),
                usb.product.as_deref().unwrap_or("?"),
            ),
        }
    }
}

/// A CDC OBEX function found during enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UsbInterface {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub device_address: u8,
    pub interface_number: u8,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial: Option<String>,
    pub configuration: Option<String>,
    pub control_interface: Option<String>,
    pub data_interface_idle: Option<String>,
    pub data_interface_active: Option<String>,
    pub service: Option<Vec<u8>>,        // OBEX service identifier descriptor payload
    pub link: UsbLink,
}

// Everything connect needs to claim the function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsbLink {
    pub configuration: u8,
    pub control_interface: u8,
    pub control_setting: u8,
    pub data_interface: u8,
    pub data_idle_setting: u8,
    pub data_active_setting: u8,
    pub endpoint_read: u8,
    pub endpoint_write: u8,
}
