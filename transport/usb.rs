// USB transport: CDC OBEX over bulk endpoints
//
// Bus enumeration and raw transfers belong to a host USB stack, reached
// through the `UsbBus` and `UsbHandle` traits. This module owns the OBEX
// part: finding CDC OBEX functions, claiming them and moving packets.
use crate::cdc::{
    parse_functional, USB_CDC_CLASS, USB_CDC_OBEX_SUBCLASS, USB_ENDPOINT_IN,
    USB_ENDPOINT_TYPE_BULK, USB_ENDPOINT_TYPE_MASK,
};
use crate::interface::{Interface, UsbInterface, UsbLink};
use crate::traits::{not_connected, out_of_memory, Readiness, Transport};
use obex_buffer::ByteBuffer;
use obex_core::OBEX_MAXIMUM_MTU;
use std::io::{self, Result};
use std::time::Duration;
use tracing::{debug, info};

pub const USB_OBEX_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest single bulk transfer; also the size every read asks for.
pub const USB_MAX_TRANSFER: usize = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbEndpoint {
    pub address: u8,
    pub attributes: u8,
}

impl UsbEndpoint {
    pub fn is_in(&self) -> bool {
        self.address & USB_ENDPOINT_IN != 0
    }

    pub fn is_bulk(&self) -> bool {
        self.attributes & USB_ENDPOINT_TYPE_MASK == USB_ENDPOINT_TYPE_BULK
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UsbAltSetting {
    pub interface_number: u8,
    pub alternate_setting: u8,
    pub class: u8,
    pub subclass: u8,
    pub description: u8,       // String descriptor index, 0 if none
    pub endpoints: Vec<UsbEndpoint>,
    pub extra: Vec<u8>,        // Class-specific descriptors
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UsbConfig {
    pub value: u8,
    pub description: u8,
    pub interfaces: Vec<Vec<UsbAltSetting>>,
}

/// Device record produced by the host USB stack.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UsbDevice {
    pub bus_number: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: u8,
    pub product: u8,
    pub serial: u8,
    pub configs: Vec<UsbConfig>,
}

/// An opened device. Dropping it closes the device.
pub trait UsbHandle: Send {
    fn set_configuration(&mut self, config: u8) -> Result<()>;
    fn claim_interface(&mut self, interface: u8) -> Result<()>;
    fn release_interface(&mut self, interface: u8) -> Result<()>;
    fn set_alt_setting(&mut self, interface: u8, setting: u8) -> Result<()>;
    fn clear_halt(&mut self, endpoint: u8) -> Result<()>;
    fn bulk_read(&mut self, endpoint: u8, buf: &mut [u8], timeout: Duration) -> Result<usize>;
    fn bulk_write(&mut self, endpoint: u8, data: &[u8], timeout: Duration) -> Result<usize>;
    fn string_descriptor(&mut self, index: u8) -> Result<String>;
}

pub trait UsbBus: Send {
    fn devices(&mut self) -> Result<Vec<UsbDevice>>;
    fn open(&mut self, bus_number: u8, address: u8) -> Result<Box<dyn UsbHandle>>;
}

pub struct UsbTransport {
    bus: Box<dyn UsbBus>,
    selected: Option<UsbInterface>,
    handle: Option<Box<dyn UsbHandle>>,
    timeout: Duration,
    max_transfer: usize,
}

impl UsbTransport {
    pub fn new(bus: Box<dyn UsbBus>) -> Self {
        UsbTransport {
            bus,
            selected: None,
            handle: None,
            timeout: USB_OBEX_TIMEOUT,
            max_transfer: USB_MAX_TRANSFER,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_transfer(mut self, size: usize) -> Self {
        self.max_transfer = size.max(1);
        self
    }

    pub fn selected(&self) -> Option<&UsbInterface> {
        self.selected.as_ref()
    }

    fn link(&self) -> Result<UsbLink> {
        self.selected
            .as_ref()
            .map(|intf| intf.link)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no USB interface selected"))
    }

    fn describe(
        &mut self,
        dev: &UsbDevice,
        config: &UsbConfig,
        control: &UsbAltSetting,
    ) -> Result<UsbInterface> {
        let functional = parse_functional(&control.extra)?;
        let union = functional
            .union
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no union descriptor"))?;
        let data = find_data_settings(config, union.slave)?;

        let link = UsbLink {
            configuration: config.value,
            control_interface: control.interface_number,
            control_setting: control.alternate_setting,
            data_interface: union.slave,
            data_idle_setting: data.idle_setting,
            data_active_setting: data.active_setting,
            endpoint_read: data.endpoint_read,
            endpoint_write: data.endpoint_write,
        };

        // String fetches are best effort; a device that refuses them is still usable.
        let mut handle = self.bus.open(dev.bus_number, dev.address).ok();
        let mut string = |index: u8| -> Option<String> {
            if index == 0 {
                return None;
            }
            handle.as_mut()?.string_descriptor(index).ok()
        };

        Ok(UsbInterface {
            vendor_id: dev.vendor_id,
            product_id: dev.product_id,
            bus_number: dev.bus_number,
            device_address: dev.address,
            interface_number: control.interface_number,
            manufacturer: string(dev.manufacturer),
            product: string(dev.product),
            serial: string(dev.serial),
            configuration: string(config.description),
            control_interface: string(control.description),
            data_interface_idle: string(data.idle_description),
            data_interface_active: string(data.active_description),
            service: functional.service,
            link,
        })
    }
}

struct DataSettings {
    idle_setting: u8,
    idle_description: u8,
    active_setting: u8,
    active_description: u8,
    endpoint_read: u8,
    endpoint_write: u8,
}

/// Find the idle (no endpoints) and active (bulk in + bulk out) alternate
/// settings of the data interface named by the union descriptor.
fn find_data_settings(config: &UsbConfig, data_interface: u8) -> Result<DataSettings> {
    let mut idle = None;
    let mut active = None;
    for alt in config.interfaces.iter().flatten() {
        if alt.interface_number != data_interface {
            continue;
        }
        match alt.endpoints.as_slice() {
            [] => idle = Some((alt.alternate_setting, alt.description)),
            [a, b] if a.is_bulk() && b.is_bulk() && a.is_in() != b.is_in() => {
                let (read, write) = if a.is_in() { (a, b) } else { (b, a) };
                active = Some((alt.alternate_setting, alt.description, read.address, write.address));
            }
            _ => {}
        }
    }
    let (idle_setting, idle_description) =
        idle.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no idle setting"))?;
    let (active_setting, active_description, endpoint_read, endpoint_write) =
        active.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no active setting"))?;
    Ok(DataSettings {
        idle_setting,
        idle_description,
        active_setting,
        active_description,
        endpoint_read,
        endpoint_write,
    })
}

/// Claim control and data interfaces and select their settings. Anything
/// claimed before a failure is released again.
fn claim_link(handle: &mut dyn UsbHandle, link: &UsbLink) -> Result<()> {
    let mut claimed = Vec::with_capacity(2);
    let result = claim_steps(handle, link, &mut claimed);
    if result.is_err() {
        for interface in claimed.iter().rev() {
            let _ = handle.release_interface(*interface);
        }
    }
    result
}

fn claim_steps(handle: &mut dyn UsbHandle, link: &UsbLink, claimed: &mut Vec<u8>) -> Result<()> {
    handle.claim_interface(link.control_interface)?;
    claimed.push(link.control_interface);
    handle.set_alt_setting(link.control_interface, link.control_setting)?;
    handle.claim_interface(link.data_interface)?;
    claimed.push(link.data_interface);
    handle.set_alt_setting(link.data_interface, link.data_active_setting)?;
    Ok(())
}

impl Transport for UsbTransport {
    fn connect(&mut self) -> Result<u16> {
        if self.handle.is_some() {
            return Ok(OBEX_MAXIMUM_MTU);
        }
        let link = self.link()?;
        let intf = self.selected.as_ref().map(|i| (i.bus_number, i.device_address));
        let (bus_number, address) = intf.unwrap_or_default();

        let mut handle = self.bus.open(bus_number, address)?;
        if let Err(e) = handle.set_configuration(link.configuration) {
            debug!("can't set configuration {}: {}", link.configuration, e);
        }
        claim_link(handle.as_mut(), &link)?;

        info!(
            "USB transport claimed interfaces {}/{} on {}:{}",
            link.control_interface, link.data_interface, bus_number, address
        );
        self.handle = Some(handle);
        Ok(OBEX_MAXIMUM_MTU)
    }

    fn disconnect(&mut self) -> Result<()> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };
        let link = self.link()?;
        for endpoint in [link.endpoint_read, link.endpoint_write] {
            if let Err(e) = handle.clear_halt(endpoint) {
                debug!("can't clear halt on endpoint 0x{:02x}: {}", endpoint, e);
            }
        }
        if let Err(e) = handle.set_alt_setting(link.data_interface, link.data_idle_setting) {
            debug!("can't set data idle setting: {}", e);
        }
        if let Err(e) = handle.release_interface(link.data_interface) {
            debug!("can't release data interface: {}", e);
        }
        if let Err(e) = handle.release_interface(link.control_interface) {
            debug!("can't release control interface: {}", e);
        }
        debug!("USB transport released");
        Ok(())
    }

    fn read(&mut self, buf: &mut ByteBuffer, max_len: usize) -> Result<usize> {
        let link = self.link()?;
        let handle = self.handle.as_mut().ok_or_else(not_connected)?;

        // A bulk read must offer the full transfer size or the device
        // overflows it, so read into the larger region and trim.
        let want = max_len.max(self.max_transfer);
        let region = buf.reserve_end(want).map_err(out_of_memory)?;
        match handle.bulk_read(link.endpoint_read, region, self.timeout) {
            Ok(n) => {
                let n = n.min(want);
                buf.remove_end(want - n);
                Ok(n)
            }
            Err(e) => {
                buf.remove_end(want);
                Err(e)
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let link = self.link()?;
        let handle = self.handle.as_mut().ok_or_else(not_connected)?;
        for chunk in data.chunks(self.max_transfer) {
            let mut sent = 0;
            while sent < chunk.len() {
                let n = handle.bulk_write(link.endpoint_write, &chunk[sent..], self.timeout)?;
                if n == 0 {
                    return Err(io::Error::new(io::ErrorKind::WriteZero, "bulk write stalled"));
                }
                sent += n;
            }
        }
        Ok(data.len())
    }

    /// USB has no wait primitive; every poll lets the caller attempt a read.
    fn poll_input(&mut self, _timeout: Option<Duration>) -> Result<Readiness> {
        if self.handle.is_none() {
            return Err(not_connected());
        }
        Ok(Readiness::Readable)
    }

    fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    fn mtu(&self) -> u16 {
        OBEX_MAXIMUM_MTU
    }

    fn discover_interfaces(&mut self) -> Result<Vec<Interface>> {
        let devices = self.bus.devices()?;
        let mut found = Vec::new();
        for dev in &devices {
            for config in &dev.configs {
                for control in config.interfaces.iter().flatten() {
                    if control.class != USB_CDC_CLASS || control.subclass != USB_CDC_OBEX_SUBCLASS {
                        continue;
                    }
                    match self.describe(dev, config, control) {
                        Ok(intf) => found.push(Interface::Usb(intf)),
                        Err(e) => debug!(
                            "skipping OBEX interface {} on {}:{}: {}",
                            control.interface_number, dev.bus_number, dev.address, e
                        ),
                    }
                }
            }
        }
        info!("found {} USB OBEX interfaces", found.len());
        Ok(found)
    }

    fn select_interface(&mut self, intf: &Interface) -> Result<()> {
        match intf {
            Interface::Usb(usb) => {
                self.selected = Some(usb.clone());
                Ok(())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fake {
    // Scripted host USB stack.
    use super::*;
    use crate::cdc::{CDC_UNION_TYPE, USB_DT_CS_INTERFACE};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct Log {
        pub calls: Vec<String>,
        pub written: Vec<Vec<u8>>,
        pub to_read: VecDeque<Vec<u8>>,
        pub fail_on: Option<String>,
    }

    pub struct FakeHandle(pub Arc<Mutex<Log>>);

    impl FakeHandle {
        fn record(&self, call: String) -> Result<()> {
            let mut log = self.0.lock().unwrap();
            let fail = log.fail_on.as_deref() == Some(call.as_str());
            log.calls.push(call);
            if fail {
                Err(io::Error::new(io::ErrorKind::PermissionDenied, "scripted failure"))
            } else {
                Ok(())
            }
        }
    }

    impl UsbHandle for FakeHandle {
        fn set_configuration(&mut self, config: u8) -> Result<()> {
            self.record(format!("config {}", config))
        }
        fn claim_interface(&mut self, interface: u8) -> Result<()> {
            self.record(format!("claim {}", interface))
        }
        fn release_interface(&mut self, interface: u8) -> Result<()> {
            self.record(format!("release {}", interface))
        }
        fn set_alt_setting(&mut self, interface: u8, setting: u8) -> Result<()> {
            self.record(format!("alt {} {}", interface, setting))
        }
        fn clear_halt(&mut self, endpoint: u8) -> Result<()> {
            self.record(format!("halt 0x{:02x}", endpoint))
        }
        fn bulk_read(&mut self, _endpoint: u8, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            let mut log = self.0.lock().unwrap();
            log.calls.push(format!("read {}", buf.len()));
            let data = log.to_read.pop_front().unwrap_or_default();
            buf[..data.len()].copy_from_slice(&data);
            Ok(data.len())
        }
        fn bulk_write(&mut self, _endpoint: u8, data: &[u8], _timeout: Duration) -> Result<usize> {
            self.0.lock().unwrap().written.push(data.to_vec());
            Ok(data.len())
        }
        fn string_descriptor(&mut self, index: u8) -> Result<String> {
            Ok(format!("string {}", index))
        }
    }

    impl Drop for FakeHandle {
        fn drop(&mut self) {
            self.0.lock().unwrap().calls.push("close".to_string());
        }
    }

    pub struct FakeBus {
        pub log: Arc<Mutex<Log>>,
        pub devices: Vec<UsbDevice>,
    }

    impl UsbBus for FakeBus {
        fn devices(&mut self) -> Result<Vec<UsbDevice>> {
            Ok(self.devices.clone())
        }
        fn open(&mut self, _bus_number: u8, _address: u8) -> Result<Box<dyn UsbHandle>> {
            Ok(Box::new(FakeHandle(self.log.clone())))
        }
    }

    fn bulk(address: u8) -> UsbEndpoint {
        UsbEndpoint {
            address,
            attributes: USB_ENDPOINT_TYPE_BULK,
        }
    }

    /// A phone with one CDC OBEX function: control interface 1, data interface 2.
    pub fn phone() -> UsbDevice {
        let control = UsbAltSetting {
            interface_number: 1,
            alternate_setting: 0,
            class: USB_CDC_CLASS,
            subclass: USB_CDC_OBEX_SUBCLASS,
            description: 4,
            endpoints: Vec::new(),
            extra: vec![5, USB_DT_CS_INTERFACE, CDC_UNION_TYPE, 1, 2],
        };
        let idle = UsbAltSetting {
            interface_number: 2,
            alternate_setting: 0,
            class: 0x0A,
            ..Default::default()
        };
        let active = UsbAltSetting {
            interface_number: 2,
            alternate_setting: 1,
            class: 0x0A,
            description: 5,
            endpoints: vec![bulk(0x02), bulk(0x81)],
            ..Default::default()
        };
        let serial_port = UsbAltSetting {
            interface_number: 0,
            class: USB_CDC_CLASS,
            subclass: 0x02,
            ..Default::default()
        };
        UsbDevice {
            bus_number: 3,
            address: 7,
            vendor_id: 0x0fce,
            product_id: 0xd0a1,
            manufacturer: 1,
            product: 2,
            serial: 0,
            configs: vec![UsbConfig {
                value: 1,
                description: 0,
                interfaces: vec![vec![serial_port], vec![control], vec![idle, active]],
            }],
        }
    }

    pub fn bus(devices: Vec<UsbDevice>) -> (FakeBus, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        (
            FakeBus {
                log: log.clone(),
                devices,
            },
            log,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{bus, phone};
    use super::*;

    fn connected(max_transfer: usize) -> (UsbTransport, std::sync::Arc<std::sync::Mutex<fake::Log>>) {
        let (bus, log) = bus(vec![phone()]);
        let mut usb = UsbTransport::new(Box::new(bus)).with_max_transfer(max_transfer);
        let found = usb.discover_interfaces().unwrap();
        usb.select_interface(&found[0]).unwrap();
        usb.connect().unwrap();
        log.lock().unwrap().calls.clear();
        (usb, log)
    }

    #[test]
    fn discovers_cdc_obex_function() {
        let (bus, _log) = bus(vec![phone()]);
        let mut usb = UsbTransport::new(Box::new(bus));
        let found = usb.discover_interfaces().unwrap();
        assert_eq!(found.len(), 1);
        let Interface::Usb(intf) = &found[0];
        assert_eq!(intf.vendor_id, 0x0fce);
        assert_eq!(intf.interface_number, 1);
        assert_eq!(intf.manufacturer.as_deref(), Some("string 1"));
        assert_eq!(intf.serial, None);
        assert_eq!(intf.data_interface_active.as_deref(), Some("string 5"));
        assert_eq!(
            intf.link,
            UsbLink {
                configuration: 1,
                control_interface: 1,
                control_setting: 0,
                data_interface: 2,
                data_idle_setting: 0,
                data_active_setting: 1,
                endpoint_read: 0x81,
                endpoint_write: 0x02,
            }
        );
    }

    #[test]
    fn function_without_idle_setting_is_skipped() {
        let mut dev = phone();
        dev.configs[0].interfaces[2].remove(0);
        let (bus, _log) = bus(vec![dev]);
        let mut usb = UsbTransport::new(Box::new(bus));
        assert!(usb.discover_interfaces().unwrap().is_empty());
    }

    #[test]
    fn failed_claim_releases_what_was_claimed() {
        let (bus, log) = bus(vec![phone()]);
        let mut usb = UsbTransport::new(Box::new(bus));
        let found = usb.discover_interfaces().unwrap();
        usb.select_interface(&found[0]).unwrap();
        {
            let mut log = log.lock().unwrap();
            log.calls.clear();
            log.fail_on = Some("alt 2 1".to_string());
        }
        assert!(usb.connect().is_err());
        assert!(!usb.is_connected());
        assert_eq!(
            log.lock().unwrap().calls,
            vec![
                "config 1", "claim 1", "alt 1 0", "claim 2", "alt 2 1", "release 2", "release 1",
                "close",
            ]
        );
    }

    #[test]
    fn disconnect_restores_idle_setting_once() {
        let (mut usb, log) = connected(USB_MAX_TRANSFER);
        usb.disconnect().unwrap();
        usb.disconnect().unwrap();
        assert_eq!(
            log.lock().unwrap().calls,
            vec!["halt 0x81", "halt 0x02", "alt 2 0", "release 2", "release 1", "close"]
        );
    }

    #[test]
    fn read_over_allocates_and_trims() {
        let (mut usb, log) = connected(USB_MAX_TRANSFER);
        log.lock().unwrap().to_read.push_back(vec![0xA0, 0x00, 0x03]);
        let mut buf = ByteBuffer::from(&[0x55u8][..]);
        assert_eq!(usb.read(&mut buf, 16).unwrap(), 3);
        assert_eq!(buf.as_slice(), &[0x55, 0xA0, 0x00, 0x03]);
        assert_eq!(log.lock().unwrap().calls, vec![format!("read {}", USB_MAX_TRANSFER)]);
    }

    #[test]
    fn write_fragments_at_transfer_limit() {
        let (mut usb, log) = connected(4);
        assert_eq!(usb.write(&[1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap(), 9);
        assert_eq!(
            log.lock().unwrap().written,
            vec![vec![1, 2, 3, 4], vec![5, 6, 7, 8], vec![9]]
        );
    }

    #[test]
    fn poll_never_waits() {
        let (mut usb, _log) = connected(USB_MAX_TRANSFER);
        assert_eq!(usb.poll_input(None).unwrap(), Readiness::Readable);
    }
}
