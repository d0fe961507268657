//! USB bulk transport using the `nusb` crate
//!
//! The "picker" enumerates attached devices, keeps the ones matching the
//! filters, and prefers a device exposing a USB Printer class interface.
//! Hubs are never picked.

use async_trait::async_trait;
use nusb::transfer::{Direction, EndpointType};
use tracing::{debug, info, instrument};

use super::{
    DeviceInfo, EndpointDirection, EndpointKind, HostError, HostResult, UsbAlternate,
    UsbConfiguration, UsbDevice, UsbDeviceFilter, UsbEndpoint, UsbHost, UsbInterface,
};

/// USB Printer class code (bInterfaceClass)
const USB_CLASS_PRINTER: u8 = 0x07;

/// USB Hub class code (bDeviceClass)
const USB_CLASS_HUB: u8 = 0x09;

/// USB host backed by the operating system's USB stack
#[derive(Debug, Clone, Default)]
pub struct NusbHost;

impl NusbHost {
    pub fn new() -> Self {
        Self
    }
}

fn interface_classes(dev: &nusb::DeviceInfo) -> Vec<u8> {
    dev.interfaces().map(|i| i.class()).collect()
}

#[async_trait]
impl UsbHost for NusbHost {
    #[instrument(skip(self))]
    async fn request_device(&self, filters: &[UsbDeviceFilter]) -> HostResult<Box<dyn UsbDevice>> {
        let candidates: Vec<nusb::DeviceInfo> = nusb::list_devices()?
            .filter(|d| d.class() != USB_CLASS_HUB)
            .filter(|d| {
                let classes = interface_classes(d);
                filters.is_empty()
                    || filters
                        .iter()
                        .any(|f| f.matches(d.vendor_id(), d.product_id(), &classes))
            })
            .collect();

        let picked = candidates
            .iter()
            .find(|d| interface_classes(d).contains(&USB_CLASS_PRINTER))
            .or_else(|| candidates.first())
            .cloned()
            .ok_or_else(|| HostError::NotFound("no matching USB device attached".to_string()))?;

        info!(
            vendor_id = %format!("{:04X}", picked.vendor_id()),
            product_id = %format!("{:04X}", picked.product_id()),
            candidates = candidates.len(),
            "USB device picked"
        );

        Ok(Box::new(NusbDevice {
            info: picked,
            device: None,
            claimed: Vec::new(),
        }))
    }
}

struct NusbDevice {
    info: nusb::DeviceInfo,
    device: Option<nusb::Device>,
    claimed: Vec<(u8, nusb::Interface)>,
}

impl NusbDevice {
    fn device(&self) -> HostResult<&nusb::Device> {
        self.device.as_ref().ok_or(HostError::Disconnected)
    }

    fn interface(&self, number: u8) -> HostResult<&nusb::Interface> {
        self.claimed
            .iter()
            .find(|(n, _)| *n == number)
            .map(|(_, iface)| iface)
            .ok_or_else(|| HostError::Io(format!("interface {} is not claimed", number)))
    }
}

fn snapshot(config: &nusb::descriptors::Configuration<'_>) -> UsbConfiguration {
    let mut interfaces: Vec<UsbInterface> = Vec::new();

    for alt in config.interface_alt_settings() {
        let endpoints = alt
            .endpoints()
            .map(|ep| UsbEndpoint {
                address: ep.address(),
                direction: match ep.direction() {
                    Direction::In => EndpointDirection::In,
                    Direction::Out => EndpointDirection::Out,
                },
                kind: match ep.transfer_type() {
                    EndpointType::Control => EndpointKind::Control,
                    EndpointType::Isochronous => EndpointKind::Isochronous,
                    EndpointType::Bulk => EndpointKind::Bulk,
                    EndpointType::Interrupt => EndpointKind::Interrupt,
                },
                max_packet_size: ep.max_packet_size(),
            })
            .collect();

        let alternate = UsbAlternate {
            setting: alt.alternate_setting(),
            class_code: alt.class(),
            endpoints,
        };

        match interfaces
            .iter_mut()
            .find(|i| i.number == alt.interface_number())
        {
            Some(iface) => iface.alternates.push(alternate),
            None => interfaces.push(UsbInterface {
                number: alt.interface_number(),
                alternates: vec![alternate],
            }),
        }
    }

    UsbConfiguration {
        value: config.configuration_value(),
        interfaces,
    }
}

#[async_trait]
impl UsbDevice for NusbDevice {
    async fn open(&mut self) -> HostResult<()> {
        self.device = Some(self.info.open()?);
        Ok(())
    }

    fn configuration(&self) -> Option<UsbConfiguration> {
        let device = self.device.as_ref()?;
        device.active_configuration().ok().map(|c| snapshot(&c))
    }

    async fn select_configuration(&mut self, value: u8) -> HostResult<()> {
        self.device()?.set_configuration(value)?;
        Ok(())
    }

    async fn claim_interface(&mut self, interface: u8) -> HostResult<()> {
        // usblp may hold the interface on Linux
        let iface = self.device()?.detach_and_claim_interface(interface)?;
        self.claimed.push((interface, iface));
        Ok(())
    }

    async fn select_alternate(&mut self, interface: u8, alternate: u8) -> HostResult<()> {
        self.interface(interface)?.set_alt_setting(alternate)?;
        Ok(())
    }

    async fn release_interface(&mut self, interface: u8) -> HostResult<()> {
        self.claimed.retain(|(n, _)| *n != interface);
        Ok(())
    }

    async fn transfer_out(&mut self, endpoint: u8, data: &[u8]) -> HostResult<usize> {
        let (_, iface) = self.claimed.last().ok_or(HostError::Disconnected)?;
        let completion = iface.bulk_out(endpoint, data.to_vec()).await;
        let written = completion
            .into_result()
            .map_err(|e| HostError::Transfer(e.to_string()))?
            .actual_length();
        debug!(endpoint, written, "bulk OUT");
        Ok(written)
    }

    async fn close(&mut self) -> HostResult<()> {
        self.claimed.clear();
        self.device = None;
        Ok(())
    }

    fn info(&self) -> DeviceInfo {
        DeviceInfo::Usb {
            product_name: self.info.product_string().map(str::to_string),
            manufacturer_name: self.info.manufacturer_string().map(str::to_string),
            vendor_id: self.info.vendor_id(),
            product_id: self.info.product_id(),
            serial_number: self.info.serial_number().map(str::to_string),
        }
    }
}
