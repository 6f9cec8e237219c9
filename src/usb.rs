//! rusb-backed transport
//!
//! This module finds GS-USB adapters on the bus, claims their interface and
//! exposes control transfers and the bulk endpoints through [`Transport`].
//! Bulk transfers are blocking in rusb, so stream operations run on tokio's
//! blocking pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use rusb::{DeviceHandle, Direction, GlobalContext, Recipient, RequestType};
use tokio::task::JoinHandle;

use crate::constants::*;
use crate::error::{GsUsbError, Result};
use crate::transport::{InStream, OutStream, Transport};

/// USB transport settings
#[derive(Debug, Clone)]
pub struct UsbConfig {
    /// Timeout applied to every control transfer
    pub control_timeout: Duration,
    /// Upper bound of one blocking bulk read; the inbound stream retries
    /// after each empty poll
    pub poll_interval: Duration,
    /// Interface number carrying the bulk endpoints
    pub interface: u8,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            control_timeout: Duration::from_millis(100),
            poll_interval: Duration::from_millis(100),
            interface: 0,
        }
    }
}

/// bmRequestType of vendor control transfers to the device
fn control_request_type(direction: Direction) -> u8 {
    rusb::request_type(direction, RequestType::Vendor, Recipient::Device)
}

/// Claimed GS-USB adapter
pub struct UsbTransport {
    handle: Arc<DeviceHandle<GlobalContext>>,
    config: UsbConfig,
    bus: u8,
    address: u8,
}

impl UsbTransport {
    /// Claim the adapter's interface, detaching a kernel driver if one is bound
    pub fn open(
        handle: DeviceHandle<GlobalContext>,
        bus: u8,
        address: u8,
        config: UsbConfig,
    ) -> Result<Self> {
        #[cfg(any(target_os = "linux", target_os = "macos"))]
        {
            if handle.kernel_driver_active(config.interface).unwrap_or(false) {
                handle
                    .detach_kernel_driver(config.interface)
                    .map_err(GsUsbError::DetachKernelDriver)?;
            }
        }

        handle
            .claim_interface(config.interface)
            .map_err(GsUsbError::ClaimInterface)?;
        debug!("claimed interface {} on bus {bus} addr {address}", config.interface);

        Ok(Self {
            handle: Arc::new(handle),
            config,
            bus,
            address,
        })
    }

    /// Check if a USB device is a GS-USB device
    fn is_gs_usb_device(vendor_id: u16, product_id: u16) -> bool {
        matches!(
            (vendor_id, product_id),
            (GS_USB_ID_VENDOR, GS_USB_ID_PRODUCT)
                | (GS_USB_CANDLELIGHT_VENDOR_ID, GS_USB_CANDLELIGHT_PRODUCT_ID)
                | (
                    GS_USB_CES_CANEXT_FD_VENDOR_ID,
                    GS_USB_CES_CANEXT_FD_PRODUCT_ID
                )
                | (
                    GS_USB_ABE_CANDEBUGGER_FD_VENDOR_ID,
                    GS_USB_ABE_CANDEBUGGER_FD_PRODUCT_ID
                )
        )
    }

    /// Scan for GS-USB devices
    ///
    /// Devices that cannot be opened or claimed are skipped.
    pub fn scan() -> Result<Vec<UsbTransport>> {
        let mut transports = Vec::new();

        for device in rusb::devices()?.iter() {
            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(_) => continue,
            };
            if !Self::is_gs_usb_device(desc.vendor_id(), desc.product_id()) {
                continue;
            }

            let opened = device.open().map_err(GsUsbError::from).and_then(|handle| {
                Self::open(
                    handle,
                    device.bus_number(),
                    device.address(),
                    UsbConfig::default(),
                )
            });
            match opened {
                Ok(transport) => transports.push(transport),
                Err(e) => debug!(
                    "skipping {:04x}:{:04x}: {e}",
                    desc.vendor_id(),
                    desc.product_id()
                ),
            }
        }

        Ok(transports)
    }

    /// Find a specific GS-USB device by bus and address
    pub fn find(bus: u8, address: u8, config: UsbConfig) -> Result<Option<UsbTransport>> {
        for device in rusb::devices()?.iter() {
            if device.bus_number() != bus || device.address() != address {
                continue;
            }

            let desc = match device.device_descriptor() {
                Ok(desc) => desc,
                Err(_) => continue,
            };

            if Self::is_gs_usb_device(desc.vendor_id(), desc.product_id()) {
                let handle = device.open()?;
                return Ok(Some(Self::open(handle, bus, address, config)?));
            }
        }

        Ok(None)
    }

    /// Get the USB bus number
    pub fn bus(&self) -> u8 {
        self.bus
    }

    /// Get the USB device address
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Read the serial number string descriptor, empty if the device has none
    pub fn serial_number(&self) -> Result<String> {
        let desc = self.handle.device().device_descriptor()?;
        match desc.serial_number_string_index() {
            Some(index) => Ok(self.handle.read_string_descriptor_ascii(index)?),
            None => Ok(String::new()),
        }
    }
}

impl Transport for UsbTransport {
    fn control_in(&self, request: u8, value: u16, length: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; length];
        let len = self
            .handle
            .read_control(
                control_request_type(Direction::In),
                request,
                value,
                0, // wIndex
                &mut buf,
                self.config.control_timeout,
            )
            .map_err(GsUsbError::ControlTransfer)?;
        buf.truncate(len);
        trace!("control in {request}: {len}/{length} bytes");
        Ok(buf)
    }

    fn control_out(&self, request: u8, value: u16, data: &[u8]) -> Result<()> {
        self.handle
            .write_control(
                control_request_type(Direction::Out),
                request,
                value,
                0, // wIndex
                data,
                self.config.control_timeout,
            )
            .map_err(GsUsbError::ControlTransfer)?;
        trace!("control out {request}: {} bytes", data.len());
        Ok(())
    }

    fn open_in_stream(&self) -> Result<Box<dyn InStream>> {
        Ok(Box::new(UsbInStream {
            handle: Arc::clone(&self.handle),
            poll_interval: self.config.poll_interval,
        }))
    }

    fn open_out_stream(&self) -> Result<Box<dyn OutStream>> {
        Ok(Box::new(UsbOutStream {
            handle: Arc::clone(&self.handle),
            in_flight: None,
        }))
    }
}

impl std::fmt::Display for UsbTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let device = self.handle.device();
        if let Ok(desc) = device.device_descriptor() {
            write!(
                f,
                "GS-USB {:04x}:{:04x} (bus {}, addr {})",
                desc.vendor_id(),
                desc.product_id(),
                self.bus,
                self.address
            )
        } else {
            write!(f, "GS-USB (bus {}, addr {})", self.bus, self.address)
        }
    }
}

struct UsbInStream {
    handle: Arc<DeviceHandle<GlobalContext>>,
    poll_interval: Duration,
}

#[async_trait]
impl InStream for UsbInStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            let handle = Arc::clone(&self.handle);
            let len = buf.len();
            let poll = self.poll_interval;
            let transfer = tokio::task::spawn_blocking(move || {
                let mut chunk = vec![0u8; len];
                handle
                    .read_bulk(GS_USB_ENDPOINT_IN, &mut chunk, poll)
                    .map(|n| {
                        chunk.truncate(n);
                        chunk
                    })
            })
            .await
            .map_err(|_| GsUsbError::BulkTransfer(rusb::Error::Other))?;

            match transfer {
                Ok(chunk) => {
                    buf[..chunk.len()].copy_from_slice(&chunk);
                    return Ok(chunk.len());
                }
                Err(rusb::Error::Timeout) => continue,
                Err(e) => return Err(GsUsbError::BulkTransfer(e)),
            }
        }
    }
}

struct UsbOutStream {
    handle: Arc<DeviceHandle<GlobalContext>>,
    /// Blocking transfer of the current or of an abandoned write
    in_flight: Option<JoinHandle<rusb::Result<usize>>>,
}

#[async_trait]
impl OutStream for UsbOutStream {
    async fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize> {
        // A dropped write keeps running on the blocking pool; the endpoint
        // takes one transfer at a time
        if let Some(abandoned) = self.in_flight.as_mut() {
            if let Ok(Ok(n)) = abandoned.await {
                warn!("abandoned write of {n} bytes completed late");
            }
            self.in_flight = None;
        }

        let handle = Arc::clone(&self.handle);
        let data = buf.to_vec();
        let transfer = self.in_flight.insert(tokio::task::spawn_blocking(move || {
            handle.write_bulk(GS_USB_ENDPOINT_OUT, &data, timeout)
        }));
        let written = transfer.await;
        self.in_flight = None;
        let written = written.map_err(|_| GsUsbError::WriteFailed(rusb::Error::Other))?;

        match written {
            Ok(n) => Ok(n),
            Err(rusb::Error::Timeout) => Err(GsUsbError::WriteTimeout),
            Err(e) => Err(GsUsbError::WriteFailed(e)),
        }
    }
}
