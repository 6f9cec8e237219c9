//! GS-USB device control
//!
//! This module provides the `GsUsb` struct, which runs the control-transfer
//! handshake that configures an adapter before streaming: device config and
//! bit timing constants, mode, bit timing, termination and identify.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::constants::*;
use crate::error::{GsUsbError, Result};
use crate::structures::{
    BitTiming, CanMode, DeviceCapabilities, DeviceConfig, DeviceMode, DeviceState,
    ExtendedCapabilities, Features, IdentifyMode, ModeFlags, Termination,
};
use crate::timing;
use crate::transport::Transport;

/// GS-USB device handle
///
/// Owns the transport and the state learned during configuration. The
/// nominal bit timing must be set before a [`crate::StreamEngine`] can be
/// started on this device.
///
/// # Example
///
/// ```no_run
/// use gs_usb_stream::{GsUsb, ModeFlags, UsbTransport};
///
/// let transport = UsbTransport::scan()?
///     .into_iter()
///     .next()
///     .ok_or(gs_usb_stream::GsUsbError::DeviceNotFound)?;
/// let mut dev = GsUsb::open(transport)?;
///
/// // Reset, set 500 kbps and go on the bus
/// dev.configure(500_000, ModeFlags::empty())?;
/// # Ok::<(), gs_usb_stream::GsUsbError>(())
/// ```
pub struct GsUsb<T: Transport> {
    transport: T,
    /// Cached DEVICE_CONFIG response
    config: Option<DeviceConfig>,
    /// Cached BT_CONST response
    capabilities: Option<DeviceCapabilities>,
    /// Last nominal bit timing accepted by the device
    timing: Option<BitTiming>,
    /// Last data phase bit timing accepted by the device
    data_timing: Option<BitTiming>,
    /// Flags passed with the last start
    mode_flags: ModeFlags,
    started: bool,
    /// Set while a stream engine owns the bulk streams
    streaming: Arc<AtomicBool>,
}

/// Exclusive right to the device's bulk streams, released on drop
pub(crate) struct StreamClaim(Arc<AtomicBool>);

impl Drop for StreamClaim {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<T: Transport> GsUsb<T> {
    /// Wrap a transport without talking to the device
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            config: None,
            capabilities: None,
            timing: None,
            data_timing: None,
            mode_flags: ModeFlags::empty(),
            started: false,
            streaming: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Wrap a transport and read device config and bit timing constants
    pub fn open(transport: T) -> Result<Self> {
        let mut dev = Self::new(transport);
        let config = dev.device_config()?;
        let capabilities = dev.bit_timing_constants()?;
        debug!(
            "opened device: {} channel(s), clock {} Hz, features 0x{:08x}",
            config.channel_count(),
            capabilities.clock_hz,
            capabilities.feature_bits
        );
        Ok(dev)
    }

    /// Get the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send GS_USB_BREQ_MODE
    pub fn set_mode(&mut self, mode: CanMode, flags: ModeFlags) -> Result<()> {
        let request = DeviceMode::new(mode, flags);
        self.control_out(GS_USB_BREQ_MODE, 0, &request.pack())?;
        match mode {
            CanMode::Start => {
                self.mode_flags = flags;
                self.started = true;
            }
            CanMode::Reset => self.started = false,
        }
        Ok(())
    }

    /// Start the channel with the flags the device advertises support for
    pub fn start(&mut self, flags: ModeFlags) -> Result<()> {
        let supported = self.bit_timing_constants()?.features().supported_modes();
        let dropped = flags - supported;
        if !dropped.is_empty() {
            warn!("device does not support mode flags {dropped:?}, starting without them");
        }
        self.set_mode(CanMode::Start, flags & supported)
    }

    /// Stop the channel
    pub fn stop(&mut self) -> Result<()> {
        self.set_mode(CanMode::Reset, ModeFlags::empty())
    }

    /// Reset, set the nominal bitrate and start
    ///
    /// On failure the timing state is cleared, so a half-configured device
    /// cannot be streamed from.
    pub fn configure(&mut self, bitrate: u32, flags: ModeFlags) -> Result<()> {
        let result = self
            .set_mode(CanMode::Reset, ModeFlags::empty())
            .and_then(|_| self.set_bitrate(bitrate))
            .and_then(|_| self.set_mode(CanMode::Start, flags));
        if let Err(e) = &result {
            warn!("configuration at {bitrate} bit/s aborted: {e}");
            self.timing = None;
            self.data_timing = None;
        }
        result
    }

    /// Whether nominal bit timing has been accepted by the device
    pub fn is_timing_configured(&self) -> bool {
        self.timing.is_some()
    }

    /// Whether the channel was started and not reset since
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Flags passed with the last start
    pub fn mode_flags(&self) -> ModeFlags {
        self.mode_flags
    }

    /// Whether a stream engine currently owns the bulk streams
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Acquire)
    }

    pub(crate) fn claim_streams(&self) -> Result<StreamClaim> {
        self.streaming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| GsUsbError::AlreadyStreaming)?;
        Ok(StreamClaim(Arc::clone(&self.streaming)))
    }

    /// Get device config (channel count, software/hardware version)
    pub fn device_config(&mut self) -> Result<DeviceConfig> {
        if let Some(config) = self.config {
            return Ok(config);
        }
        let data = self.transport.control_in(
            GS_USB_BREQ_DEVICE_CONFIG,
            0,
            GS_USB_DEVICE_CONFIG_SIZE,
        )?;
        let config = DeviceConfig::unpack(&data)?;
        self.config = Some(config);
        Ok(config)
    }

    /// Get bit timing constants (feature bits, clock, nominal limits)
    pub fn bit_timing_constants(&mut self) -> Result<DeviceCapabilities> {
        if let Some(cap) = self.capabilities {
            return Ok(cap);
        }
        let data = self
            .transport
            .control_in(GS_USB_BREQ_BT_CONST, 0, GS_USB_BT_CONST_SIZE)?;
        let cap = DeviceCapabilities::unpack(&data)?;
        self.capabilities = Some(cap);
        Ok(cap)
    }

    /// Get extended bit timing constants including the data phase limits
    pub fn bit_timing_constants_ext(&mut self) -> Result<ExtendedCapabilities> {
        let data =
            self.transport
                .control_in(GS_USB_BREQ_BT_CONST_EXT, 0, GS_USB_BT_CONST_EXT_SIZE)?;
        let ext = ExtendedCapabilities::unpack(&data)?;
        self.capabilities = Some(ext.capabilities);
        Ok(ext)
    }

    /// Device CAN clock in Hz
    pub fn clock_hz(&mut self) -> Result<u32> {
        Ok(self.bit_timing_constants()?.clock_hz)
    }

    /// Set nominal bit timing
    pub fn set_bit_timing(&mut self, timing: BitTiming) -> Result<()> {
        self.control_out(GS_USB_BREQ_BITTIMING, 0, &timing.pack())?;
        self.timing = Some(timing);
        Ok(())
    }

    /// Set CAN FD data phase bit timing
    pub fn set_data_bit_timing(&mut self, timing: BitTiming) -> Result<()> {
        self.control_out(GS_USB_BREQ_DATA_BITTIMING, 0, &timing.pack())?;
        self.data_timing = Some(timing);
        Ok(())
    }

    /// Set the nominal bitrate from the timing table
    pub fn set_bitrate(&mut self, bitrate: u32) -> Result<()> {
        let clock_hz = self.clock_hz()?;
        let timing = timing::lookup(clock_hz, bitrate)?;
        debug!("bitrate {bitrate} at {clock_hz} Hz -> {timing:?}");
        self.set_bit_timing(timing)
    }

    /// Get the last nominal bit timing that was set
    pub fn bit_timing(&self) -> Option<BitTiming> {
        self.timing
    }

    /// Get the last data phase bit timing that was set
    pub fn data_bit_timing(&self) -> Option<BitTiming> {
        self.data_timing
    }

    /// Read the device's free-running microsecond timestamp
    pub fn timestamp(&self) -> Result<u32> {
        self.read_word(GS_USB_BREQ_TIMESTAMP)
    }

    /// Read the bus termination state
    pub fn termination(&self) -> Result<Termination> {
        self.read_word(GS_USB_BREQ_GET_TERMINATION)
            .map(Termination::from_raw)
    }

    /// Switch the bus termination resistor
    pub fn set_termination(&self, state: Termination) -> Result<()> {
        self.control_out(
            GS_USB_BREQ_SET_TERMINATION,
            0,
            &state.to_raw().to_le_bytes(),
        )
    }

    /// Start or stop LED identification
    pub fn identify(&self, mode: IdentifyMode) -> Result<()> {
        self.control_out(GS_USB_BREQ_IDENTIFY, 0, &(mode as u32).to_le_bytes())
    }

    /// Read the user-assignable device id
    pub fn user_id(&self) -> Result<u32> {
        self.read_word(GS_USB_BREQ_GET_USER_ID)
    }

    /// Store a user-assignable device id
    pub fn set_user_id(&self, id: u32) -> Result<()> {
        self.control_out(GS_USB_BREQ_SET_USER_ID, 0, &id.to_le_bytes())
    }

    /// Send HOST_FORMAT request (legacy requirement)
    ///
    /// Errors are ignored; modern firmware does not implement it.
    pub fn send_host_format(&self) {
        let magic = GS_USB_HOST_FORMAT_MAGIC.to_le_bytes();
        if let Err(e) = self.control_out(GS_USB_BREQ_HOST_FORMAT, 0, &magic) {
            debug!("host format rejected: {e}");
        }
    }

    /// Check if device supports CAN FD
    pub fn supports_fd(&mut self) -> Result<bool> {
        self.has_feature(Features::FD)
    }

    /// Check if device supports termination control
    pub fn supports_termination(&mut self) -> Result<bool> {
        self.has_feature(Features::TERMINATION)
    }

    /// Check if device supports GET_STATE request
    pub fn supports_get_state(&mut self) -> Result<bool> {
        self.has_feature(Features::GET_STATE)
    }

    /// Get CAN bus state and error counters
    pub fn get_state(&mut self, channel: u16) -> Result<DeviceState> {
        if !self.supports_get_state()? {
            return Err(GsUsbError::FeatureNotSupported("GET_STATE"));
        }
        let data =
            self.transport
                .control_in(GS_USB_BREQ_GET_STATE, channel, GS_USB_DEVICE_STATE_SIZE)?;
        DeviceState::unpack(&data)
    }

    fn has_feature(&mut self, feature: Features) -> Result<bool> {
        Ok(self.bit_timing_constants()?.features().contains(feature))
    }

    fn read_word(&self, request: u8) -> Result<u32> {
        let data = self.transport.control_in(request, 0, 4)?;
        if data.len() < 4 {
            return Err(GsUsbError::ShortRead {
                expected: 4,
                actual: data.len(),
            });
        }
        Ok(u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
    }

    fn control_out(&self, request: u8, value: u16, data: &[u8]) -> Result<()> {
        trace!("request {request} value {value}: {data:02x?}");
        self.transport.control_out(request, value, data)
    }
}

impl<T: Transport> std::fmt::Debug for GsUsb<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GsUsb")
            .field("config", &self.config)
            .field("capabilities", &self.capabilities)
            .field("timing", &self.timing)
            .field("started", &self.started)
            .field("streaming", &self.is_streaming())
            .field("mode_flags", &self.mode_flags)
            .finish()
    }
}

impl<T: Transport> Drop for GsUsb<T> {
    fn drop(&mut self) {
        // Leave the adapter off the bus; it may already be gone
        if self.started {
            let _ = self.stop();
        }
    }
}
