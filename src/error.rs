//! Error types for the GS-USB stream driver
//!
//! This module defines the error types used throughout the library for USB
//! transport failures, device configuration problems and stream transactions.

use thiserror::Error;

/// Result type alias for GS-USB operations
pub type Result<T> = std::result::Result<T, GsUsbError>;

/// Error types for GS-USB operations
#[derive(Error, Debug)]
pub enum GsUsbError {
    /// USB error from the rusb library
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// No GS-USB device found
    #[error("No GS-USB device found")]
    DeviceNotFound,

    /// Failed to claim interface
    #[error("Failed to claim USB interface: {0}")]
    ClaimInterface(rusb::Error),

    /// Failed to detach kernel driver
    #[error("Failed to detach kernel driver: {0}")]
    DetachKernelDriver(rusb::Error),

    /// Control transfer failed
    #[error("Control transfer failed: {0}")]
    ControlTransfer(rusb::Error),

    /// Bulk transfer on the inbound stream failed
    #[error("Bulk transfer failed: {0}")]
    BulkTransfer(rusb::Error),

    /// Control response shorter than the request layout
    #[error("Short control response: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// The bit timing table has no entry for the device clock
    #[error("Clock {clock_hz} Hz is not supported by the bit timing table")]
    ClockNotSupported { clock_hz: u32 },

    /// Unsupported bitrate for the device clock
    #[error("Unsupported bitrate {bitrate} for clock {clock_hz} Hz")]
    UnsupportedBitrate { bitrate: u32, clock_hz: u32 },

    /// Device does not support the requested feature
    #[error("Device does not support feature: {0}")]
    FeatureNotSupported(&'static str),

    /// Streaming was requested before nominal bit timing was set
    #[error("Bit timing has not been configured")]
    NotConfigured,

    /// Writing a frame to the outbound stream failed
    #[error("Write failed: {0}")]
    WriteFailed(rusb::Error),

    /// The outbound stream accepted fewer bytes than a full frame
    #[error("Short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },

    /// Timeout during write operation
    #[error("Write timeout")]
    WriteTimeout,

    /// The device did not echo the transmitted frame in time
    #[error("Timed out waiting for loopback frame")]
    LoopbackTimeout,

    /// No response frame arrived after the loopback
    #[error("Timed out waiting for response frame")]
    ResponseTimeout,

    /// Another transaction held the writer for the whole timeout
    #[error("Writer is busy with another transaction")]
    Busy,

    /// Another stream engine already owns the device's bulk streams
    #[error("Device is already streaming")]
    AlreadyStreaming,

    /// The stream engine has shut down
    #[error("Stream engine has shut down")]
    EngineShutDown,
}

impl GsUsbError {
    /// Check if this error is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            GsUsbError::WriteTimeout
                | GsUsbError::LoopbackTimeout
                | GsUsbError::ResponseTimeout
                | GsUsbError::Usb(rusb::Error::Timeout)
        )
    }

    /// Check if this error is a USB error
    pub fn is_usb_error(&self) -> bool {
        matches!(
            self,
            GsUsbError::Usb(_)
                | GsUsbError::ClaimInterface(_)
                | GsUsbError::DetachKernelDriver(_)
                | GsUsbError::ControlTransfer(_)
                | GsUsbError::BulkTransfer(_)
                | GsUsbError::WriteFailed(_)
        )
    }

    /// Check if a new transaction may succeed after this error
    ///
    /// Transaction-time failures leave the engine streaming; only
    /// `EngineShutDown` requires a new engine.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            GsUsbError::LoopbackTimeout
                | GsUsbError::ResponseTimeout
                | GsUsbError::WriteTimeout
                | GsUsbError::WriteFailed(_)
                | GsUsbError::ShortWrite { .. }
                | GsUsbError::Busy
        )
    }
}
