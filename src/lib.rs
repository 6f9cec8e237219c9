//! Streaming GS-USB driver for Rust
//!
//! This crate drives CAN adapters speaking the gs_usb protocol (candleLight,
//! CANable and compatibles) from the host side. A background reader keeps the
//! inbound endpoint drained and hands every received frame to a callback,
//! while request/response exchanges borrow the inbound stream for the length
//! of one transaction.
//!
//! # Features
//!
//! - Classic CAN bit timing for 48 MHz and 80 MHz adapters (10 kbit/s to 1 Mbit/s)
//! - Ordered asynchronous frame delivery with a startup settle window
//! - Exclusive write/loopback/response transactions with timeouts
//! - Device queries: capabilities, timestamp, termination, user id, bus state
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use gs_usb_stream::{EngineConfig, GsUsb, ModeFlags, StreamEngine, UsbTransport};
//!
//! #[tokio::main]
//! async fn main() -> gs_usb_stream::Result<()> {
//!     let Some(transport) = UsbTransport::scan()?.into_iter().next() else {
//!         println!("No GS-USB device found");
//!         return Ok(());
//!     };
//!
//!     let mut dev = GsUsb::open(transport)?;
//!     dev.configure(250_000, ModeFlags::empty())?;
//!
//!     let engine = StreamEngine::start(&dev, EngineConfig::default(), |frame| {
//!         println!("RX  {}", frame);
//!     })
//!     .await?;
//!
//!     let (id, data) = engine
//!         .write_and_read_simple(0x3F0, [0; 8], Duration::from_millis(500))
//!         .await?;
//!     println!("reply from {:X}: {:02X?}", id, data);
//!     Ok(())
//! }
//! ```
//!
//! # Supported Devices
//!
//! - GS-USB devices (VID: 0x1D50, PID: 0x606F)
//! - candleLight (VID: 0x1209, PID: 0x2323)
//! - CES CANext FD (VID: 0x1CD2, PID: 0x606F)
//! - ABE CANdebugger FD (VID: 0x16D0, PID: 0x10B8)

pub mod constants;
pub mod device;
pub mod engine;
pub mod error;
pub mod frame;
pub mod structures;
pub mod timing;
pub mod transport;
pub mod usb;

#[cfg(test)]
mod mock;
mod scope;

// Re-export main types at crate root
pub use constants::{
    // CAN ID flags
    CAN_EFF_FLAG,
    // CAN ID masks
    CAN_EFF_MASK,
    CAN_ERR_FLAG,
    CAN_MAX_DLC,
    CAN_MAX_DLEN,
    CAN_RTR_FLAG,
    CAN_SFF_MASK,
    // Wire format
    GS_USB_FRAME_SIZE,
    GS_USB_FRAME_SIZE_HW_TIMESTAMP,
    GS_USB_RX_ECHO_ID,
    // CAN state constants
    GS_CAN_STATE_BUS_OFF,
    GS_CAN_STATE_ERROR_ACTIVE,
    GS_CAN_STATE_ERROR_PASSIVE,
    GS_CAN_STATE_ERROR_WARNING,
    GS_CAN_STATE_SLEEPING,
    GS_CAN_STATE_STOPPED,
};

pub use device::GsUsb;
pub use engine::{EchoMatch, EngineConfig, EngineStats, StreamEngine};
pub use error::{GsUsbError, Result};
pub use frame::{pack_flags, unpack_flags, Frame, FrameFlags};
pub use structures::{
    BitTiming, CanMode, DeviceCapabilities, DeviceConfig, DeviceMode, DeviceState,
    ExtendedCapabilities, Features, IdentifyMode, ModeFlags, Termination, TimingLimits,
};
pub use transport::{InStream, OutStream, Transport};
pub use usb::{UsbConfig, UsbTransport};
