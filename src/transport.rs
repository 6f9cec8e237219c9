//! Transport abstraction for GS-USB adapters
//!
//! The driver needs three things from the USB layer: vendor control transfers
//! and one bulk stream in each direction. Production uses [`crate::usb`]
//! (rusb); tests use an in-memory transport.
//!
//! Reads are cancelled by dropping the returned future. The engine only
//! does that while shutting down, so an implementation may discard a
//! transfer that was in flight at that point.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Control and stream access to one adapter.
pub trait Transport: Send + Sync + 'static {
    /// Vendor device-to-host control transfer.
    ///
    /// Returns the bytes the device actually sent, which may be fewer than
    /// `length`; callers check the size against their layout.
    fn control_in(&self, request: u8, value: u16, length: usize) -> Result<Vec<u8>>;

    /// Vendor host-to-device control transfer.
    fn control_out(&self, request: u8, value: u16, data: &[u8]) -> Result<()>;

    /// Open the inbound (device to host) bulk stream.
    fn open_in_stream(&self) -> Result<Box<dyn InStream>>;

    /// Open the outbound (host to device) bulk stream.
    fn open_out_stream(&self) -> Result<Box<dyn OutStream>>;
}

/// Inbound bulk stream.
#[async_trait]
pub trait InStream: Send + 'static {
    /// Wait for the next transfer and copy it into `buf`.
    ///
    /// Blocks until data arrives; any error means the device is gone.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
}

/// Outbound bulk stream.
#[async_trait]
pub trait OutStream: Send + 'static {
    /// Write `buf` as one transfer within `timeout`.
    ///
    /// Must return by itself once `timeout` has passed: the engine awaits the
    /// write to completion. Fails with `WriteTimeout` when the deadline passes
    /// and `WriteFailed` for any other transfer error. If the future is
    /// dropped anyway, the next write must not overlap the abandoned one.
    async fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize>;
}
